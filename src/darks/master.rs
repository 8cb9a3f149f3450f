use crate::config::CombineMethod;
use crate::error::CalibrationError;
use crate::fits::FitsImage;

/// Per-pixel combination of same-sized raw darks into one master frame.
///
/// The median of an even stack is the mean of its two middle values; both
/// methods round to the nearest integer.
pub fn combine(frames: &[FitsImage], method: CombineMethod) -> Result<Vec<u16>, CalibrationError> {
    let Some(first) = frames.first() else {
        return Ok(Vec::new());
    };
    for frame in &frames[1..] {
        if frame.width != first.width || frame.height != first.height {
            return Err(CalibrationError::DimensionMismatch {
                light_width: first.width,
                light_height: first.height,
                dark_width: frame.width,
                dark_height: frame.height,
            });
        }
    }

    let n = frames.len();
    let mut stack = vec![0u16; n];
    let combined = (0..first.data.len())
        .map(|i| {
            for (slot, frame) in stack.iter_mut().zip(frames) {
                *slot = frame.data[i];
            }
            let value = match method {
                CombineMethod::Median => {
                    stack.sort_unstable();
                    if n % 2 == 1 {
                        stack[n / 2] as f64
                    } else {
                        (stack[n / 2 - 1] as f64 + stack[n / 2] as f64) / 2.0
                    }
                }
                CombineMethod::Mean => {
                    stack.iter().map(|&v| v as f64).sum::<f64>() / n as f64
                }
            };
            value.round() as u16
        })
        .collect();

    Ok(combined)
}
