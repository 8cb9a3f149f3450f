use crate::frame::{RgbFrame16, RgbFrame8};
use tracing::debug;

/// Mid-range value each channel median is scaled to.
pub const WHITE_BALANCE_TARGET: f64 = 32768.0;

fn median_u16(values: &mut [u16]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let (lower, &mut upper, _) = values.select_nth_unstable(n / 2);
    if n % 2 == 1 {
        upper as f64
    } else {
        let below = lower.iter().copied().max().unwrap_or(upper);
        (below as f64 + upper as f64) / 2.0
    }
}

/// Median of channel `c` of an interleaved RGB frame.
pub fn channel_median(frame: &RgbFrame16, c: usize) -> f64 {
    let mut values: Vec<u16> = frame.data.iter().skip(c).step_by(3).copied().collect();
    median_u16(&mut values)
}

/// Scale every channel so its median lands on mid-range, clipping at full scale.
///
/// A channel whose median is zero is left untouched.
pub fn white_balance(frame: &mut RgbFrame16) {
    for c in 0..3 {
        let median = channel_median(frame, c);
        if median <= 0.0 {
            debug!("Channel {} median is zero, skipping white balance", c);
            continue;
        }
        let scale = WHITE_BALANCE_TARGET / median;
        for v in frame.data.iter_mut().skip(c).step_by(3) {
            *v = (*v as f64 * scale).clamp(0.0, u16::MAX as f64) as u16;
        }
    }
}

/// 3x3 per-channel median filter with replicated borders.
pub fn remove_hot_pixels(frame: &RgbFrame16) -> RgbFrame16 {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut out = RgbFrame16::new(frame.width, frame.height);
    let mut window = [0u16; 9];

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let mut k = 0;
                for dy in [-1isize, 0, 1] {
                    let ny = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                    for dx in [-1isize, 0, 1] {
                        let nx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                        window[k] = frame.data[(ny * w + nx) * 3 + c];
                        k += 1;
                    }
                }
                window.sort_unstable();
                out.data[(y * w + x) * 3 + c] = window[4];
            }
        }
    }

    out
}

/// Drop to 8 bits per channel by integer division by 256.
pub fn to_8bit(frame: &RgbFrame16) -> RgbFrame8 {
    RgbFrame8 {
        width: frame.width,
        height: frame.height,
        data: frame.data.iter().map(|&v| (v >> 8) as u8).collect(),
    }
}
