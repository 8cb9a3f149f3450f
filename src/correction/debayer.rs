use crate::frame::RgbFrame16;

/// Channel index (0=R, 1=G, 2=B) of a sensor site in the RGGB mosaic.
#[inline]
pub fn rggb_channel(x: usize, y: usize) -> usize {
    match (x & 1, y & 1) {
        (0, 0) => 0,
        (1, 1) => 2,
        _ => 1,
    }
}

/// Stretch samples linearly so the darkest maps to 0 and the brightest to 65535.
///
/// A flat input maps to all zeros.
pub fn normalize(data: &[u16]) -> Vec<u16> {
    let (Some(&min), Some(&max)) = (data.iter().min(), data.iter().max()) else {
        return Vec::new();
    };
    if max == min {
        return vec![0; data.len()];
    }

    let span = (max - min) as f64;
    data.iter()
        .map(|&v| ((v - min) as f64 / span * 65535.0) as u16)
        .collect()
}

/// Bilinear demosaic of an RGGB mosaic.
///
/// Each missing channel is the mean of the same-colour sites in the 3x3
/// neighbourhood; sites outside the frame are skipped.
pub fn debayer_rggb(width: u32, height: u32, mosaic: &[u16]) -> RgbFrame16 {
    let (w, h) = (width as usize, height as usize);
    let mut rgb = RgbFrame16::new(width, height);

    for y in 0..h {
        for x in 0..w {
            let own = rggb_channel(x, y);
            let out = (y * w + x) * 3;

            let mut sums = [0u32; 3];
            let mut counts = [0u32; 3];
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let c = rggb_channel(nx, ny);
                    sums[c] += mosaic[ny * w + nx] as u32;
                    counts[c] += 1;
                }
            }

            for c in 0..3 {
                rgb.data[out + c] = if c == own {
                    mosaic[y * w + x]
                } else if counts[c] > 0 {
                    (sums[c] / counts[c]) as u16
                } else {
                    0
                };
            }
        }
    }

    rgb
}
