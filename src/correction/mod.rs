//! Raw Bayer mosaic to viewable 8-bit RGB.
//!
//! Stages run in a fixed order: normalize to the full 16-bit range, RGGB
//! demosaic, per-channel median white balance, 3x3 median hot-pixel filter,
//! then division by 256. Dark subtraction happens before this, in
//! [`crate::darks`].

mod debayer;
mod filters;
#[cfg(test)]
mod tests;

pub use debayer::{debayer_rggb, normalize, rggb_channel};
pub use filters::{channel_median, remove_hot_pixels, to_8bit, white_balance, WHITE_BALANCE_TARGET};

use crate::error::{AllskyError, Result};
use crate::frame::{RawFrame, RgbFrame8};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageBuffer, ImageOutputFormat, Luma};
use std::io::Cursor;
use std::path::Path;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct CorrectionPipeline {
    jpeg_quality: u8,
}

impl CorrectionPipeline {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Run every stage over a mosaic of `width` x `height` samples.
    pub fn process(&self, width: u32, height: u32, mosaic: &[u16]) -> RgbFrame8 {
        let normalized = normalize(mosaic);
        let mut rgb = debayer_rggb(width, height, &normalized);
        white_balance(&mut rgb);
        let filtered = remove_hot_pixels(&rgb);
        to_8bit(&filtered)
    }

    pub fn process_frame(&self, frame: &RawFrame) -> RgbFrame8 {
        self.process(frame.width, frame.height, &frame.data)
    }

    pub fn encode_jpeg(&self, image: &RgbFrame8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality).encode(
            &image.data,
            image.width,
            image.height,
            ColorType::Rgb8,
        )?;
        Ok(out)
    }

    /// Encode and write a JPEG, creating parent directories.
    pub async fn save_jpeg(&self, path: &Path, image: &RgbFrame8) -> Result<()> {
        let bytes = self.encode_jpeg(image)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, &bytes).await?;
        debug!(
            "Wrote {}x{} JPEG ({} bytes) to {}",
            image.width,
            image.height,
            bytes.len(),
            path.display()
        );
        Ok(())
    }
}

/// Raw mosaic as a 16-bit grayscale TIFF, untouched by the pipeline.
pub fn encode_raw_tiff(frame: &RawFrame) -> Result<Vec<u8>> {
    let buffer = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| {
            AllskyError::system(format!(
                "{} samples do not fill a {}x{} frame",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;
    let mut out = Cursor::new(Vec::new());
    buffer.write_to(&mut out, ImageOutputFormat::Tiff)?;
    Ok(out.into_inner())
}

pub async fn save_raw_tiff(path: &Path, frame: &RawFrame) -> Result<()> {
    let bytes = encode_raw_tiff(frame)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, &bytes).await?;
    debug!("Wrote {}x{} raw TIFF to {}", frame.width, frame.height, path.display());
    Ok(())
}

impl Default for CorrectionPipeline {
    fn default() -> Self {
        Self::new(90)
    }
}
