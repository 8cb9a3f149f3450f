//! FITS storage for 2-D sensor frames.
//!
//! Frames are written as 32-bit integer images so unsigned sensor data
//! survives unchanged. Reading accepts any numeric image type produced by
//! other tools; values are rounded and clamped to the u16 range.

use crate::error::{AllskyError, FitsError, Result};
use crate::metadata::CaptureMetadata;
use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::FitsHdu;
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Integer,
    Float,
    Text,
}

/// Keywords this crate reads back; anything else in a file is ignored.
const KEYWORDS: &[(&str, KeyKind)] = &[
    ("GAIN", KeyKind::Integer),
    ("EXPTIME", KeyKind::Float),
    ("CCDTEMP", KeyKind::Float),
    ("DATE", KeyKind::Text),
    ("AUTHOR", KeyKind::Text),
    ("INSTRUME", KeyKind::Text),
    ("TELESCOP", KeyKind::Text),
    ("IMAGETYP", KeyKind::Text),
    ("NCOMBINE", KeyKind::Integer),
    ("COMBTYPE", KeyKind::Text),
    ("DARKFILE", KeyKind::Text),
];

#[derive(Debug, Clone, PartialEq)]
pub enum FitsValue {
    Integer(i64),
    Float(f64),
    String(String),
}

/// Typed view over the calibration and identity keywords of a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, FitsValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: FitsValue) {
        let key = key.to_ascii_uppercase();
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some(card) => card.1 = value,
            None => self.cards.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FitsValue> {
        self.cards.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            FitsValue::Integer(i) => Some(*i),
            FitsValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            FitsValue::Integer(i) => Some(*i as f64),
            FitsValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            FitsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn with_metadata(metadata: &CaptureMetadata) -> Self {
        let mut header = Self::new();
        header.set("GAIN", FitsValue::Integer(metadata.gain as i64));
        header.set("EXPTIME", FitsValue::Float(metadata.exposure_secs));
        header.set("CCDTEMP", FitsValue::Float(metadata.ccd_temp_c));
        header.set("DATE", FitsValue::String(metadata.date.clone()));
        header.set("AUTHOR", FitsValue::String(metadata.author.clone()));
        header.set("INSTRUME", FitsValue::String(metadata.instrument.clone()));
        header.set("TELESCOP", FitsValue::String(metadata.telescope.clone()));
        header
    }

    /// The calibration keys (`GAIN`, `EXPTIME`, `CCDTEMP`) plus whatever identity fields exist.
    pub fn metadata(&self) -> std::result::Result<CaptureMetadata, FitsError> {
        let required = |key: &str| {
            self.get_float(key)
                .ok_or_else(|| FitsError::MissingKeyword(key.to_string()))
        };
        let text = |key: &str| self.get_str(key).unwrap_or_default().to_string();

        Ok(CaptureMetadata {
            gain: required("GAIN")?.max(0.0) as u32,
            exposure_secs: required("EXPTIME")?,
            ccd_temp_c: required("CCDTEMP")?,
            date: text("DATE"),
            author: text("AUTHOR"),
            instrument: text("INSTRUME"),
            telescope: text("TELESCOP"),
        })
    }
}

/// 2-D unsigned 16-bit image with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct FitsImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
    pub header: FitsHeader,
}

/// Write `image` to a sibling temp file, then rename it over `path`.
///
/// A crash mid-write leaves only the temp file, which no reader picks up.
pub async fn write_fits(path: &Path, image: &FitsImage) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    let owned = image.clone();
    let target = tmp.clone();
    task::spawn_blocking(move || write_image_file(&target, &owned))
        .await
        .map_err(|e| AllskyError::system(format!("FITS writer task failed: {}", e)))??;
    fs::rename(&tmp, path).await?;

    debug!("Wrote FITS {} ({}x{})", path.display(), image.width, image.height);
    Ok(())
}

pub async fn read_fits(path: &Path) -> Result<FitsImage> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || read_image_file(&path))
        .await
        .map_err(|e| AllskyError::system(format!("FITS reader task failed: {}", e)))?
        .map_err(AllskyError::from)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_image_file(path: &Path, image: &FitsImage) -> std::result::Result<(), FitsError> {
    let description = ImageDescription {
        data_type: ImageType::Long,
        dimensions: vec![image.width as usize, image.height as usize],
    };

    let mut fptr = FitsFile::create(path).overwrite().open()?;
    let hdu = fptr.create_image("PRIMARY", &description)?;
    let data: Vec<i32> = image.data.iter().map(|&v| v as i32).collect();
    i32::write_image(&mut fptr, &hdu, &data)?;

    for (key, value) in &image.header.cards {
        match value {
            FitsValue::Integer(i) => hdu.write_key(&mut fptr, key, i)?,
            FitsValue::Float(f) => hdu.write_key(&mut fptr, key, f)?,
            FitsValue::String(s) => hdu.write_key(&mut fptr, key, s)?,
        }
    }
    Ok(())
}

fn read_image_file(path: &Path) -> std::result::Result<FitsImage, FitsError> {
    let fptr = FitsFile::open(path)?;

    // The image may sit in the primary HDU or in the first extension.
    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        if hdu.read_key::<i64>(&fptr, "NAXIS").unwrap_or(0) == 2 {
            return read_hdu(&fptr, &hdu);
        }
        hdu_idx += 1;
    }
    Err(FitsError::InvalidFormat(format!(
        "no 2-D image in {}",
        path.display()
    )))
}

fn read_hdu(fptr: &FitsFile, hdu: &FitsHdu) -> std::result::Result<FitsImage, FitsError> {
    let axis = |key: &str| {
        hdu.read_key::<i64>(fptr, key)
            .map_err(|_| FitsError::MissingKeyword(key.to_string()))
    };
    let width = axis("NAXIS1")? as u32;
    let height = axis("NAXIS2")? as u32;

    let values = f64::read_image(fptr, hdu)?;
    let pixels = width as usize * height as usize;
    if values.len() != pixels {
        return Err(FitsError::InvalidFormat(format!(
            "data truncated: expected {} pixels, found {}",
            pixels,
            values.len()
        )));
    }
    let data = values
        .iter()
        .map(|v| v.round().clamp(0.0, u16::MAX as f64) as u16)
        .collect();

    let mut header = FitsHeader::new();
    for &(key, kind) in KEYWORDS {
        let value = match kind {
            KeyKind::Integer => hdu.read_key::<i64>(fptr, key).ok().map(FitsValue::Integer),
            KeyKind::Float => hdu.read_key::<f64>(fptr, key).ok().map(FitsValue::Float),
            KeyKind::Text => hdu.read_key::<String>(fptr, key).ok().map(FitsValue::String),
        };
        if let Some(value) = value {
            header.set(key, value);
        }
    }

    Ok(FitsImage {
        width,
        height,
        data,
        header,
    })
}
