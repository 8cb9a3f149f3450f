use crate::config::AllskyConfig;
use crate::frame::{CaptureSettings, RawFrame};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Timestamp layout of the `DATE` field.
pub const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Fixed identity fields stamped on every capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub author: String,
    pub instrument: String,
    pub telescope: String,
}

impl Identity {
    pub fn from_config(config: &AllskyConfig, instrument: &str) -> Self {
        Self {
            author: config.storage.author.clone(),
            instrument: instrument.to_string(),
            telescope: config.storage.telescope.clone(),
        }
    }
}

/// Settings and conditions of one capture, shared by FIT headers and the status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(rename = "GAIN")]
    pub gain: u32,
    /// Seconds
    #[serde(rename = "EXPTIME")]
    pub exposure_secs: f64,
    /// Degrees C
    #[serde(rename = "CCDTEMP")]
    pub ccd_temp_c: f64,
    #[serde(rename = "DATE")]
    pub date: String,
    #[serde(rename = "AUTHOR")]
    pub author: String,
    #[serde(rename = "INSTRUME")]
    pub instrument: String,
    #[serde(rename = "TELESCOP")]
    pub telescope: String,
}

impl CaptureMetadata {
    pub fn describe(frame: &RawFrame, identity: &Identity, tz: Tz) -> Self {
        Self::new(
            frame.settings,
            frame.temperature_dc,
            frame.captured_at,
            identity,
            tz,
        )
    }

    pub fn new(
        settings: CaptureSettings,
        temperature_dc: i32,
        at: DateTime<Utc>,
        identity: &Identity,
        tz: Tz,
    ) -> Self {
        Self {
            gain: settings.gain,
            exposure_secs: settings.exposure_secs(),
            ccd_temp_c: temperature_dc as f64 / 10.0,
            date: at.with_timezone(&tz).format(DATE_FORMAT).to_string(),
            author: identity.author.clone(),
            instrument: identity.instrument.clone(),
            telescope: identity.telescope.clone(),
        }
    }

    pub fn exposure_us(&self) -> u64 {
        (self.exposure_secs * 1_000_000.0).round().max(1.0) as u64
    }

    pub fn temperature_dc(&self) -> i32 {
        (self.ccd_temp_c * 10.0).round() as i32
    }

    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings::new(self.exposure_us(), self.gain)
    }
}
