use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllskyError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("FITS error: {0}")]
    Fits(#[from] FitsError),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl AllskyError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// True when the process cannot continue because no sensor is present.
    pub fn is_camera_missing(&self) -> bool {
        matches!(
            self,
            AllskyError::Camera(CameraError::NotFound) | AllskyError::Camera(CameraError::SdkUnavailable { .. })
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("No camera detected")]
    NotFound,

    #[error("Camera SDK unavailable: {details}")]
    SdkUnavailable { details: String },

    #[error("SDK call {call} failed with code {code}")]
    Sdk { call: &'static str, code: i32 },

    #[error("Camera configuration failed: {details}")]
    Configuration { details: String },

    #[error("Capture failed: {details}")]
    Capture { details: String },

    #[error("Frame timeout after {timeout:?}")]
    FrameTimeout { timeout: Duration },

    #[error("Camera disconnected")]
    Disconnected,
}

impl CameraError {
    /// Errors worth one more attempt after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CameraError::Capture { .. } | CameraError::FrameTimeout { .. } | CameraError::Sdk { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("No dark frame available for {temperature_dc} dC, {exposure_secs} s, gain {gain}")]
    Unavailable {
        temperature_dc: i32,
        exposure_secs: u32,
        gain: u32,
    },

    #[error("Dark frame {dark_width}x{dark_height} does not match light frame {light_width}x{light_height}")]
    DimensionMismatch {
        light_width: u32,
        light_height: u32,
        dark_width: u32,
        dark_height: u32,
    },

    #[error("Dark capture conditions not met: {reason}")]
    ConditionsNotMet { reason: String },
}

#[derive(Error, Debug)]
pub enum FitsError {
    #[error("Invalid FITS format: {0}")]
    InvalidFormat(String),

    #[error("FITS I/O error: {0}")]
    Library(#[from] fitsio::compat::errors::Error),

    #[error("Missing required keyword: {0}")]
    MissingKeyword(String),
}

pub type Result<T> = std::result::Result<T, AllskyError>;
