use crate::error::CameraError;
use crate::frame::RawFrame;
use async_trait::async_trait;

/// Current sensor controls as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlValues {
    pub gain: u32,
    pub exposure_us: u64,
    /// Tenths of a degree C
    pub temperature_dc: i32,
}

/// Boundary to a single still-image sensor.
///
/// Calls are strictly sequential; the owning [`super::CameraHandle`] serializes
/// every settings change and capture.
#[async_trait]
pub trait CameraDriver: Send {
    /// Model name used for the `INSTRUME` field.
    fn name(&self) -> &str;

    async fn set_exposure(&mut self, exposure_us: u64) -> Result<(), CameraError>;

    async fn set_gain(&mut self, gain: u32) -> Result<(), CameraError>;

    /// Expose and read out one full frame with the current controls.
    async fn capture(&mut self) -> Result<RawFrame, CameraError>;

    async fn control_values(&mut self) -> Result<ControlValues, CameraError>;
}
