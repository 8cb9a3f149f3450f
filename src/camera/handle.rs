use super::driver::{CameraDriver, ControlValues};
use crate::error::{AllskyError, Result};
use crate::frame::{CaptureSettings, RawFrame};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Exclusively owned camera: the only path to the driver.
pub struct CameraHandle {
    driver: Box<dyn CameraDriver>,
    settings: CaptureSettings,
    max_exposure_us: u64,
    min_exposure_us: u64,
    retry_delay: Duration,
}

impl CameraHandle {
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Settings last applied through this handle
    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }

    pub fn max_exposure_us(&self) -> u64 {
        self.max_exposure_us
    }

    pub fn min_exposure_us(&self) -> u64 {
        self.min_exposure_us
    }

    /// Clamp and apply settings; returns what the sensor was actually given.
    pub async fn apply(&mut self, settings: CaptureSettings) -> Result<CaptureSettings> {
        let clamped = CaptureSettings::new(
            settings
                .exposure_us
                .clamp(self.min_exposure_us, self.max_exposure_us),
            settings.gain,
        );
        if clamped.exposure_us != settings.exposure_us {
            debug!(
                "Exposure {}us clamped to {}us",
                settings.exposure_us, clamped.exposure_us
            );
        }

        self.driver.set_exposure(clamped.exposure_us).await?;
        self.driver.set_gain(clamped.gain).await?;
        self.settings = clamped;
        Ok(clamped)
    }

    /// Capture with the current settings, retrying once after a short delay on transient errors.
    pub async fn capture(&mut self) -> Result<RawFrame> {
        match self.driver.capture().await {
            Ok(frame) => Ok(frame),
            Err(e) if e.is_transient() => {
                warn!(
                    "Capture failed ({}), retrying in {:?}",
                    e, self.retry_delay
                );
                sleep(self.retry_delay).await;
                self.driver.capture().await.map_err(|second| {
                    warn!("Capture retry failed: {}", second);
                    AllskyError::Camera(second)
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn control_values(&mut self) -> Result<ControlValues> {
        Ok(self.driver.control_values().await?)
    }

    /// Sensor temperature in tenths of a degree C
    pub async fn temperature_dc(&mut self) -> Result<i32> {
        Ok(self.control_values().await?.temperature_dc)
    }
}

/// Builder for the owned camera handle
pub struct CameraHandleBuilder {
    driver: Option<Box<dyn CameraDriver>>,
    initial: Option<CaptureSettings>,
    max_exposure_us: u64,
    min_exposure_us: u64,
    retry_delay: Duration,
}

impl CameraHandleBuilder {
    pub fn new() -> Self {
        Self {
            driver: None,
            initial: None,
            max_exposure_us: 10_000_000,
            min_exposure_us: 1,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn driver(mut self, driver: Box<dyn CameraDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn initial_settings(mut self, settings: CaptureSettings) -> Self {
        self.initial = Some(settings);
        self
    }

    pub fn exposure_range(mut self, min_exposure_us: u64, max_exposure_us: u64) -> Self {
        self.min_exposure_us = min_exposure_us.max(1);
        self.max_exposure_us = max_exposure_us.max(self.min_exposure_us);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn build(self) -> Result<CameraHandle> {
        let driver = self
            .driver
            .ok_or_else(|| AllskyError::system("Camera driver must be specified"))?;

        let mut handle = CameraHandle {
            driver,
            settings: CaptureSettings::new(1, 0),
            max_exposure_us: self.max_exposure_us,
            min_exposure_us: self.min_exposure_us,
            retry_delay: self.retry_delay,
        };

        match self.initial {
            Some(initial) => {
                handle.apply(initial).await?;
            }
            None => {
                let values = handle.control_values().await?;
                handle.settings = CaptureSettings::new(values.exposure_us, values.gain);
            }
        }

        info!(
            "Camera {} ready (exposure {}us, gain {})",
            handle.name(),
            handle.settings.exposure_us,
            handle.settings.gain
        );
        Ok(handle)
    }
}

impl Default for CameraHandleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

