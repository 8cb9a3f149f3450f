use super::driver::{CameraDriver, ControlValues};
use crate::error::CameraError;
use crate::frame::{CaptureSettings, RawFrame};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Static sky seen by the simulated sensor.
///
/// Each pixel has a rate in 8-bit preview levels per second at gain 0, so the
/// response is linear in exposure until it clips at full scale.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedScene {
    pub width: u32,
    pub height: u32,
    pub rates: Vec<f64>,
    /// Offset added to every pixel, in preview levels
    pub bias: f64,
}

impl SimulatedScene {
    pub fn uniform(width: u32, height: u32, rate: f64) -> Self {
        Self {
            width,
            height,
            rates: vec![rate; width as usize * height as usize],
            bias: 0.0,
        }
    }

    /// `bright_per_25` of every 25 pixels use `bright_rate`, the rest `dim_rate`.
    pub fn two_level(width: u32, height: u32, dim_rate: f64, bright_rate: f64, bright_per_25: usize) -> Self {
        let rates = (0..width as usize * height as usize)
            .map(|i| if i % 25 < bright_per_25 { bright_rate } else { dim_rate })
            .collect();
        Self {
            width,
            height,
            rates,
            bias: 0.0,
        }
    }

    /// Closed-shell scene: small bias, weak thermal signal and a sprinkle of hot pixels.
    pub fn dark(width: u32, height: u32) -> Self {
        let rates = (0..width as usize * height as usize)
            .map(|i| if i % 97 == 0 { 12.0 } else { 0.3 + (i % 7) as f64 * 0.05 })
            .collect();
        Self {
            width,
            height,
            rates,
            bias: 2.0,
        }
    }

    /// Preview level of pixel `index`, before clipping.
    pub fn level(&self, index: usize, settings: CaptureSettings) -> f64 {
        self.rates[index] * settings.exposure_secs() * gain_factor(settings.gain) + self.bias
    }

    fn render(&self, settings: CaptureSettings) -> Vec<u16> {
        (0..self.rates.len())
            .map(|i| (self.level(i, settings) * 256.0).round().clamp(0.0, u16::MAX as f64) as u16)
            .collect()
    }
}

/// Analog gain in units of 0.1 dB.
pub fn gain_factor(gain: u32) -> f64 {
    10f64.powf(gain as f64 / 200.0)
}

#[derive(Debug, Default)]
struct ProbeState {
    captures: AtomicUsize,
    pending_failures: AtomicUsize,
    max_exposure_seen: AtomicU64,
    temperature_dc: AtomicI32,
}

/// Shared view into a simulated camera that stays usable after the camera moves into a handle.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    state: Arc<ProbeState>,
}

impl SimulatedProbe {
    pub fn captures(&self) -> usize {
        self.state.captures.load(Ordering::SeqCst)
    }

    /// Make the next `count` captures fail with a transient error
    pub fn fail_next(&self, count: usize) {
        self.state.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn max_exposure_seen(&self) -> u64 {
        self.state.max_exposure_seen.load(Ordering::SeqCst)
    }

    pub fn set_temperature_dc(&self, temperature_dc: i32) {
        self.state.temperature_dc.store(temperature_dc, Ordering::SeqCst);
    }
}

pub struct SimulatedCamera {
    name: String,
    scene: SimulatedScene,
    settings: CaptureSettings,
    state: Arc<ProbeState>,
}

impl SimulatedCamera {
    pub fn new(scene: SimulatedScene, temperature_dc: i32) -> Self {
        let state = Arc::new(ProbeState::default());
        state.temperature_dc.store(temperature_dc, Ordering::SeqCst);
        Self {
            name: "Simulated ASI".to_string(),
            scene,
            settings: CaptureSettings::new(1_000_000, 0),
            state,
        }
    }

    pub fn probe(&self) -> SimulatedProbe {
        SimulatedProbe {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl CameraDriver for SimulatedCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_exposure(&mut self, exposure_us: u64) -> Result<(), CameraError> {
        self.settings = CaptureSettings::new(exposure_us, self.settings.gain);
        Ok(())
    }

    async fn set_gain(&mut self, gain: u32) -> Result<(), CameraError> {
        self.settings = CaptureSettings::new(self.settings.exposure_us, gain);
        Ok(())
    }

    async fn capture(&mut self) -> Result<RawFrame, CameraError> {
        let pending = self.state.pending_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.pending_failures.store(pending - 1, Ordering::SeqCst);
            return Err(CameraError::Capture {
                details: "simulated readout failure".to_string(),
            });
        }

        self.state.captures.fetch_add(1, Ordering::SeqCst);
        self.state
            .max_exposure_seen
            .fetch_max(self.settings.exposure_us, Ordering::SeqCst);
        debug!(
            "Simulated capture at {}us gain {}",
            self.settings.exposure_us, self.settings.gain
        );

        Ok(RawFrame::new(
            self.scene.width,
            self.scene.height,
            self.scene.render(self.settings),
            self.state.temperature_dc.load(Ordering::SeqCst),
            self.settings,
            Utc::now(),
        ))
    }

    async fn control_values(&mut self) -> Result<ControlValues, CameraError> {
        Ok(ControlValues {
            gain: self.settings.gain,
            exposure_us: self.settings.exposure_us,
            temperature_dc: self.state.temperature_dc.load(Ordering::SeqCst),
        })
    }
}
