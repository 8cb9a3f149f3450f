use crate::config::{ExposurePolicy, ScheduleConfig};
use crate::sky::SkyPhase;
use std::fmt;

/// Kind of file a capture produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Debayered preview written as JPEG
    LiveJpeg,
    /// Raw mosaic written as FIT, with a dark-corrected JPEG beside it
    CalibratedFit,
    /// Raw mosaic written as a 16-bit TIFF (single snaps only)
    RawTiff,
}

impl CaptureMode {
    pub fn extension(&self) -> &'static str {
        match self {
            CaptureMode::LiveJpeg => "jpg",
            CaptureMode::CalibratedFit => "fit",
            CaptureMode::RawTiff => "tif",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureMode::LiveJpeg => "live JPEG",
            CaptureMode::CalibratedFit => "calibrated FIT",
            CaptureMode::RawTiff => "raw TIFF",
        })
    }
}

/// When a live capture re-runs the exposure quality check first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recalibration {
    EveryCapture,
    /// Only when the reference capture is due (or nothing was calibrated yet)
    WithReference,
}

/// What the scheduler does in one sky phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhasePlan {
    pub phase: SkyPhase,
    pub mode: CaptureMode,
    pub policy: ExposurePolicy,
    pub recalibration: Recalibration,
    /// Also store a FIT when the live exposure exceeds the configured threshold
    pub fit_on_long_exposure: bool,
}

impl PhasePlan {
    pub fn for_phase(phase: SkyPhase, schedule: &ScheduleConfig) -> Self {
        let (policy, recalibration, fit_on_long_exposure) = match phase {
            SkyPhase::Day => (schedule.day, Recalibration::WithReference, false),
            SkyPhase::CivilNearTransition => {
                (schedule.near_transition, Recalibration::EveryCapture, false)
            }
            SkyPhase::NauticalTwilight => (schedule.nautical, Recalibration::EveryCapture, true),
            SkyPhase::AstronomicalTwilight | SkyPhase::Night => {
                (schedule.astronomical, Recalibration::EveryCapture, false)
            }
        };
        Self {
            phase,
            mode: CaptureMode::LiveJpeg,
            policy,
            recalibration,
            fit_on_long_exposure,
        }
    }
}
