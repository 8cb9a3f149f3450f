use crate::scheduler::CaptureMode;
use crate::sky::SkyPhase;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
}

/// One-off capture requested from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapRequest {
    /// Fixed exposure; the current camera value when unset
    pub exposure_us: Option<u64>,
    pub gain: Option<u32>,
    pub mode: CaptureMode,
    /// Output file; a timestamped name in the night directory when unset
    pub output: Option<PathBuf>,
    /// Run the quality check with auto-fix for the current phase first
    pub auto_exposure: bool,
}

impl Default for SnapRequest {
    fn default() -> Self {
        Self {
            exposure_us: None,
            gain: None,
            mode: CaptureMode::LiveJpeg,
            output: None,
            auto_exposure: false,
        }
    }
}

/// Sky phase at an instant as seen from the configured site.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub at: DateTime<Utc>,
    pub phase: Option<SkyPhase>,
    pub sun_altitude_deg: f64,
    pub next_transition: Option<(DateTime<Utc>, SkyPhase)>,
}
