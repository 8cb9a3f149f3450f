pub mod app;
pub mod camera;
pub mod config;
pub mod correction;
pub mod darks;
pub mod error;
pub mod exposure;
pub mod fits;
pub mod frame;
pub mod metadata;
pub mod scheduler;
pub mod shell;
pub mod sky;
pub mod status;

pub use app::{AllskyOrchestrator, PhaseReport, ShutdownReason, SnapRequest};
pub use camera::{CameraDriver, CameraHandle, CameraHandleBuilder};
pub use config::AllskyConfig;
pub use correction::CorrectionPipeline;
pub use darks::{DarkFrameKey, DarkLibrary};
pub use error::{AllskyError, Result};
pub use exposure::{ConvergenceOutcome, ConvergenceStatus, ExposureController};
pub use frame::{CaptureSettings, RawFrame};
pub use scheduler::{CaptureMode, CaptureScheduler, CycleReport};
pub use sky::{SkyPhase, SkyPhaseOracle, SolarOracle};
pub use status::{CameraStatusRecord, StatusStore};
