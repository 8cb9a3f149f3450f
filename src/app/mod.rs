mod commands;
mod orchestrator;
mod runtime;
mod startup;
mod types;


pub use orchestrator::AllskyOrchestrator;
pub use runtime::request_shutdown;
pub use types::{PhaseReport, ShutdownReason, SnapRequest};
