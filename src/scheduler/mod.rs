//! Capture cadence driven by the sky phase.
//!
//! Every cycle recomputes the phase from the wall clock, picks the phase plan,
//! optionally re-checks the exposure, takes the live capture and, once per
//! reference interval, a gain 0 FIT. Nothing but the status record and the
//! reference timer survives between cycles.

mod capture;
mod output;
mod policy;

pub use capture::{CaptureScheduler, CaptureSchedulerBuilder, CycleReport};
pub use output::{corrected_path, OutputLayout, REFERENCE_PREFIX};
pub use policy::{CaptureMode, PhasePlan, Recalibration};
