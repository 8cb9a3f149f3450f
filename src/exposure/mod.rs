mod controller;

pub use controller::{
    ConvergenceOutcome, ConvergenceStatus, ExposureController, QualityReport, SettingsSource,
};
