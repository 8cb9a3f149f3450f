//! Dark-frame calibration library.
//!
//! Files live under `{root}/{temperature}/{exposure}/{gain}/` as
//! `{temperature}_{gain}_{exposure}_{index}.fit` raw samples and one
//! `..._master.fit` per key once enough samples were merged.

mod index;
mod key;
mod library;
mod master;
#[cfg(test)]
mod tests;

pub use index::{DarkIndex, KeyState};
pub use key::{temperature_bucket, DarkFrameKey, SampleIndex};
pub use library::{BuildReport, DarkCorrection, DarkLibrary};
pub use master::combine;
