#[cfg(feature = "asi")]
mod asi;
mod driver;
mod handle;
mod simulated;

#[cfg(feature = "asi")]
pub use asi::AsiCamera;
pub use driver::{CameraDriver, ControlValues};
pub use handle::{CameraHandle, CameraHandleBuilder};
pub use simulated::{SimulatedCamera, SimulatedProbe, SimulatedScene};
