//! Camera access on top of a [`CameraBackend`](crate::hardware::CameraBackend).
//!
//! - [`session`]: the scoped init/configure/capture/close lifecycle
//! - [`snapshot`]: one-shot capture to a host directory

pub mod session;
pub mod snapshot;

pub use session::{CameraSession, SessionState};
pub use snapshot::capture_single_image;
