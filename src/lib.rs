//! Core library for the light-field capture rig.
//!
//! A sweep moves a camera along a motorised slider, stopping at `n_views`
//! equally spaced positions and taking a bracket of `n_exposures` images at
//! each stop. The library is split by device and by concern:
//!
//! - [`hardware`]: the stage and camera capability traits, the serial stage
//!   driver, the libgphoto2 backend (`gphoto` feature) and simulated devices
//! - [`camera`]: the scoped camera session and one-shot capture
//! - [`sweep`]: sweep validation, file naming, storage strategies and the
//!   capture orchestrator
//! - [`inventory`]: recursive listing of camera storage
//! - [`config`], [`error`], [`error_recovery`]: configuration, the error
//!   taxonomy and retry timing

pub mod camera;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod inventory;
pub mod sweep;

pub use config::RigConfig;
pub use error::{RigError, RigResult};
pub use sweep::{run_sweep, SweepReport};
