//! Custom error types for the rig.
//!
//! This module defines the primary error type, `RigError`, shared by the stage
//! client, the camera session and the capture orchestrator. Using the
//! `thiserror` crate, it provides a single place where the failure taxonomy of
//! a sweep is spelled out.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceNotFound`**: no camera answered initialisation. This is the only
//!   condition the connect policy retries.
//! - **`DeviceBusy`**: the camera is claimed by another process.
//! - **`DeviceProtocol`**: any other camera-layer failure (configuration
//!   access, capture trigger, file transfer). Aborts the sweep after the
//!   camera session is closed.
//! - **`Configuration`**: invalid sweep parameters, detected before any
//!   hardware I/O.
//! - **`UnsupportedParameter`**: the attached model lacks a configuration key.
//!   Callers decide whether that is fatal.
//! - **`FileAddedTimeout`**: the capture never produced a file-added event
//!   within a configured poll cap.
//! - **`Io`** / **`SerialUnexpectedEof`**: serial line and host file system
//!   failures.
//!
//! By using `#[from]`, `RigError` can be created from the underlying I/O and
//! configuration errors with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] crate::config::ConfigError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera not found: {0}")]
    DeviceNotFound(String),

    #[error("Camera busy: {0}")]
    DeviceBusy(String),

    #[error("Camera protocol error: {0}")]
    DeviceProtocol(String),

    #[error("Configuration parameter '{0}' is not supported by this camera")]
    UnsupportedParameter(String),

    #[error("No file-added event after {polls} polls")]
    FileAddedTimeout { polls: u32 },

    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl RigError {
    /// Whether the connect policy should keep retrying after this error.
    pub fn is_device_not_found(&self) -> bool {
        matches!(self, RigError::DeviceNotFound(_))
    }
}
