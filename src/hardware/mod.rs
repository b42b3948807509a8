//! Device drivers and the capability traits they implement.

pub mod capabilities;
#[cfg(feature = "gphoto")]
pub mod gphoto;
pub mod mock;
pub mod serial_stage;

pub use capabilities::{
    CameraBackend, CameraEvent, ConfigTree, DeviceFile, FileKind, MotionStage,
};
#[cfg(feature = "gphoto")]
pub use gphoto::GphotoCamera;
pub use mock::{MockCamera, MockStage};
pub use serial_stage::SerialStage;
