//! Light-field sweep: plan, naming, storage strategies and the orchestrator.

pub mod naming;
pub mod orchestrator;
pub mod persistence;
pub mod plan;

pub use naming::{device_file_name, format_shutter_speed, host_file_name};
pub use orchestrator::{CaptureOrchestrator, CapturedFile, SweepReport};
pub use persistence::{persistence_for, FilePersistence, HostTransfer, OnDevice, StoredFile};
pub use plan::{SweepPlan, HOME_POSITION, TRAVEL_UNITS};

use crate::config::RigConfig;
use crate::error::RigResult;
use crate::hardware::capabilities::{CameraBackend, MotionStage};

/// Run one sweep described by `config` on the given devices.
///
/// Sweep parameters are validated before the stage or the camera is used.
pub async fn run_sweep<M, C>(config: &RigConfig, stage: M, camera: C) -> RigResult<SweepReport>
where
    M: MotionStage,
    C: CameraBackend,
{
    CaptureOrchestrator::from_config(config, stage, camera)?
        .run()
        .await
}
