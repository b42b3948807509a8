//! Where captured images end up.
//!
//! The two storage policies are [`FilePersistence`] strategies selected by
//! [`PersistenceMode`]. The orchestrator drives both the same way:
//!
//! ```text
//! begin (once) -> [ prepare -> capture -> file added -> persist ] per exposure
//! ```

use crate::camera::session::CameraSession;
use crate::config::{CameraConfig, PersistenceMode};
use crate::error::RigResult;
use crate::hardware::capabilities::{DeviceFile, FileKind};
use crate::sweep::naming::{device_file_name, host_file_name};
use crate::sweep::plan::SweepPlan;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Final location of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredFile {
    /// Downloaded to the host file system.
    Host(PathBuf),
    /// Left on the camera's storage card.
    Device(DeviceFile),
}

impl fmt::Display for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredFile::Host(path) => write!(f, "{}", path.display()),
            StoredFile::Device(file) => write!(f, "camera:{file}"),
        }
    }
}

/// Storage policy for captured images.
#[async_trait]
pub trait FilePersistence: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deterministic name of the capture at `(position, step)`.
    fn target_name(&self, plan: &SweepPlan, position: u32, step: u32) -> String;

    /// `capturetarget` value this policy wants, if any.
    fn capture_target(&self) -> Option<&str> {
        None
    }

    /// Whether the camera must be able to pre-assign capture names.
    fn needs_preassigned_names(&self) -> bool {
        false
    }

    /// Called once before the first position.
    async fn begin(&self) -> RigResult<()> {
        Ok(())
    }

    /// Called after configuration is applied and before the shutter fires.
    async fn prepare(&self, _session: &mut CameraSession<'_>, _target_name: &str) -> RigResult<()> {
        Ok(())
    }

    /// Called once the camera reported the file.
    async fn persist(
        &self,
        session: &mut CameraSession<'_>,
        captured: &DeviceFile,
        target_name: &str,
    ) -> RigResult<StoredFile>;
}

/// Download every capture into a host directory.
#[derive(Debug, Clone)]
pub struct HostTransfer {
    output_dir: PathBuf,
}

impl HostTransfer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl FilePersistence for HostTransfer {
    fn name(&self) -> &'static str {
        "host_transfer"
    }

    fn target_name(&self, plan: &SweepPlan, position: u32, step: u32) -> String {
        host_file_name(plan, position, step)
    }

    async fn begin(&self) -> RigResult<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        debug!("Saving captures to {}", self.output_dir.display());
        Ok(())
    }

    async fn persist(
        &self,
        session: &mut CameraSession<'_>,
        captured: &DeviceFile,
        target_name: &str,
    ) -> RigResult<StoredFile> {
        let target = self.output_dir.join(target_name);
        session.fetch_file(captured, &target).await?;
        Ok(StoredFile::Host(target))
    }
}

/// Keep captures on the card under pre-assigned names.
#[derive(Debug, Clone)]
pub struct OnDevice {
    folder: String,
}

impl OnDevice {
    /// `capturetarget` value selecting the memory card.
    pub const CARD_TARGET: &'static str = "1";

    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

#[async_trait]
impl FilePersistence for OnDevice {
    fn name(&self) -> &'static str {
        "on_device"
    }

    fn target_name(&self, plan: &SweepPlan, position: u32, step: u32) -> String {
        device_file_name(plan, position, step)
    }

    fn capture_target(&self) -> Option<&str> {
        Some(Self::CARD_TARGET)
    }

    fn needs_preassigned_names(&self) -> bool {
        true
    }

    async fn prepare(&self, session: &mut CameraSession<'_>, target_name: &str) -> RigResult<()> {
        session
            .set_file_metadata(&self.folder, target_name, FileKind::Normal)
            .await
    }

    async fn persist(
        &self,
        _session: &mut CameraSession<'_>,
        captured: &DeviceFile,
        target_name: &str,
    ) -> RigResult<StoredFile> {
        if captured.name != target_name {
            warn!(
                "Camera stored {} instead of pre-assigned name {}",
                captured, target_name
            );
        }
        Ok(StoredFile::Device(captured.clone()))
    }
}

/// Build the strategy selected by `camera.persistence`.
pub fn persistence_for(camera: &CameraConfig, plan: &SweepPlan) -> Box<dyn FilePersistence> {
    match camera.persistence {
        PersistenceMode::HostTransfer => Box::new(HostTransfer::new(plan.output_path())),
        PersistenceMode::OnDevice => Box::new(OnDevice::new(camera.device_folder.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepSettings;

    fn plan() -> SweepPlan {
        SweepPlan::new(&SweepSettings {
            n_views: 3,
            n_exposures: 2,
            output_path: PathBuf::from("/data/lf"),
            ..SweepSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_strategy_follows_mode() {
        let plan = plan();
        let mut camera = CameraConfig::default();

        let host = persistence_for(&camera, &plan);
        assert_eq!(host.name(), "host_transfer");
        assert_eq!(host.capture_target(), None);
        assert!(!host.needs_preassigned_names());
        assert_eq!(host.target_name(&plan, 1, 1), "capt_001_1.arw");

        camera.persistence = PersistenceMode::OnDevice;
        let device = persistence_for(&camera, &plan);
        assert_eq!(device.name(), "on_device");
        assert_eq!(device.capture_target(), Some("1"));
        assert!(device.needs_preassigned_names());
        assert_eq!(device.target_name(&plan, 2, 1), "capt-005-1000[+2.0].arw");
    }

    #[test]
    fn test_stored_file_display() {
        let host = StoredFile::Host(PathBuf::from("/data/lf/capt_000_0.arw"));
        assert_eq!(host.to_string(), "/data/lf/capt_000_0.arw");

        let device = StoredFile::Device(DeviceFile::new("/DCIM", "capt-000-0000[+0.0].arw"));
        assert_eq!(device.to_string(), "camera:/DCIM/capt-000-0000[+0.0].arw");
    }
}
