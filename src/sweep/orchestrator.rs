//! Capture orchestrator: positions x exposures over one stage and one camera.
//!
//! # Sequence
//!
//! ```text
//! move home (m0)
//! for each position:
//!     open camera session (connect retry)
//!     wait for the stage to report ready
//!     apply iso / capturetarget
//!     for each exposure step:
//!         shutterspeed -> apply -> prepare name -> capture -> file added -> persist
//!     close camera session
//!     move to the next coordinate (not after the last position)
//! move home (m0)
//! ```
//!
//! A failure inside a position closes the camera before the error is
//! returned. The stage stays where it last stopped.

use crate::camera::session::CameraSession;
use crate::config::RigConfig;
use crate::error::{RigError, RigResult};
use crate::error_recovery::{PollOutcome, RetryPolicy};
use crate::hardware::capabilities::{CameraBackend, MotionStage};
use crate::sweep::naming::format_shutter_speed;
use crate::sweep::persistence::{persistence_for, FilePersistence, StoredFile};
use crate::sweep::plan::{SweepPlan, HOME_POSITION};
use tracing::{debug, info, warn};

/// One image produced by a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFile {
    pub position: u32,
    pub exposure_step: u32,
    /// Stage coordinate the image was taken at.
    pub coordinate: u32,
    /// Shutter speed in seconds.
    pub shutter_speed: f64,
    pub target_name: String,
    pub stored: StoredFile,
}

/// Outcome of a completed sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Every coordinate sent to the stage, including both homing moves.
    pub commanded_positions: Vec<u32>,
    /// Captures in the order they were taken.
    pub files: Vec<CapturedFile>,
}

/// Everything a position needs besides the two devices.
struct SweepContext {
    plan: SweepPlan,
    persistence: Box<dyn FilePersistence>,
    iso: String,
    capture_target: Option<String>,
    file_added_policy: RetryPolicy,
}

/// Drives a [`MotionStage`] and a [`CameraBackend`] through one sweep.
pub struct CaptureOrchestrator<M, C> {
    stage: M,
    camera: C,
    connect_policy: RetryPolicy,
    context: SweepContext,
}

impl<M, C> CaptureOrchestrator<M, C>
where
    M: MotionStage,
    C: CameraBackend,
{
    /// Orchestrator with the default camera settings and retry timing.
    pub fn new(plan: SweepPlan, stage: M, camera: C, persistence: Box<dyn FilePersistence>) -> Self {
        let config = RigConfig::default();
        let capture_target = persistence.capture_target().map(str::to_string);
        Self {
            stage,
            camera,
            connect_policy: config.timeouts.connect_policy(),
            context: SweepContext {
                plan,
                persistence,
                iso: config.camera.iso,
                capture_target,
                file_added_policy: config.timeouts.file_added_policy(),
            },
        }
    }

    /// Validate `config` and build the orchestrator it describes.
    ///
    /// # Errors
    ///
    /// `Configuration` for invalid sweep parameters, or for a storage mode
    /// the camera backend cannot serve. No device is touched.
    pub fn from_config(config: &RigConfig, stage: M, camera: C) -> RigResult<Self> {
        let plan = SweepPlan::new(&config.sweep)?;
        let persistence = persistence_for(&config.camera, &plan);

        let orchestrator = Self::new(plan, stage, camera, persistence)
            .with_iso(config.camera.iso.clone())
            .with_connect_policy(config.timeouts.connect_policy())
            .with_file_added_policy(config.timeouts.file_added_policy());
        orchestrator.check_storage_support()?;

        Ok(match &config.camera.capture_target {
            Some(target) => orchestrator.with_capture_target(Some(target.clone())),
            None => orchestrator,
        })
    }

    fn check_storage_support(&self) -> RigResult<()> {
        let persistence = &self.context.persistence;
        if persistence.needs_preassigned_names() && !self.camera.can_preassign_names() {
            return Err(RigError::Configuration(format!(
                "{} storage needs pre-assigned file names, which this camera backend cannot set",
                persistence.name()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_iso(mut self, iso: impl Into<String>) -> Self {
        self.context.iso = iso.into();
        self
    }

    /// Override the `capturetarget` the persistence strategy asks for.
    #[must_use]
    pub fn with_capture_target(mut self, target: Option<String>) -> Self {
        self.context.capture_target = target;
        self
    }

    #[must_use]
    pub fn with_connect_policy(mut self, policy: RetryPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    #[must_use]
    pub fn with_file_added_policy(mut self, policy: RetryPolicy) -> Self {
        self.context.file_added_policy = policy;
        self
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.context.plan
    }

    /// Give the devices back.
    pub fn into_parts(self) -> (M, C) {
        (self.stage, self.camera)
    }

    async fn command(&mut self, coordinate: u32, report: &mut SweepReport) -> RigResult<()> {
        self.stage.move_to(coordinate).await?;
        report.commanded_positions.push(coordinate);
        Ok(())
    }

    /// Run the sweep to completion.
    pub async fn run(&mut self) -> RigResult<SweepReport> {
        self.check_storage_support()?;
        let mut report = SweepReport::default();
        self.context.persistence.begin().await?;

        info!(
            "Starting sweep: {} views x {} exposures, storage {}",
            self.context.plan.n_views(),
            self.context.plan.n_exposures(),
            self.context.persistence.name()
        );
        self.command(HOME_POSITION, &mut report).await?;

        for position in self.context.plan.positions() {
            info!(
                "Position {}/{} at {}",
                position + 1,
                self.context.plan.n_views(),
                self.context.plan.coordinate(position)
            );

            let mut session = CameraSession::open(&mut self.camera, &self.connect_policy).await?;
            let captured = capture_position(&self.context, &mut self.stage, &mut session, position).await;
            let closed = session.close().await;

            match (captured, closed) {
                (Ok(files), Ok(())) => report.files.extend(files),
                (Ok(_), Err(close_err)) => return Err(close_err),
                (Err(err), closed) => {
                    if let Err(close_err) = closed {
                        warn!("Failed to release camera after error: {}", close_err);
                    }
                    return Err(err);
                }
            }

            if !self.context.plan.is_last_position(position) {
                let next = self.context.plan.coordinate(position + 1);
                self.command(next, &mut report).await?;
            }
        }

        self.command(HOME_POSITION, &mut report).await?;
        info!("Sweep finished: {} files", report.files.len());
        Ok(report)
    }
}

/// Everything between opening and closing the camera at one position.
async fn capture_position<M: MotionStage>(
    ctx: &SweepContext,
    stage: &mut M,
    session: &mut CameraSession<'_>,
    position: u32,
) -> RigResult<Vec<CapturedFile>> {
    let status = stage.wait_ready().await?;
    debug!("Stage in position: {}", String::from_utf8_lossy(&status));

    session.set_parameter("iso", &ctx.iso).await?;
    if let Some(target) = &ctx.capture_target {
        session.set_optional_parameter("capturetarget", target).await?;
    }

    let plan = &ctx.plan;
    let mut files = Vec::new();
    for step in plan.exposure_steps() {
        let shutter_speed = plan.shutter_speed(step);
        session
            .set_parameter("shutterspeed", &format_shutter_speed(shutter_speed))
            .await?;
        session.apply_config().await?;

        let target_name = ctx.persistence.target_name(plan, position, step);
        ctx.persistence.prepare(session, &target_name).await?;

        let device_file = session.capture().await?;
        match session.await_file_added(&ctx.file_added_policy).await? {
            PollOutcome::Ready { attempts } => {
                debug!("{} confirmed after {} poll(s)", device_file, attempts)
            }
            PollOutcome::Exhausted { attempts } => {
                return Err(RigError::FileAddedTimeout { polls: attempts })
            }
        }

        let stored = ctx
            .persistence
            .persist(session, &device_file, &target_name)
            .await?;
        info!(
            "Captured position {} exposure {} ({} s) -> {}",
            position, step, shutter_speed, stored
        );

        files.push(CapturedFile {
            position,
            exposure_step: step,
            coordinate: plan.coordinate(position),
            shutter_speed,
            target_name,
            stored,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PersistenceMode, SweepSettings};
    use crate::hardware::mock::{MockCamera, MockStage};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config(dir: &TempDir, mode: PersistenceMode) -> RigConfig {
        let mut config = RigConfig::default();
        config.sweep = SweepSettings {
            n_views: 3,
            n_exposures: 2,
            stops: 2.0,
            base_exposure: 0.01,
            output_path: dir.path().to_path_buf(),
            file_extension: "arw".to_string(),
        };
        config.camera.persistence = mode;
        config.timeouts.connect_retry_interval = Duration::from_millis(1);
        config.timeouts.file_added_poll = Duration::from_millis(5);
        config.timeouts.file_added_poll_max = Duration::from_millis(20);
        config
    }

    #[tokio::test]
    async fn test_host_transfer_sweep() {
        let dir = TempDir::new().unwrap();
        let stage = MockStage::new();
        let camera = MockCamera::new();
        let config = fast_config(&dir, PersistenceMode::HostTransfer);

        let mut orchestrator =
            CaptureOrchestrator::from_config(&config, stage.clone(), camera.clone()).unwrap();
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.commanded_positions, vec![0, 500, 1000, 0]);
        assert_eq!(report.files.len(), 6);
        assert_eq!(stage.commanded().await, vec![0, 500, 1000, 0]);

        let speeds: Vec<_> = camera
            .captures()
            .await
            .iter()
            .map(|c| c.shutterspeed.clone().unwrap())
            .collect();
        assert_eq!(speeds, vec!["0.01", "0.04", "0.01", "0.04", "0.01", "0.04"]);

        let names: Vec<_> = report
            .files
            .iter()
            .filter(|f| f.position == 1)
            .map(|f| f.target_name.as_str())
            .collect();
        assert_eq!(names, vec!["capt_001_0.arw", "capt_001_1.arw"]);
        assert!(dir.path().join("capt_002_1.arw").exists());

        assert_eq!(camera.init_calls().await, 3);
        assert_eq!(camera.exit_calls().await, 3);
    }

    #[tokio::test]
    async fn test_iso_applied_and_host_mode_leaves_capture_target() {
        let dir = TempDir::new().unwrap();
        let camera = MockCamera::new();
        let config = fast_config(&dir, PersistenceMode::HostTransfer);

        CaptureOrchestrator::from_config(&config, MockStage::new(), camera.clone())
            .unwrap()
            .run()
            .await
            .unwrap();

        for capture in camera.captures().await {
            assert_eq!(capture.iso.as_deref(), Some("100"));
            assert_eq!(capture.capturetarget.as_deref(), Some("0"));
        }
    }

    #[tokio::test]
    async fn test_on_device_names_are_preassigned() {
        let dir = TempDir::new().unwrap();
        let camera = MockCamera::new();
        let config = fast_config(&dir, PersistenceMode::OnDevice);

        let report = CaptureOrchestrator::from_config(&config, MockStage::new(), camera.clone())
            .unwrap()
            .run()
            .await
            .unwrap();

        let last = report.files.last().unwrap();
        assert_eq!(last.target_name, "capt-005-1000[+2.0].arw");
        assert!(matches!(&last.stored, StoredFile::Device(f) if f.name == last.target_name));
        assert!(camera.downloads().await.is_empty());
        assert!(camera
            .captures()
            .await
            .iter()
            .all(|c| c.capturetarget.as_deref() == Some("1")));
    }

    #[tokio::test]
    async fn test_single_view_rejected_before_any_device_io() {
        let dir = TempDir::new().unwrap();
        let stage = MockStage::new();
        let camera = MockCamera::new();
        let mut config = fast_config(&dir, PersistenceMode::HostTransfer);
        config.sweep.n_views = 1;

        let result = CaptureOrchestrator::from_config(&config, stage.clone(), camera.clone());
        assert!(matches!(result, Err(RigError::Configuration(_))));
        assert!(stage.commanded().await.is_empty());
        assert_eq!(camera.init_calls().await, 0);
    }

    #[tokio::test]
    async fn test_on_device_needs_name_capable_camera() {
        let dir = TempDir::new().unwrap();
        let stage = MockStage::new();
        let camera = MockCamera::new().without_file_naming();
        let config = fast_config(&dir, PersistenceMode::OnDevice);

        let result = CaptureOrchestrator::from_config(&config, stage.clone(), camera.clone());
        let err = result.err().unwrap();
        assert!(matches!(err, RigError::Configuration(_)));
        assert!(err.to_string().contains("pre-assigned file names"));

        let plan = SweepPlan::new(&config.sweep).unwrap();
        let persistence = persistence_for(&config.camera, &plan);
        let err = CaptureOrchestrator::new(plan, stage.clone(), camera.clone(), persistence)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::Configuration(_)));

        assert!(stage.commanded().await.is_empty());
        assert_eq!(camera.init_calls().await, 0);
    }

    #[tokio::test]
    async fn test_host_transfer_works_without_name_assignment() {
        let dir = TempDir::new().unwrap();
        let camera = MockCamera::new().without_file_naming();
        let config = fast_config(&dir, PersistenceMode::HostTransfer);

        let report = CaptureOrchestrator::from_config(&config, MockStage::new(), camera)
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.files.len(), 6);
    }

    #[tokio::test]
    async fn test_capture_failure_closes_camera_and_stops_stage() {
        let dir = TempDir::new().unwrap();
        let stage = MockStage::new();
        // third capture is position 1, exposure 0
        let camera = MockCamera::new().fail_capture_at(2);
        let config = fast_config(&dir, PersistenceMode::HostTransfer);

        let err = CaptureOrchestrator::from_config(&config, stage.clone(), camera.clone())
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, RigError::DeviceProtocol(_)));
        assert_eq!(camera.init_calls().await, 2);
        assert_eq!(camera.exit_calls().await, 2);
        assert!(!camera.is_initialized().await);
        assert_eq!(stage.commanded().await, vec![0, 500]);
    }

    #[tokio::test]
    async fn test_capped_file_added_poll_fails_the_sweep() {
        let dir = TempDir::new().unwrap();
        let camera = MockCamera::new().never_adds_files();
        let mut config = fast_config(&dir, PersistenceMode::HostTransfer);
        config.timeouts.file_added_max_polls = Some(3);

        let err = CaptureOrchestrator::from_config(&config, MockStage::new(), camera.clone())
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, RigError::FileAddedTimeout { polls: 3 }));
        assert_eq!(camera.exit_calls().await, 1);
    }

    #[tokio::test]
    async fn test_into_parts_returns_devices() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(&dir, PersistenceMode::HostTransfer);
        let mut orchestrator =
            CaptureOrchestrator::from_config(&config, MockStage::new(), MockCamera::new()).unwrap();
        orchestrator.run().await.unwrap();

        let (stage, _camera) = orchestrator.into_parts();
        assert_eq!(stage.position().await, 0);
    }
}
