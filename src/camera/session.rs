//! Scoped camera session.
//!
//! A [`CameraSession`] exists between a successful `init` and the matching
//! `exit`. It caches the configuration tree, enforces the
//! `Open -> (Configuring <-> Capturing)* -> Closed` ordering, and turns the
//! raw event stream into the file-added wait the capture loop needs.
//!
//! `close` is async, so it cannot run from `Drop`. Callers close explicitly on
//! every path; a session dropped while open logs a warning.

use crate::error::{RigError, RigResult};
use crate::error_recovery::{PollOutcome, RetryPolicy};
use crate::hardware::capabilities::{CameraBackend, CameraEvent, ConfigTree, DeviceFile, FileKind};
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of a [`CameraSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Open,
    Configuring,
    /// Shutter fired, file-added confirmation outstanding.
    Capturing,
    Closed,
}

/// An initialised camera, borrowed for the duration of one rig position.
pub struct CameraSession<'a> {
    camera: &'a mut dyn CameraBackend,
    state: SessionState,
    config: Option<ConfigTree>,
}

impl<'a> CameraSession<'a> {
    /// Initialise the camera, retrying while it is not connected.
    ///
    /// The first failure of any kind logs a single notice asking for the
    /// camera to be connected. `DeviceNotFound` is then retried on `policy`;
    /// any other error, including `DeviceBusy`, is returned immediately.
    pub async fn open(
        camera: &'a mut dyn CameraBackend,
        policy: &RetryPolicy,
    ) -> RigResult<CameraSession<'a>> {
        let mut session = CameraSession {
            camera,
            state: SessionState::Uninitialized,
            config: None,
        };

        let mut notified = false;
        let mut delays = policy.delays();
        loop {
            let err = match session.camera.init().await {
                Ok(()) => break,
                Err(err) => err,
            };
            if !notified {
                warn!("Waiting for camera to be connected and switched on");
                notified = true;
            }

            if !err.is_device_not_found() {
                session.state = SessionState::Closed;
                return Err(err);
            }
            match delays.next() {
                Some(delay) => {
                    debug!("Camera not found ({}), retrying in {:?}", err, delay);
                    sleep(delay).await;
                }
                None => {
                    session.state = SessionState::Closed;
                    return Err(err);
                }
            }
        }

        session.state = SessionState::Open;
        debug!("Camera session opened");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn ensure_idle(&self, operation: &str) -> RigResult<()> {
        match self.state {
            SessionState::Open | SessionState::Configuring => Ok(()),
            SessionState::Capturing => Err(RigError::DeviceProtocol(format!(
                "cannot {operation} before the previous capture reported its file"
            ))),
            SessionState::Uninitialized | SessionState::Closed => Err(RigError::DeviceProtocol(
                format!("cannot {operation}: camera session is not open"),
            )),
        }
    }

    /// The cached configuration tree, read from the camera on first use.
    pub async fn config(&mut self) -> RigResult<&mut ConfigTree> {
        let tree = match self.config.take() {
            Some(tree) => tree,
            None => self.camera.config().await?,
        };
        Ok(self.config.insert(tree))
    }

    /// Stage a parameter change. Takes effect on [`CameraSession::apply_config`].
    ///
    /// # Errors
    ///
    /// `UnsupportedParameter` when the camera does not expose `name`.
    pub async fn set_parameter(&mut self, name: &str, value: &str) -> RigResult<()> {
        self.ensure_idle("configure")?;
        self.config().await?.set(name, value)?;
        self.state = SessionState::Configuring;
        Ok(())
    }

    /// Like [`CameraSession::set_parameter`], but an unsupported key is
    /// logged and skipped. Returns whether the value was staged.
    pub async fn set_optional_parameter(&mut self, name: &str, value: &str) -> RigResult<bool> {
        match self.set_parameter(name, value).await {
            Ok(()) => Ok(true),
            Err(RigError::UnsupportedParameter(key)) => {
                warn!("Camera does not support '{}', leaving it unchanged", key);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Push staged parameter changes to the camera.
    pub async fn apply_config(&mut self) -> RigResult<()> {
        self.ensure_idle("apply configuration")?;
        let Some(tree) = self.config.as_mut() else {
            return Ok(());
        };
        if !tree.has_changes() {
            return Ok(());
        }

        for (name, value) in tree.changes() {
            debug!("Camera config {} = {}", name, value);
        }
        self.camera.set_config(tree).await?;
        tree.mark_applied();
        self.state = SessionState::Open;
        Ok(())
    }

    /// Pre-assign the name of the next capture. Must precede [`CameraSession::capture`].
    pub async fn set_file_metadata(&mut self, folder: &str, name: &str, kind: FileKind) -> RigResult<()> {
        self.ensure_idle("assign a file name")?;
        self.camera.set_file_info(folder, name, kind).await
    }

    /// Trigger one exposure.
    pub async fn capture(&mut self) -> RigResult<DeviceFile> {
        self.ensure_idle("capture")?;
        if self.config.as_ref().is_some_and(ConfigTree::has_changes) {
            return Err(RigError::DeviceProtocol(
                "configuration changed but not applied before capture".to_string(),
            ));
        }

        let file = self.camera.capture().await?;
        self.state = SessionState::Capturing;
        debug!("Capture triggered, camera reports {}", file);
        Ok(file)
    }

    /// Poll the event stream for up to `timeout`.
    ///
    /// Returns `true` once a file-added event arrives, which also ends the
    /// `Capturing` state. Other events are logged and skipped.
    pub async fn wait_for_file_added(&mut self, timeout: Duration) -> RigResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            // poll at least once, even with a zero budget
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.camera.wait_for_event(remaining).await? {
                CameraEvent::FileAdded(file) => {
                    debug!("Camera added {}", file);
                    if self.state == SessionState::Capturing {
                        self.state = SessionState::Open;
                    }
                    return Ok(true);
                }
                CameraEvent::Timeout => return Ok(false),
                other => debug!("Ignoring camera event {:?}", other),
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    /// Repeat [`CameraSession::wait_for_file_added`] with the budgets of `policy`.
    pub async fn await_file_added(&mut self, policy: &RetryPolicy) -> RigResult<PollOutcome> {
        let mut attempts = 0;
        for budget in policy.delays() {
            attempts += 1;
            if self.wait_for_file_added(budget).await? {
                return Ok(PollOutcome::Ready { attempts });
            }
            debug!("No file-added event after poll {} ({:?})", attempts, budget);
        }
        Ok(PollOutcome::Exhausted { attempts })
    }

    /// Copy a file from camera storage to `local_path`.
    pub async fn fetch_file(&mut self, file: &DeviceFile, local_path: &Path) -> RigResult<()> {
        if self.state == SessionState::Closed {
            return Err(RigError::DeviceProtocol(
                "cannot transfer files: camera session is closed".to_string(),
            ));
        }
        self.camera.download(file, FileKind::Normal, local_path).await?;
        info!("Saved {} to {}", file, local_path.display());
        Ok(())
    }

    /// Names of the files directly inside `folder`.
    pub async fn list_files(&mut self, folder: &str) -> RigResult<Vec<String>> {
        self.camera.list_files(folder).await
    }

    /// Names of the folders directly inside `folder`.
    pub async fn list_folders(&mut self, folder: &str) -> RigResult<Vec<String>> {
        self.camera.list_folders(folder).await
    }

    /// Release the camera.
    pub async fn close(mut self) -> RigResult<()> {
        self.state = SessionState::Closed;
        self.config = None;
        self.camera.exit().await?;
        debug!("Camera session closed");
        Ok(())
    }
}

impl Drop for CameraSession<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            warn!("Camera session dropped without close; device may stay claimed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCamera;
    use tracing_test::traced_test;

    fn fast_connect() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_open_retries_until_connected_with_single_notice() {
        let camera = MockCamera::new().not_found_for(3);
        let mut driver = camera.clone();

        let session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();
        assert_eq!(session.state(), SessionState::Open);
        session.close().await.unwrap();

        assert_eq!(camera.init_calls().await, 4);
        logs_assert(|lines: &[&str]| {
            let notices = lines
                .iter()
                .filter(|line| line.contains("Waiting for camera to be connected"))
                .count();
            if notices == 1 {
                Ok(())
            } else {
                Err(format!("expected one notice, found {notices}"))
            }
        });
    }

    #[tokio::test]
    async fn test_open_gives_up_when_attempts_are_capped() {
        let camera = MockCamera::new().not_found_for(10);
        let mut driver = camera.clone();
        let policy = fast_connect().with_max_attempts(Some(2));

        let err = CameraSession::open(&mut driver, &policy).await.err().unwrap();
        assert!(matches!(err, RigError::DeviceNotFound(_)));
        assert_eq!(camera.init_calls().await, 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_busy_camera_is_not_retried() {
        let camera = MockCamera::new().busy();
        let mut driver = camera.clone();

        let err = CameraSession::open(&mut driver, &fast_connect()).await.err().unwrap();
        assert!(matches!(err, RigError::DeviceBusy(_)));
        assert_eq!(camera.init_calls().await, 1);
        assert!(logs_contain("Waiting for camera to be connected"));
    }

    #[tokio::test]
    async fn test_parameters_reach_camera_on_apply() {
        let camera = MockCamera::new();
        let mut driver = camera.clone();
        let mut session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();

        session.set_parameter("shutterspeed", "0.04").await.unwrap();
        assert_eq!(session.state(), SessionState::Configuring);
        assert_eq!(camera.parameter("shutterspeed").await.as_deref(), Some("1/100"));

        session.apply_config().await.unwrap();
        assert_eq!(camera.parameter("shutterspeed").await.as_deref(), Some("0.04"));
        assert_eq!(session.state(), SessionState::Open);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_optional_parameter_tolerates_unsupported_key() {
        let camera = MockCamera::new().without_parameter("capturetarget");
        let mut driver = camera.clone();
        let mut session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();

        assert!(!session.set_optional_parameter("capturetarget", "1").await.unwrap());
        assert!(session.set_optional_parameter("iso", "100").await.unwrap());

        let err = session.set_parameter("capturetarget", "1").await.unwrap_err();
        assert!(matches!(err, RigError::UnsupportedParameter(_)));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_blocks_reconfiguration_until_file_added() {
        let camera = MockCamera::new();
        let mut driver = camera.clone();
        let mut session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();

        session.capture().await.unwrap();
        assert_eq!(session.state(), SessionState::Capturing);
        assert!(session.set_parameter("iso", "200").await.is_err());
        assert!(session.capture().await.is_err());

        let outcome = session
            .await_file_added(&RetryPolicy::fixed(Duration::from_millis(5)).with_max_attempts(Some(3)))
            .await
            .unwrap();
        assert!(outcome.is_ready());
        assert_eq!(session.state(), SessionState::Open);
        session.set_parameter("iso", "200").await.unwrap();

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unapplied_changes_block_capture() {
        let mut driver = MockCamera::new();
        let mut session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();

        session.set_parameter("iso", "100").await.unwrap();
        assert!(session.capture().await.is_err());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_budget_still_polls_camera() {
        let camera = MockCamera::new();
        let mut driver = camera.clone();
        let mut session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();

        session.capture().await.unwrap();
        // capture-complete arrives first, the file on the next poll
        assert!(!session.wait_for_file_added(Duration::ZERO).await.unwrap());
        assert!(session.wait_for_file_added(Duration::ZERO).await.unwrap());
        assert_eq!(camera.event_polls().await, 2);
        assert_eq!(session.state(), SessionState::Open);

        session.capture().await.unwrap();
        let policy = RetryPolicy::fixed(Duration::ZERO).with_max_attempts(Some(5));
        let outcome = session.await_file_added(&policy).await.unwrap();
        assert_eq!(outcome, PollOutcome::Ready { attempts: 2 });

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_added_exhausts_policy() {
        let camera = MockCamera::new().never_adds_files();
        let mut driver = camera.clone();
        let mut session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();

        session.capture().await.unwrap();
        let policy = RetryPolicy::fixed(Duration::from_millis(2)).with_max_attempts(Some(4));
        let outcome = session.await_file_added(&policy).await.unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 4 });
        assert_eq!(session.state(), SessionState::Capturing);
        assert!(camera.event_polls().await >= 4);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_camera() {
        let camera = MockCamera::new();
        let mut driver = camera.clone();
        let session = CameraSession::open(&mut driver, &fast_connect()).await.unwrap();
        assert!(camera.is_initialized().await);

        session.close().await.unwrap();
        assert!(!camera.is_initialized().await);
        assert_eq!(camera.exit_calls().await, 1);
    }
}
