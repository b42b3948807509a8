//! One-shot capture: open the camera, take one picture, download it, release.

use crate::camera::session::CameraSession;
use crate::error::{RigError, RigResult};
use crate::error_recovery::{PollOutcome, RetryPolicy};
use crate::hardware::capabilities::CameraBackend;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Capture one image and save it in `target_dir` under the name the camera
/// assigned to it.
///
/// The download starts only after the camera reported the file on
/// `file_added_policy`; exhausting it fails with `FileAddedTimeout`.
/// The camera is released on every path. A failed release after a successful
/// capture is reported as the error; a failed release after a failed capture
/// is only logged.
pub async fn capture_single_image(
    camera: &mut dyn CameraBackend,
    connect_policy: &RetryPolicy,
    file_added_policy: &RetryPolicy,
    target_dir: &Path,
) -> RigResult<PathBuf> {
    tokio::fs::create_dir_all(target_dir).await?;

    let mut session = CameraSession::open(camera, connect_policy).await?;
    let result = capture_and_fetch(&mut session, file_added_policy, target_dir).await;

    match (result, session.close().await) {
        (Ok(path), Ok(())) => {
            info!("Captured single image to {}", path.display());
            Ok(path)
        }
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), close_result) => {
            if let Err(close_err) = close_result {
                warn!("Failed to release camera after error: {}", close_err);
            }
            Err(err)
        }
    }
}

async fn capture_and_fetch(
    session: &mut CameraSession<'_>,
    file_added_policy: &RetryPolicy,
    target_dir: &Path,
) -> RigResult<PathBuf> {
    let file = session.capture().await?;
    if let PollOutcome::Exhausted { attempts } = session.await_file_added(file_added_policy).await? {
        return Err(RigError::FileAddedTimeout { polls: attempts });
    }

    let target = target_dir.join(&file.name);
    session.fetch_file(&file, &target).await?;
    Ok(target)
}
