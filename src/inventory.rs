//! Recursive listing of camera storage.

use crate::camera::session::CameraSession;
use crate::error::RigResult;
use crate::error_recovery::RetryPolicy;
use crate::hardware::capabilities::{join_device_path, CameraBackend};
use tracing::{debug, warn};

/// Every file under `root`, as full device paths.
///
/// Files of a folder come before the contents of its subfolders; subfolders
/// are visited depth-first in the order the camera lists them.
pub async fn list_files(session: &mut CameraSession<'_>, root: &str) -> RigResult<Vec<String>> {
    let mut result = Vec::new();
    let mut pending = vec![root.to_string()];

    while let Some(folder) = pending.pop() {
        for name in session.list_files(&folder).await? {
            result.push(join_device_path(&folder, &name));
        }

        let subfolders = session.list_folders(&folder).await?;
        debug!("{}: {} subfolder(s)", folder, subfolders.len());
        pending.extend(
            subfolders
                .iter()
                .rev()
                .map(|name| join_device_path(&folder, name)),
        );
    }

    Ok(result)
}

/// Open a session, list everything under `root`, close the session.
pub async fn camera_inventory(
    camera: &mut dyn CameraBackend,
    connect_policy: &RetryPolicy,
    root: &str,
) -> RigResult<Vec<String>> {
    let mut session = CameraSession::open(camera, connect_policy).await?;
    let listed = list_files(&mut session, root).await;
    match (listed, session.close().await) {
        (Ok(files), Ok(())) => Ok(files),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                warn!("Failed to release camera after error: {}", close_err);
            }
            Err(err)
        }
    }
}
