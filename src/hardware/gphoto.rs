//! libgphoto2 camera backend.
//!
//! Wraps the `gphoto2` crate behind [`CameraBackend`]. The library calls are
//! blocking, so every call runs inside `block_in_place` on the multi-threaded
//! runtime.
//!
//! Note: This driver requires libgphoto2 to be installed and is only built
//! with `--features gphoto`.

use crate::error::{RigError, RigResult};
use crate::hardware::capabilities::{CameraBackend, CameraEvent, ConfigTree, DeviceFile, FileKind};
use async_trait::async_trait;
use gphoto2::camera::CameraEvent as GpEvent;
use gphoto2::widget::Widget;
use gphoto2::{Camera, Context};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration keys read into the [`ConfigTree`].
const TRACKED_KEYS: [&str; 3] = ["shutterspeed", "iso", "capturetarget"];

/// Camera reached through libgphoto2 autodetection.
pub struct GphotoCamera {
    context: Context,
    camera: Option<Camera>,
}

impl GphotoCamera {
    /// Create a libgphoto2 context. No camera is claimed until `init`.
    pub fn new() -> RigResult<Self> {
        let context = Context::new().map_err(protocol_error)?;
        Ok(Self {
            context,
            camera: None,
        })
    }

    fn camera(&self) -> RigResult<&Camera> {
        self.camera
            .as_ref()
            .ok_or_else(|| RigError::DeviceProtocol("camera not initialised".to_string()))
    }
}

fn protocol_error(err: gphoto2::Error) -> RigError {
    RigError::DeviceProtocol(err.to_string())
}

fn init_error(err: gphoto2::Error) -> RigError {
    use gphoto2::error::ErrorKind;
    match err.kind() {
        ErrorKind::ModelNotFound => RigError::DeviceNotFound(err.to_string()),
        ErrorKind::CameraBusy => RigError::DeviceBusy(err.to_string()),
        _ => RigError::DeviceProtocol(err.to_string()),
    }
}

fn widget_value(widget: &Widget) -> Option<String> {
    match widget {
        Widget::Text(w) => Some(w.value()),
        Widget::Radio(w) => Some(w.choice()),
        _ => None,
    }
}

fn set_widget_value(name: &str, widget: &Widget, value: &str) -> RigResult<()> {
    match widget {
        Widget::Text(w) => w.set_value(value).map_err(protocol_error),
        Widget::Radio(w) => w.set_choice(value).map_err(protocol_error),
        _ => Err(RigError::DeviceProtocol(format!(
            "configuration widget '{name}' is not settable from text"
        ))),
    }
}

#[async_trait]
impl CameraBackend for GphotoCamera {
    async fn init(&mut self) -> RigResult<()> {
        if self.camera.is_some() {
            return Err(RigError::DeviceBusy("camera already claimed".to_string()));
        }
        let camera = tokio::task::block_in_place(|| self.context.autodetect_camera().wait())
            .map_err(init_error)?;
        info!("Connected to {}", camera.abilities().model());
        self.camera = Some(camera);
        Ok(())
    }

    async fn exit(&mut self) -> RigResult<()> {
        // Dropping the handle runs gp_camera_exit.
        self.camera = None;
        Ok(())
    }

    async fn config(&mut self) -> RigResult<ConfigTree> {
        let camera = self.camera()?;
        tokio::task::block_in_place(|| {
            let mut values = Vec::new();
            for key in TRACKED_KEYS {
                match camera.config_key::<Widget>(key).wait() {
                    Ok(widget) => {
                        if let Some(value) = widget_value(&widget) {
                            values.push((key, value));
                        }
                    }
                    Err(err) => debug!("Camera has no '{}' setting: {}", key, err),
                }
            }
            Ok(values.into_iter().collect())
        })
    }

    async fn set_config(&mut self, tree: &ConfigTree) -> RigResult<()> {
        let camera = self.camera()?;
        tokio::task::block_in_place(|| {
            for (name, value) in tree.changes() {
                let widget = camera
                    .config_key::<Widget>(name)
                    .wait()
                    .map_err(|_| RigError::UnsupportedParameter(name.to_string()))?;
                set_widget_value(name, &widget, value)?;
                camera.set_config(&widget).wait().map_err(protocol_error)?;
            }
            Ok(())
        })
    }

    async fn capture(&mut self) -> RigResult<DeviceFile> {
        let camera = self.camera()?;
        let path = tokio::task::block_in_place(|| camera.capture_image().wait())
            .map_err(protocol_error)?;
        Ok(DeviceFile::new(path.folder(), path.name()))
    }

    async fn wait_for_event(&mut self, timeout: Duration) -> RigResult<CameraEvent> {
        let camera = self.camera()?;
        let event = tokio::task::block_in_place(|| camera.wait_event(timeout).wait())
            .map_err(protocol_error)?;
        Ok(match event {
            GpEvent::Timeout => CameraEvent::Timeout,
            GpEvent::NewFile(path) => CameraEvent::FileAdded(DeviceFile::new(path.folder(), path.name())),
            GpEvent::CaptureComplete => CameraEvent::CaptureComplete,
            other => CameraEvent::Other(format!("{other:?}")),
        })
    }

    async fn download(
        &mut self,
        file: &DeviceFile,
        _kind: FileKind,
        target: &Path,
    ) -> RigResult<()> {
        let camera = self.camera()?;
        tokio::task::block_in_place(|| {
            camera
                .fs()
                .download_to(&file.folder, &file.name, target)
                .wait()
        })
        .map_err(protocol_error)?;
        Ok(())
    }

    fn can_preassign_names(&self) -> bool {
        false
    }

    async fn set_file_info(&mut self, folder: &str, name: &str, _kind: FileKind) -> RigResult<()> {
        // gp_camera_file_set_info is not exposed by the safe bindings.
        Err(RigError::DeviceProtocol(format!(
            "cannot pre-assign '{name}' in '{folder}': file info is read-only through libgphoto2 bindings"
        )))
    }

    async fn list_files(&mut self, folder: &str) -> RigResult<Vec<String>> {
        let camera = self.camera()?;
        let files = tokio::task::block_in_place(|| camera.fs().list_files(folder).wait())
            .map_err(protocol_error)?;
        Ok(files.collect())
    }

    async fn list_folders(&mut self, folder: &str) -> RigResult<Vec<String>> {
        let camera = self.camera()?;
        let folders = tokio::task::block_in_place(|| camera.fs().list_folders(folder).wait())
            .map_err(protocol_error)?;
        Ok(folders.collect())
    }
}
