//! Capability traits for the two devices a sweep drives.
//!
//! - [`MotionStage`]: position commands plus the "in position" barrier.
//! - [`CameraBackend`]: the camera-control transport (lifecycle, configuration
//!   tree, capture, event stream, storage access).
//!
//! Both are implemented by real drivers (`serial_stage`, `gphoto`) and by the
//! simulated devices in `hardware::mock`.

use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Capability for the linear/rotary stage carrying the camera.
#[async_trait]
pub trait MotionStage: Send {
    /// Command an absolute move on the 0..=1000 travel scale. Does not wait.
    async fn move_to(&mut self, position_units: u32) -> RigResult<()>;

    /// Block until the controller reports that the last move completed.
    ///
    /// Returns the raw status line without its terminator. No timeout is
    /// applied here.
    async fn wait_ready(&mut self) -> RigResult<Vec<u8>>;
}

/// A file in camera storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceFile {
    pub folder: String,
    pub name: String,
}

impl DeviceFile {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }

    /// Full device path (`folder/name`).
    pub fn path(&self) -> String {
        join_device_path(&self.folder, &self.name)
    }
}

impl fmt::Display for DeviceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Join a device folder and an entry name with exactly one `/`.
pub fn join_device_path(folder: &str, name: &str) -> String {
    if folder.ends_with('/') {
        format!("{folder}{name}")
    } else {
        format!("{folder}/{name}")
    }
}

/// Which representation of a stored image to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    /// The image as written by the camera.
    #[default]
    Normal,
    /// Unprocessed sensor data, where the camera keeps it separately.
    Raw,
}

/// Event reported by the camera while it is being polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    /// Nothing happened within the wait budget.
    Timeout,
    /// A new file is complete in camera storage.
    FileAdded(DeviceFile),
    /// A capture finished without (yet) producing a file.
    CaptureComplete,
    /// Anything else, carried as text for logging.
    Other(String),
}

/// Snapshot of the camera configuration tree, flattened to `name -> value`.
///
/// Only keys the attached model exposes are present. Edits are tracked so
/// backends can push just the changed entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    values: BTreeMap<String, String>,
    changed: BTreeSet<String>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`, if the camera exposes it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Set an existing parameter.
    ///
    /// # Errors
    ///
    /// `UnsupportedParameter` when the camera does not expose `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> RigResult<()> {
        let slot = self
            .values
            .get_mut(name)
            .ok_or_else(|| RigError::UnsupportedParameter(name.to_string()))?;
        *slot = value.into();
        self.changed.insert(name.to_string());
        Ok(())
    }

    /// Entries edited since the tree was read or last applied.
    pub fn changes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.changed
            .iter()
            .filter_map(|name| self.values.get(name).map(|v| (name.as_str(), v.as_str())))
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn mark_applied(&mut self) {
        self.changed.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigTree {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            changed: BTreeSet::new(),
        }
    }
}

/// Camera-control transport.
///
/// Errors follow the rig taxonomy: `init` reports `DeviceNotFound` or
/// `DeviceBusy`, everything else reports `DeviceProtocol`.
#[async_trait]
pub trait CameraBackend: Send {
    /// Claim and initialise the camera.
    async fn init(&mut self) -> RigResult<()>;

    /// Release the camera.
    async fn exit(&mut self) -> RigResult<()>;

    /// Read the configuration tree.
    async fn config(&mut self) -> RigResult<ConfigTree>;

    /// Push the changed entries of `tree` to the camera.
    async fn set_config(&mut self, tree: &ConfigTree) -> RigResult<()>;

    /// Trigger one exposure and report where the image is stored.
    async fn capture(&mut self) -> RigResult<DeviceFile>;

    /// Wait up to `timeout` for the next camera event.
    async fn wait_for_event(&mut self, timeout: Duration) -> RigResult<CameraEvent>;

    /// Copy a stored file to the host.
    async fn download(&mut self, file: &DeviceFile, kind: FileKind, target: &Path)
        -> RigResult<()>;

    /// Whether [`CameraBackend::set_file_info`] can name the next capture.
    ///
    /// Answered without touching the device.
    fn can_preassign_names(&self) -> bool {
        true
    }

    /// Assign the name the next capture in `folder` will be stored under.
    async fn set_file_info(&mut self, folder: &str, name: &str, kind: FileKind) -> RigResult<()>;

    /// Names of the files directly inside `folder`.
    async fn list_files(&mut self, folder: &str) -> RigResult<Vec<String>>;

    /// Names of the folders directly inside `folder`.
    async fn list_folders(&mut self, folder: &str) -> RigResult<Vec<String>>;
}
