//! Mock Hardware Implementations
//!
//! Provides simulated hardware devices for testing without physical hardware
//! and for the `simulate = true` mode of the capture binary.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockStage` - Simulated slider that answers every move with a ready line
//! - `MockCamera` - Simulated camera with a storage card and scriptable faults
//!
//! Both are cheap handles over shared state: clone one before handing it to
//! the orchestrator and inspect the clone afterwards.

use crate::error::{RigError, RigResult};
use crate::hardware::capabilities::{
    join_device_path, CameraBackend, CameraEvent, ConfigTree, DeviceFile, FileKind, MotionStage,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::debug;

// =============================================================================
// MockStage - Simulated Motion Stage
// =============================================================================

#[derive(Debug, Default)]
struct StageState {
    commanded: Vec<u32>,
    position: u32,
    pending_ready: usize,
    ready_lines_served: usize,
}

/// Mock slider recording every commanded coordinate.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::new();
/// let mut driver = stage.clone();
/// driver.move_to(500).await?;
/// driver.wait_ready().await?;
/// assert_eq!(stage.commanded().await, vec![500]);
/// ```
#[derive(Clone, Debug)]
pub struct MockStage {
    state: Arc<Mutex<StageState>>,
    answers_moves: bool,
    settle_time: Duration,
}

impl MockStage {
    /// Stage that reports ready after every move.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StageState::default())),
            answers_moves: true,
            settle_time: Duration::ZERO,
        }
    }

    /// Stage that never reports ready on its own.
    pub fn silent() -> Self {
        Self {
            answers_moves: false,
            ..Self::new()
        }
    }

    /// Simulated travel time spent inside `wait_ready`.
    #[must_use]
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Queue a ready line by hand (for stages built with [`MockStage::silent`]).
    pub async fn push_ready(&self) {
        self.state.lock().await.pending_ready += 1;
    }

    /// Every coordinate commanded so far, in order.
    pub async fn commanded(&self) -> Vec<u32> {
        self.state.lock().await.commanded.clone()
    }

    /// Coordinate of the last move.
    pub async fn position(&self) -> u32 {
        self.state.lock().await.position
    }

    /// Number of `wait_ready` calls that returned a line.
    pub async fn ready_lines_served(&self) -> usize {
        self.state.lock().await.ready_lines_served
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionStage for MockStage {
    async fn move_to(&mut self, position_units: u32) -> RigResult<()> {
        let mut state = self.state.lock().await;
        debug!(
            "MockStage: Moving from {} to {}",
            state.position, position_units
        );
        state.commanded.push(position_units);
        state.position = position_units;
        if self.answers_moves {
            state.pending_ready += 1;
        }
        Ok(())
    }

    async fn wait_ready(&mut self) -> RigResult<Vec<u8>> {
        {
            let mut state = self.state.lock().await;
            if state.pending_ready == 0 {
                return Err(RigError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "MockStage: no move in flight, controller would never answer",
                )));
            }
            state.pending_ready -= 1;
            state.ready_lines_served += 1;
        }

        sleep(self.settle_time).await;
        Ok(b"ok".to_vec())
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Folder the mock camera stores new images in.
pub const MOCK_CAPTURE_FOLDER: &str = "/store_00010001/DCIM/100MSDCF";

/// One exposure taken by [`MockCamera`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub file: DeviceFile,
    /// `shutterspeed` in effect when the shutter fired
    pub shutterspeed: Option<String>,
    pub iso: Option<String>,
    pub capturetarget: Option<String>,
}

#[derive(Debug)]
struct CameraState {
    initialized: bool,
    busy: bool,
    not_found_remaining: u32,
    values: BTreeMap<String, String>,
    card: BTreeMap<String, Vec<String>>,
    events: VecDeque<CameraEvent>,
    pending_name: Option<String>,
    next_number: u32,
    never_file_added: bool,
    fail_capture_at: Option<usize>,
    captures: Vec<CaptureRecord>,
    downloads: Vec<PathBuf>,
    init_calls: u32,
    exit_calls: u32,
    event_polls: u32,
    config_pushes: u32,
}

impl Default for CameraState {
    fn default() -> Self {
        let values = [
            ("shutterspeed", "1/100"),
            ("iso", "Auto"),
            ("capturetarget", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            initialized: false,
            busy: false,
            not_found_remaining: 0,
            values,
            card: BTreeMap::new(),
            events: VecDeque::new(),
            pending_name: None,
            next_number: 1,
            never_file_added: false,
            fail_capture_at: None,
            captures: Vec::new(),
            downloads: Vec::new(),
            init_calls: 0,
            exit_calls: 0,
            event_polls: 0,
            config_pushes: 0,
        }
    }
}

/// Mock camera with a simulated storage card.
///
/// Captures are stored as `DSC00001.ARW`, `DSC00002.ARW`, ... unless a name
/// was pre-assigned with `set_file_info`. Every capture queues a file-added
/// event unless [`MockCamera::never_adds_files`] is set.
#[derive(Clone, Debug, Default)]
pub struct MockCamera {
    state: Arc<Mutex<CameraState>>,
    fixed_names: bool,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `attempts` calls to `init` with `DeviceNotFound`.
    #[must_use]
    pub fn not_found_for(self, attempts: u32) -> Self {
        self.modify(|s| s.not_found_remaining = attempts)
    }

    /// Report `DeviceBusy` on every `init`.
    #[must_use]
    pub fn busy(self) -> Self {
        self.modify(|s| s.busy = true)
    }

    /// Drop a configuration key, as on models that lack it.
    #[must_use]
    pub fn without_parameter(self, name: &str) -> Self {
        self.modify(|s| {
            s.values.remove(name);
        })
    }

    /// Never emit file-added events.
    #[must_use]
    pub fn never_adds_files(self) -> Self {
        self.modify(|s| s.never_file_added = true)
    }

    /// Fail the capture with this zero-based index.
    #[must_use]
    pub fn fail_capture_at(self, index: usize) -> Self {
        self.modify(|s| s.fail_capture_at = Some(index))
    }

    /// Refuse to pre-assign file names, like backends without `set_file_info`.
    #[must_use]
    pub fn without_file_naming(self) -> Self {
        Self {
            fixed_names: true,
            ..self
        }
    }

    /// Pre-populate the card with files in `folder`.
    #[must_use]
    pub fn with_files(self, folder: &str, names: &[&str]) -> Self {
        self.modify(|s| {
            s.card
                .entry(folder.to_string())
                .or_default()
                .extend(names.iter().map(|n| n.to_string()));
        })
    }

    fn modify(self, f: impl FnOnce(&mut CameraState)) -> Self {
        // Builders run before the camera is shared, so the lock is free.
        if let Ok(mut state) = self.state.try_lock() {
            f(&mut state);
        }
        self
    }

    pub async fn captures(&self) -> Vec<CaptureRecord> {
        self.state.lock().await.captures.clone()
    }

    pub async fn downloads(&self) -> Vec<PathBuf> {
        self.state.lock().await.downloads.clone()
    }

    pub async fn init_calls(&self) -> u32 {
        self.state.lock().await.init_calls
    }

    pub async fn exit_calls(&self) -> u32 {
        self.state.lock().await.exit_calls
    }

    pub async fn event_polls(&self) -> u32 {
        self.state.lock().await.event_polls
    }

    pub async fn config_pushes(&self) -> u32 {
        self.state.lock().await.config_pushes
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Current value of a configuration key as the camera sees it.
    pub async fn parameter(&self, name: &str) -> Option<String> {
        self.state.lock().await.values.get(name).cloned()
    }

    /// Files on the simulated card, by folder.
    pub async fn card(&self) -> BTreeMap<String, Vec<String>> {
        self.state.lock().await.card.clone()
    }
}

fn require_initialized(state: &CameraState) -> RigResult<()> {
    if state.initialized {
        Ok(())
    } else {
        Err(RigError::DeviceProtocol(
            "MockCamera: not initialised".to_string(),
        ))
    }
}

#[async_trait]
impl CameraBackend for MockCamera {
    async fn init(&mut self) -> RigResult<()> {
        let mut state = self.state.lock().await;
        state.init_calls += 1;

        if state.busy || state.initialized {
            return Err(RigError::DeviceBusy("MockCamera: already claimed".to_string()));
        }
        if state.not_found_remaining > 0 {
            state.not_found_remaining -= 1;
            return Err(RigError::DeviceNotFound("MockCamera: not connected".to_string()));
        }

        state.initialized = true;
        state.events.clear();
        debug!("MockCamera: Initialised");
        Ok(())
    }

    async fn exit(&mut self) -> RigResult<()> {
        let mut state = self.state.lock().await;
        state.exit_calls += 1;
        state.initialized = false;
        debug!("MockCamera: Released");
        Ok(())
    }

    async fn config(&mut self) -> RigResult<ConfigTree> {
        let state = self.state.lock().await;
        require_initialized(&state)?;
        Ok(state.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn set_config(&mut self, tree: &ConfigTree) -> RigResult<()> {
        let mut state = self.state.lock().await;
        require_initialized(&state)?;

        for (name, value) in tree.changes() {
            match state.values.get_mut(name) {
                Some(slot) => *slot = value.to_string(),
                None => return Err(RigError::UnsupportedParameter(name.to_string())),
            }
        }
        state.config_pushes += 1;
        Ok(())
    }

    async fn capture(&mut self) -> RigResult<DeviceFile> {
        let mut state = self.state.lock().await;
        require_initialized(&state)?;

        let index = state.captures.len();
        if state.fail_capture_at == Some(index) {
            return Err(RigError::DeviceProtocol(format!(
                "MockCamera: capture {index} failed"
            )));
        }

        let name = match state.pending_name.take() {
            Some(name) => name,
            None => {
                let number = state.next_number;
                state.next_number += 1;
                format!("DSC{number:05}.ARW")
            }
        };
        let file = DeviceFile::new(MOCK_CAPTURE_FOLDER, name);

        state
            .card
            .entry(file.folder.clone())
            .or_default()
            .push(file.name.clone());
        if !state.never_file_added {
            state.events.push_back(CameraEvent::CaptureComplete);
            state.events.push_back(CameraEvent::FileAdded(file.clone()));
        }

        let record = CaptureRecord {
            file: file.clone(),
            shutterspeed: state.values.get("shutterspeed").cloned(),
            iso: state.values.get("iso").cloned(),
            capturetarget: state.values.get("capturetarget").cloned(),
        };
        state.captures.push(record);

        debug!("MockCamera: Captured {}", file);
        Ok(file)
    }

    async fn wait_for_event(&mut self, timeout: Duration) -> RigResult<CameraEvent> {
        {
            let mut state = self.state.lock().await;
            require_initialized(&state)?;
            state.event_polls += 1;
            if let Some(event) = state.events.pop_front() {
                return Ok(event);
            }
        }

        sleep(timeout).await;
        Ok(CameraEvent::Timeout)
    }

    async fn download(
        &mut self,
        file: &DeviceFile,
        _kind: FileKind,
        target: &Path,
    ) -> RigResult<()> {
        let mut state = self.state.lock().await;
        require_initialized(&state)?;

        let exists = state
            .card
            .get(&file.folder)
            .is_some_and(|names| names.contains(&file.name));
        if !exists {
            return Err(RigError::DeviceProtocol(format!(
                "MockCamera: no such file {file}"
            )));
        }

        tokio::fs::write(target, file.path().as_bytes()).await?;
        state.downloads.push(target.to_path_buf());
        Ok(())
    }

    fn can_preassign_names(&self) -> bool {
        !self.fixed_names
    }

    async fn set_file_info(&mut self, _folder: &str, name: &str, _kind: FileKind) -> RigResult<()> {
        let mut state = self.state.lock().await;
        require_initialized(&state)?;
        if self.fixed_names {
            return Err(RigError::DeviceProtocol(
                "MockCamera: file names cannot be pre-assigned".to_string(),
            ));
        }
        state.pending_name = Some(name.to_string());
        Ok(())
    }

    async fn list_files(&mut self, folder: &str) -> RigResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.card.get(folder).cloned().unwrap_or_default())
    }

    async fn list_folders(&mut self, folder: &str) -> RigResult<Vec<String>> {
        let state = self.state.lock().await;
        let prefix = join_device_path(folder, "");

        let mut folders: Vec<String> = Vec::new();
        for path in state.card.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let Some(child) = rest.split('/').next().filter(|c| !c.is_empty()) else {
                continue;
            };
            if !folders.iter().any(|f| f == child) {
                folders.push(child.to_string());
            }
        }
        Ok(folders)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
