//! Rig configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`lightfield.toml` by default)
//! 2. environment variables prefixed with `LIGHTFIELD_`, nested keys split on `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! LIGHTFIELD_SIMULATE=true
//! LIGHTFIELD_SWEEP__N_VIEWS=9
//! LIGHTFIELD_CAMERA__PERSISTENCE=on_device
//! LIGHTFIELD_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example file
//!
//! ```toml
//! simulate = false
//!
//! [application]
//! log_level = "info"
//!
//! [sweep]
//! n_views = 11
//! n_exposures = 3
//! stops = 2.0
//! base_exposure = 0.01
//! output_path = "captures"
//! file_extension = "arw"
//!
//! [stage]
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//!
//! [camera]
//! iso = "100"
//! persistence = "host_transfer"
//!
//! [timeouts]
//! connect_retry_interval = "2s"
//! file_added_poll = "1s"
//! file_added_poll_max = "8s"
//! ```

use crate::error_recovery::RetryPolicy;
use crate::sweep::SweepPlan;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "lightfield.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "LIGHTFIELD_CONFIG";

const ENV_PREFIX: &str = "LIGHTFIELD_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level rig configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    /// Run against simulated devices instead of the serial stage and camera.
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "lightfield-rig".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Parameters of one rig sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Number of equally spaced stops along the travel range (>= 2).
    pub n_views: u32,
    /// Number of bracketed exposures per stop (>= 1).
    pub n_exposures: u32,
    /// Exposure-value increment between bracket steps.
    pub stops: f64,
    /// Shutter speed of the first bracket step, in seconds.
    pub base_exposure: f64,
    /// Host directory receiving transferred images.
    pub output_path: PathBuf,
    /// Image file extension, with or without the leading dot.
    pub file_extension: String,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            n_views: 11,
            n_exposures: 3,
            stops: 2.0,
            base_exposure: 0.01,
            output_path: PathBuf::from("captures"),
            file_extension: "arw".to_string(),
        }
    }
}

/// Serial motion controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Serial port (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// Appended to every command. The stock firmware expects none.
    pub command_terminator: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            command_terminator: String::new(),
        }
    }
}

/// Where captured images end up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Download every capture to `sweep.output_path` as `capt_PPP_E.ext`.
    #[default]
    HostTransfer,
    /// Pre-assign `capt-SSS-DDDD[+E.E].ext` names and leave files on the card.
    OnDevice,
}

/// Camera parameters applied at every position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub iso: String,
    /// `capturetarget` value; `None` uses the persistence mode's preference.
    pub capture_target: Option<String>,
    pub persistence: PersistenceMode,
    /// Device folder used when pre-assigning on-device names.
    pub device_folder: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            iso: "100".to_string(),
            capture_target: None,
            persistence: PersistenceMode::default(),
            device_folder: "/".to_string(),
        }
    }
}

/// Retry timing for camera connection and capture completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Pause between camera connection attempts.
    #[serde(with = "humantime_serde")]
    pub connect_retry_interval: Duration,
    /// Give up connecting after this many attempts. Unset retries forever.
    pub connect_max_attempts: Option<u32>,
    /// Budget of the first file-added poll.
    #[serde(with = "humantime_serde")]
    pub file_added_poll: Duration,
    /// Largest budget a single poll grows to.
    #[serde(with = "humantime_serde")]
    pub file_added_poll_max: Duration,
    /// Fail the capture after this many polls. Unset polls forever.
    pub file_added_max_polls: Option<u32>,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_retry_interval: Duration::from_secs(2),
            connect_max_attempts: None,
            file_added_poll: Duration::from_secs(1),
            file_added_poll_max: Duration::from_secs(8),
            file_added_max_polls: None,
        }
    }
}

impl TimeoutSettings {
    /// Fixed-interval policy for `DeviceNotFound` retries.
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.connect_retry_interval).with_max_attempts(self.connect_max_attempts)
    }

    /// Growing-budget policy for the file-added poll.
    pub fn file_added_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.file_added_poll, self.file_added_poll_max)
            .with_max_attempts(self.file_added_max_polls)
    }
}

impl RigConfig {
    /// Load configuration from the file named by `LIGHTFIELD_CONFIG`, falling
    /// back to [`DEFAULT_CONFIG_PATH`], then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(path)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error: every section has defaults.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|err| ConfigError::LoadError(Box::new(err)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks the log level, the sweep parameters, the serial port and the
    /// file-added poll budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        SweepPlan::new(&self.sweep)
            .map_err(|err| ConfigError::ValidationError(err.to_string()))?;

        if !self.simulate && self.stage.port.is_empty() {
            return Err(ConfigError::ValidationError(
                "stage.port cannot be empty".to_string(),
            ));
        }

        if self.timeouts.file_added_poll.is_zero() || self.timeouts.file_added_poll_max.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeouts.file_added_poll and timeouts.file_added_poll_max must be greater than zero"
                    .to_string(),
            ));
        }

        if self.camera.iso.is_empty() {
            return Err(ConfigError::ValidationError(
                "camera.iso cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let config = RigConfig::load_from("/nonexistent/lightfield.toml").unwrap();
        assert_eq!(config.sweep, SweepSettings::default());
        assert_eq!(config.camera.persistence, PersistenceMode::HostTransfer);
        assert_eq!(config.timeouts.connect_retry_interval, Duration::from_secs(2));
        assert!(!config.simulate);
    }

    #[test]
    #[serial]
    fn test_load_sweep_from_file() {
        let file = write_config(
            r#"
simulate = true

[sweep]
n_views = 3
n_exposures = 2
stops = 2.0
base_exposure = 0.01
output_path = "/tmp/lf"
file_extension = ".arw"

[camera]
persistence = "on_device"

[timeouts]
connect_retry_interval = "250ms"
file_added_max_polls = 5
"#,
        );

        let config = RigConfig::load_from(file.path()).unwrap();
        assert!(config.simulate);
        assert_eq!(config.sweep.n_views, 3);
        assert_eq!(config.sweep.n_exposures, 2);
        assert_eq!(config.sweep.output_path, PathBuf::from("/tmp/lf"));
        assert_eq!(config.camera.persistence, PersistenceMode::OnDevice);
        assert_eq!(
            config.timeouts.connect_retry_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.timeouts.file_added_max_polls, Some(5));
        // untouched fields keep their defaults
        assert_eq!(config.camera.iso, "100");
    }

    #[test]
    #[serial]
    fn test_single_view_is_rejected() {
        let file = write_config("[sweep]\nn_views = 1\n");
        let err = RigConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("n_views"));
    }

    #[test]
    #[serial]
    fn test_zero_poll_budget_is_rejected() {
        for timeouts in [
            "file_added_poll = \"0s\"",
            "file_added_poll_max = \"0s\"",
        ] {
            let file = write_config(&format!("[timeouts]\n{timeouts}\n"));
            let err = RigConfig::load_from(file.path()).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)));
            assert!(err.to_string().contains("file_added_poll"));
        }
    }

    #[test]
    #[serial]
    fn test_invalid_log_level() {
        let file = write_config("[application]\nlog_level = \"chatty\"\n");
        let err = RigConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[sweep]\nn_views = 3\n");
        std::env::set_var("LIGHTFIELD_SWEEP__N_VIEWS", "7");
        let result = RigConfig::load_from(file.path());
        std::env::remove_var("LIGHTFIELD_SWEEP__N_VIEWS");

        assert_eq!(result.unwrap().sweep.n_views, 7);
    }

    #[test]
    fn test_policies_follow_timeouts() {
        let timeouts = TimeoutSettings {
            connect_retry_interval: Duration::from_millis(5),
            connect_max_attempts: Some(4),
            file_added_poll: Duration::from_millis(10),
            file_added_poll_max: Duration::from_millis(40),
            file_added_max_polls: None,
        };

        assert_eq!(timeouts.connect_policy().delays().count(), 4);
        let polls: Vec<_> = timeouts.file_added_policy().delays().take(4).collect();
        assert_eq!(
            polls,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(40),
            ]
        );
    }
}
