//! Probe configuration: file, then `NVPROBE_*` environment, then flags.

use crate::alert::DEFAULT_SUBJECT;
use crate::health::HealthThresholds;
use crate::persist::{self, DEFAULT_RESULT_PREFIX, PersistenceError};
use crate::workload::{MatrixError, WorkloadMatrix, WorkloadSpec};
use anyhow::{Context, Result};
use nvprobe_common::{ConfigSource, EnvError, EnvParser, Sourced};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// One day per workload.
pub const MAX_RUNTIME_SECS: u64 = 86_400;
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 3_600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment: {}", join_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("runtime_secs must be between 1 and {MAX_RUNTIME_SECS}, got {0}")]
    RuntimeOutOfRange(u64),

    #[error("command_timeout_secs must be between 1 and {MAX_COMMAND_TIMEOUT_SECS}, got {0}")]
    CommandTimeoutOutOfRange(u64),

    #[error("{0} must not be empty while alerts are enabled")]
    MissingAddress(&'static str),

    #[error("invalid workload matrix: {0}")]
    Matrix(#[from] MatrixError),
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub email_from: String,
    pub email_to: String,
    pub alerts_enabled: bool,
    pub alert_command: String,
    pub alert_subject: String,
    /// Skip discovery and test this device.
    pub device: Option<PathBuf>,
    pub runtime_secs: u64,
    pub pause_ms: u64,
    pub fio_size: String,
    pub ioengine: String,
    pub use_sudo: bool,
    /// Limit for nvme, lsblk and the mail command; fio gets it as grace on
    /// top of its runtime.
    pub command_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
    pub result_prefix: String,
    pub thresholds: HealthThresholds,
    /// Replaces the built-in matrix when present.
    pub workloads: Option<Vec<WorkloadSpec>>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            email_from: "default_from@example.com".to_string(),
            email_to: "default_to@example.com".to_string(),
            alerts_enabled: true,
            alert_command: "msmtp".to_string(),
            alert_subject: DEFAULT_SUBJECT.to_string(),
            device: None,
            runtime_secs: 15,
            pause_ms: 1000,
            fio_size: "100M".to_string(),
            ioengine: "libaio".to_string(),
            use_sudo: false,
            command_timeout_secs: 60,
            log_dir: None,
            result_prefix: DEFAULT_RESULT_PREFIX.to_string(),
            thresholds: HealthThresholds::default(),
            workloads: None,
        }
    }
}

/// Values given on the command line; `None` leaves the setting alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub device: Option<PathBuf>,
    pub runtime_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub no_alerts: bool,
}

impl ProbeConfig {
    /// Layer `NVPROBE_*` variables over the current values and return the
    /// names of the variables that took effect. Every bad variable is
    /// reported, not just the first.
    pub fn apply_env(&mut self, env: &mut EnvParser) -> Result<Vec<String>, ConfigError> {
        let mut applied = Vec::new();
        let device = env.get_optional_path("DEVICE");
        if device.is_set() {
            note_override(&mut applied, "device", &device);
            self.device = device.value;
        }
        let runtime = env.get_u64_range("RUNTIME_SECS", self.runtime_secs, 1, MAX_RUNTIME_SECS);
        if runtime.is_set() {
            note_override(&mut applied, "runtime_secs", &runtime);
            self.runtime_secs = runtime.value;
        }
        let pause = env.get_u64_range("PAUSE_MS", self.pause_ms, 0, 600_000);
        if pause.is_set() {
            note_override(&mut applied, "pause_ms", &pause);
            self.pause_ms = pause.value;
        }
        let from = env.get_optional_string("EMAIL_FROM");
        if let Some(value) = &from.value {
            note_override(&mut applied, "email_from", &from);
            self.email_from = value.clone();
        }
        let to = env.get_optional_string("EMAIL_TO");
        if let Some(value) = &to.value {
            note_override(&mut applied, "email_to", &to);
            self.email_to = value.clone();
        }
        let alerts = env.get_bool("ALERTS_ENABLED", self.alerts_enabled);
        if alerts.is_set() {
            note_override(&mut applied, "alerts_enabled", &alerts);
            self.alerts_enabled = alerts.value;
        }
        let sudo = env.get_bool("USE_SUDO", self.use_sudo);
        if sudo.is_set() {
            note_override(&mut applied, "use_sudo", &sudo);
            self.use_sudo = sudo.value;
        }
        let log_dir = env.get_optional_path("LOG_DIR");
        if log_dir.is_set() {
            note_override(&mut applied, "log_dir", &log_dir);
            self.log_dir = log_dir.value;
        }

        if env.has_errors() {
            return Err(ConfigError::Env(env.take_errors()));
        }
        Ok(applied)
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        let source = ConfigSource::CommandLine;
        if let Some(device) = &cli.device {
            debug!(setting = "device", %source, value = %device.display(), "Config override");
            self.device = Some(device.clone());
        }
        if let Some(runtime) = cli.runtime_secs {
            debug!(setting = "runtime_secs", %source, value = runtime, "Config override");
            self.runtime_secs = runtime;
        }
        if let Some(dir) = &cli.log_dir {
            debug!(setting = "log_dir", %source, value = %dir.display(), "Config override");
            self.log_dir = Some(dir.clone());
        }
        if cli.no_alerts {
            debug!(setting = "alerts_enabled", %source, value = false, "Config override");
            self.alerts_enabled = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RUNTIME_SECS).contains(&self.runtime_secs) {
            return Err(ConfigError::RuntimeOutOfRange(self.runtime_secs));
        }
        if !(1..=MAX_COMMAND_TIMEOUT_SECS).contains(&self.command_timeout_secs) {
            return Err(ConfigError::CommandTimeoutOutOfRange(self.command_timeout_secs));
        }
        if self.alerts_enabled {
            if self.email_from.trim().is_empty() {
                return Err(ConfigError::MissingAddress("email_from"));
            }
            if self.email_to.trim().is_empty() {
                return Err(ConfigError::MissingAddress("email_to"));
            }
        }
        self.workload_matrix()?;
        Ok(())
    }

    /// The configured matrix, or the default one.
    pub fn workload_matrix(&self) -> Result<WorkloadMatrix, MatrixError> {
        match &self.workloads {
            Some(specs) => WorkloadMatrix::new(specs.clone()),
            None => Ok(WorkloadMatrix::default()),
        }
    }

    pub fn result_dir(&self) -> Result<PathBuf, PersistenceError> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => persist::default_log_dir(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

fn note_override<T: fmt::Debug>(applied: &mut Vec<String>, setting: &str, sourced: &Sourced<T>) {
    let var = sourced.env_var.as_deref().unwrap_or_default();
    debug!(setting, source = %sourced.source, var, value = ?sourced.value, "Config override");
    applied.push(var.to_string());
}

/// Get the configuration directory path.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "nvprobe", "nvprobe")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Load configuration from `path`, or from the default location.
///
/// A missing default file yields the built-in defaults; a missing file that
/// was asked for by name is an error.
pub fn load_config(path: Option<&Path>) -> Result<ProbeConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let Some(dir) = config_dir() else {
                debug!("No config directory available, using defaults");
                return Ok(ProbeConfig::default());
            };
            let default_path = dir.join(CONFIG_FILE_NAME);
            if !default_path.exists() {
                debug!("Config not found at {:?}, using defaults", default_path);
                return Ok(ProbeConfig::default());
            }
            default_path
        }
    };

    info!(source = %ConfigSource::File, "Loading config from {:?}", config_path);
    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;
    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<ProbeConfig> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    } else {
        toml::from_str(contents).with_context(|| format!("Failed to parse config from {:?}", path))
    }
}

/// File, environment and flags, validated.
pub fn resolve(path: Option<&Path>, env: &mut EnvParser, cli: &CliOverrides) -> Result<ProbeConfig> {
    let mut config = load_config(path)?;
    let applied = config.apply_env(env)?;
    if !applied.is_empty() {
        info!(vars = ?applied, "Environment overrides applied");
    }
    config.apply_cli(cli);
    config.validate()?;
    Ok(config)
}
