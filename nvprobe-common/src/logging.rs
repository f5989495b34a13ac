//! Structured logging initialization.
//!
//! Console output goes through `tracing-subscriber`; an optional log file is
//! rotated daily by `tracing-appender`. The probe keeps stdout for its report,
//! so binaries normally call [`LogConfig::with_stderr`].

use anyhow::Result;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const ENV_LEVEL: &str = "NVPROBE_LOG_LEVEL";
const ENV_FORMAT: &str = "NVPROBE_LOG_FORMAT";
const ENV_FILE: &str = "NVPROBE_LOG_FILE";
const ENV_TARGETS: &str = "NVPROBE_LOG_TARGETS";

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-friendly output.
    Pretty,
    /// One JSON object per event.
    Json,
    /// Single-line output.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level (trace, debug, info, warn, error, off).
    pub level: String,
    pub format: LogFormat,
    /// Daily-rotated log file, written in addition to the console.
    pub file_path: Option<PathBuf>,
    /// Per-target level overrides.
    pub targets: BTreeMap<String, String>,
    pub with_target: bool,
    pub with_file_line: bool,
    /// Write console logs to stderr instead of stdout.
    pub use_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_path: None,
            targets: BTreeMap::new(),
            with_target: false,
            with_file_line: false,
            use_stderr: false,
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from `NVPROBE_LOG_*` variables.
    ///
    /// - `NVPROBE_LOG_LEVEL`
    /// - `NVPROBE_LOG_FORMAT` (pretty|json|compact)
    /// - `NVPROBE_LOG_FILE`
    /// - `NVPROBE_LOG_TARGETS` (comma-separated `target=level`)
    pub fn from_env(default_level: &str) -> Self {
        let mut config = Self {
            level: std::env::var(ENV_LEVEL).unwrap_or_else(|_| default_level.to_string()),
            ..Self::default()
        };

        if let Some(format) = std::env::var(ENV_FORMAT)
            .ok()
            .and_then(|value| LogFormat::parse(&value))
        {
            config.format = format;
        }

        if let Ok(path) = std::env::var(ENV_FILE) {
            if !path.trim().is_empty() {
                config.file_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(targets) = std::env::var(ENV_TARGETS) {
            config.targets = parse_target_overrides(&targets);
        }

        config
    }

    /// Override the base log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Write console logs to stderr.
    pub fn with_stderr(mut self) -> Self {
        self.use_stderr = true;
        self
    }

    /// Build the effective filter. `RUST_LOG` wins when it parses.
    pub fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }

        let directives = self
            .targets
            .iter()
            .fold(self.level.clone(), |mut acc, (target, level)| {
                acc.push_str(&format!(",{target}={level}"));
                acc
            });
        EnvFilter::new(directives)
    }
}

/// Keeps the background file writer alive; drop it at process exit.
pub struct LoggingGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize tracing for the current process.
///
/// Calling this twice is harmless: the second call keeps the first
/// subscriber and returns fresh guards.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let (writer, file_guard) = build_writer(config);
    let ansi = file_guard.is_none();

    let base = fmt::layer()
        .with_writer(writer)
        .with_target(config.with_target)
        .with_file(config.with_file_line)
        .with_line_number(config.with_file_line);

    let layer = match config.format {
        LogFormat::Pretty => base.with_ansi(ansi).pretty().boxed(),
        LogFormat::Json => base.with_ansi(false).json().boxed(),
        LogFormat::Compact => base.with_ansi(ansi).compact().boxed(),
    };

    let result = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(layer)
        .try_init();

    match result {
        Ok(()) => {}
        Err(err) if err.to_string().contains("already") => {}
        Err(err) => return Err(err.into()),
    }

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

fn build_writer(config: &LogConfig) -> (BoxMakeWriter, Option<WorkerGuard>) {
    let console = if config.use_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let Some(path) = config.file_path.as_ref() else {
        return (console, None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| OsStr::new("nvprobe.log"));
    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    (BoxMakeWriter::new(console.and(file_writer)), Some(guard))
}

fn parse_target_overrides(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|entry| entry.trim().split_once('='))
        .filter_map(|(target, level)| {
            let target = target.trim();
            let level = level.trim().to_ascii_lowercase();
            (!target.is_empty() && is_valid_level(&level)).then(|| (target.to_string(), level))
        })
        .collect()
}

pub(crate) fn is_valid_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off")
}
