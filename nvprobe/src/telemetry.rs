//! SMART telemetry from `nvme smart-log`.
//!
//! The record is kept as the tool emitted it: field names and values vary
//! across nvme-cli versions, and the persisted results carry the raw
//! document. Typed access happens at evaluation time through
//! [`TelemetryRecord::numeric`].

use crate::exec::{CommandError, CommandRunner, CommandSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to run smart-log query: {0}")]
    Command(#[from] CommandError),

    #[error("Command failed with error: {stderr} (exit code {exit_code})")]
    CommandFailure { exit_code: i32, stderr: String },

    #[error("smart-log output is not valid JSON: {0}")]
    ParseFailure(String),

    #[error("smart-log output has unexpected shape: {0}")]
    UnexpectedShape(String),
}

/// Why a field could not be read as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldIssue {
    Missing,
    /// Present but not numeric; carries the raw value.
    Unreadable(Value),
}

/// A numeric SMART value.
///
/// Non-negative integers are kept exact: the error counters are 128-bit in
/// NVMe and must not be rounded through `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Integer(u128),
    Real(f64),
}

impl Reading {
    fn from_json(value: &Value) -> Option<Self> {
        let reading = match value {
            Value::Number(n) => match n.as_u64() {
                Some(int) => Some(Reading::Integer(u128::from(int))),
                None => n.as_f64().map(Reading::Real),
            },
            Value::String(s) => {
                let s = s.trim();
                match s.parse::<u128>() {
                    Ok(int) => Some(Reading::Integer(int)),
                    Err(_) => s.parse::<f64>().ok().map(Reading::Real),
                }
            }
            _ => None,
        };
        reading.filter(|reading| match reading {
            Reading::Integer(_) => true,
            Reading::Real(r) => r.is_finite(),
        })
    }

    /// True when the value is strictly above `limit`. Integers compare
    /// exactly against the integral part of the limit.
    pub fn exceeds(&self, limit: f64) -> bool {
        match *self {
            Reading::Real(value) => value > limit,
            Reading::Integer(_) if limit.is_nan() => false,
            Reading::Integer(_) if limit < 0.0 => true,
            // `as` saturates, so a limit past u128::MAX is never exceeded.
            Reading::Integer(value) => value > limit.floor() as u128,
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            Reading::Integer(value) => value == 0,
            Reading::Real(value) => value == 0.0,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Integer(value) => write!(f, "{value}"),
            Reading::Real(value) => write!(f, "{value}"),
        }
    }
}

/// Raw SMART log as a name → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord(Map<String, Value>);

impl TelemetryRecord {
    /// Parse a smart-log JSON document. Anything other than a JSON object is
    /// rejected.
    pub fn from_json(text: &str) -> Result<Self, TelemetryError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| TelemetryError::ParseFailure(e.to_string()))?;
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(TelemetryError::UnexpectedShape(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Numeric value of `field`. Numeric strings are accepted since some
    /// nvme-cli versions quote their wide counters.
    pub fn numeric(&self, field: &str) -> Result<Reading, FieldIssue> {
        let value = self.0.get(field).ok_or(FieldIssue::Missing)?;
        Reading::from_json(value).ok_or_else(|| FieldIssue::Unreadable(value.clone()))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn without_field(mut self, field: &str) -> Self {
        self.0.remove(field);
        self
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TelemetryRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Queries a device's SMART log via nvme-cli.
#[derive(Debug)]
pub struct SmartLogSource<R> {
    runner: Arc<R>,
    program: String,
    use_sudo: bool,
    timeout: Duration,
}

impl<R: CommandRunner> SmartLogSource<R> {
    pub fn new(runner: Arc<R>, use_sudo: bool, timeout: Duration) -> Self {
        Self {
            runner,
            program: "nvme".to_string(),
            use_sudo,
            timeout,
        }
    }

    /// Override the nvme-cli executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn command(&self, device: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("smart-log")
            .arg(device.display().to_string())
            .args(["-o", "json"])
            .privileged(self.use_sudo)
            .with_timeout(self.timeout)
    }

    /// Fetch the SMART log once. No retries.
    pub async fn fetch(&self, device: &Path) -> Result<TelemetryRecord, TelemetryError> {
        info!(device = %device.display(), "Reading SMART log");
        let output = self.runner.run(&self.command(device)).await?;
        if !output.success() {
            return Err(TelemetryError::CommandFailure {
                exit_code: output.exit_code,
                stderr: output.diagnostic().to_string(),
            });
        }

        let record = TelemetryRecord::from_json(&output.stdout)?;
        debug!(fields = record.len(), "SMART log parsed");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedResponse, ScriptedRunner, smart_log_json};
    use serde_json::json;
    use std::path::PathBuf;

    fn source(runner: ScriptedRunner) -> (Arc<ScriptedRunner>, SmartLogSource<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let source = SmartLogSource::new(runner.clone(), false, Duration::from_secs(5));
        (runner, source)
    }

    #[test]
    fn test_numeric_field_access() {
        let record: TelemetryRecord = [
            ("temperature", json!(310)),
            ("percent_used", json!("12")),
            ("media_errors", json!(null)),
            ("warning_temp_time", json!(1.5)),
            ("host_read_commands", json!("1.5e3")),
        ]
        .into_iter()
        .collect();

        assert_eq!(record.numeric("temperature"), Ok(Reading::Integer(310)));
        assert_eq!(record.numeric("percent_used"), Ok(Reading::Integer(12)));
        assert_eq!(record.numeric("warning_temp_time"), Ok(Reading::Real(1.5)));
        assert_eq!(record.numeric("host_read_commands"), Ok(Reading::Real(1500.0)));
        assert_eq!(record.numeric("media_errors"), Err(FieldIssue::Unreadable(json!(null))));
        assert_eq!(record.numeric("num_err_log_entries"), Err(FieldIssue::Missing));
    }

    #[test]
    fn test_wide_counters_stay_exact() {
        let record: TelemetryRecord = [
            ("media_errors", json!(9_007_199_254_740_993u64)),
            ("num_err_log_entries", json!("340282366920938463463374607431768211455")),
            ("data_units_read", json!("NaN")),
        ]
        .into_iter()
        .collect();

        let media = record.numeric("media_errors").unwrap();
        assert_eq!(media, Reading::Integer(9_007_199_254_740_993));
        assert_eq!(media.to_string(), "9007199254740993");
        assert_eq!(
            record.numeric("num_err_log_entries"),
            Ok(Reading::Integer(u128::MAX))
        );
        assert!(matches!(
            record.numeric("data_units_read"),
            Err(FieldIssue::Unreadable(_))
        ));
    }

    #[test]
    fn test_reading_threshold_comparison() {
        assert!(Reading::Integer(1).exceeds(0.0));
        assert!(!Reading::Integer(0).exceeds(0.0));
        assert!(!Reading::Integer(80).exceeds(80.5));
        assert!(Reading::Integer(81).exceeds(80.5));
        assert!(Reading::Integer(9_007_199_254_740_993).exceeds(9_007_199_254_740_992.0));
        assert!(Reading::Integer(0).exceeds(-1.0));
        assert!(!Reading::Integer(u128::MAX).exceeds(f64::INFINITY));
        assert!(Reading::Real(320.5).exceeds(320.0));
        assert!(Reading::Real(0.0).is_zero());
        assert!(!Reading::Integer(4).is_zero());
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(matches!(
            TelemetryRecord::from_json("[1, 2]"),
            Err(TelemetryError::UnexpectedShape(msg)) if msg.contains("array")
        ));
        assert!(matches!(
            TelemetryRecord::from_json("Usage: nvme smart-log <device>"),
            Err(TelemetryError::ParseFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_parses_record() {
        let (runner, source) = source(
            ScriptedRunner::new().on_program("nvme", ScriptedResponse::stdout(smart_log_json(0, 305, 3, 0, 0))),
        );
        let record = source.fetch(&PathBuf::from("/dev/nvme0n1")).await.unwrap();
        assert_eq!(record.numeric("temperature"), Ok(Reading::Integer(305)));
        assert_eq!(record.numeric("power_on_hours"), Ok(Reading::Integer(4321)));

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to_string(), "nvme smart-log /dev/nvme0n1 -o json");
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_fetch_nonzero_exit_is_command_failure() {
        let (_, source) = source(ScriptedRunner::new().on_program(
            "nvme",
            ScriptedResponse::exit(1, "open: Permission denied\n"),
        ));
        let err = source.fetch(&PathBuf::from("/dev/nvme0n1")).await.unwrap_err();
        match err {
            TelemetryError::CommandFailure { exit_code, stderr } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "open: Permission denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_garbage_is_parse_failure() {
        let (_, source) = source(
            ScriptedRunner::new().on_program("nvme", ScriptedResponse::stdout("Smart Log for NVME device:nvme0")),
        );
        let err = source.fetch(&PathBuf::from("/dev/nvme0")).await.unwrap_err();
        assert!(matches!(err, TelemetryError::ParseFailure(_)));
    }

    #[tokio::test]
    async fn test_fetch_missing_tool() {
        let (_, source) = source(ScriptedRunner::new());
        let err = source.fetch(&PathBuf::from("/dev/nvme0")).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Command(CommandError::Spawn { .. })));
    }

    #[test]
    fn test_command_with_sudo() {
        let runner = Arc::new(ScriptedRunner::new());
        let source = SmartLogSource::new(runner, true, Duration::from_secs(1));
        let spec = source.command(Path::new("/dev/nvme0"));
        assert_eq!(spec.to_string(), "sudo nvme smart-log /dev/nvme0 -o json");
    }
}
