//! Test doubles for the command and alert seams.
//!
//! [`ScriptedRunner`] answers commands from a list of rules instead of
//! spawning processes; [`RecordingTransport`] captures alerts instead of
//! mailing them. Both record what they were asked to do.

use crate::alert::{AlertError, AlertMessage, AlertTransport};
use crate::exec::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use std::sync::Mutex;
use tracing::debug;

/// Canned reply for a scripted command.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Output(CommandOutput),
    /// The program could not be started.
    SpawnError(String),
}

impl ScriptedResponse {
    /// Exit 0 with the given stdout.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::Output(CommandOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 0,
        })
    }

    /// Non-zero exit with the given stderr.
    pub fn exit(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::Output(CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
        })
    }

    pub fn spawn_error(reason: impl Into<String>) -> Self {
        Self::SpawnError(reason.into())
    }
}

type Matcher = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    response: ScriptedResponse,
}

/// Rule-driven [`CommandRunner`]. The first matching rule answers; a command
/// no rule matches fails to spawn.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on<F>(mut self, matcher: F, response: ScriptedResponse) -> Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            response,
        });
        self
    }

    /// Answer every invocation of `program`, with or without `sudo`.
    #[must_use]
    pub fn on_program(self, program: &'static str, response: ScriptedResponse) -> Self {
        self.on(move |spec| spec.invokes(program), response)
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.invokes(program))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        debug!(command = %spec, "Scripted command");
        self.calls.lock().unwrap().push(spec.clone());

        let response = self
            .rules
            .iter()
            .find(|rule| (rule.matcher)(spec))
            .map(|rule| rule.response.clone())
            .unwrap_or_else(|| ScriptedResponse::spawn_error("no scripted response"));

        match response {
            ScriptedResponse::Output(output) => Ok(output),
            ScriptedResponse::SpawnError(reason) => Err(CommandError::Spawn {
                command: spec.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, reason),
            }),
        }
    }
}

/// Alert transport that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<AlertMessage>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every send fails after being recorded.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<AlertMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.body).collect()
    }
}

impl AlertTransport for RecordingTransport {
    async fn send(&self, alert: &AlertMessage) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push(alert.clone());
        if self.fail {
            return Err(AlertError::Rejected {
                exit_code: 1,
                stderr: "recording transport configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// A minimal `nvme smart-log -o json` document.
pub fn smart_log_json(
    critical_warning: u64,
    temperature: u64,
    percent_used: u64,
    media_errors: u64,
    num_err_log_entries: u64,
) -> String {
    serde_json::json!({
        "critical_warning": critical_warning,
        "temperature": temperature,
        "avail_spare": 100,
        "spare_thresh": 10,
        "percent_used": percent_used,
        "data_units_read": 1_234_567,
        "data_units_written": 7_654_321,
        "power_on_hours": 4321,
        "unsafe_shutdowns": 12,
        "media_errors": media_errors,
        "num_err_log_entries": num_err_log_entries,
    })
    .to_string()
}

/// A minimal `fio --output-format=json` report with one aggregated job.
pub fn fio_report_json(direction: &str, iops_mean: f64, bw_mean: f64, lat_ns_mean: f64) -> String {
    let idle = serde_json::json!({
        "io_bytes": 0,
        "iops_mean": 0.0,
        "bw_mean": 0.0,
        "lat_ns": { "min": 0, "max": 0, "mean": 0.0 },
    });
    let active = serde_json::json!({
        "io_bytes": 1_048_576,
        "iops_mean": iops_mean,
        "bw_mean": bw_mean,
        "lat_ns": { "min": 1000, "max": 900_000, "mean": lat_ns_mean },
    });
    let (read, write) = if direction == "read" {
        (active, idle)
    } else {
        (idle, active)
    };
    serde_json::json!({
        "fio version": "fio-3.36",
        "jobs": [{ "jobname": "nvprobe", "error": 0, "read": read, "write": write }],
    })
    .to_string()
}
