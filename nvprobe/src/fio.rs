//! Runs one workload through fio and reduces its JSON report.
//!
//! A run is time-based: fio keeps the device busy for the whole duration.
//! That load is the measurement, so anything else sharing the device will see
//! degraded I/O while a workload is running.
//!
//! fio is pointed at the raw block device. Write workloads overwrite the
//! first `fio_size` bytes of it, partition table and filesystem headers
//! included. Only point nvprobe at a device whose contents can be lost.

use crate::exec::{CommandError, CommandRunner, CommandSpec};
use crate::results::{FailureRecord, PerformanceRecord};
use crate::workload::WorkloadSpec;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("benchmark tool could not be invoked: {0}")]
    Invocation(#[from] CommandError),

    #[error("benchmark tool exited with code {exit_code}: {stderr}")]
    CommandFailure { exit_code: i32, stderr: String },

    #[error("benchmark report is not valid JSON: {0}")]
    ParseFailure(String),

    #[error("benchmark report has unexpected shape: {0}")]
    UnexpectedShape(String),
}

impl From<WorkloadError> for FailureRecord {
    fn from(err: WorkloadError) -> Self {
        FailureRecord::new(err.to_string())
    }
}

/// Per-direction statistics as fio reports them.
#[derive(Debug, Clone, Deserialize)]
struct DirectionStats {
    iops_mean: f64,
    /// KiB/s.
    bw_mean: f64,
    lat_ns: LatencyStats,
}

#[derive(Debug, Clone, Deserialize)]
struct LatencyStats {
    mean: f64,
}

/// fio settings shared by every workload.
#[derive(Debug, Clone)]
pub struct FioOptions {
    pub program: String,
    /// Region size per job; bounds the file fio touches, not the run length.
    pub size: String,
    pub ioengine: String,
    pub use_sudo: bool,
    /// Slack on top of the runtime before the process is killed.
    pub grace: Duration,
}

impl Default for FioOptions {
    fn default() -> Self {
        Self {
            program: "fio".to_string(),
            size: "100M".to_string(),
            ioengine: "libaio".to_string(),
            use_sudo: false,
            grace: Duration::from_secs(60),
        }
    }
}

/// Executes a single [`WorkloadSpec`].
#[derive(Debug)]
pub struct WorkloadRunner<R> {
    runner: Arc<R>,
    options: FioOptions,
}

impl<R: CommandRunner> WorkloadRunner<R> {
    pub fn new(runner: Arc<R>, options: FioOptions) -> Self {
        Self { runner, options }
    }

    pub fn options(&self) -> &FioOptions {
        &self.options
    }

    pub fn command(&self, spec: &WorkloadSpec, device: &Path, duration_secs: u64) -> CommandSpec {
        CommandSpec::new(&self.options.program)
            .args([
                format!("--name={}", spec.name),
                format!("--filename={}", device.display()),
                format!("--rw={}", spec.pattern.fio_rw()),
                format!("--bs={}", spec.block_size),
                format!("--numjobs={}", spec.parallelism),
                format!("--iodepth={}", spec.queue_depth),
                "--time_based".to_string(),
                format!("--runtime={duration_secs}"),
                format!("--size={}", self.options.size),
                format!("--ioengine={}", self.options.ioengine),
                "--group_reporting".to_string(),
                "--output-format=json".to_string(),
            ])
            .privileged(self.options.use_sudo)
            .with_timeout(
                Duration::from_secs(duration_secs)
                    .checked_add(self.options.grace)
                    .unwrap_or(Duration::MAX),
            )
    }

    /// Run `spec` against `device`. Every failure comes back as a
    /// [`FailureRecord`]; nothing escapes as an error type of its own.
    pub async fn run(
        &self,
        spec: &WorkloadSpec,
        device: &Path,
        duration_secs: u64,
    ) -> Result<PerformanceRecord, FailureRecord> {
        info!(
            workload = %spec.name,
            pattern = %spec.pattern,
            block_size = %spec.block_size,
            jobs = spec.parallelism,
            queue_depth = spec.queue_depth,
            duration_secs,
            "Running fio workload"
        );
        self.try_run(spec, device, duration_secs)
            .await
            .map_err(|err| {
                warn!(workload = %spec.name, error = %err, "Workload failed");
                FailureRecord::from(err)
            })
    }

    async fn try_run(
        &self,
        spec: &WorkloadSpec,
        device: &Path,
        duration_secs: u64,
    ) -> Result<PerformanceRecord, WorkloadError> {
        let output = self
            .runner
            .run(&self.command(spec, device, duration_secs))
            .await?;
        if !output.success() {
            return Err(WorkloadError::CommandFailure {
                exit_code: output.exit_code,
                stderr: output.diagnostic().to_string(),
            });
        }
        parse_report(&output.stdout, spec)
    }
}

/// Reduce a fio JSON report to the record for `spec`'s direction.
///
/// Tolerates warning lines fio prints ahead of the JSON document and
/// anything after it. The document starts at the first line that opens
/// with `{`.
pub fn parse_report(stdout: &str, spec: &WorkloadSpec) -> Result<PerformanceRecord, WorkloadError> {
    let start = document_start(stdout)
        .ok_or_else(|| WorkloadError::ParseFailure("no JSON document in fio output".to_string()))?;
    let report: Value = serde_json::Deserializer::from_str(&stdout[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| WorkloadError::ParseFailure("empty fio output".to_string()))?
        .map_err(|e| WorkloadError::ParseFailure(e.to_string()))?;

    let direction = spec.direction();
    let section = report
        .get("jobs")
        .and_then(Value::as_array)
        .and_then(|jobs| jobs.first())
        .ok_or_else(|| WorkloadError::UnexpectedShape("missing jobs[0]".to_string()))?
        .get(direction.as_str())
        .filter(|v| v.is_object())
        .ok_or_else(|| {
            WorkloadError::UnexpectedShape(format!("jobs[0].{direction} is not an object"))
        })?;
    let stats = DirectionStats::deserialize(section).map_err(|e| {
        WorkloadError::UnexpectedShape(format!("jobs[0].{direction}: {e}"))
    })?;

    let record = PerformanceRecord {
        direction,
        block_size: spec.block_size.clone(),
        iops: round2(stats.iops_mean),
        bandwidth_mbps: round2(stats.bw_mean / 1024.0),
        latency_us: round2(stats.lat_ns.mean / 1000.0),
    };
    debug!(workload = %spec.name, ?record, "fio report parsed");
    Ok(record)
}

fn document_start(stdout: &str) -> Option<usize> {
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        if line[indent..].starts_with('{') {
            return Some(offset + indent);
        }
        offset += line.len();
    }
    None
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedResponse, ScriptedRunner, fio_report_json};
    use crate::workload::{AccessPattern, Direction};
    use std::path::PathBuf;

    fn randread_4k() -> WorkloadSpec {
        WorkloadSpec::new("randread_4K", AccessPattern::RandomRead, "4K", 4, 32)
    }

    fn runner_with(response: ScriptedResponse) -> (Arc<ScriptedRunner>, WorkloadRunner<ScriptedRunner>) {
        let scripted = Arc::new(ScriptedRunner::new().on_program("fio", response));
        let runner = WorkloadRunner::new(scripted.clone(), FioOptions::default());
        (scripted, runner)
    }

    #[test]
    fn test_parse_report_converts_units() {
        let report = fio_report_json("read", 50000.0, 204800.0, 150000.0);
        let record = parse_report(&report, &randread_4k()).unwrap();
        assert_eq!(
            record,
            PerformanceRecord {
                direction: Direction::Read,
                block_size: "4K".into(),
                iops: 50000.0,
                bandwidth_mbps: 200.0,
                latency_us: 150.0,
            }
        );
    }

    #[test]
    fn test_parse_report_rounds_to_two_places() {
        let report = fio_report_json("write", 1234.5678, 1000.0, 12346.0);
        let spec = WorkloadSpec::new("w", AccessPattern::SequentialWrite, "128k", 1, 32);
        let record = parse_report(&report, &spec).unwrap();
        assert_eq!(record.iops, 1234.57);
        assert_eq!(record.bandwidth_mbps, 0.98);
        assert_eq!(record.latency_us, 12.35);
        assert_eq!(record.direction, Direction::Write);
    }

    #[test]
    fn test_parse_report_skips_preamble() {
        let report = format!(
            "note: both iodepth >= 1 and synchronous I/O engine are selected\n{}\n",
            fio_report_json("read", 10.0, 1024.0, 1000.0)
        );
        assert!(parse_report(&report, &randread_4k()).is_ok());
    }

    #[test]
    fn test_parse_report_ignores_braces_in_preamble() {
        let report = format!(
            "fio: job option <{{filename}}> expanded to /dev/nvme0n1\n{}",
            fio_report_json("read", 10.0, 1024.0, 1000.0)
        );
        let record = parse_report(&report, &randread_4k()).unwrap();
        assert_eq!(record.iops, 10.0);

        assert!(matches!(
            parse_report("fio: bad option {bogus}\n", &randread_4k()),
            Err(WorkloadError::ParseFailure(msg)) if msg.contains("no JSON document")
        ));
    }

    #[test]
    fn test_parse_report_failure_classes() {
        let spec = randread_4k();
        assert!(matches!(
            parse_report("fio: failed to open /dev/nvme0n1", &spec),
            Err(WorkloadError::ParseFailure(_))
        ));
        assert!(matches!(
            parse_report("{ \"jobs\": [ {", &spec),
            Err(WorkloadError::ParseFailure(_))
        ));
        assert!(matches!(
            parse_report(r#"{"jobs": []}"#, &spec),
            Err(WorkloadError::UnexpectedShape(msg)) if msg.contains("jobs[0]")
        ));
        assert!(matches!(
            parse_report(r#"{"jobs": [{"read": 7}]}"#, &spec),
            Err(WorkloadError::UnexpectedShape(msg)) if msg.contains("not an object")
        ));
        assert!(matches!(
            parse_report(r#"{"jobs": [{"read": {"iops_mean": 1.0}}]}"#, &spec),
            Err(WorkloadError::UnexpectedShape(msg)) if msg.contains("bw_mean")
        ));
    }

    #[test]
    fn test_command_line() {
        let runner = WorkloadRunner::new(
            Arc::new(ScriptedRunner::new()),
            FioOptions {
                use_sudo: true,
                ..FioOptions::default()
            },
        );
        let spec = runner.command(&randread_4k(), &PathBuf::from("/dev/nvme0n1"), 15);
        assert_eq!(spec.program, "sudo");
        assert_eq!(
            spec.args,
            vec![
                "fio",
                "--name=randread_4K",
                "--filename=/dev/nvme0n1",
                "--rw=randread",
                "--bs=4K",
                "--numjobs=4",
                "--iodepth=32",
                "--time_based",
                "--runtime=15",
                "--size=100M",
                "--ioengine=libaio",
                "--group_reporting",
                "--output-format=json",
            ]
        );
        assert_eq!(spec.timeout, Some(Duration::from_secs(75)));
    }

    #[test]
    fn test_command_deadline_saturates() {
        let runner = WorkloadRunner::new(Arc::new(ScriptedRunner::new()), FioOptions::default());
        let spec = runner.command(&randread_4k(), &PathBuf::from("/dev/nvme0n1"), u64::MAX);
        assert_eq!(spec.timeout, Some(Duration::MAX));
        assert!(spec.has_arg(&format!("--runtime={}", u64::MAX)));
    }

    #[tokio::test]
    async fn test_run_success() {
        let (scripted, runner) =
            runner_with(ScriptedResponse::stdout(fio_report_json("read", 50000.0, 204800.0, 150000.0)));
        let record = runner
            .run(&randread_4k(), &PathBuf::from("/dev/nvme0n1"), 15)
            .await
            .unwrap();
        assert_eq!(record.iops, 50000.0);
        assert_eq!(scripted.calls_to("fio").len(), 1);
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_becomes_failure_record() {
        let (_, runner) = runner_with(ScriptedResponse::exit(1, "fio: io_u error on file /dev/nvme0n1\n"));
        let failure = runner
            .run(&randread_4k(), &PathBuf::from("/dev/nvme0n1"), 15)
            .await
            .unwrap_err();
        assert_eq!(
            failure.error,
            "benchmark tool exited with code 1: fio: io_u error on file /dev/nvme0n1"
        );
    }

    #[tokio::test]
    async fn test_run_missing_tool_becomes_failure_record() {
        let (_, runner) = runner_with(ScriptedResponse::spawn_error("No such file or directory"));
        let failure = runner
            .run(&randread_4k(), &PathBuf::from("/dev/nvme0n1"), 15)
            .await
            .unwrap_err();
        assert!(failure.error.starts_with("benchmark tool could not be invoked"));
    }
}
