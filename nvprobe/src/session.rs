//! One probe session, from device discovery to the saved artifact.
//!
//! The phases run in a fixed order and never loop:
//!
//! ```text
//! DiscoverDevice -> FetchTelemetry -> EvaluateHealth -> AlertIfWarnings
//!   -> RunBenchmarks -> AlertFailedWorkloads -> Persist -> Done
//! ```
//!
//! Discovery, telemetry and persistence failures abort the session.
//! Workload failures are recorded in the result set and never abort it.

use crate::alert::{self, AlertTransport, Alerter};
use crate::config::{ConfigError, ProbeConfig};
use crate::discovery::{DeviceDiscovery, DiscoveryError};
use crate::exec::CommandRunner;
use crate::fio::{FioOptions, WorkloadRunner};
use crate::health::{HealthEvaluator, HealthWarning};
use crate::orchestrator::{BenchmarkOrchestrator, WorkloadResults};
use crate::persist::{self, BENCH_RESULT_PREFIX, PersistenceError, ResultWriter};
use crate::results::{ResultEntry, ResultSet};
use crate::telemetry::{SmartLogSource, TelemetryError, TelemetryRecord};
use crate::workload::WorkloadMatrix;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    DiscoverDevice,
    FetchTelemetry,
    EvaluateHealth,
    AlertIfWarnings,
    RunBenchmarks,
    AlertFailedWorkloads,
    Persist,
    Done,
    Aborted,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::DiscoverDevice => "discover-device",
            SessionPhase::FetchTelemetry => "fetch-telemetry",
            SessionPhase::EvaluateHealth => "evaluate-health",
            SessionPhase::AlertIfWarnings => "alert-if-warnings",
            SessionPhase::RunBenchmarks => "run-benchmarks",
            SessionPhase::AlertFailedWorkloads => "alert-failed-workloads",
            SessionPhase::Persist => "persist",
            SessionPhase::Done => "done",
            SessionPhase::Aborted => "aborted",
        })
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No NVMe device found")]
    DeviceNotFound,

    #[error("device discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("health check failed: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The results, when present, were fully computed before the write
    /// failed.
    #[error("failed to save results: {source}")]
    Persistence {
        #[source]
        source: PersistenceError,
        results: Option<Box<ResultSet>>,
    },
}

impl SessionError {
    /// The phase the session aborted in.
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionError::DeviceNotFound | SessionError::Discovery(_) => SessionPhase::DiscoverDevice,
            SessionError::Telemetry(_) => SessionPhase::FetchTelemetry,
            SessionError::Persistence { .. } => SessionPhase::Persist,
        }
    }

    pub fn is_device_not_found(&self) -> bool {
        matches!(self, SessionError::DeviceNotFound)
    }
}

/// Telemetry and its evaluation.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub record: TelemetryRecord,
    pub warnings: Vec<HealthWarning>,
}

/// What a completed session produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub device: PathBuf,
    pub results: ResultSet,
    pub warnings: Vec<HealthWarning>,
    pub failed_workloads: Vec<String>,
    pub artifact: PathBuf,
}

pub struct SessionCoordinator<R, T> {
    discovery: DeviceDiscovery<R>,
    smart_log: SmartLogSource<R>,
    evaluator: HealthEvaluator,
    orchestrator: BenchmarkOrchestrator<R>,
    matrix: WorkloadMatrix,
    alerter: Alerter<T>,
    writer: ResultWriter,
    device: Option<PathBuf>,
}

impl<R: CommandRunner, T: AlertTransport> SessionCoordinator<R, T> {
    /// Wire every component from `config`. Results land in `result_dir`.
    pub fn new(
        runner: Arc<R>,
        transport: T,
        config: &ProbeConfig,
        result_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let matrix = config.workload_matrix()?;
        let timeout = config.command_timeout();
        let fio = WorkloadRunner::new(
            runner.clone(),
            FioOptions {
                size: config.fio_size.clone(),
                ioengine: config.ioengine.clone(),
                use_sudo: config.use_sudo,
                grace: timeout,
                ..FioOptions::default()
            },
        );

        Ok(Self {
            discovery: DeviceDiscovery::new(runner.clone(), timeout),
            smart_log: SmartLogSource::new(runner, config.use_sudo, timeout),
            evaluator: HealthEvaluator::new(config.thresholds),
            orchestrator: BenchmarkOrchestrator::new(fio, config.runtime_secs).with_pause(config.pause()),
            matrix,
            alerter: Alerter::new(transport, config.alerts_enabled, config.alert_subject.clone()),
            writer: ResultWriter::new(result_dir, config.result_prefix.clone()),
            device: config.device.clone(),
        })
    }

    pub fn matrix(&self) -> &WorkloadMatrix {
        &self.matrix
    }

    pub fn discovery(&self) -> &DeviceDiscovery<R> {
        &self.discovery
    }

    /// Full session: health, benchmarks, alerts, persistence.
    pub async fn run_session(&self) -> Result<SessionReport, SessionError> {
        info!(workloads = self.matrix.len(), "Starting NVMe probe session");
        self.prepare_result_dir().await?;

        let device = self.resolve_device().await?;
        let health = self.check_health(&device).await?;

        let mut results = ResultSet::new();
        if let Err(err) = results.record_health(health.record) {
            warn!(error = %err, "Health entry not recorded");
        }

        let workloads = self.run_benchmarks(&device).await;
        let failed_workloads = collect_outcomes(&mut results, workloads);

        let artifact = self.persist(&self.writer, results.clone()).await?;
        enter(SessionPhase::Done);
        info!(
            device = %device.display(),
            warnings = health.warnings.len(),
            failed = failed_workloads.len(),
            artifact = %artifact.display(),
            "Probe session complete"
        );
        Ok(SessionReport {
            device,
            results,
            warnings: health.warnings,
            failed_workloads,
            artifact,
        })
    }

    /// Benchmarks only; the artifact uses the benchmark prefix.
    pub async fn run_benchmarks_only(&self) -> Result<SessionReport, SessionError> {
        info!(workloads = self.matrix.len(), "Starting benchmark-only session");
        self.prepare_result_dir().await?;
        let device = self.resolve_device().await?;

        let mut results = ResultSet::new();
        let workloads = self.run_benchmarks(&device).await;
        let failed_workloads = collect_outcomes(&mut results, workloads);

        let writer = ResultWriter::new(self.writer.dir(), BENCH_RESULT_PREFIX);
        let artifact = self.persist(&writer, results.clone()).await?;
        enter(SessionPhase::Done);
        Ok(SessionReport {
            device,
            results,
            warnings: Vec::new(),
            failed_workloads,
            artifact,
        })
    }

    /// The configured device, or the first NVMe disk discovery finds.
    pub async fn resolve_device(&self) -> Result<PathBuf, SessionError> {
        enter(SessionPhase::DiscoverDevice);
        if let Some(device) = &self.device {
            info!(device = %device.display(), "Using configured device");
            return Ok(device.clone());
        }
        match self.discovery.discover_primary_device().await {
            Ok(Some(device)) => Ok(device),
            Ok(None) => {
                error!("No NVMe device found, aborting");
                enter(SessionPhase::Aborted);
                Err(SessionError::DeviceNotFound)
            }
            Err(err) => {
                error!(error = %err, "Device discovery failed, aborting");
                enter(SessionPhase::Aborted);
                Err(err.into())
            }
        }
    }

    /// Fetch and evaluate telemetry, alerting on warnings. A fetch failure
    /// is alerted and then returned.
    pub async fn check_health(&self, device: &Path) -> Result<HealthCheck, SessionError> {
        enter(SessionPhase::FetchTelemetry);
        let record = match self.smart_log.fetch(device).await {
            Ok(record) => record,
            Err(err) => {
                error!(device = %device.display(), error = %err, "Health check failed");
                self.alerter.notify(alert::health_check_alert(&err)).await;
                enter(SessionPhase::Aborted);
                return Err(err.into());
            }
        };

        enter(SessionPhase::EvaluateHealth);
        let warnings = self.evaluator.evaluate(&record);
        if warnings.is_empty() {
            info!(device = %device.display(), "Health check passed");
        } else {
            for warning in &warnings {
                warn!(rule = ?warning.rule, "{}", warning.message);
            }
            enter(SessionPhase::AlertIfWarnings);
            let messages: Vec<String> = warnings.iter().map(|w| w.message.clone()).collect();
            self.alerter.notify(alert::health_alert(&messages)).await;
        }
        Ok(HealthCheck { record, warnings })
    }

    /// Run the matrix and alert once per failed workload.
    pub async fn run_benchmarks(&self, device: &Path) -> WorkloadResults {
        enter(SessionPhase::RunBenchmarks);
        let results = self.orchestrator.run_all(&self.matrix, device).await;

        enter(SessionPhase::AlertFailedWorkloads);
        for (name, failure) in results.failures() {
            self.alerter
                .notify(alert::workload_alert(name, &failure.error))
                .await;
        }
        results
    }

    async fn prepare_result_dir(&self) -> Result<(), SessionError> {
        if let Err(source) = persist::ensure_log_directory(self.writer.dir()) {
            error!(error = %source, "Result directory unusable, aborting");
            self.alerter.notify(alert::persistence_alert(&source)).await;
            return Err(SessionError::Persistence {
                source,
                results: None,
            });
        }
        Ok(())
    }

    async fn persist(&self, writer: &ResultWriter, results: ResultSet) -> Result<PathBuf, SessionError> {
        enter(SessionPhase::Persist);
        match writer.write(&results) {
            Ok(path) => Ok(path),
            Err(source) => {
                error!(error = %source, "Failed to save results");
                self.alerter.notify(alert::persistence_alert(&source)).await;
                enter(SessionPhase::Aborted);
                Err(SessionError::Persistence {
                    source,
                    results: Some(Box::new(results)),
                })
            }
        }
    }
}

fn enter(phase: SessionPhase) {
    debug!(%phase, "Session phase");
}

/// Move workload outcomes into `results`; returns the failed names.
fn collect_outcomes(results: &mut ResultSet, workloads: WorkloadResults) -> Vec<String> {
    let mut failed = Vec::new();
    for (name, outcome) in workloads {
        if outcome.is_err() {
            failed.push(name.clone());
        }
        if let Err(err) = results.insert(name, ResultEntry::from(outcome)) {
            warn!(error = %err, "Workload result not recorded");
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, ScriptedResponse, ScriptedRunner, smart_log_json};
    use tempfile::TempDir;

    fn config() -> ProbeConfig {
        ProbeConfig {
            pause_ms: 0,
            ..ProbeConfig::default()
        }
    }

    fn coordinator(
        scripted: ScriptedRunner,
        config: &ProbeConfig,
        dir: &Path,
    ) -> (Arc<RecordingTransport>, SessionCoordinator<ScriptedRunner, Arc<RecordingTransport>>) {
        let transport = Arc::new(RecordingTransport::new());
        let coordinator = SessionCoordinator::new(Arc::new(scripted), transport.clone(), config, dir).unwrap();
        (transport, coordinator)
    }

    #[test]
    fn test_error_phases() {
        assert_eq!(SessionError::DeviceNotFound.phase(), SessionPhase::DiscoverDevice);
        assert!(SessionError::DeviceNotFound.is_device_not_found());
        let err = SessionError::Telemetry(TelemetryError::ParseFailure("x".into()));
        assert_eq!(err.phase(), SessionPhase::FetchTelemetry);
        assert!(!err.is_device_not_found());
    }

    #[tokio::test]
    async fn test_configured_device_skips_discovery() {
        let dir = TempDir::new().unwrap();
        let config = ProbeConfig {
            device: Some(PathBuf::from("/dev/nvme3n1")),
            ..config()
        };
        let scripted = ScriptedRunner::new();
        let transport = Arc::new(RecordingTransport::new());
        let runner = Arc::new(scripted);
        let coordinator = SessionCoordinator::new(runner.clone(), transport, &config, dir.path()).unwrap();
        assert_eq!(coordinator.resolve_device().await.unwrap(), PathBuf::from("/dev/nvme3n1"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_health_warnings_alert_once() {
        let dir = TempDir::new().unwrap();
        let (transport, coordinator) = coordinator(
            ScriptedRunner::new().on_program("nvme", ScriptedResponse::stdout(smart_log_json(1, 330, 50, 0, 0))),
            &config(),
            dir.path(),
        );
        let check = coordinator.check_health(Path::new("/dev/nvme0n1")).await.unwrap();
        assert_eq!(check.warnings.len(), 2);
        assert_eq!(
            transport.bodies(),
            vec!["NVMe SSD health alert detected:\nCritical warning detected!\nHigh temperature detected: 330K"]
        );
    }

    #[tokio::test]
    async fn test_healthy_device_sends_no_alert() {
        let dir = TempDir::new().unwrap();
        let (transport, coordinator) = coordinator(
            ScriptedRunner::new().on_program("nvme", ScriptedResponse::stdout(smart_log_json(0, 300, 5, 0, 0))),
            &config(),
            dir.path(),
        );
        let check = coordinator.check_health(Path::new("/dev/nvme0n1")).await.unwrap();
        assert!(check.warnings.is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unusable_result_dir_aborts_before_discovery() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let transport = Arc::new(RecordingTransport::new());
        let coordinator = SessionCoordinator::new(runner.clone(), transport.clone(), &config(), &blocker).unwrap();

        let err = coordinator.run_session().await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence { results: None, .. }));
        assert!(runner.calls().is_empty());
        assert_eq!(transport.sent().len(), 1);
        assert!(transport.bodies()[0].starts_with("Failed to save results: "));
    }
}
