//! NVMe health and performance probe.
//!
//! Reads a drive's SMART log through nvme-cli, checks it against health
//! thresholds, runs a fixed fio workload matrix against the device, and
//! saves the combined results as JSON, mailing alerts along the way.

#![forbid(unsafe_code)]

pub mod alert;
pub mod config;
pub mod discovery;
pub mod exec;
pub mod fio;
pub mod health;
pub mod orchestrator;
pub mod persist;
pub mod results;
pub mod session;
pub mod telemetry;
pub mod testing;
pub mod workload;

pub use alert::{AlertError, AlertMessage, AlertTransport, Alerter, MsmtpTransport};
pub use config::{CliOverrides, ConfigError, ProbeConfig, load_config};
pub use discovery::{BlockDevice, DeviceDiscovery, DiscoveryError};
pub use exec::{CommandError, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use fio::{FioOptions, WorkloadError, WorkloadRunner};
pub use health::{HealthEvaluator, HealthRule, HealthThresholds, HealthWarning, WarningKind};
pub use orchestrator::{BenchmarkOrchestrator, WorkloadResults};
pub use persist::{PersistenceError, ResultWriter};
pub use results::{
    FailureRecord, HealthEntry, PerformanceRecord, Report, ResultEntry, ResultSet, WorkloadOutcome,
    render_report,
};
pub use session::{HealthCheck, SessionCoordinator, SessionError, SessionPhase, SessionReport};
pub use telemetry::{FieldIssue, Reading, SmartLogSource, TelemetryError, TelemetryRecord};
pub use workload::{AccessPattern, Direction, MatrixError, WorkloadMatrix, WorkloadSpec};
