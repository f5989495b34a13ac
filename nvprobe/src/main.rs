//! nvprobe - NVMe health and performance probe.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use nvprobe::{
    CliOverrides, MsmtpTransport, ProbeConfig, ProcessRunner, ResultSet, SessionCoordinator, SessionError,
    SessionReport, config, render_report,
};
use nvprobe_common::{EnvParser, LogConfig, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Exit code when no NVMe device could be found.
const EXIT_DEVICE_NOT_FOUND: u8 = 2;

const DESTRUCTIVE_WRITE_WARNING: &str = "WARNING: fio writes to the raw device. The write \
workloads overwrite the first `fio_size` bytes (100M by default), partition table included. \
Only run this against a device whose data can be lost.";

#[derive(Parser)]
#[command(name = "nvprobe")]
#[command(author, version, about = "NVMe SMART health check and fio benchmark probe")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device to test instead of the first NVMe disk found
    #[arg(short, long, global = true)]
    device: Option<PathBuf>,

    /// Seconds each workload runs
    #[arg(short, long, global = true)]
    runtime: Option<u64>,

    /// Directory for result files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Do not send alert emails
    #[arg(long, global = true)]
    no_alerts: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Health check, benchmarks and persistence (default)
    ///
    /// Destroys data at the start of the device; see the warning below.
    #[command(after_help = DESTRUCTIVE_WRITE_WARNING)]
    Run {
        /// Print the result set as JSON instead of the text report
        #[arg(long)]
        json: bool,
    },

    /// Read and evaluate the SMART log only
    Health,

    /// Run the workload matrix only
    ///
    /// Destroys data at the start of the device; see the warning below.
    #[command(after_help = DESTRUCTIVE_WRITE_WARNING)]
    Bench {
        /// Print the result set as JSON instead of the text report
        #[arg(long)]
        json: bool,
    },

    /// List NVMe devices
    Devices,

    /// Print the effective workload matrix
    Matrix,
}

type Coordinator = SessionCoordinator<ProcessRunner, MsmtpTransport<ProcessRunner>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let overrides = CliOverrides {
        device: cli.device.clone(),
        runtime_secs: cli.runtime,
        log_dir: cli.log_dir.clone(),
        no_alerts: cli.no_alerts,
    };
    let probe_config = config::resolve(cli.config.as_deref(), &mut EnvParser::new(), &overrides)?;

    let command = cli.command.unwrap_or(Commands::Run { json: false });
    if let Commands::Matrix = command {
        println!("{}", serde_json::to_string_pretty(&probe_config.workload_matrix()?)?);
        return Ok(ExitCode::SUCCESS);
    }

    let coordinator = build_coordinator(&probe_config)?;
    let outcome = match command {
        Commands::Run { json } => finish(coordinator.run_session().await, json),
        Commands::Bench { json } => finish(coordinator.run_benchmarks_only().await, json),
        Commands::Health => run_health(&coordinator).await,
        Commands::Devices => return list_devices(&coordinator).await,
        Commands::Matrix => Ok(()),
    };

    Ok(exit_code(outcome))
}

fn build_coordinator(probe_config: &ProbeConfig) -> Result<Coordinator> {
    let runner = Arc::new(ProcessRunner::new());
    let transport = MsmtpTransport::new(
        runner.clone(),
        probe_config.alert_command.clone(),
        probe_config.email_from.clone(),
        probe_config.email_to.clone(),
        probe_config.command_timeout(),
    );
    let result_dir = probe_config.result_dir()?;
    Ok(SessionCoordinator::new(runner, transport, probe_config, result_dir)?)
}

async fn run_health(coordinator: &Coordinator) -> Result<(), SessionError> {
    let device = coordinator.resolve_device().await?;
    let check = coordinator.check_health(&device).await?;
    match serde_json::to_string_pretty(&check.record) {
        Ok(text) => println!("{text}"),
        Err(e) => error!(error = %e, "Failed to render SMART log"),
    }
    if check.warnings.is_empty() {
        println!("No health warnings.");
    } else {
        println!("Health warnings:");
        for warning in &check.warnings {
            println!("  {warning}");
        }
    }
    Ok(())
}

async fn list_devices(coordinator: &Coordinator) -> Result<ExitCode> {
    let devices = coordinator.discovery().nvme_devices().await?;
    if devices.is_empty() {
        println!("No NVMe devices found.");
        return Ok(ExitCode::from(EXIT_DEVICE_NOT_FOUND));
    }
    for device in devices {
        println!("{}", device.path().display());
    }
    Ok(ExitCode::SUCCESS)
}

/// Print whatever results exist, including those computed by a session
/// that then failed to save them.
fn finish(outcome: Result<SessionReport, SessionError>, json: bool) -> Result<(), SessionError> {
    match outcome {
        Ok(report) => {
            print_results(&report.results, json);
            Ok(())
        }
        Err(SessionError::Persistence {
            source,
            results: Some(results),
        }) => {
            print_results(&results, json);
            Err(SessionError::Persistence {
                source,
                results: None,
            })
        }
        Err(err) => Err(err),
    }
}

fn print_results(results: &ResultSet, json: bool) {
    if !json {
        print!("{}", render_report(results));
        return;
    }
    match serde_json::to_string_pretty(results) {
        Ok(text) => println!("{text}"),
        Err(e) => error!(error = %e, "Failed to render results"),
    }
}

fn exit_code(outcome: Result<(), SessionError>) -> ExitCode {
    match outcome {
        Ok(()) => {
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(phase = %err.phase(), "{err}");
            if err.is_device_not_found() {
                ExitCode::from(EXIT_DEVICE_NOT_FOUND)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
