//! Runs the workload matrix in order, one workload at a time.

use crate::exec::CommandRunner;
use crate::fio::WorkloadRunner;
use crate::results::{FailureRecord, WorkloadOutcome};
use crate::workload::WorkloadMatrix;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default settle time between workloads.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// Outcome of every workload in a matrix, keyed by workload name in matrix
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadResults(Vec<(String, WorkloadOutcome)>);

impl WorkloadResults {
    pub fn get(&self, name: &str) -> Option<&WorkloadOutcome> {
        self.0
            .iter()
            .find_map(|(n, outcome)| (n == name).then_some(outcome))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &FailureRecord)> {
        self.0.iter().filter_map(|(n, outcome)| match outcome {
            Err(failure) => Some((n.as_str(), failure)),
            Ok(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for WorkloadResults {
    type Item = (String, WorkloadOutcome);
    type IntoIter = std::vec::IntoIter<(String, WorkloadOutcome)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Drives a [`WorkloadRunner`] across a matrix. A failing workload is
/// recorded and the rest still run.
#[derive(Debug)]
pub struct BenchmarkOrchestrator<R> {
    runner: WorkloadRunner<R>,
    duration_secs: u64,
    pause: Duration,
}

impl<R: CommandRunner> BenchmarkOrchestrator<R> {
    pub fn new(runner: WorkloadRunner<R>, duration_secs: u64) -> Self {
        Self {
            runner,
            duration_secs,
            pause: DEFAULT_PAUSE,
        }
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub async fn run_all(&self, matrix: &WorkloadMatrix, device: &Path) -> WorkloadResults {
        info!(
            workloads = matrix.len(),
            device = %device.display(),
            duration_secs = self.duration_secs,
            "Starting benchmark matrix"
        );
        let mut results = Vec::with_capacity(matrix.len());
        for (index, spec) in matrix.iter().enumerate() {
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            let outcome = self.runner.run(spec, device, self.duration_secs).await;
            match &outcome {
                Ok(record) => info!(
                    workload = %spec.name,
                    iops = record.iops,
                    bandwidth_mbps = record.bandwidth_mbps,
                    latency_us = record.latency_us,
                    "Workload completed"
                ),
                Err(failure) => info!(workload = %spec.name, error = %failure.error, "Workload recorded as failed"),
            }
            results.push((spec.name.clone(), outcome));
        }

        let results = WorkloadResults(results);
        info!(
            completed = results.len(),
            failed = results.failures().count(),
            "Benchmark matrix finished"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fio::FioOptions;
    use crate::testing::{ScriptedResponse, ScriptedRunner, fio_report_json};
    use crate::workload::{AccessPattern, WorkloadSpec};
    use proptest::prelude::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn orchestrator(scripted: ScriptedRunner) -> (Arc<ScriptedRunner>, BenchmarkOrchestrator<ScriptedRunner>) {
        let scripted = Arc::new(scripted);
        let runner = WorkloadRunner::new(scripted.clone(), FioOptions::default());
        (scripted, BenchmarkOrchestrator::new(runner, 15))
    }

    fn ok_report() -> ScriptedResponse {
        ScriptedResponse::stdout(fio_report_json("read", 100.0, 1024.0, 1000.0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_in_order_with_pauses_between() {
        let (scripted, orchestrator) = orchestrator(ScriptedRunner::new().on_program("fio", ok_report()));
        let matrix = WorkloadMatrix::default();

        let start = tokio::time::Instant::now();
        let results = orchestrator.run_all(&matrix, &PathBuf::from("/dev/nvme0n1")).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= DEFAULT_PAUSE * 3 && elapsed < DEFAULT_PAUSE * 4);

        let names: Vec<_> = results.names().collect();
        assert_eq!(names, matrix.names().collect::<Vec<_>>());
        let invoked: Vec<_> = scripted
            .calls_to("fio")
            .iter()
            .map(|spec| spec.args[0].clone())
            .collect();
        assert_eq!(
            invoked,
            vec![
                "--name=randwrite_4K",
                "--name=randread_4K",
                "--name=randwrite_128k",
                "--name=randread_128k",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_matrix() {
        let (scripted, orchestrator) = orchestrator(
            ScriptedRunner::new()
                .on(
                    |spec| spec.has_arg("--name=randwrite_4K"),
                    ScriptedResponse::spawn_error("fio: not found"),
                )
                .on_program("fio", ok_report()),
        );
        let orchestrator = orchestrator.with_pause(Duration::ZERO);
        let results = orchestrator
            .run_all(&WorkloadMatrix::default(), &PathBuf::from("/dev/nvme0n1"))
            .await;

        assert_eq!(scripted.calls().len(), 4);
        assert_eq!(results.len(), 4);
        let failed: Vec<_> = results.failures().map(|(name, _)| name).collect();
        assert_eq!(failed, vec!["randwrite_4K"]);
        assert!(results.get("randread_4K").unwrap().is_ok());
    }

    fn arb_matrix() -> impl Strategy<Value = (WorkloadMatrix, Vec<bool>)> {
        prop::collection::vec(any::<bool>(), 1..8).prop_map(|fails| {
            let specs = (0..fails.len())
                .map(|i| WorkloadSpec::new(format!("job_{i}"), AccessPattern::RandomRead, "4K", 1, 1))
                .collect();
            (WorkloadMatrix::new(specs).unwrap(), fails)
        })
    }

    proptest! {
        /// Property: the result keys are exactly the matrix names, however
        /// many workloads fail.
        #[test]
        fn result_keys_match_matrix((matrix, fails) in arb_matrix()) {
            let mut scripted = ScriptedRunner::new();
            for (i, fail) in fails.iter().enumerate() {
                if *fail {
                    let arg = format!("--name=job_{i}");
                    scripted = scripted.on(
                        move |spec| spec.has_arg(&arg),
                        ScriptedResponse::exit(1, "io error"),
                    );
                }
            }
            let (_, orchestrator) = orchestrator(scripted.on_program("fio", ok_report()));
            let orchestrator = orchestrator.with_pause(Duration::ZERO);

            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let results = rt.block_on(orchestrator.run_all(&matrix, &PathBuf::from("/dev/nvme0n1")));

            prop_assert_eq!(results.names().collect::<Vec<_>>(), matrix.names().collect::<Vec<_>>());
            prop_assert_eq!(results.failures().count(), fails.iter().filter(|f| **f).count());
        }
    }
}
