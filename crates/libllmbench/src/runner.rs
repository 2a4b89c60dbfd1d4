//! Benchmark runner - drives every test case through restart, health check,
//! measurement and recording

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::{PollingSleeper, Sleeper, StopFlag};
use crate::config::BenchConfig;
use crate::engine::{BenchmarkEngine, BenchmarkResult, EvalscopeEngine, PerfArguments};
use crate::error::{EngineError, LifecycleError, Result};
use crate::health::{ChatCompletionProbe, HealthChecker, HealthProbe};
use crate::lifecycle::{ServiceController, ServiceRestarter};
use crate::matrix::{self, TestCase};
use crate::recorder::{ResultRecorder, ResultRow};

/// Timestamp format used in result file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// How a single test case ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CaseOutcome {
    Measured(BenchmarkResult),
    RestartFailed,
    HealthCheckFailed,
    BenchmarkFailed,
    /// The stop flag was raised mid-case; nothing is recorded
    Interrupted,
}

impl CaseOutcome {
    /// Comment written for cases without metrics
    pub fn reason(&self) -> &'static str {
        match self {
            CaseOutcome::Measured(_) => "",
            CaseOutcome::RestartFailed => "restart failed",
            CaseOutcome::HealthCheckFailed => "health check failed",
            CaseOutcome::BenchmarkFailed => "benchmark failed",
            CaseOutcome::Interrupted => "interrupted",
        }
    }

    fn to_row(&self, case: &TestCase) -> ResultRow {
        match self {
            CaseOutcome::Measured(result) => ResultRow::measured(case, result),
            other => ResultRow::blank(case, other.reason()),
        }
    }
}

/// What a run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_cases: usize,
    pub measured: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub result_path: Option<PathBuf>,
    pub rows: Vec<ResultRow>,
}

impl RunSummary {
    pub fn recorded(&self) -> usize {
        self.rows.len()
    }
}

/// Sequential benchmark driver
pub struct BenchmarkRunner {
    config: BenchConfig,
    restarter: Box<dyn ServiceRestarter>,
    probe: Box<dyn HealthProbe>,
    sleeper: Box<dyn Sleeper>,
    engine: Box<dyn BenchmarkEngine>,
    stop: StopFlag,
    json_report: Option<PathBuf>,
}

impl BenchmarkRunner {
    /// Runner wired to the real container runtime, endpoint and engine
    pub fn new(config: BenchConfig, stop: StopFlag) -> Result<Self> {
        let restarter = ServiceController::new(&config, stop.clone());
        let probe = ChatCompletionProbe::new(config.url.clone(), config.model_name.clone())?;
        let engine = EvalscopeEngine::new(&config, stop.clone());
        Ok(Self {
            restarter: Box::new(restarter),
            probe: Box::new(probe),
            sleeper: Box::new(PollingSleeper::new(stop.clone())),
            engine: Box::new(engine),
            config,
            stop,
            json_report: None,
        })
    }

    pub fn with_restarter(mut self, restarter: impl ServiceRestarter + 'static) -> Self {
        self.restarter = Box::new(restarter);
        self
    }

    pub fn with_probe(mut self, probe: impl HealthProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_engine(mut self, engine: impl BenchmarkEngine + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    /// Also write all rows as JSON when the run ends
    pub fn with_json_report(mut self, path: Option<PathBuf>) -> Self {
        self.json_report = path;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Run the whole matrix
    pub fn run(&self) -> Result<RunSummary> {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.run_with_timestamp(&timestamp)
    }

    /// Run the whole matrix, naming the result file after `timestamp`
    pub fn run_with_timestamp(&self, timestamp: &str) -> Result<RunSummary> {
        let cases = match matrix::generate(&self.config.test_case) {
            Ok(cases) => cases,
            Err(e) => {
                error!("Failed to generate test cases: {}", e);
                return Ok(RunSummary::default());
            }
        };
        if cases.is_empty() {
            error!("No valid test cases generated");
            return Ok(RunSummary::default());
        }

        let total = cases.len();
        info!("{} test cases", total);

        let mut recorder = ResultRecorder::create(
            &self.config.result_dir,
            &self.config.result_file_prefix,
            timestamp,
        )?;
        let mut summary = RunSummary {
            total_cases: total,
            result_path: Some(recorder.path().to_path_buf()),
            ..RunSummary::default()
        };

        for case in &cases {
            if self.stop.is_triggered() {
                summary.interrupted = true;
                break;
            }
            info!(case = case.index, "Progress {}/{}", case.index, total);

            let outcome = self.run_case(case);
            match &outcome {
                CaseOutcome::Interrupted => {
                    warn!(case = case.index, "Interrupted, test case not recorded");
                    summary.interrupted = true;
                    break;
                }
                CaseOutcome::Measured(_) => summary.measured += 1,
                CaseOutcome::RestartFailed | CaseOutcome::HealthCheckFailed => summary.skipped += 1,
                CaseOutcome::BenchmarkFailed => summary.failed += 1,
            }
            recorder.append(outcome.to_row(case))?;
        }

        summary.rows = recorder.rows().to_vec();
        if let Some(path) = &self.json_report {
            recorder.write_json(path)?;
            info!(path = %path.display(), "JSON report saved");
        }

        if summary.interrupted {
            warn!("Run interrupted after {} of {} test cases", summary.recorded(), total);
        } else {
            info!("All test cases finished");
        }
        Ok(summary)
    }

    /// PENDING -> (RESTART) -> (HEALTH_CHECK) -> RUN; any lifecycle failure skips RUN
    pub fn run_case(&self, case: &TestCase) -> CaseOutcome {
        if self.config.restart_model {
            if !self.restarter.restart_all() {
                if self.stop.is_triggered() {
                    return CaseOutcome::Interrupted;
                }
                error!(case = case.index, %case, "Service restart failed, skipping test case");
                return CaseOutcome::RestartFailed;
            }

            let checker = HealthChecker::new(&self.probe, &self.sleeper, &self.config.healthcheck);
            match checker.check() {
                Ok(()) => {}
                Err(LifecycleError::Interrupted) => return CaseOutcome::Interrupted,
                Err(_) if self.stop.is_triggered() => return CaseOutcome::Interrupted,
                Err(e) => {
                    error!(case = case.index, %case, "Health check failed, skipping test case: {}", e);
                    return CaseOutcome::HealthCheckFailed;
                }
            }
        }

        info!(case = case.index, "Benchmark: {}", case);
        let args = PerfArguments::for_case(&self.config, case);
        match self.engine.run(&args) {
            Ok(report) => CaseOutcome::Measured(BenchmarkResult::from_report(&report)),
            Err(EngineError::Interrupted) => CaseOutcome::Interrupted,
            // Ctrl-C reaches the engine too, so it often exits on its own first
            Err(_) if self.stop.is_triggered() => CaseOutcome::Interrupted,
            Err(e) => {
                error!(case = case.index, %case, "Benchmark failed: {}", e);
                CaseOutcome::BenchmarkFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::clock::RecordingSleeper;
    use crate::engine::RawReport;
    use crate::health::ProbeOutcome;
    use tempfile::tempdir;

    struct FixedRestarter(bool);

    impl ServiceRestarter for FixedRestarter {
        fn restart_all(&self) -> bool {
            self.0
        }
    }

    struct FixedProbe(ProbeOutcome);

    impl HealthProbe for FixedProbe {
        fn probe(&self) -> ProbeOutcome {
            self.0.clone()
        }

        fn target(&self) -> &str {
            "fixed"
        }
    }

    /// Reports a throughput equal to the concurrency, counting invocations
    struct CountingEngine {
        calls: Rc<Cell<usize>>,
    }

    impl BenchmarkEngine for CountingEngine {
        fn run(&self, args: &PerfArguments) -> std::result::Result<RawReport, EngineError> {
            self.calls.set(self.calls.get() + 1);
            let report = serde_json::json!({
                "Total token throughput (tok/s)": args.parallel,
                "Time taken for tests (s)": 1.5,
            });
            Ok(RawReport::from_json(&report.to_string())?)
        }
    }

    fn config(dir: &std::path::Path, restart: bool, mode: u32) -> BenchConfig {
        BenchConfig::from_yaml(&format!(
            r#"
result_dir: {}
result_file_prefix: unit
url: http://127.0.0.1:1/v1/chat/completions
model_name: m
tokenizer_path: /tok
dataset: random
container_name: vllm
restart_model: {}
healthcheck: {{ initial_delay: 0, retry_count: 2, interval: 0 }}
test_case:
  mode: {}
  context: ["(128, 128)", "(256, 64)"]
  batch_request: ["(1, 10)", "(4, 40)", "(8, 80)"]
"#,
            dir.display(),
            restart,
            mode
        ))
        .unwrap()
    }

    fn runner(config: BenchConfig, restart_ok: bool, probe: ProbeOutcome) -> (BenchmarkRunner, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let runner = BenchmarkRunner::new(config, StopFlag::new())
            .unwrap()
            .with_restarter(FixedRestarter(restart_ok))
            .with_probe(FixedProbe(probe))
            .with_sleeper(RecordingSleeper::new())
            .with_engine(CountingEngine { calls: Rc::clone(&calls) });
        (runner, calls)
    }

    #[test]
    fn test_full_run_records_every_case() {
        let dir = tempdir().unwrap();
        let (runner, calls) = runner(config(dir.path(), false, 1), true, ProbeOutcome::Ready);

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert_eq!(summary.total_cases, 6);
        assert_eq!(summary.recorded(), 6);
        assert_eq!(summary.measured, 6);
        assert_eq!(calls.get(), 6);
        assert_eq!(summary.rows[2].throughput, Some(8.0));
        assert!(summary.result_path.unwrap().exists());
    }

    #[test]
    fn test_restart_failure_skips_engine() {
        let dir = tempdir().unwrap();
        let (runner, calls) = runner(config(dir.path(), true, 1), false, ProbeOutcome::Ready);

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert_eq!(summary.recorded(), 6);
        assert_eq!(summary.skipped, 6);
        assert_eq!(calls.get(), 0);
        for row in &summary.rows {
            assert!(!row.has_metrics());
            assert_eq!(row.comment, "restart failed");
        }
    }

    #[test]
    fn test_health_failure_skips_engine() {
        let dir = tempdir().unwrap();
        let (runner, calls) = runner(config(dir.path(), true, 1), true, ProbeOutcome::Status(503));

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert_eq!(summary.recorded(), 6);
        assert_eq!(calls.get(), 0);
        assert!(summary.rows.iter().all(|r| r.comment == "health check failed"));
    }

    #[test]
    fn test_healthy_restart_runs_engine() {
        let dir = tempdir().unwrap();
        let (runner, calls) = runner(config(dir.path(), true, 1), true, ProbeOutcome::Ready);

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert_eq!(summary.measured, 6);
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn test_matrix_error_is_clean_early_return() {
        let dir = tempdir().unwrap();
        let (runner, calls) = runner(config(dir.path(), false, 2), true, ProbeOutcome::Ready);

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert_eq!(summary.total_cases, 0);
        assert!(summary.result_path.is_none());
        assert_eq!(calls.get(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Raises the stop flag and then dies, like an engine hit by the same Ctrl-C
    struct InterruptedEngine {
        stop: StopFlag,
        calls: Rc<Cell<usize>>,
    }

    impl BenchmarkEngine for InterruptedEngine {
        fn run(&self, _: &PerfArguments) -> std::result::Result<RawReport, EngineError> {
            self.calls.set(self.calls.get() + 1);
            self.stop.trigger();
            Err(EngineError::AbnormalExit { code: "130".to_string() })
        }
    }

    #[test]
    fn test_engine_exit_after_stop_is_not_recorded() {
        let dir = tempdir().unwrap();
        let stop = StopFlag::new();
        let calls = Rc::new(Cell::new(0));
        let runner = BenchmarkRunner::new(config(dir.path(), false, 1), stop.clone())
            .unwrap()
            .with_engine(InterruptedEngine {
                stop: stop.clone(),
                calls: Rc::clone(&calls),
            });

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert!(summary.interrupted);
        assert!(summary.rows.is_empty());
        assert_eq!(summary.failed, 0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_health_failure_after_stop_is_not_recorded() {
        struct StoppingProbe(StopFlag);

        impl HealthProbe for StoppingProbe {
            fn probe(&self) -> ProbeOutcome {
                self.0.trigger();
                ProbeOutcome::Failed("connection reset".to_string())
            }

            fn target(&self) -> &str {
                "stopping"
            }
        }

        let dir = tempdir().unwrap();
        let stop = StopFlag::new();
        // One attempt, so the checker gives up without sleeping on the flag.
        let mut config = config(dir.path(), true, 1);
        config.healthcheck.retry_count = 1;
        let calls = Rc::new(Cell::new(0));
        let runner = BenchmarkRunner::new(config, stop.clone())
            .unwrap()
            .with_restarter(FixedRestarter(true))
            .with_probe(StoppingProbe(stop.clone()))
            .with_sleeper(RecordingSleeper::new())
            .with_engine(CountingEngine { calls: Rc::clone(&calls) });

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert!(summary.interrupted);
        assert!(summary.rows.is_empty());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_stop_before_start_records_nothing() {
        let dir = tempdir().unwrap();
        let stop = StopFlag::new();
        let calls = Rc::new(Cell::new(0));
        let runner = BenchmarkRunner::new(config(dir.path(), false, 1), stop.clone())
            .unwrap()
            .with_engine(CountingEngine { calls: Rc::clone(&calls) });
        stop.trigger();

        let summary = runner.run_with_timestamp("t1").unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.recorded(), 0);
        assert_eq!(calls.get(), 0);
    }
}
