//! Benchmark engine invocation and report normalization
//!
//! The engine is an external program. Its summary report is read back as a
//! loose key/value map and reduced to the handful of metrics the result sheet
//! records.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::clock::StopFlag;
use crate::command::{wait_with_timeout, WaitError};
use crate::config::BenchConfig;
use crate::error::EngineError;
use crate::matrix::TestCase;

/// File the engine writes its summary to
pub const REPORT_FILE: &str = "benchmark_summary.json";

pub const KEY_TTFT: &str = "Average time to first token (s)";
pub const KEY_TPOT: &str = "Average time per output token (s)";
pub const KEY_THROUGHPUT: &str = "Total token throughput (tok/s)";
pub const KEY_DURATION: &str = "Time taken for tests (s)";
pub const KEY_FAILED: &str = "Failed requests";
pub const KEY_TOTAL: &str = "Total requests";

/// Everything the engine needs for one measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerfArguments {
    /// Concurrency level
    pub parallel: u32,
    /// Total number of requests
    pub number: u32,
    pub model: String,
    pub url: String,
    pub tokenizer_path: String,
    pub api: String,
    pub dataset: String,
    pub min_tokens: u32,
    pub max_tokens: u32,
    pub min_prompt_length: u32,
    pub max_prompt_length: u32,
    /// Force the full output length instead of stopping at end-of-sequence
    pub ignore_eos: bool,
}

impl PerfArguments {
    /// Pin prompt and output lengths to the test case's exact sizes
    pub fn for_case(config: &BenchConfig, case: &TestCase) -> Self {
        Self {
            parallel: case.batch.batch_size,
            number: case.batch.request_count,
            model: config.model_name.clone(),
            url: config.url.clone(),
            tokenizer_path: config.tokenizer_path.clone(),
            api: config.api.clone(),
            dataset: config.dataset.clone(),
            min_tokens: case.context.output_tokens,
            max_tokens: case.context.output_tokens,
            min_prompt_length: case.context.input_tokens,
            max_prompt_length: case.context.input_tokens,
            ignore_eos: true,
        }
    }
}

/// Engine summary as reported, keyed by the engine's metric names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReport(Map<String, Value>);

impl RawReport {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::from_str(content)?))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric value for `key`; numeric strings are accepted too
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Metrics recorded for one test case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub ttft: Option<f64>,
    pub tpot: Option<f64>,
    pub throughput: Option<f64>,
    pub duration: Option<f64>,
    pub comment: String,
}

impl BenchmarkResult {
    /// Pick the recorded metrics out of a raw report
    pub fn from_report(report: &RawReport) -> Self {
        let failed = report.number(KEY_FAILED).unwrap_or(0.0) as u64;
        let comment = if failed > 0 {
            let total = match report.get(KEY_TOTAL) {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => "N/A".to_string(),
            };
            format!("failed requests: {}/{}", failed, total)
        } else {
            String::new()
        };

        Self {
            ttft: report.number(KEY_TTFT),
            tpot: report.number(KEY_TPOT),
            throughput: report.number(KEY_THROUGHPUT),
            duration: report.number(KEY_DURATION),
            comment,
        }
    }
}

/// Something that can measure a serving endpoint
pub trait BenchmarkEngine {
    fn run(&self, args: &PerfArguments) -> Result<RawReport, EngineError>;
}

impl<T: BenchmarkEngine + ?Sized> BenchmarkEngine for &T {
    fn run(&self, args: &PerfArguments) -> Result<RawReport, EngineError> {
        (**self).run(args)
    }
}

impl<T: BenchmarkEngine + ?Sized> BenchmarkEngine for Box<T> {
    fn run(&self, args: &PerfArguments) -> Result<RawReport, EngineError> {
        (**self).run(args)
    }
}

/// Runs `evalscope perf` as a child process and reads back its summary
pub struct EvalscopeEngine {
    program: String,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
    outputs_root: PathBuf,
    stop: StopFlag,
}

impl EvalscopeEngine {
    pub fn new(config: &BenchConfig, stop: StopFlag) -> Self {
        Self {
            program: config.engine.program.clone(),
            extra_args: config.engine.extra_args.clone(),
            timeout: config.engine.timeout.map(Duration::from_secs),
            outputs_root: config.engine_outputs_dir(),
            stop,
        }
    }

    /// Full argument list for one run
    pub fn command_args(&self, args: &PerfArguments, outputs_dir: &Path) -> Vec<String> {
        let mut argv = vec!["perf".to_string()];
        let mut flag = |name: &str, value: String| {
            argv.push(format!("--{}", name));
            argv.push(value);
        };
        flag("parallel", args.parallel.to_string());
        flag("number", args.number.to_string());
        flag("model", args.model.clone());
        flag("url", args.url.clone());
        flag("api", args.api.clone());
        flag("dataset", args.dataset.clone());
        flag("tokenizer-path", args.tokenizer_path.clone());
        flag("min-tokens", args.min_tokens.to_string());
        flag("max-tokens", args.max_tokens.to_string());
        flag("min-prompt-length", args.min_prompt_length.to_string());
        flag("max-prompt-length", args.max_prompt_length.to_string());
        flag(
            "extra-args",
            serde_json::json!({ "ignore_eos": args.ignore_eos }).to_string(),
        );
        flag("outputs-dir", outputs_dir.display().to_string());
        argv.extend(self.extra_args.iter().cloned());
        argv
    }

    fn run_dir(&self, args: &PerfArguments) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        self.outputs_root.join(format!(
            "in{}-out{}-c{}-n{}-{}",
            args.max_prompt_length, args.max_tokens, args.parallel, args.number, stamp
        ))
    }
}

impl BenchmarkEngine for EvalscopeEngine {
    fn run(&self, args: &PerfArguments) -> Result<RawReport, EngineError> {
        let outputs_dir = self.run_dir(args);
        std::fs::create_dir_all(&outputs_dir)?;

        let argv = self.command_args(args, &outputs_dir);
        debug!(program = %self.program, ?argv, "Launching benchmark engine");

        let mut child = Command::new(&self.program)
            .args(&argv)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let status = match wait_with_timeout(&mut child, self.timeout, &self.stop) {
            Ok(status) => status,
            Err(WaitError::Timeout(t)) => return Err(EngineError::Timeout(t)),
            Err(WaitError::Interrupted) => return Err(EngineError::Interrupted),
            Err(WaitError::Io(e)) => return Err(EngineError::Io(e)),
        };
        if !status.success() {
            return Err(EngineError::AbnormalExit {
                code: status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
            });
        }

        let report_path =
            find_report(&outputs_dir).ok_or_else(|| EngineError::MissingReport(outputs_dir.clone()))?;
        info!(report = %report_path.display(), "Benchmark engine finished");
        let content = std::fs::read_to_string(&report_path)?;
        Ok(RawReport::from_json(&content)?)
    }
}

/// Most recently modified summary report anywhere under `dir`
pub fn find_report(dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if path.file_name().map(|n| n == REPORT_FILE).unwrap_or(false) {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if best.as_ref().map(|(t, _)| modified >= *t).unwrap_or(true) {
                    best = Some((modified, path));
                }
            }
        }
    }

    best.map(|(_, path)| path)
}
