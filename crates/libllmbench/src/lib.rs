//! libllmbench - orchestration of LLM serving benchmarks
//!
//! A run loads a [`BenchConfig`], expands its test matrix, and for every test
//! case optionally restarts the serving containers, waits for the endpoint to
//! become healthy, delegates the measurement to an external engine and appends
//! the result to a workbook that is saved after every row.

pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod matrix;
pub mod recorder;
pub mod runner;

pub use clock::{PollingSleeper, RecordingSleeper, Sleeper, StopFlag};
pub use config::{load_config, BatchRequest, BenchConfig, ContextPair, HostConfig};
pub use engine::{BenchmarkEngine, BenchmarkResult, EvalscopeEngine, PerfArguments, RawReport};
pub use error::{BenchError, ConfigError, EngineError, LifecycleError, MatrixError, Result};
pub use health::{ChatCompletionProbe, HealthChecker, HealthProbe, ProbeOutcome};
pub use lifecycle::{ServiceController, ServiceRestarter};
pub use matrix::{generate, MatrixMode, TestCase};
pub use recorder::{ResultRecorder, ResultRow};
pub use runner::{BenchmarkRunner, CaseOutcome, RunSummary};
