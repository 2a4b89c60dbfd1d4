//! Error types for libllmbench

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating the configuration file.
///
/// All of these are fatal: the run aborts before any test case executes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid token pair '{entry}': {reason}")]
    InvalidPair { entry: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while expanding the test matrix.
///
/// Reported and turned into an empty run rather than an abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("unsupported test mode: {0} (expected 1 or 2)")]
    UnsupportedMode(u32),

    #[error("mode 2 requires context and batch_request of equal length (got {context} and {batch_request})")]
    LengthMismatch { context: usize, batch_request: usize },
}

/// Failures while restarting or probing the service under test.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("restart command template is empty or has unbalanced quotes: {0}")]
    BadTemplate(String),

    #[error("unknown placeholder {{{placeholder}}} in template '{template}'")]
    UnknownPlaceholder { template: String, placeholder: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("command exited with {code}: {stderr}")]
    NonZeroExit { code: String, stderr: String },

    #[error("service not healthy after {attempts} attempts")]
    Unhealthy { attempts: u32 },

    #[error("could not shell-quote '{0}'")]
    Quote(String),

    #[error("interrupted")]
    Interrupted,
}

/// Failures of the external benchmark engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("benchmark engine exited abnormally (code={code})")]
    AbnormalExit { code: String },

    #[error("failed to launch benchmark engine '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("benchmark engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("benchmark engine produced no report under {}", .0.display())]
    MissingReport(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse benchmark report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("benchmark interrupted")]
    Interrupted,
}

/// Top-level error for a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("spreadsheet error: {0}")]
    Sheet(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, BenchError>;
