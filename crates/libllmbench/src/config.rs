//! Benchmark configuration file
//!
//! The file is YAML by default; a `.toml` extension switches to TOML.
//! Token pairs in `test_case` may be written as literal text (`"(128, 256)"`)
//! or as a two-element sequence (`[128, 256]`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::check_placeholders;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_RESTART_CMD: &str = "docker restart {container_name}";
pub const DEFAULT_SSH_CMD: &str =
    "ssh -o StrictHostKeyChecking=no -o ConnectTimeout=10 -p {port} {user}@{ip} {cmd}";

/// Placeholders accepted in `restart_cmd`
pub const RESTART_PLACEHOLDERS: &[&str] = &["container_name"];
/// Placeholders accepted in `ssh_cmd`
pub const SSH_PLACEHOLDERS: &[&str] = &["port", "user", "ip", "cmd"];

/// Complete benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Directory the result workbook is written to
    pub result_dir: PathBuf,
    /// File name prefix, followed by `-<timestamp>.xlsx`
    pub result_file_prefix: String,
    /// Chat-completion endpoint of the service under test
    pub url: String,
    pub model_name: String,
    pub tokenizer_path: String,
    pub dataset: String,
    /// API flavor passed to the benchmark engine
    #[serde(default = "default_api")]
    pub api: String,
    #[serde(default)]
    pub container_name: String,
    /// Restart the serving containers before every test case
    #[serde(default)]
    pub restart_model: bool,
    #[serde(default = "default_restart_cmd")]
    pub restart_cmd: String,
    #[serde(default = "default_ssh_cmd")]
    pub ssh_cmd: String,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub healthcheck: HealthCheckConfig,
    pub test_case: TestCaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// A host running one instance of the serving container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub ip: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

/// Health-check timing, all values in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub initial_delay: u64,
    pub retry_count: u32,
    pub interval: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            initial_delay: 30,
            retry_count: 30,
            interval: 10,
        }
    }
}

impl HealthCheckConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// The test matrix description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseConfig {
    /// 1 = Cartesian product, 2 = element-wise pairing
    pub mode: u32,
    #[serde(default)]
    pub context: Vec<ContextPair>,
    #[serde(default)]
    pub batch_request: Vec<BatchRequest>,
}

/// External benchmark engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable
    pub program: String,
    /// Extra arguments appended after the generated ones
    pub extra_args: Vec<String>,
    /// Per-run timeout in seconds (none = wait indefinitely)
    pub timeout: Option<u64>,
    /// Where engine outputs go (defaults to `<result_dir>/engine-outputs`)
    pub outputs_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "evalscope".to_string(),
            extra_args: Vec::new(),
            timeout: None,
            outputs_dir: None,
        }
    }
}

/// (input_tokens, output_tokens)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPair", into = "RawPair")]
pub struct ContextPair {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// (batch_size, request_count)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPair", into = "RawPair")]
pub struct BatchRequest {
    pub batch_size: u32,
    pub request_count: u32,
}

/// Either form a pair may take in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPair {
    Text(String),
    Seq(Vec<i64>),
}

impl fmt::Display for ContextPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.input_tokens, self.output_tokens)
    }
}

impl fmt::Display for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.batch_size, self.request_count)
    }
}

impl FromStr for ContextPair {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (input_tokens, output_tokens) = parse_pair_text(s)?;
        Ok(Self {
            input_tokens,
            output_tokens,
        })
    }
}

impl FromStr for BatchRequest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (batch_size, request_count) = parse_pair_text(s)?;
        Ok(Self {
            batch_size,
            request_count,
        })
    }
}

impl TryFrom<RawPair> for ContextPair {
    type Error = ConfigError;

    fn try_from(raw: RawPair) -> Result<Self, Self::Error> {
        let (input_tokens, output_tokens) = raw.into_values()?;
        Ok(Self {
            input_tokens,
            output_tokens,
        })
    }
}

impl TryFrom<RawPair> for BatchRequest {
    type Error = ConfigError;

    fn try_from(raw: RawPair) -> Result<Self, Self::Error> {
        let (batch_size, request_count) = raw.into_values()?;
        Ok(Self {
            batch_size,
            request_count,
        })
    }
}

impl From<ContextPair> for RawPair {
    fn from(pair: ContextPair) -> Self {
        RawPair::Seq(vec![pair.input_tokens.into(), pair.output_tokens.into()])
    }
}

impl From<BatchRequest> for RawPair {
    fn from(pair: BatchRequest) -> Self {
        RawPair::Seq(vec![pair.batch_size.into(), pair.request_count.into()])
    }
}

impl RawPair {
    fn into_values(self) -> Result<(u32, u32), ConfigError> {
        match self {
            RawPair::Text(text) => parse_pair_text(&text),
            RawPair::Seq(values) => {
                let entry = format!("{:?}", values);
                match values.as_slice() {
                    [a, b] => Ok((positive(*a, &entry)?, positive(*b, &entry)?)),
                    _ => Err(ConfigError::InvalidPair {
                        entry,
                        reason: format!("expected 2 values, found {}", values.len()),
                    }),
                }
            }
        }
    }
}

/// Parse `"(a, b)"`, `"[a, b]"` or `"a,b"` into two positive integers
fn parse_pair_text(text: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidPair {
        entry: text.to_string(),
        reason,
    };

    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')))
        .unwrap_or(trimmed);

    let parts: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 2 {
        return Err(invalid(format!("expected 2 values, found {}", parts.len())));
    }

    let mut values = [0i64; 2];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .parse::<i64>()
            .map_err(|_| invalid(format!("'{}' is not an integer", part)))?;
    }
    Ok((positive(values[0], text)?, positive(values[1], text)?))
}

fn positive(value: i64, entry: &str) -> Result<u32, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidPair {
            entry: entry.to_string(),
            reason: format!("{} must be a positive integer", value),
        });
    }
    u32::try_from(value).map_err(|_| ConfigError::InvalidPair {
        entry: entry.to_string(),
        reason: format!("{} is out of range", value),
    })
}

fn default_api() -> String {
    "openai".to_string()
}

fn default_restart_cmd() -> String {
    DEFAULT_RESTART_CMD.to_string()
}

fn default_ssh_cmd() -> String {
    DEFAULT_SSH_CMD.to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl BenchConfig {
    /// Parse a YAML document and validate it
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: BenchConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document and validate it
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BenchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("result_file_prefix", self.result_file_prefix.as_str()),
            ("url", self.url.as_str()),
            ("model_name", self.model_name.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("'{}' must not be empty", name)));
            }
        }
        if self.result_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("'result_dir' must not be empty".to_string()));
        }

        if self.restart_model && self.container_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "'container_name' is required when 'restart_model' is enabled".to_string(),
            ));
        }

        check_placeholders(&self.restart_cmd, RESTART_PLACEHOLDERS)
            .map_err(|e| ConfigError::Invalid(format!("restart_cmd: {}", e)))?;
        check_placeholders(&self.ssh_cmd, SSH_PLACEHOLDERS)
            .map_err(|e| ConfigError::Invalid(format!("ssh_cmd: {}", e)))?;
        if !self.ssh_cmd.contains("{cmd}") {
            return Err(ConfigError::Invalid(
                "ssh_cmd must contain the {cmd} placeholder".to_string(),
            ));
        }

        for host in &self.hosts {
            if host.ip.trim().is_empty() || host.user.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "host entry needs both 'ip' and 'user' (got ip='{}', user='{}')",
                    host.ip, host.user
                )));
            }
        }

        if self.engine.program.trim().is_empty() {
            return Err(ConfigError::Invalid("'engine.program' must not be empty".to_string()));
        }

        Ok(())
    }

    /// Workbook path for a run started at `timestamp`
    pub fn result_path(&self, timestamp: &str) -> PathBuf {
        self.result_dir
            .join(format!("{}-{}.xlsx", self.result_file_prefix, timestamp))
    }

    /// Directory the benchmark engine writes its outputs to
    pub fn engine_outputs_dir(&self) -> PathBuf {
        self.engine
            .outputs_dir
            .clone()
            .unwrap_or_else(|| self.result_dir.join("engine-outputs"))
    }
}

/// Load and validate the configuration file at `path`
pub fn load_config(path: &Path) -> Result<BenchConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        BenchConfig::from_toml(&content)
    } else {
        BenchConfig::from_yaml(&content)
    }
}
