//! Updater configuration

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SwrError};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Attribute every listed repository is switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAttr {
    Public,
    Private,
}

impl TargetAttr {
    pub fn is_public(self) -> bool {
        self == TargetAttr::Public
    }
}

impl fmt::Display for TargetAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_public() { "public" } else { "private" })
    }
}

#[derive(Clone, Deserialize)]
pub struct SwrConfig {
    /// Access key
    pub ak: String,
    /// Secret key
    pub sk: String,
    pub region: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Overrides the regional API endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    pub namespace: String,
    /// Maximum number of repositories listed
    #[serde(default)]
    pub limit: Option<u32>,
    /// `true` lists only public repositories; `false` applies no filter
    #[serde(default)]
    pub is_public: Option<bool>,
    pub target_attr: TargetAttr,
}

impl fmt::Debug for SwrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwrConfig")
            .field("ak", &self.ak)
            .field("sk", &"[REDACTED]")
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("limit", &self.limit)
            .field("is_public", &self.is_public)
            .field("target_attr", &self.target_attr)
            .finish()
    }
}

impl SwrConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ak", &self.ak),
            ("sk", &self.sk),
            ("region", &self.region),
            ("namespace", &self.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(SwrError::Config(format!("'{}' must not be empty", name)));
            }
        }
        if self.limit == Some(0) {
            return Err(SwrError::Config("'limit' must be positive".to_string()));
        }
        Ok(())
    }

    /// API base URL, without a trailing slash
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://swr-api.{}.myhuaweicloud.com", self.region),
        }
    }
}

/// Load a config file, TOML when the extension says so, YAML otherwise
pub fn load_config(path: &Path) -> Result<SwrConfig> {
    if !path.exists() {
        return Err(SwrError::ConfigNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| SwrError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => SwrConfig::from_toml(&content),
        _ => SwrConfig::from_yaml(&content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
ak: AKEXAMPLE
sk: very-secret
region: cn-north-4
namespace: team
limit: 50
target_attr: private
"#;

    #[test]
    fn test_parse_yaml() {
        let config = SwrConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.namespace, "team");
        assert_eq!(config.limit, Some(50));
        assert_eq!(config.is_public, None);
        assert_eq!(config.target_attr, TargetAttr::Private);
        assert!(!config.target_attr.is_public());
        assert_eq!(config.endpoint(), "https://swr-api.cn-north-4.myhuaweicloud.com");
    }

    #[test]
    fn test_endpoint_override() {
        let yaml = format!("{}endpoint: http://127.0.0.1:8080/\n", SAMPLE);
        let config = SwrConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.endpoint(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_unknown_target_attr_rejected() {
        let yaml = SAMPLE.replace("target_attr: private", "target_attr: hidden");
        assert!(matches!(SwrConfig::from_yaml(&yaml), Err(SwrError::Yaml(_))));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let yaml = SAMPLE.replace("sk: very-secret", "sk: \"\"");
        let err = SwrConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("'sk'"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = SwrConfig::from_yaml(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_load_toml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("swr.toml");
        std::fs::write(
            &path,
            r#"
ak = "AK"
sk = "SK"
region = "ap-southeast-1"
project_id = "p1"
namespace = "ml"
is_public = true
target_attr = "private"
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("p1"));
        assert_eq!(config.is_public, Some(true));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, SwrError::ConfigNotFound(_)));
    }
}
