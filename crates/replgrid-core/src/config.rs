//! replgrid.toml configuration parser.
//!
//! Every section is optional; an empty file yields the defaults the
//! daemon runs with in a stock cluster.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration {0:?}")]
    Duration(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplgridConfig {
    pub orchestrator: OrchestratorConfig,
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub listen: String,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub namespace: String,
    /// Multi-document manifest template. The typed builder is used when unset.
    pub manifest: Option<PathBuf>,
    /// Literal token replaced with the workspace id before parsing.
    pub placeholder: String,
    pub readiness_interval: String,
    pub readiness_attempts: u32,
    pub builder: BuilderConfig,
}

/// Settings for the programmatic resource-set builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub image: String,
    pub port: u16,
    /// Ingress host is `{workspace_id}.{domain}`.
    pub domain: String,
    pub ingress_class: Option<String>,
    /// Secret whose keys are exposed to the runner as storage credentials.
    pub storage_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub listen: String,
    pub workspace_root: PathBuf,
    pub shell: String,
    pub workspace_id: Option<String>,
    pub cols: u16,
    pub rows: u16,
    /// Extra variable names stripped from the shell environment.
    pub denied_env: Vec<String>,
    /// Download the workspace prefix into `workspace_root` at startup.
    pub hydrate_on_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3002".to_string(),
            data_dir: PathBuf::from("/var/lib/replgrid"),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            manifest: None,
            placeholder: "service_name".to_string(),
            readiness_interval: "1s".to_string(),
            readiness_attempts: 60,
            builder: BuilderConfig::default(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            image: "replgrid/runner:latest".to_string(),
            port: 3001,
            domain: "repl.localhost".to_string(),
            ingress_class: Some("nginx".to_string()),
            storage_secret: Some("replgrid-storage".to_string()),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: None,
            region: "ap-south-1".to_string(),
            force_path_style: true,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3001".to_string(),
            workspace_root: PathBuf::from("/workspace"),
            shell: "bash".to_string(),
            workspace_id: None,
            cols: 100,
            rows: 30,
            denied_env: Vec::new(),
            hydrate_on_start: true,
        }
    }
}

impl ReplgridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl ClusterConfig {
    pub fn readiness_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.readiness_interval)
            .ok_or_else(|| ConfigError::Duration(self.readiness_interval.clone()))
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
