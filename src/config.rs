use crate::metrics::FieldKeys;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings loaded from an optional TOML file and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Namespace prepended to every reported metric name.
    pub metric_key_prefix: String,
    /// Checkpoint path override.
    pub posfile: Option<PathBuf>,
    /// Disable position tracking and re-read the whole file every run.
    pub no_posfile: bool,
    pub status_key: String,
    pub request_time_key: String,
    /// Empty disables cache-status metrics.
    pub cache_status_key: String,
    /// Staging path for the atomic checkpoint write.
    pub tempfile: Option<PathBuf>,
    /// State directory root (default: `$MACKEREL_PLUGIN_WORKDIR` or the OS temp dir).
    pub workdir: Option<PathBuf>,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `name<TAB>value<TAB>epoch` lines
    #[default]
    Tsv,
    /// A single JSON object
    Json,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            metric_key_prefix: "accesslog".to_string(),
            posfile: None,
            no_posfile: false,
            status_key: "status".to_string(),
            request_time_key: "reqtime".to_string(),
            cache_status_key: "upstream_cache_status".to_string(),
            tempfile: None,
            workdir: None,
            format: OutputFormat::Tsv,
        }
    }
}

impl PluginConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Labels the aggregator reads from each record.
    pub fn field_keys(&self) -> FieldKeys {
        FieldKeys {
            status: self.status_key.clone(),
            latency: self.request_time_key.clone(),
            cache_status: (!self.cache_status_key.is_empty())
                .then(|| self.cache_status_key.clone()),
        }
    }

    /// Reject settings that cannot produce a usable run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status_key.is_empty() {
            return Err(ConfigError::Invalid("status_key must not be empty".to_string()));
        }
        if self.request_time_key.is_empty() {
            return Err(ConfigError::Invalid(
                "request_time_key must not be empty".to_string(),
            ));
        }
        if self.metric_key_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "metric_key_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
