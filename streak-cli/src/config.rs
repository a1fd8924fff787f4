//! Configuration for the streak CLI.
//!
//! Loaded from a TOML file named by `--config` or `STREAK_CONFIG`. The
//! `[sync]` table overrides the `STREAK_*` environment defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use streak_core::SyncConfig;
use thiserror::Error;

/// Environment variable holding the config path when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "STREAK_CONFIG";

/// Environment variable that overrides `[origin].token`.
pub const ORIGIN_TOKEN_ENV: &str = "STREAK_ORIGIN_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing config path (use --config or STREAK_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error(transparent)]
    Sync(#[from] streak_core::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    pub origin: OriginConfig,
    #[serde(default)]
    pub edge: Option<EdgeConfig>,
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncOverrides,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OriginConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    pub url: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: usize,
}

fn default_max_size_mb() -> usize {
    64
}

/// Optional overrides applied on top of [`SyncConfig::from_env`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncOverrides {
    pub fresh_window_secs: Option<u64>,
    pub stale_window_secs: Option<u64>,
    pub fetch_timeout_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub max_recent_attempts: Option<usize>,
}

impl CliConfig {
    /// Load from an explicit path, falling back to `STREAK_CONFIG`.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .ok_or(ConfigError::MissingConfigPath)?;
        let mut config = Self::from_path(&path)?;
        config.origin.token = resolve_token(
            std::env::var(ORIGIN_TOKEN_ENV).ok(),
            config.origin.token.take(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "origin.base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(edge) = &self.edge {
            if edge.url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "edge.url",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.cache.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        self.sync_config()?;
        Ok(())
    }

    /// Orchestrator settings: environment defaults, then `[sync]`, then edge presence.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let config = self.sync.apply(SyncConfig::from_env()).with_edge(self.edge.is_some());
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.origin.request_timeout_ms.map(Duration::from_millis)
    }
}

impl SyncOverrides {
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(secs) = self.fresh_window_secs {
            config.freshness.fresh_window = Duration::from_secs(secs);
        }
        if let Some(secs) = self.stale_window_secs {
            config.freshness.stale_window = Duration::from_secs(secs);
        }
        if let Some(ms) = self.fetch_timeout_ms {
            config.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(retries) = self.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(max) = self.max_recent_attempts {
            config.max_recent_attempts = max;
        }
        config
    }
}

/// A non-empty environment token wins over the file.
fn resolve_token(env: Option<String>, file: Option<String>) -> Option<String> {
    env.filter(|t| !t.is_empty()).or(file)
}
