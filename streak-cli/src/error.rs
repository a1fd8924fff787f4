use streak_core::StreakError;
use streak_storage::LmdbCacheError;
use thiserror::Error;

use crate::config::ConfigError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] LmdbCacheError),

    #[error(transparent)]
    Streak(#[from] StreakError),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
}
