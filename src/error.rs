use crate::config::ConfigError;
use crate::forecast::{ArtifactError, ForecastError};
use crate::source::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("watch channel send failed")]
    WatchSend,
    #[error("state lock poisoned")]
    StateLock,
}
