use thiserror::Error;

use crate::config::ConfigError;
use crate::persistence::PersistenceError;

/// Unified application error.
///
/// Only startup and shutdown paths return it; per-network polling failures
/// are absorbed as degraded cycles and never reach this type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
