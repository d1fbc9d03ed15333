use thiserror::Error;

/// Errors from the configuration persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent config not found: {0}")]
    NotFound(String),

    #[error("an agent id or agent name is required")]
    MissingKey,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Errors raised while reading, merging or publishing agent configuration.
#[derive(Debug, Error)]
pub enum AgentConfigError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The record's `model_config` column is not a valid sampling object,
    /// or a payload failed to encode.
    #[error("invalid model config: {0}")]
    ModelConfig(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] warda_bus::BusError),

    #[error("config request queue is closed")]
    QueueClosed,
}
