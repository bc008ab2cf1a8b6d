//! Error types for upkeep
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while supervising an app
#[derive(Debug, Error)]
pub enum UpkeepError {
    /// Bad or missing configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Fetch, checkout, merge or rev-parse failed
    #[error("Sync error: {0}")]
    Sync(String),

    /// The managed process could not be started
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// A termination attempt ran out of time after TERM and KILL
    #[error("Termination timed out: {0}")]
    TerminationTimeout(String),

    /// Termination retries exhausted their time budget
    #[error("Stop failed: {0}")]
    StopFailed(String),

    /// Too many consecutive spawn/stop failures
    #[error("Failure budget exhausted after {0} consecutive failures")]
    FailureBudgetExhausted(u32),

    /// Operation abandoned because shutdown was requested
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for upkeep operations
pub type Result<T> = std::result::Result<T, UpkeepError>;
