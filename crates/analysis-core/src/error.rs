use thiserror::Error;

/// Errors raised inside the decision core.
///
/// `InsufficientData`, `StaleData` and `Computation` are absorbed by the engine
/// (the bot degrades to a `hold`); `Configuration` and `Execution` reach the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl EngineError {
    /// Whether the engine can fall back to a safe `hold` instead of surfacing this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData(_) | EngineError::StaleData(_) | EngineError::Computation(_)
        )
    }
}
