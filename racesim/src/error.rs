use crate::interfaces::store::StoreError;
use helpers::time_codec::ParseError;
use thiserror::Error;

/// Errors raised by the simulation and settlement engine.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Signals a logic defect, the tick loop halts on it.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl SimError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SimError::Validation(msg.into())
    }
}
