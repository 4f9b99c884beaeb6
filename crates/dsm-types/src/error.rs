use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("key must contain at least one token")]
    EmptyKey,

    #[error("invalid key token at position {index}: {reason}")]
    InvalidToken { index: usize, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
