use dsm_types::Key;

/// Errors from raw store operations.
///
/// Per-item variants (`NotFound`, `InvalidKey`, `Conflict`,
/// `PermissionDenied`) are reported in a batch's result slot. Whole-call
/// variants (`Transport`, `Aborted`) are returned from the call itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// No entity is stored under the key.
    #[error("entity not found: {0}")]
    NotFound(Key),

    /// The key is malformed, incomplete where a complete key is required, or
    /// scoped to another app/namespace.
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: Key, reason: String },

    /// The write conflicted with a concurrent change.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store returned without producing a result for this item.
    #[error("raw store delivered no result for this item")]
    NoResult,

    /// The call failed as a whole before (or after) per-item results.
    #[error("transport error: {0}")]
    Transport(String),

    /// The cursor was not produced by this store or is corrupt.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A transaction was rolled back.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
