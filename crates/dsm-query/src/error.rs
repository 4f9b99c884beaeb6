//! Error types for query finalization.

use thiserror::Error;

/// Reasons a [`Query`](crate::Query) cannot be finalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A filter, order or projection names an empty property.
    #[error("empty property name in {0}")]
    EmptyPropertyName(&'static str),

    /// Kindless queries may only filter and order on `__key__`.
    #[error("kindless query cannot {0}")]
    Kindless(String),

    /// The ancestor key has no id yet.
    #[error("ancestor key is incomplete: {0}")]
    IncompleteAncestor(String),

    #[error("keys-only queries cannot have a projection")]
    KeysOnlyProjection,

    #[error("distinct requires a projection")]
    DistinctWithoutProjection,

    /// Inequality filters may target only one property.
    #[error("inequality filters on multiple properties: {first} and {second}")]
    MultipleInequality { first: String, second: String },

    /// With an inequality filter, the first sort order must be on the same
    /// property.
    #[error("first sort order must be on inequality property {inequality}, not {order}")]
    FirstOrderMismatch { inequality: String, order: String },

    #[error("cannot project property {0} which has an equality filter")]
    ProjectedEqualityFilter(String),

    #[error("property {0} projected more than once")]
    DuplicateProjection(String),

    #[error("cannot project {0}")]
    InvalidProjection(String),

    #[error("filters on __key__ must compare against a key, got {0}")]
    KeyFilterType(&'static str),
}

/// Convenience type alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;
