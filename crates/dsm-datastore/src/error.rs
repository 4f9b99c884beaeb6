use dsm_query::QueryError;
use dsm_store::StoreError;
use dsm_types::{MultiError, TypeError};

/// Failure converting one entity to or from a property map.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    /// A record must serialize to a map of named fields.
    #[error("{type_name} does not map to named properties (serializes as {found})")]
    NotAnObject {
        type_name: &'static str,
        found: &'static str,
    },

    /// Repeated properties hold scalars or maps, never further lists.
    #[error("property {property:?} is a list of lists")]
    NestedSlice { property: String },

    #[error("property {property:?} holds an integer outside the i64 range")]
    IntegerOverflow { property: String },

    #[error("property {property:?} cannot be represented: {reason}")]
    Unrepresentable { property: String, reason: String },

    /// The stored entity carries a property the record does not declare.
    #[error("{kind}: unknown property {property:?}")]
    UnknownProperty { kind: String, property: String },

    #[error("{kind}: cannot load properties: {reason}")]
    Decode { kind: String, reason: String },

    #[error("{kind}: cannot save properties: {reason}")]
    Encode { kind: String, reason: String },

    /// Raised by hand-written load/save implementations.
    #[error("{0}")]
    Custom(String),
}

impl serde::ser::Error for MappingError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl serde::de::Error for MappingError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// Errors from the typed datastore engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatastoreError {
    /// The argument's type cannot be mapped. Raised before any store call.
    #[error("{op}: invalid input type {type_name}")]
    InvalidInput {
        op: &'static str,
        type_name: &'static str,
    },

    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Per-item failures of a batch, aligned with the input by index.
    #[error("batch failed: {0}")]
    Multi(MultiError<DatastoreError>),

    /// The registry has no raw store installed for the scope.
    #[error("no raw store installed for scope {scope:?}")]
    NoStore { scope: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DatastoreError {
    /// Unwrap a size-one batch aggregate into the error of its only item.
    ///
    /// Any other error is returned unchanged.
    pub fn into_single(self) -> Self {
        match self {
            Self::Multi(multi) => match multi.into_single() {
                Ok(err) => err,
                Err(multi) => Self::Multi(multi),
            },
            other => other,
        }
    }

    /// Per-item aggregate, if this is a batch failure.
    pub fn as_multi(&self) -> Option<&MultiError<DatastoreError>> {
        match self {
            Self::Multi(multi) => Some(multi),
            _ => None,
        }
    }

    /// Returns `true` for a store `NotFound`, or a size-one batch aggregate
    /// whose only error is one.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(StoreError::NotFound(_)) => true,
            Self::Multi(multi) if multi.len() == 1 => {
                multi.get(0).is_some_and(DatastoreError::is_not_found)
            }
            _ => false,
        }
    }
}

impl From<TypeError> for DatastoreError {
    fn from(err: TypeError) -> Self {
        Self::InvalidKey(err.to_string())
    }
}

impl From<MultiError<DatastoreError>> for DatastoreError {
    fn from(multi: MultiError<DatastoreError>) -> Self {
        Self::Multi(multi)
    }
}

/// Result alias for datastore operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dsm_types::Key;

    #[test]
    fn into_single_unwraps_size_one_aggregate() {
        let key = Key::new("", "", "User", "a", 0, None);
        let inner = DatastoreError::Store(StoreError::NotFound(key));
        let multi = MultiError::from_vec(vec![Some(inner.clone())]);
        assert_eq!(DatastoreError::Multi(multi).into_single(), inner);
        assert!(inner.is_not_found());
    }

    #[test]
    fn not_found_is_seen_through_size_one_aggregate() {
        let key = Key::new("", "", "User", "a", 0, None);
        let inner = DatastoreError::Store(StoreError::NotFound(key));
        let single = DatastoreError::Multi(MultiError::from_vec(vec![Some(inner.clone())]));
        assert!(single.is_not_found());

        let pair = DatastoreError::Multi(MultiError::from_vec(vec![Some(inner), None]));
        assert!(!pair.is_not_found());
        assert!(!DatastoreError::Config("x".into()).is_not_found());
    }

    #[test]
    fn into_single_keeps_larger_aggregates() {
        let multi = MultiError::from_vec(vec![None, Some(DatastoreError::Config("x".into()))]);
        let err = DatastoreError::Multi(multi).into_single();
        assert_eq!(err.as_multi().map(|m| m.len()), Some(2));
    }

    #[test]
    fn display_names_type_and_op() {
        let err = DatastoreError::InvalidInput {
            op: "put_multi",
            type_name: "Pair",
        };
        assert_eq!(err.to_string(), "put_multi: invalid input type Pair");
    }
}
