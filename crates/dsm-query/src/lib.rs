//! Query builder for the datastore mapper.
//!
//! A [`Query`] is a mutable, cloneable description of what to fetch: kind,
//! ancestor, filters, sort orders, projection, bounds. It does nothing on its
//! own. [`Query::finalize`] checks the combination for contradictions and
//! produces a [`FinalizedQuery`]: an immutable, normalized form that raw
//! stores execute and that can be run any number of times.
//!
//! # Modules
//!
//! - [`error`]: [`QueryError`] returned by finalization
//! - [`query`]: [`Query`], [`FinalizedQuery`], [`Filter`], [`Order`]

pub mod error;
pub mod query;

pub use error::{QueryError, QueryResult};
pub use query::{Direction, Filter, FilterOp, FinalizedQuery, Order, Query, KEY_PROPERTY};
