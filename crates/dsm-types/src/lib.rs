//! Foundation types for the datastore mapper (DSM).
//!
//! This crate provides the identity and data types shared by every other DSM
//! crate. The raw store, the query builder and the typed engine all speak in
//! terms of these types.
//!
//! # Key Types
//!
//! - [`Key`]: Hierarchical entity identifier (kind + id + ancestor chain + scoping)
//! - [`KeyTok`]: One `(kind, int_id, string_id)` element of a key
//! - [`PropertyMap`]: Ordered name → value(s) representation of an entity
//! - [`PropertyValue`] / [`Property`]: Single and repeated property values
//! - [`Cursor`]: Opaque resumption point within a query result sequence
//! - [`MultiError`] / [`LazyMultiError`]: Index-aligned batch error aggregates

pub mod cursor;
pub mod error;
pub mod key;
pub mod multi;
pub mod property;

pub use cursor::Cursor;
pub use error::TypeError;
pub use key::{Key, KeyTok, KEY_STRUCT_NAME};
pub use multi::{LazyMultiError, MultiError};
pub use property::{Property, PropertyMap, PropertyValue};
