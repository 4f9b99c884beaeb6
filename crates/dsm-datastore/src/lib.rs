//! Typed entity mapping over a raw key/property-map store.
//!
//! Application code works with typed entities; the raw store only
//! understands [`Key`]s and [`PropertyMap`]s. This crate sits between the
//! two: it classifies each argument, converts entities to and from property
//! maps, runs batch get/put/delete against the raw store, and executes
//! queries with typed or key-only callbacks.
//!
//! # Key Types
//!
//! - [`Datastore`]: Batch engine and query runner over an `Arc<dyn RawStore>`
//! - [`Entity`]: What the engine needs from a typed value
//! - [`Record`]: Serde structs stored field by field
//! - [`GenericEntity`]: Schema-less kind + key + properties
//! - [`Callback`]: Key-only or typed per-result query callback
//! - [`DatastoreConfig`]: Scope and unknown-property policy
//!
//! # Design Rules
//!
//! 1. A type that cannot be mapped fails the whole call before any store
//!    access.
//! 2. Per-item failures never block other items; they are reported in a
//!    [`MultiError`] aligned with the input.
//! 3. Per-item errors take precedence over a failure of the raw call as a
//!    whole.
//! 4. Empty batches succeed without touching the store.
//!
//! [`Key`]: dsm_types::Key
//! [`PropertyMap`]: dsm_types::PropertyMap
//! [`MultiError`]: dsm_types::MultiError

pub mod config;
pub mod datastore;
mod encode;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod run;
pub mod shape;

pub use config::{DatastoreConfig, UnknownProperties};
pub use datastore::Datastore;
pub use entity::{Entity, GenericEntity, Record};
pub use error::{DatastoreError, DatastoreResult, MappingError};
pub use run::Callback;
pub use shape::{EntityShape, Shape, ShapeDescriptor};

// Re-export the collaborator types callers need.
pub use dsm_query::{FilterOp, Query};
pub use dsm_store::{CursorHandle, InMemoryRawStore, RawStore, StoreError};
pub use dsm_types::{Cursor, Key, MultiError, Property, PropertyMap, PropertyValue};
