//! Raw key/value datastore interface for the datastore mapper.
//!
//! A raw store knows nothing about typed records. It accepts [`Key`]s and
//! [`PropertyMap`]s, returns keys and property maps, and executes finalized
//! queries. The typed engine in `dsm-datastore` is built entirely on top of
//! the [`RawStore`] trait.
//!
//! # Storage Backends
//!
//! - [`InMemoryRawStore`]: `BTreeMap`-based store for tests and embedding,
//!   with failure-injection hooks
//!
//! # Design Rules
//!
//! 1. Batch results are positional: the store fills a pre-sized
//!    [`ResultArena`] slot for every input index.
//! 2. A call that fails as a whole returns `Err` and may leave slots unfilled.
//! 3. Query results are delivered in order, one at a time, until the
//!    callback returns `false` or the results are exhausted.
//! 4. The store never interprets entity contents beyond what filters and
//!    sort orders require.
//!
//! [`Key`]: dsm_types::Key
//! [`PropertyMap`]: dsm_types::PropertyMap

pub mod arena;
pub mod error;
mod eval;
pub mod memory;
pub mod registry;
pub mod traits;

pub use arena::ResultArena;
pub use error::{StoreError, StoreResult};
pub use memory::{FailurePoint, InMemoryRawStore};
pub use registry::{StoreFactory, StoreRegistry};
pub use traits::{CursorHandle, RawStore, RunCallback};
