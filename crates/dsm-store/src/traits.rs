use dsm_query::FinalizedQuery;
use dsm_types::{Cursor, Key, PropertyMap};

use crate::arena::ResultArena;
use crate::error::StoreResult;

/// Produces a resumption cursor for the query result currently being
/// delivered.
///
/// Handed to every query callback so a caller can capture a resumption point
/// at any moment during iteration, not only at the end.
pub struct CursorHandle<'a> {
    make: &'a dyn Fn() -> StoreResult<Cursor>,
}

impl<'a> CursorHandle<'a> {
    pub fn new(make: &'a dyn Fn() -> StoreResult<Cursor>) -> Self {
        Self { make }
    }

    /// Cursor positioned just after the current result.
    pub fn cursor(&self) -> StoreResult<Cursor> {
        (self.make)()
    }
}

impl std::fmt::Debug for CursorHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CursorHandle")
    }
}

/// Per-result query callback: `(key, properties, cursor) -> continue`.
///
/// `properties` is `None` for keys-only queries.
pub type RunCallback<'a> = dyn FnMut(Key, Option<PropertyMap>, &CursorHandle<'_>) -> bool + 'a;

/// Schema-agnostic key/property-map datastore.
///
/// All implementations must satisfy these invariants:
/// - Batch calls fill `out` positionally: slot `i` holds the outcome for
///   `keys[i]`.
/// - A batch call that fails as a whole returns `Err`; slots filled before
///   the failure are still honored by the caller.
/// - `run` delivers results sequentially on the calling thread and stops as
///   soon as the callback returns `false`.
/// - Entity contents are never interpreted beyond filtering and sorting.
pub trait RawStore: Send + Sync {
    /// Fetch the property map stored under each key.
    ///
    /// A missing entity is a per-item [`StoreError::NotFound`].
    ///
    /// [`StoreError::NotFound`]: crate::StoreError::NotFound
    fn get_multi(&self, keys: &[Key], out: &mut ResultArena<PropertyMap>) -> StoreResult<()>;

    /// Store `values[i]` under `keys[i]`.
    ///
    /// Incomplete keys are completed by the store; each slot receives the
    /// key the entity was actually written under.
    fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        out: &mut ResultArena<Key>,
    ) -> StoreResult<()>;

    /// Delete each key. Deleting a missing entity is not an error.
    fn delete_multi(&self, keys: &[Key], out: &mut ResultArena<()>) -> StoreResult<()>;

    /// Execute a finalized query, invoking `cb` once per result.
    fn run(&self, query: &FinalizedQuery, cb: &mut RunCallback<'_>) -> StoreResult<()>;

    /// Run `f` as one transaction. Store calls made by `f` take effect only
    /// if it returns `Ok`.
    fn run_in_transaction(&self, f: &mut dyn FnMut() -> StoreResult<()>) -> StoreResult<()>;

    /// Number of results `query` would deliver.
    ///
    /// Default implementation runs the query and counts deliveries.
    fn count(&self, query: &FinalizedQuery) -> StoreResult<usize> {
        let mut n = 0usize;
        self.run(query, &mut |_, _, _| {
            n += 1;
            true
        })?;
        Ok(n)
    }
}
