use std::sync::Arc;

use dsm_store::{RawStore, ResultArena, StoreError, StoreRegistry, StoreResult};
use dsm_types::{Key, KeyTok, LazyMultiError};
use tracing::{debug, warn};

use crate::config::DatastoreConfig;
use crate::entity::Entity;
use crate::error::{DatastoreError, DatastoreResult};
use crate::shape::ShapeDescriptor;

/// Typed front end over a [`RawStore`].
///
/// Cheap to clone; clones share the raw store.
#[derive(Clone)]
pub struct Datastore {
    raw: Arc<dyn RawStore>,
    config: Arc<DatastoreConfig>,
}

impl Datastore {
    /// Wrap `raw` with the default (unscoped) configuration.
    pub fn new(raw: Arc<dyn RawStore>) -> Self {
        Self {
            raw,
            config: Arc::new(DatastoreConfig::default()),
        }
    }

    pub fn with_config(raw: Arc<dyn RawStore>, config: DatastoreConfig) -> DatastoreResult<Self> {
        config.validate()?;
        Ok(Self {
            raw,
            config: Arc::new(config),
        })
    }

    /// Resolve the raw store for `config.app_id` from `registry`.
    pub fn from_registry(registry: &StoreRegistry, config: DatastoreConfig) -> DatastoreResult<Self> {
        let raw = registry
            .resolve(&config.app_id)
            .ok_or_else(|| DatastoreError::NoStore {
                scope: config.app_id.clone(),
            })?;
        Self::with_config(raw, config)
    }

    /// The underlying raw store.
    pub fn raw(&self) -> &Arc<dyn RawStore> {
        &self.raw
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Build a key in this datastore's scope.
    pub fn new_key(
        &self,
        kind: impl Into<String>,
        string_id: impl Into<String>,
        int_id: i64,
        parent: Option<&Key>,
    ) -> Key {
        Key::new(
            &self.config.app_id,
            &self.config.namespace,
            kind,
            string_id,
            int_id,
            parent,
        )
    }

    /// Build a key in this datastore's scope from explicit tokens.
    pub fn new_key_toks(&self, toks: Vec<KeyTok>) -> DatastoreResult<Key> {
        Ok(Key::from_toks(
            &self.config.app_id,
            &self.config.namespace,
            toks,
        )?)
    }

    /// The key a put of `entity` would send: its own key, or an incomplete
    /// key of its kind.
    pub fn key_for_obj<T: Entity>(&self, entity: &T) -> DatastoreResult<Key> {
        let shape = self.inspect::<T>("key_for_obj", false)?;
        shape.key_of(entity, &self.config.app_id, &self.config.namespace)
    }

    // -----------------------------------------------------------------------
    // Single-item operations
    // -----------------------------------------------------------------------

    /// Load `entity` from the store by its key.
    pub fn get<T: Entity>(&self, entity: &mut T) -> DatastoreResult<()> {
        self.get_batch("get", false, std::slice::from_mut(entity))
            .map_err(DatastoreError::into_single)
    }

    /// Write `entity`. If the store assigns a new key it is set on `entity`.
    pub fn put<T: Entity>(&self, entity: &mut T) -> DatastoreResult<()> {
        self.put_batch("put", false, std::slice::from_mut(entity))
            .map_err(DatastoreError::into_single)
    }

    pub fn delete(&self, key: &Key) -> DatastoreResult<()> {
        self.delete_batch("delete", std::slice::from_ref(key))
            .map_err(DatastoreError::into_single)
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    /// Load every entity in `entities` by its key.
    ///
    /// Failures are reported per item as [`DatastoreError::Multi`], aligned
    /// with `entities`. Items that succeed are loaded even when others fail.
    pub fn get_multi<T: Entity>(&self, entities: &mut [T]) -> DatastoreResult<()> {
        self.get_batch("get_multi", true, entities)
    }

    /// Write every entity in `entities`.
    ///
    /// Entities the store assigned a new key to receive it; entities whose
    /// write failed keep their old key.
    pub fn put_multi<T: Entity>(&self, entities: &mut [T]) -> DatastoreResult<()> {
        self.put_batch("put_multi", true, entities)
    }

    /// Delete every key in `keys`. Deleting a missing entity is not an error.
    pub fn delete_multi(&self, keys: &[Key]) -> DatastoreResult<()> {
        self.delete_batch("delete_multi", keys)
    }

    /// Run `f` in a raw store transaction.
    ///
    /// An error from `f` rolls the transaction back and is returned as is.
    pub fn run_in_transaction<F>(&self, mut f: F) -> DatastoreResult<()>
    where
        F: FnMut(&Datastore) -> DatastoreResult<()>,
    {
        let mut failure: Option<DatastoreError> = None;
        let result = self.raw.run_in_transaction(&mut || match f(self) {
            Ok(()) => Ok(()),
            Err(err) => {
                let abort = StoreError::Aborted(err.to_string());
                failure = Some(err);
                Err(abort)
            }
        });
        match (result, failure) {
            (Ok(()), _) => Ok(()),
            (Err(_), Some(err)) => Err(err),
            (Err(err), None) => Err(err.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    pub(crate) fn inspect<T: Entity>(
        &self,
        op: &'static str,
        slice: bool,
    ) -> DatastoreResult<ShapeDescriptor<T>> {
        ShapeDescriptor::inspect(op, slice, self.config.unknown_properties)
    }

    fn get_batch<T: Entity>(
        &self,
        op: &'static str,
        slice: bool,
        entities: &mut [T],
    ) -> DatastoreResult<()> {
        let shape = self.inspect::<T>(op, slice)?;
        if entities.is_empty() {
            return Ok(());
        }

        let mut errors = LazyMultiError::new(entities.len());
        let mut keys = Vec::with_capacity(entities.len());
        let mut origin = Vec::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            match shape.key_of(entity, &self.config.app_id, &self.config.namespace) {
                Ok(key) => {
                    keys.push(key);
                    origin.push(i);
                }
                Err(err) => errors.set(i, err),
            }
        }

        let outer = if keys.is_empty() {
            Ok(())
        } else {
            let mut arena = ResultArena::new(keys.len());
            let outer = self.raw.get_multi(&keys, &mut arena);
            for ((slot, i), key) in arena.into_slots().into_iter().zip(origin).zip(keys) {
                match slot {
                    Some(Ok(props)) => {
                        let entity = &mut entities[i];
                        match shape.load(entity, props) {
                            Ok(()) => entity.set_key(key),
                            Err(err) => errors.set(i, err.into()),
                        }
                    }
                    Some(Err(err)) => errors.set(i, err.into()),
                    None => Self::unfilled(&mut errors, i, &outer),
                }
            }
            outer
        };
        Self::settle(op, entities.len(), errors, outer)
    }

    fn put_batch<T: Entity>(
        &self,
        op: &'static str,
        slice: bool,
        entities: &mut [T],
    ) -> DatastoreResult<()> {
        let shape = self.inspect::<T>(op, slice)?;
        if entities.is_empty() {
            return Ok(());
        }

        let mut errors = LazyMultiError::new(entities.len());
        let mut keys = Vec::with_capacity(entities.len());
        let mut values = Vec::with_capacity(entities.len());
        let mut origin = Vec::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            let prepared = shape
                .key_of(entity, &self.config.app_id, &self.config.namespace)
                .and_then(|key| Ok((key, shape.save(entity)?)));
            match prepared {
                Ok((key, props)) => {
                    keys.push(key);
                    values.push(props);
                    origin.push(i);
                }
                Err(err) => errors.set(i, err),
            }
        }

        let outer = if keys.is_empty() {
            Ok(())
        } else {
            let mut arena = ResultArena::new(keys.len());
            let outer = self.raw.put_multi(&keys, &values, &mut arena);
            for ((slot, i), sent) in arena.into_slots().into_iter().zip(origin).zip(&keys) {
                match slot {
                    Some(Ok(stored)) => {
                        if &stored != sent {
                            entities[i].set_key(stored);
                        }
                    }
                    Some(Err(err)) => errors.set(i, err.into()),
                    None => Self::unfilled(&mut errors, i, &outer),
                }
            }
            outer
        };
        Self::settle(op, entities.len(), errors, outer)
    }

    fn delete_batch(&self, op: &'static str, keys: &[Key]) -> DatastoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut errors = LazyMultiError::new(keys.len());
        let mut arena = ResultArena::new(keys.len());
        let outer = self.raw.delete_multi(keys, &mut arena);
        for (i, slot) in arena.into_slots().into_iter().enumerate() {
            match slot {
                Some(Ok(())) => {}
                Some(Err(err)) => errors.set(i, err.into()),
                None => Self::unfilled(&mut errors, i, &outer),
            }
        }
        Self::settle(op, keys.len(), errors, outer)
    }

    /// A slot the store left empty although the call as a whole succeeded.
    fn unfilled(errors: &mut LazyMultiError<DatastoreError>, i: usize, outer: &StoreResult<()>) {
        if outer.is_ok() {
            errors.set(i, StoreError::NoResult.into());
        }
    }

    /// Per-item errors take precedence over a failure of the call as a whole.
    fn settle(
        op: &'static str,
        items: usize,
        errors: LazyMultiError<DatastoreError>,
        outer: StoreResult<()>,
    ) -> DatastoreResult<()> {
        match (errors.get(), outer) {
            (Some(multi), outer) => {
                if let Err(err) = &outer {
                    warn!(op, error = %err, "raw store call failed; reporting per-item errors");
                }
                debug!(op, items, failed = multi.error_count(), "batch finished with errors");
                Err(DatastoreError::Multi(multi))
            }
            (None, Err(err)) => {
                warn!(op, items, error = %err, "raw store call failed");
                Err(err.into())
            }
            (None, Ok(())) => {
                debug!(op, items, "batch finished");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
