use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use dsm_query::FinalizedQuery;
use dsm_types::{Key, PropertyMap};
use tracing::debug;

use crate::arena::ResultArena;
use crate::error::{StoreError, StoreResult};
use crate::eval;
use crate::traits::{CursorHandle, RawStore, RunCallback};

/// When an injected transport failure fires relative to per-item results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePoint {
    /// Fail before any slot is filled or any result delivered.
    BeforeItems,
    /// Do the work, fill every slot, then report the failure.
    AfterItems,
}

/// In-memory, `BTreeMap`-based raw store.
///
/// Intended for tests and embedding. Entities live behind a `RwLock` and are
/// cloned on read/write. Incomplete keys are completed with sequential int
/// ids. The store is scoped to one `(app_id, namespace)` pair; keys from any
/// other scope are rejected per item.
///
/// Test hooks: [`fail_key`](Self::fail_key) injects a per-item error,
/// [`fail_next_call`](Self::fail_next_call) injects a whole-call failure, and
/// [`call_count`](Self::call_count) reports how many raw calls were made.
pub struct InMemoryRawStore {
    app_id: String,
    namespace: String,
    entities: RwLock<BTreeMap<Key, PropertyMap>>,
    next_id: AtomicI64,
    item_failures: RwLock<HashMap<Key, StoreError>>,
    call_failure: Mutex<Option<(StoreError, FailurePoint)>>,
    calls: AtomicUsize,
    txn: Mutex<()>,
}

impl InMemoryRawStore {
    /// Create an empty store for the default (empty) app id and namespace.
    pub fn new() -> Self {
        Self::with_scope("", "")
    }

    /// Create an empty store scoped to `app_id` / `namespace`.
    pub fn with_scope(app_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            entities: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            item_failures: RwLock::new(HashMap::new()),
            call_failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            txn: Mutex::new(()),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.entities.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.read().expect("lock poisoned").is_empty()
    }

    /// Direct read of one entity, bypassing call accounting.
    pub fn peek(&self, key: &Key) -> Option<PropertyMap> {
        self.entities.read().expect("lock poisoned").get(key).cloned()
    }

    /// Sorted list of all stored keys.
    pub fn all_keys(&self) -> Vec<Key> {
        self.entities
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Number of raw store calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every batch operation on `key` fail with `error` until cleared.
    pub fn fail_key(&self, key: Key, error: StoreError) {
        self.item_failures
            .write()
            .expect("lock poisoned")
            .insert(key, error);
    }

    /// Remove all per-key failures.
    pub fn clear_failures(&self) {
        self.item_failures.write().expect("lock poisoned").clear();
    }

    /// Make the next raw call fail as a whole with `error`.
    pub fn fail_next_call(&self, error: StoreError, point: FailurePoint) {
        *self.call_failure.lock().expect("lock poisoned") = Some((error, point));
    }

    fn read_entities(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<Key, PropertyMap>>> {
        self.entities
            .read()
            .map_err(|e| StoreError::Transport(format!("lock poisoned: {e}")))
    }

    fn write_entities(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<Key, PropertyMap>>> {
        self.entities
            .write()
            .map_err(|e| StoreError::Transport(format!("lock poisoned: {e}")))
    }

    /// Count the call and take any injected whole-call failure.
    fn begin_call(&self) -> StoreResult<Option<StoreError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .call_failure
            .lock()
            .map_err(|e| StoreError::Transport(format!("lock poisoned: {e}")))?
            .take();
        match injected {
            Some((err, FailurePoint::BeforeItems)) => Err(err),
            Some((err, FailurePoint::AfterItems)) => Ok(Some(err)),
            None => Ok(None),
        }
    }

    fn finish_call(deferred: Option<StoreError>) -> StoreResult<()> {
        match deferred {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn injected_failure(&self, key: &Key) -> Option<StoreError> {
        self.item_failures
            .read()
            .ok()
            .and_then(|f| f.get(key).cloned())
    }

    fn check_key(&self, key: &Key, allow_incomplete: bool) -> StoreResult<()> {
        let ok = if allow_incomplete {
            key.partial_valid(false, &self.app_id, &self.namespace)
        } else {
            key.valid(false, &self.app_id, &self.namespace)
        };
        if ok {
            return Ok(());
        }
        let reason = if key.app_id() != self.app_id || key.namespace() != self.namespace {
            format!(
                "scoped to {:?}/{:?}, store serves {:?}/{:?}",
                key.app_id(),
                key.namespace(),
                self.app_id,
                self.namespace
            )
        } else if !key.is_complete() && !allow_incomplete {
            "incomplete key".to_string()
        } else {
            "malformed key".to_string()
        };
        Err(StoreError::InvalidKey {
            key: key.clone(),
            reason,
        })
    }

    fn complete(&self, key: &Key) -> Key {
        if key.is_complete() {
            // Keep later allocations clear of explicitly chosen int ids.
            self.next_id
                .fetch_max(key.int_id().saturating_add(1), Ordering::SeqCst);
            return key.clone();
        }
        key.with_int_id(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for InMemoryRawStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RawStore for InMemoryRawStore {
    fn get_multi(&self, keys: &[Key], out: &mut ResultArena<PropertyMap>) -> StoreResult<()> {
        let deferred = self.begin_call()?;
        let map = self.read_entities()?;
        for (i, key) in keys.iter().enumerate() {
            if let Some(err) = self.injected_failure(key) {
                out.err(i, err);
                continue;
            }
            if let Err(err) = self.check_key(key, false) {
                out.err(i, err);
                continue;
            }
            match map.get(key) {
                Some(props) => out.ok(i, props.clone()),
                None => out.err(i, StoreError::NotFound(key.clone())),
            }
        }
        debug!(keys = keys.len(), "raw get_multi");
        Self::finish_call(deferred)
    }

    fn put_multi(
        &self,
        keys: &[Key],
        values: &[PropertyMap],
        out: &mut ResultArena<Key>,
    ) -> StoreResult<()> {
        if keys.len() != values.len() {
            return Err(StoreError::Transport(format!(
                "put_multi got {} keys and {} values",
                keys.len(),
                values.len()
            )));
        }
        let deferred = self.begin_call()?;
        let mut map = self.write_entities()?;
        for (i, (key, props)) in keys.iter().zip(values).enumerate() {
            if let Some(err) = self.injected_failure(key) {
                out.err(i, err);
                continue;
            }
            if let Err(err) = self.check_key(key, true) {
                out.err(i, err);
                continue;
            }
            let stored = self.complete(key);
            map.insert(stored.clone(), props.clone());
            out.ok(i, stored);
        }
        debug!(keys = keys.len(), stored = map.len(), "raw put_multi");
        Self::finish_call(deferred)
    }

    fn delete_multi(&self, keys: &[Key], out: &mut ResultArena<()>) -> StoreResult<()> {
        let deferred = self.begin_call()?;
        let mut map = self.write_entities()?;
        for (i, key) in keys.iter().enumerate() {
            if let Some(err) = self.injected_failure(key) {
                out.err(i, err);
                continue;
            }
            if let Err(err) = self.check_key(key, false) {
                out.err(i, err);
                continue;
            }
            map.remove(key);
            out.ok(i, ());
        }
        debug!(keys = keys.len(), "raw delete_multi");
        Self::finish_call(deferred)
    }

    fn run(&self, query: &FinalizedQuery, cb: &mut RunCallback<'_>) -> StoreResult<()> {
        let deferred = self.begin_call()?;

        // Snapshot matching rows so callbacks may call back into the store.
        let mut rows: Vec<eval::Row> = {
            let map = self.read_entities()?;
            map.iter()
                .filter(|(k, _)| k.app_id() == self.app_id && k.namespace() == self.namespace)
                .filter(|(k, props)| eval::matches(query, k, props))
                .map(|(k, props)| (k.clone(), props.clone()))
                .collect()
        };
        eval::sort(query, &mut rows);
        let rows = eval::project(query, rows);
        let (begin, end) = eval::window(query, rows.len())?;

        let mut delivered = 0usize;
        for (position, (key, props)) in rows.into_iter().enumerate().take(end).skip(begin) {
            let make = move || eval::encode_cursor(position + 1);
            let handle = CursorHandle::new(&make);
            let props = if query.is_keys_only() { None } else { Some(props) };
            delivered += 1;
            if !cb(key, props, &handle) {
                debug!(kind = query.kind(), delivered, "query stopped by callback");
                return Self::finish_call(deferred);
            }
        }
        debug!(kind = query.kind(), delivered, "query exhausted");
        Self::finish_call(deferred)
    }

    fn run_in_transaction(&self, f: &mut dyn FnMut() -> StoreResult<()>) -> StoreResult<()> {
        let _guard = match self.txn.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                return Err(StoreError::Conflict(
                    "another transaction is in progress".to_string(),
                ))
            }
            Err(TryLockError::Poisoned(e)) => {
                return Err(StoreError::Transport(format!("lock poisoned: {e}")))
            }
        };
        let snapshot = self.read_entities()?.clone();
        match f() {
            Ok(()) => {
                debug!("transaction committed");
                Ok(())
            }
            Err(err) => {
                *self.write_entities()? = snapshot;
                debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for InMemoryRawStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRawStore")
            .field("app_id", &self.app_id)
            .field("namespace", &self.namespace)
            .field("entity_count", &self.len())
            .finish()
    }
}
