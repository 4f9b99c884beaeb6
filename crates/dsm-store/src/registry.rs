//! Scope-keyed registry of raw stores.
//!
//! Lets a process install a raw store per scope (typically an app id) and
//! resolve it later by name, for callers that do not thread an explicit
//! store handle through every layer.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::traits::RawStore;

/// Builds the raw store for a scope on each resolution.
pub type StoreFactory = Arc<dyn Fn() -> Arc<dyn RawStore> + Send + Sync>;

/// Registry mapping a scope name to the factory that serves it.
#[derive(Default)]
pub struct StoreRegistry {
    factories: RwLock<HashMap<String, StoreFactory>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `factory` for `scope`, replacing any previous one.
    pub fn install(&self, scope: impl Into<String>, factory: StoreFactory) {
        let scope = scope.into();
        debug!(scope = %scope, "installing raw store factory");
        self.factories
            .write()
            .expect("lock poisoned")
            .insert(scope, factory);
    }

    /// Install a single shared store instance for `scope`.
    pub fn install_store(&self, scope: impl Into<String>, store: Arc<dyn RawStore>) {
        self.install(scope, Arc::new(move || Arc::clone(&store)));
    }

    /// Resolve the store for `scope`, if one is installed.
    pub fn resolve(&self, scope: &str) -> Option<Arc<dyn RawStore>> {
        let factory = self
            .factories
            .read()
            .expect("lock poisoned")
            .get(scope)
            .cloned()?;
        // Call the factory outside the lock; it may itself consult the registry.
        Some(factory())
    }

    /// Remove the factory for `scope`. Returns `true` if one was installed.
    pub fn uninstall(&self, scope: &str) -> bool {
        self.factories
            .write()
            .expect("lock poisoned")
            .remove(scope)
            .is_some()
    }

    /// Installed scope names, sorted.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .factories
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        scopes.sort();
        scopes
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("scopes", &self.scopes())
            .finish()
    }
}

/// Process-wide registry.
pub fn global() -> &'static StoreRegistry {
    static GLOBAL: OnceLock<StoreRegistry> = OnceLock::new();
    GLOBAL.get_or_init(StoreRegistry::new)
}
