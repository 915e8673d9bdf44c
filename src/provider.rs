//! Per-kind resource caches.
//!
//! One provider owns the authoritative in-memory state for one
//! [`ResourceKind`] within one context. The cache is lazy: it starts unloaded
//! and fills on the first read; invalidation drops it back to unloaded. Watch
//! deliveries and user edits mutate it through [`add`](ResourceProvider::add)
//! and [`remove`](ResourceProvider::remove).

use std::collections::HashMap;
use std::sync::Arc;

use kube_client::api::ListParams;
use kube_core::DynamicObject;
use parking_lot::Mutex;
use thiserror::Error;

use crate::client::ClientAdapter;
use crate::kind::{QualifiedName, ResourceKind};
use crate::watch::WatchSource;

/// Whether a provider serves one namespace at a time or the whole cluster.
///
/// Cluster also covers namespaced kinds listed across all namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderScope {
    Namespaced,
    Cluster,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("loading {kind} resources failed")]
    Load {
        kind: ResourceKind,
        #[source]
        source: kube_client::Error,
    },
}

/// Cache of all known instances of one resource kind.
///
/// `cache` is `None` while unloaded. Mutations apply only to a loaded cache,
/// so a failed bulk load can never leave partial state behind: the next read
/// either sees the complete previous generation or triggers a fresh load.
pub struct ResourceProvider {
    kind: ResourceKind,
    scope: ProviderScope,
    adapter: Arc<ClientAdapter>,
    namespace: Mutex<Option<String>>,
    cache: Mutex<Option<HashMap<QualifiedName, Arc<DynamicObject>>>>,
    load_gate: tokio::sync::Mutex<()>,
}

impl ResourceProvider {
    /// Provider serving the given namespace, or nothing until one is set.
    pub fn namespaced(
        kind: ResourceKind,
        adapter: Arc<ClientAdapter>,
        namespace: Option<&str>,
    ) -> Self {
        Self {
            kind,
            scope: ProviderScope::Namespaced,
            adapter,
            namespace: Mutex::new(namespace.map(str::to_owned)),
            cache: Mutex::new(None),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Provider serving the whole cluster, including namespaced kinds listed
    /// across every namespace.
    pub fn cluster(kind: ResourceKind, adapter: Arc<ClientAdapter>) -> Self {
        Self {
            kind,
            scope: ProviderScope::Cluster,
            adapter,
            namespace: Mutex::new(None),
            cache: Mutex::new(None),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// All cached instances, bulk-loading first if the cache is unloaded.
    ///
    /// Concurrent first reads are serialized by the load gate so each
    /// invalidation cycle hits the server exactly once. A namespaced provider
    /// with no namespace set answers with an empty list and stays unloaded.
    /// A failed load leaves the cache unloaded and is reported to the caller.
    pub async fn get_all(&self) -> Result<Vec<Arc<DynamicObject>>, ProviderError> {
        if let Some(items) = self.cached() {
            return Ok(items);
        }
        let _loading = self.load_gate.lock().await;
        if let Some(items) = self.cached() {
            // Filled while we waited on the gate.
            return Ok(items);
        }
        let api = match self.api() {
            Some(api) => api,
            None => return Ok(Vec::new()),
        };

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| {
                log::warn!("loading {} resources failed: {source}", self.kind);
                ProviderError::Load {
                    kind: self.kind.clone(),
                    source,
                }
            })?;

        // List items come back without apiVersion/kind; stamp them so cached
        // objects stay self-describing.
        let types = self.kind.type_meta();
        let mut loaded = HashMap::new();
        for mut object in list.items {
            object.types.get_or_insert_with(|| types.clone());
            match QualifiedName::from_object(&object) {
                Some(name) => {
                    loaded.insert(name, Arc::new(object));
                }
                None => log::debug!("skipping unnamed {} object", self.kind),
            }
        }
        log::debug!("loaded {} {} resources", loaded.len(), self.kind);
        let items = loaded.values().cloned().collect();
        *self.cache.lock() = Some(loaded);
        Ok(items)
    }

    /// Inserts the object, keyed by its qualified name. Returns whether
    /// membership changed: a fresh insert is `true`, replacing an already
    /// known instance (a watch `Modified`) is `false`. No-op on an unloaded
    /// cache.
    pub fn add(&self, object: &Arc<DynamicObject>) -> bool {
        let name = match QualifiedName::from_object(object) {
            Some(name) => name,
            None => {
                log::debug!("ignoring unnamed {} object", self.kind);
                return false;
            }
        };
        let mut cache = self.cache.lock();
        match cache.as_mut() {
            Some(entries) => entries.insert(name, Arc::clone(object)).is_none(),
            None => false,
        }
    }

    /// Removes by qualified name, not by instance, since watch-delivered
    /// objects are freshly deserialized. Returns whether an entry went away.
    pub fn remove(&self, object: &DynamicObject) -> bool {
        let name = match QualifiedName::from_object(object) {
            Some(name) => name,
            None => return false,
        };
        let mut cache = self.cache.lock();
        match cache.as_mut() {
            Some(entries) => entries.remove(&name).is_some(),
            None => false,
        }
    }

    /// Drops the whole cache back to unloaded.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
        log::debug!("invalidated {} cache", self.kind);
    }

    /// Drops one entry so its state is re-fetched on the next reload or
    /// re-delivered by the watch. Returns whether the entry was present.
    pub fn invalidate_named(&self, name: &QualifiedName) -> bool {
        let mut cache = self.cache.lock();
        match cache.as_mut() {
            Some(entries) => entries.remove(name).is_some(),
            None => false,
        }
    }

    /// Points a namespaced provider at a different namespace. Invalidates
    /// unconditionally, even when the value is unchanged. No-op for cluster
    /// providers.
    pub fn set_namespace(&self, namespace: Option<&str>) {
        if self.scope == ProviderScope::Cluster {
            return;
        }
        *self.namespace.lock() = namespace.map(str::to_owned);
        self.invalidate();
    }

    /// Recipe for watching this provider's kind at its current scope. `None`
    /// when namespaced with no namespace set, which is a normal condition and
    /// not an error.
    pub fn watch_source(&self) -> Option<WatchSource> {
        self.api()
            .map(|api| WatchSource::new(self.kind.clone(), api))
    }

    fn api(&self) -> Option<kube_client::Api<DynamicObject>> {
        match self.scope {
            ProviderScope::Cluster => Some(self.adapter.api_all(&self.kind)),
            ProviderScope::Namespaced => self
                .namespace
                .lock()
                .as_deref()
                .map(|namespace| self.adapter.api_namespaced(&self.kind, namespace)),
        }
    }

    fn cached(&self) -> Option<Vec<Arc<DynamicObject>>> {
        self.cache
            .lock()
            .as_ref()
            .map(|entries| entries.values().cloned().collect())
    }
}
