//! Shared state behind an active context.
//!
//! [`ContextModel`] owns the provider maps and routes every mutation, whether
//! it comes from a consumer or from a watch pump: the model is the
//! [`ResourceEventSink`] the context's [`ResourceWatch`](crate::watch::ResourceWatch)
//! is built around. It reaches the watch registry through a weak handle set
//! once at construction, since the registry's pump tasks hold the model in
//! turn.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube_core::DynamicObject;
use parking_lot::{Mutex, RwLock};

use crate::client::ClientAdapter;
use crate::crd::{self, CustomResourceError};
use crate::events::ModelChangeObservable;
use crate::kind::{QualifiedName, ResourceKind};
use crate::provider::{ProviderScope, ResourceProvider};
use crate::watch::{ResourceEventSink, WatchRegistry};

use super::builtin;
use super::ResourceScope;

pub(crate) struct ContextModel {
    adapter: Arc<ClientAdapter>,
    namespace: RwLock<Option<String>>,
    namespaced: Mutex<HashMap<ResourceKind, Arc<ResourceProvider>>>,
    cluster: Mutex<HashMap<ResourceKind, Arc<ResourceProvider>>>,
    observable: ModelChangeObservable,
    registry: OnceLock<Weak<WatchRegistry>>,
}

impl ContextModel {
    pub(crate) fn new(adapter: Arc<ClientAdapter>, namespace: Option<String>) -> Self {
        let model = Self {
            adapter,
            namespace: RwLock::new(namespace),
            namespaced: Mutex::new(HashMap::new()),
            cluster: Mutex::new(HashMap::new()),
            observable: ModelChangeObservable::new(),
            registry: OnceLock::new(),
        };
        model.register_builtins();
        model
    }

    /// Attaches the watch registry. Called once, right after the
    /// [`ResourceWatch`](crate::watch::ResourceWatch) for this model is built.
    pub(crate) fn attach_registry(&self, registry: Weak<WatchRegistry>) {
        let _ = self.registry.set(registry);
    }

    fn register_builtins(&self) {
        let mut kinds = builtin::kubernetes_kinds();
        if self.adapter.is_openshift() {
            kinds.extend(builtin::openshift_kinds());
        }
        let namespace = self.current_namespace();
        let mut namespaced = self.namespaced.lock();
        let mut cluster = self.cluster.lock();
        for entry in kinds {
            if entry.namespaced {
                namespaced.insert(
                    entry.kind.clone(),
                    Arc::new(ResourceProvider::namespaced(
                        entry.kind.clone(),
                        Arc::clone(&self.adapter),
                        namespace.as_deref(),
                    )),
                );
            }
            // Every kind is also listable across the cluster.
            cluster.insert(
                entry.kind.clone(),
                Arc::new(ResourceProvider::cluster(
                    entry.kind,
                    Arc::clone(&self.adapter),
                )),
            );
        }
        log::debug!("registered {} built-in kinds", cluster.len());
    }

    pub(crate) fn adapter(&self) -> &Arc<ClientAdapter> {
        &self.adapter
    }

    pub(crate) fn observable(&self) -> &ModelChangeObservable {
        &self.observable
    }

    pub(crate) fn current_namespace(&self) -> Option<String> {
        self.namespace.read().clone()
    }

    pub(crate) fn store_namespace(&self, namespace: Option<String>) {
        log::debug!("current namespace set to {namespace:?}");
        *self.namespace.write() = namespace;
    }

    pub(crate) fn provider(
        &self,
        kind: &ResourceKind,
        scope: ResourceScope,
    ) -> Option<Arc<ResourceProvider>> {
        let map = match scope {
            ResourceScope::CurrentNamespace => &self.namespaced,
            ResourceScope::AnyNamespace | ResourceScope::NoNamespace => &self.cluster,
        };
        map.lock().get(kind).cloned()
    }

    pub(crate) fn namespaced_providers(&self) -> Vec<Arc<ResourceProvider>> {
        self.namespaced.lock().values().cloned().collect()
    }

    /// Routes an object into the caches it belongs to: the cluster provider
    /// for its kind, and the namespaced provider when the object lives in the
    /// current namespace. An added CustomResourceDefinition also brings up
    /// the provider and watch for the kind it defines. Fires one added event
    /// when at least one cache gained the object.
    pub(crate) fn add(&self, object: DynamicObject) -> bool {
        let kind = match ResourceKind::from_object(&object) {
            Some(kind) => kind,
            None => {
                log::debug!("ignoring added object without type information");
                return false;
            }
        };
        let object = Arc::new(object);
        if kind == crd::definition_kind() {
            self.ensure_providers_for_definition(&object);
        }

        let mut changed = false;
        let provider = self.cluster.lock().get(&kind).cloned();
        if let Some(provider) = provider {
            changed |= provider.add(&object);
        }
        if self.in_current_namespace(&object) {
            let provider = self.namespaced.lock().get(&kind).cloned();
            if let Some(provider) = provider {
                changed |= provider.add(&object);
            }
        }

        if changed {
            self.observable.fire_added(&object);
        }
        changed
    }

    /// Mirror of [`add`](Self::add) for deletions. A removed
    /// CustomResourceDefinition retires the provider and watch for the kind
    /// it defined.
    pub(crate) fn remove(&self, object: DynamicObject) -> bool {
        let kind = match ResourceKind::from_object(&object) {
            Some(kind) => kind,
            None => {
                log::debug!("ignoring removed object without type information");
                return false;
            }
        };
        let object = Arc::new(object);
        if kind == crd::definition_kind() {
            self.retire_providers_for_definition(&object);
        }

        let mut changed = false;
        let provider = self.cluster.lock().get(&kind).cloned();
        if let Some(provider) = provider {
            changed |= provider.remove(&object);
        }
        if self.in_current_namespace(&object) {
            let provider = self.namespaced.lock().get(&kind).cloned();
            if let Some(provider) = provider {
                changed |= provider.remove(&object);
            }
        }

        if changed {
            self.observable.fire_removed(&object);
        }
        changed
    }

    pub(crate) fn invalidate(&self) {
        for provider in self.all_providers() {
            provider.invalidate();
        }
    }

    pub(crate) fn invalidate_kind(&self, kind: &ResourceKind) {
        let namespaced = self.namespaced.lock().get(kind).cloned();
        let cluster = self.cluster.lock().get(kind).cloned();
        for provider in [namespaced, cluster].into_iter().flatten() {
            provider.invalidate();
        }
    }

    pub(crate) fn invalidate_resource(&self, object: &DynamicObject) {
        let kind = ResourceKind::from_object(object);
        let name = QualifiedName::from_object(object);
        let (kind, name) = match (kind, name) {
            (Some(kind), Some(name)) => (kind, name),
            _ => return,
        };
        let namespaced = self.namespaced.lock().get(&kind).cloned();
        let cluster = self.cluster.lock().get(&kind).cloned();
        for provider in [namespaced, cluster].into_iter().flatten() {
            provider.invalidate_named(&name);
        }
    }

    /// Provider for the kind a definition describes, created on first sight.
    /// Two concurrent first sights race for the map entry and end up sharing
    /// one provider and one watch.
    pub(crate) fn ensure_custom_provider(
        &self,
        definition: &CustomResourceDefinition,
    ) -> Result<Arc<ResourceProvider>, CustomResourceError> {
        let kind = crd::kind_for_definition(definition)?;
        let scope = crd::scope_for_definition(definition)?;
        let provider = match scope {
            ProviderScope::Namespaced => {
                let namespace = self.current_namespace();
                let mut map = self.namespaced.lock();
                Arc::clone(map.entry(kind.clone()).or_insert_with(|| {
                    Arc::new(ResourceProvider::namespaced(
                        kind.clone(),
                        Arc::clone(&self.adapter),
                        namespace.as_deref(),
                    ))
                }))
            }
            ProviderScope::Cluster => {
                let mut map = self.cluster.lock();
                Arc::clone(map.entry(kind.clone()).or_insert_with(|| {
                    Arc::new(ResourceProvider::cluster(
                        kind.clone(),
                        Arc::clone(&self.adapter),
                    ))
                }))
            }
        };
        self.watch_provider(&provider);
        Ok(provider)
    }

    /// Subscribes the watch for a provider's kind through the weak registry
    /// handle. Safe to call from inside a pump task.
    fn watch_provider(&self, provider: &Arc<ResourceProvider>) {
        let weak = match self.registry.get() {
            Some(weak) => weak.clone(),
            None => return,
        };
        let registry = match weak.upgrade() {
            Some(registry) => registry,
            None => return,
        };
        let source = Arc::clone(provider);
        registry.watch(provider.kind(), move || source.watch_source(), weak);
    }

    fn ensure_providers_for_definition(&self, object: &Arc<DynamicObject>) {
        let definition: CustomResourceDefinition = match (**object).clone().try_parse() {
            Ok(definition) => definition,
            Err(error) => {
                log::warn!("ignoring malformed custom resource definition: {error}");
                return;
            }
        };
        if let Err(error) = self.ensure_custom_provider(&definition) {
            log::warn!("cannot serve custom resources: {error}");
        }
    }

    fn retire_providers_for_definition(&self, object: &Arc<DynamicObject>) {
        let definition: CustomResourceDefinition = match (**object).clone().try_parse() {
            Ok(definition) => definition,
            Err(error) => {
                log::warn!("ignoring malformed custom resource definition: {error}");
                return;
            }
        };
        let kind = match crd::kind_for_definition(&definition) {
            Ok(kind) => kind,
            Err(error) => {
                log::warn!("cannot retire custom resource provider: {error}");
                return;
            }
        };
        let namespaced = self.namespaced.lock().remove(&kind);
        let cluster = self.cluster.lock().remove(&kind);
        if namespaced.is_some() || cluster.is_some() {
            log::debug!("retired custom resource provider for {kind}");
            if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
                registry.retire(&kind);
            }
        }
    }

    fn in_current_namespace(&self, object: &DynamicObject) -> bool {
        match (&object.metadata.namespace, &*self.namespace.read()) {
            (Some(object_namespace), Some(current)) => object_namespace == current,
            _ => false,
        }
    }

    fn all_providers(&self) -> Vec<Arc<ResourceProvider>> {
        let mut providers: Vec<_> = self.namespaced.lock().values().cloned().collect();
        providers.extend(self.cluster.lock().values().cloned());
        providers
    }
}

impl ResourceEventSink for ContextModel {
    fn on_added(&self, object: DynamicObject) {
        self.add(object);
    }

    fn on_removed(&self, object: DynamicObject) {
        self.remove(object);
    }
}
