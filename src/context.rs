//! One connected cluster context: the query surface over the per-kind caches.
//!
//! An [`ActiveContext`] is created from a detected [`ClientAdapter`] plus the
//! kubeconfig's current namespace. Queries are served out of lazily-loaded
//! per-kind providers, kept fresh through one watch subscription per queried
//! kind. [`close`](ActiveContext::close) tears the whole context down.

mod builtin;
mod model;

use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube_core::{DynamicObject, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::client::ClientAdapter;
use crate::crd::CustomResourceError;
use crate::events::ModelChangeObservable;
use crate::kind::ResourceKind;
use crate::provider::ProviderError;
use crate::watch::{ResourceEventSink, ResourceWatch};

use model::ContextModel;

/// Where a query looks for instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    /// Namespaced resources within the context's current namespace.
    CurrentNamespace,
    /// Namespaced resources across every namespace.
    AnyNamespace,
    /// Cluster-scoped resources.
    NoNamespace,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    CustomResource(#[from] CustomResourceError),
}

/// A connected cluster context.
///
/// Construction wires the model and the watch registry together: the model is
/// the event sink behind every watch, so push updates and consumer-initiated
/// mutations take one code path. All operations are valid until
/// [`close`](Self::close), which consumes the context.
pub struct ActiveContext {
    model: Arc<ContextModel>,
    watch: ResourceWatch,
}

impl ActiveContext {
    /// Builds a context over a detected adapter. `namespace` is the
    /// kubeconfig's current namespace, if any. The built-in kinds for the
    /// adapter's flavor are registered immediately; nothing is loaded or
    /// watched until the first query.
    pub fn new(adapter: Arc<ClientAdapter>, namespace: Option<String>) -> Self {
        let model = Arc::new(ContextModel::new(adapter, namespace));
        let sink: Arc<dyn ResourceEventSink> = Arc::clone(&model) as Arc<dyn ResourceEventSink>;
        let watch = ResourceWatch::new(sink);
        model.attach_registry(watch.registry());
        Self { model, watch }
    }

    /// All instances of a kind within a scope.
    ///
    /// A kind without a registered provider in that scope answers with an
    /// empty list, never an error. Querying subscribes the kind's watch as a
    /// side effect, so later changes flow back into the cache.
    pub async fn get_resources(
        &self,
        kind: &ResourceKind,
        scope: ResourceScope,
    ) -> Result<Vec<Arc<DynamicObject>>, ContextError> {
        let provider = match self.model.provider(kind, scope) {
            Some(provider) => provider,
            None => return Ok(Vec::new()),
        };
        let source = Arc::clone(&provider);
        self.watch.watch(kind, move || source.watch_source());
        Ok(provider.get_all().await?)
    }

    /// [`get_resources`](Self::get_resources) for consumers that want
    /// compiled-in types back. Instances that fail to parse are logged and
    /// skipped.
    pub async fn get_resources_typed<K>(&self, scope: ResourceScope) -> Result<Vec<K>, ContextError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let kind = ResourceKind::of::<K>();
        let objects = self.get_resources(&kind, scope).await?;
        let mut typed = Vec::with_capacity(objects.len());
        for object in objects {
            match (*object).clone().try_parse() {
                Ok(resource) => typed.push(resource),
                Err(error) => log::warn!("skipping {kind} instance that failed to parse: {error}"),
            }
        }
        Ok(typed)
    }

    /// All instances of the kind a CustomResourceDefinition describes.
    ///
    /// The provider and watch for the kind are created on first sight,
    /// scoped by the definition's `spec.scope`. A definition with an
    /// unsupported scope or no served version is rejected.
    pub async fn get_custom_resources(
        &self,
        definition: &CustomResourceDefinition,
    ) -> Result<Vec<Arc<DynamicObject>>, ContextError> {
        let provider = self.model.ensure_custom_provider(definition)?;
        Ok(provider.get_all().await?)
    }

    /// Switches the current namespace. No-op when unchanged. Otherwise the
    /// old namespace's watches are torn down first, every namespaced provider
    /// is re-pointed (each invalidates itself), watches are re-established
    /// against the new namespace, and exactly one namespace event fires.
    pub async fn set_current_namespace(&self, namespace: Option<String>) {
        if self.model.current_namespace() == namespace {
            return;
        }
        let providers = self.model.namespaced_providers();
        let kinds: Vec<_> = providers
            .iter()
            .map(|provider| provider.kind().clone())
            .collect();

        // Tear down while the providers still reference the old namespace.
        self.watch.ignore_all(kinds).await;
        self.model.store_namespace(namespace.clone());
        for provider in &providers {
            provider.set_namespace(namespace.as_deref());
        }
        let watches: Vec<_> = providers
            .iter()
            .map(|provider| {
                let source = Arc::clone(provider);
                (provider.kind().clone(), move || source.watch_source())
            })
            .collect();
        self.watch.watch_all(watches);
        self.model
            .observable()
            .fire_current_namespace(namespace.as_deref());
    }

    pub fn current_namespace(&self) -> Option<String> {
        self.model.current_namespace()
    }

    /// Inserts an object into the caches it belongs to. Returns whether any
    /// cache gained it; replacing an already known instance returns false.
    pub fn add(&self, object: DynamicObject) -> bool {
        self.model.add(object)
    }

    /// Removes an object, matched by namespace and name. Returns whether any
    /// cache lost it.
    pub fn remove(&self, object: DynamicObject) -> bool {
        self.model.remove(object)
    }

    /// Drops every cache back to unloaded.
    pub fn invalidate(&self) {
        self.model.invalidate();
    }

    /// Drops the caches for one kind.
    pub fn invalidate_kind(&self, kind: &ResourceKind) {
        self.model.invalidate_kind(kind);
    }

    /// Drops one cached instance so it is re-fetched on the next reload.
    pub fn invalidate_resource(&self, object: &DynamicObject) {
        self.model.invalidate_resource(object);
    }

    pub fn is_openshift(&self) -> bool {
        self.model.adapter().is_openshift()
    }

    pub fn is_watching(&self, kind: &ResourceKind) -> bool {
        self.watch.is_watching(kind)
    }

    /// The context's change bus, for listener registration or channel taps.
    pub fn changes(&self) -> &ModelChangeObservable {
        self.model.observable()
    }

    /// Stops every watch and releases the client. Consuming `self` makes a
    /// second close unrepresentable.
    pub async fn close(self) {
        self.watch.shutdown().await;
        log::debug!("context closed");
    }
}
