//! Watch subscriptions, one pump task per resource kind.
//!
//! [`ResourceWatch`] keeps a registry of active subscriptions keyed by
//! [`ResourceKind`]. Each subscription runs a pump task that holds the raw
//! watch stream open and translates its events into calls on an injected
//! [`ResourceEventSink`]; whenever the server closes the stream, the pump
//! re-establishes it. Watching starts at resourceVersion "0", so the server
//! replays the current state as synthetic `Added` events; the caches absorb
//! the replay because adding a known object is idempotent.

use std::collections::HashMap;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{Stream, StreamExt, TryStreamExt};
use kube_client::api::{WatchEvent, WatchParams};
use kube_client::Api;
use kube_core::DynamicObject;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::kind::ResourceKind;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Deferred recipe for one watch: the kind plus an `Api` already bound to the
/// right scope. Built by a provider at subscription time so the pump can
/// re-establish the stream without reaching back into provider state.
pub struct WatchSource {
    kind: ResourceKind,
    api: Api<DynamicObject>,
}

impl WatchSource {
    pub fn new(kind: ResourceKind, api: Api<DynamicObject>) -> Self {
        Self { kind, api }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }
}

/// Receives the translated watch events. `Added` and `Modified` both arrive
/// as [`on_added`](Self::on_added); the cache decides whether membership
/// actually changed.
pub trait ResourceEventSink: Send + Sync {
    fn on_added(&self, object: DynamicObject);
    fn on_removed(&self, object: DynamicObject);
}

/// Registry of active watch subscriptions.
pub struct ResourceWatch {
    registry: Arc<WatchRegistry>,
}

impl ResourceWatch {
    pub fn new(sink: Arc<dyn ResourceEventSink>) -> Self {
        Self {
            registry: Arc::new(WatchRegistry {
                sink,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Handle for components that must retire subscriptions from inside a
    /// pump task.
    pub(crate) fn registry(&self) -> Weak<WatchRegistry> {
        Arc::downgrade(&self.registry)
    }

    /// Subscribes to a kind. No-op when the kind is already watched, in which
    /// case the supplier is not invoked. A supplier returning `None` (a
    /// namespaced source with no namespace set) registers nothing.
    pub fn watch<F>(&self, kind: &ResourceKind, source: F)
    where
        F: FnOnce() -> Option<WatchSource>,
    {
        self.registry
            .watch(kind, source, Arc::downgrade(&self.registry));
    }

    /// Subscribes to many kinds; each element is handled independently.
    pub fn watch_all<F>(&self, sources: Vec<(ResourceKind, F)>)
    where
        F: FnOnce() -> Option<WatchSource>,
    {
        for (kind, source) in sources {
            self.watch(&kind, source);
        }
    }

    pub fn is_watching(&self, kind: &ResourceKind) -> bool {
        self.registry.entries.lock().contains_key(kind)
    }

    /// Cancels the subscription and waits for its pump task to stop. No-op
    /// when the kind is not watched.
    pub async fn ignore(&self, kind: &ResourceKind) {
        let entry = self.registry.entries.lock().remove(kind);
        if let Some(entry) = entry {
            entry.cancel().await;
        }
    }

    /// Cancels many subscriptions; each element is handled independently.
    pub async fn ignore_all(&self, kinds: impl IntoIterator<Item = ResourceKind>) {
        let removed: Vec<_> = {
            let mut entries = self.registry.entries.lock();
            kinds
                .into_iter()
                .filter_map(|kind| entries.remove(&kind))
                .collect()
        };
        for entry in removed {
            entry.cancel().await;
        }
    }

    /// Cancels every subscription and waits for all pump tasks to stop.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut entries = self.registry.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.cancel().await;
        }
    }
}

pub(crate) struct WatchRegistry {
    sink: Arc<dyn ResourceEventSink>,
    entries: Mutex<HashMap<ResourceKind, WatchEntry>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    pub(crate) fn watch<F>(&self, kind: &ResourceKind, source: F, registry: Weak<WatchRegistry>)
    where
        F: FnOnce() -> Option<WatchSource>,
    {
        let mut entries = self.entries.lock();
        if entries.contains_key(kind) {
            return;
        }
        let source = match source() {
            Some(source) => source,
            None => return,
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let task = tokio::spawn(pump(
            source,
            Arc::clone(&self.sink),
            registry,
            id,
            token.clone(),
        ));
        log::debug!("subscribed to {kind}");
        entries.insert(kind.clone(), WatchEntry { id, token, task });
    }

    /// Drops a subscription without waiting for its task, for callers that
    /// run inside a pump task themselves. The task exits once it observes the
    /// cancelled token.
    pub(crate) fn retire(&self, kind: &ResourceKind) {
        if let Some(entry) = self.entries.lock().remove(kind) {
            entry.token.cancel();
            log::debug!("retired {kind} watch");
        }
    }

    /// Removes the entry only if it still belongs to the exiting task. A
    /// newer subscription for the same kind has a different id and stays.
    fn deregister(&self, kind: &ResourceKind, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(kind).is_some_and(|entry| entry.id == id) {
            entries.remove(kind);
        }
    }
}

struct WatchEntry {
    id: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchEntry {
    async fn cancel(self) {
        self.token.cancel();
        if let Err(error) = self.task.await {
            if error.is_panic() {
                panic::resume_unwind(error.into_panic());
            }
        }
    }
}

enum Drained {
    Ended,
    Cancelled,
}

async fn pump(
    source: WatchSource,
    sink: Arc<dyn ResourceEventSink>,
    registry: Weak<WatchRegistry>,
    id: u64,
    token: CancellationToken,
) {
    let kind = source.kind().clone();
    let mut failures: u32 = 0;
    loop {
        let params = WatchParams::default();
        let established = tokio::select! {
            () = token.cancelled() => break,
            result = source.api.watch(&params, "0") => result,
        };
        match established {
            Ok(stream) => {
                failures = 0;
                log::debug!("watching {kind}");
                if let Drained::Cancelled = drain(stream.boxed(), &*sink, &kind, &token).await {
                    break;
                }
            }
            Err(error) => {
                failures += 1;
                log::warn!(
                    "establishing {kind} watch failed ({failures}/{MAX_CONSECUTIVE_FAILURES}): {error}"
                );
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    log::warn!("giving up on {kind} watch until it is requested again");
                    if let Some(registry) = registry.upgrade() {
                        registry.deregister(&kind, id);
                    }
                    return;
                }
            }
        }
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
    log::debug!("stopped watching {kind}");
}

async fn drain<S>(
    mut stream: S,
    sink: &dyn ResourceEventSink,
    kind: &ResourceKind,
    token: &CancellationToken,
) -> Drained
where
    S: Stream<Item = kube_client::Result<WatchEvent<DynamicObject>>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = token.cancelled() => return Drained::Cancelled,
            next = stream.try_next() => next,
        };
        match next {
            Ok(Some(WatchEvent::Added(object) | WatchEvent::Modified(object))) => {
                sink.on_added(object);
            }
            Ok(Some(WatchEvent::Deleted(object))) => sink.on_removed(object),
            Ok(Some(WatchEvent::Bookmark(_))) => {}
            Ok(Some(WatchEvent::Error(status))) => {
                log::warn!("{kind} watch reported an error, re-establishing: {status:?}");
                return Drained::Ended;
            }
            Ok(None) => {
                log::debug!("{kind} watch stream ended, re-establishing");
                return Drained::Ended;
            }
            Err(error) => {
                log::warn!("{kind} watch failed, re-establishing: {error}");
                return Drained::Ended;
            }
        }
    }
}
