//! Outward-facing change notifications.
//!
//! Two consumption styles, matching how different UI layers want to be told:
//! a listener trait for callers that react inline, and crossbeam channel taps
//! for callers that drain events on their own thread.

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use kube_core::DynamicObject;
use parking_lot::{Mutex, RwLock};

/// One change to the resource model.
#[derive(Debug, Clone)]
pub enum ModelChange {
    Added(Arc<DynamicObject>),
    Removed(Arc<DynamicObject>),
    CurrentNamespace(Option<String>),
}

/// Callback interface for model changes. Every method defaults to a no-op so
/// implementors override only what they care about.
pub trait ModelChangeListener: Send + Sync {
    fn on_added(&self, _object: &Arc<DynamicObject>) {}
    fn on_removed(&self, _object: &Arc<DynamicObject>) {}
    fn on_current_namespace(&self, _namespace: Option<&str>) {}
}

/// Fan-out point for model changes. Listener callbacks run on the firing
/// task, outside the listener lock, so a callback may add or remove
/// listeners. Channel taps are unbounded and pruned once their receiver is
/// dropped.
#[derive(Default)]
pub struct ModelChangeObservable {
    listeners: RwLock<Vec<Arc<dyn ModelChangeListener>>>,
    taps: Mutex<Vec<Sender<ModelChange>>>,
}

impl ModelChangeObservable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ModelChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ModelChangeListener>) {
        self.listeners
            .write()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Channel tap carrying every subsequent change.
    pub fn subscribe(&self) -> Receiver<ModelChange> {
        let (sender, receiver) = unbounded();
        self.taps.lock().push(sender);
        receiver
    }

    pub fn fire_added(&self, object: &Arc<DynamicObject>) {
        for listener in self.snapshot() {
            listener.on_added(object);
        }
        self.publish(ModelChange::Added(Arc::clone(object)));
    }

    pub fn fire_removed(&self, object: &Arc<DynamicObject>) {
        for listener in self.snapshot() {
            listener.on_removed(object);
        }
        self.publish(ModelChange::Removed(Arc::clone(object)));
    }

    pub fn fire_current_namespace(&self, namespace: Option<&str>) {
        for listener in self.snapshot() {
            listener.on_current_namespace(namespace);
        }
        self.publish(ModelChange::CurrentNamespace(namespace.map(str::to_owned)));
    }

    fn snapshot(&self) -> Vec<Arc<dyn ModelChangeListener>> {
        self.listeners.read().clone()
    }

    fn publish(&self, change: ModelChange) {
        let mut taps = self.taps.lock();
        taps.retain(|tap| tap.send(change.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Pod;
    use kube_core::ResourceExt;

    use crate::kind::ResourceKind;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl ModelChangeListener for Recording {
        fn on_added(&self, object: &Arc<DynamicObject>) {
            self.seen.lock().push(format!("added {}", object.name_any()));
        }

        fn on_removed(&self, object: &Arc<DynamicObject>) {
            self.seen
                .lock()
                .push(format!("removed {}", object.name_any()));
        }

        fn on_current_namespace(&self, namespace: Option<&str>) {
            self.seen
                .lock()
                .push(format!("namespace {}", namespace.unwrap_or("<none>")));
        }
    }

    fn pod(name: &str) -> Arc<DynamicObject> {
        let resource = ResourceKind::of::<Pod>().api_resource();
        Arc::new(DynamicObject::new(name, &resource).within("default"))
    }

    #[test]
    fn listeners_see_every_fired_change() {
        let observable = ModelChangeObservable::new();
        let recording = Arc::new(Recording::default());
        observable.add_listener(recording.clone());

        observable.fire_added(&pod("a"));
        observable.fire_removed(&pod("a"));
        observable.fire_current_namespace(Some("dev"));
        observable.fire_current_namespace(None);

        assert_eq!(
            *recording.seen.lock(),
            vec!["added a", "removed a", "namespace dev", "namespace <none>"]
        );
    }

    #[test]
    fn removed_listeners_hear_nothing_further() {
        let observable = ModelChangeObservable::new();
        let recording = Arc::new(Recording::default());
        let handle: Arc<dyn ModelChangeListener> = recording.clone();
        observable.add_listener(handle.clone());

        observable.fire_added(&pod("a"));
        observable.remove_listener(&handle);
        observable.fire_added(&pod("b"));

        assert_eq!(*recording.seen.lock(), vec!["added a"]);
    }

    #[test]
    fn taps_receive_changes_in_order() {
        let observable = ModelChangeObservable::new();
        let tap = observable.subscribe();

        observable.fire_added(&pod("a"));
        observable.fire_current_namespace(Some("dev"));

        assert_matches::assert_matches!(tap.try_recv(), Ok(ModelChange::Added(object)) if object.name_any() == "a");
        assert_matches::assert_matches!(
            tap.try_recv(),
            Ok(ModelChange::CurrentNamespace(Some(ns))) if ns == "dev"
        );
        assert!(tap.try_recv().is_err());
    }

    #[test]
    fn dropped_taps_are_pruned() {
        let observable = ModelChangeObservable::new();
        let tap = observable.subscribe();
        drop(tap);

        observable.fire_added(&pod("a"));
        assert!(observable.taps.lock().is_empty());
    }
}
