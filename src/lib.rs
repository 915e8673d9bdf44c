//! kube-resource-model keeps a live, per-context cache of Kubernetes and
//! OpenShift resources for interactive consumers such as IDE tree views,
//! e.g. list the pods of the current namespace once and keep the list fresh
//! from watch events instead of re-fetching it on every redraw.
//!
//! One [`ActiveContext`] represents one connected cluster. It owns a cache
//! ("provider") per resource kind, filled lazily on first query. One watch
//! stream per queried kind is multiplexed into add/remove updates that keep
//! the caches consistent. Custom resource kinds join the same machinery at
//! runtime when their CustomResourceDefinition is queried or shows up on the
//! definitions watch. Consumers observe it all through the context's
//! [`ModelChangeObservable`].
//!
//! The cluster client is a pre-configured [`kube_client::Client`]; whether it
//! talks to plain Kubernetes or to OpenShift is probed once by
//! [`ClientAdapter::detect`], which decides the set of built-in kinds a
//! context starts with.

pub mod client;
pub use client::{ClientAdapter, ClusterFlavor};
pub mod context;
pub use context::{ActiveContext, ContextError, ResourceScope};
pub mod crd;
pub use crd::CustomResourceError;
pub mod events;
pub use events::{ModelChange, ModelChangeListener, ModelChangeObservable};
pub mod kind;
pub use kind::{QualifiedName, ResourceKind};
pub mod provider;
pub use provider::{ProviderError, ProviderScope, ResourceProvider};
pub mod watch;
pub use watch::{ResourceEventSink, ResourceWatch, WatchSource};
