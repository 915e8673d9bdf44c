//! Resource kinds registered on every context at construction.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
    Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::storage::v1::StorageClass;

use crate::crd;
use crate::kind::ResourceKind;

pub(crate) struct BuiltinKind {
    pub(crate) kind: ResourceKind,
    pub(crate) namespaced: bool,
}

impl BuiltinKind {
    fn namespaced(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespaced: true,
        }
    }

    fn cluster(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespaced: false,
        }
    }
}

/// Kinds every Kubernetes cluster serves.
pub(crate) fn kubernetes_kinds() -> Vec<BuiltinKind> {
    vec![
        BuiltinKind::cluster(ResourceKind::of::<Namespace>()),
        BuiltinKind::cluster(ResourceKind::of::<Node>()),
        BuiltinKind::namespaced(ResourceKind::of::<Pod>()),
        BuiltinKind::namespaced(ResourceKind::of::<Deployment>()),
        BuiltinKind::namespaced(ResourceKind::of::<StatefulSet>()),
        BuiltinKind::namespaced(ResourceKind::of::<DaemonSet>()),
        BuiltinKind::namespaced(ResourceKind::of::<ReplicaSet>()),
        BuiltinKind::namespaced(ResourceKind::of::<Job>()),
        BuiltinKind::namespaced(ResourceKind::of::<CronJob>()),
        BuiltinKind::namespaced(ResourceKind::of::<Service>()),
        BuiltinKind::namespaced(ResourceKind::of::<Endpoints>()),
        BuiltinKind::namespaced(ResourceKind::of::<ConfigMap>()),
        BuiltinKind::namespaced(ResourceKind::of::<Secret>()),
        BuiltinKind::cluster(ResourceKind::of::<PersistentVolume>()),
        BuiltinKind::namespaced(ResourceKind::of::<PersistentVolumeClaim>()),
        BuiltinKind::cluster(ResourceKind::of::<StorageClass>()),
        BuiltinKind::namespaced(ResourceKind::of::<Ingress>()),
        BuiltinKind::cluster(crd::definition_kind()),
    ]
}

/// Kinds added on top when the cluster speaks the OpenShift flavor. No
/// compiled-in types exist for these, so they are built from their API
/// coordinates.
pub(crate) fn openshift_kinds() -> Vec<BuiltinKind> {
    vec![
        BuiltinKind::cluster(ResourceKind::new(
            "project.openshift.io",
            "v1",
            "Project",
            "projects",
        )),
        BuiltinKind::namespaced(ResourceKind::new(
            "route.openshift.io",
            "v1",
            "Route",
            "routes",
        )),
        BuiltinKind::namespaced(ResourceKind::new(
            "apps.openshift.io",
            "v1",
            "DeploymentConfig",
            "deploymentconfigs",
        )),
        BuiltinKind::namespaced(ResourceKind::new(
            "build.openshift.io",
            "v1",
            "BuildConfig",
            "buildconfigs",
        )),
        BuiltinKind::namespaced(ResourceKind::new(
            "build.openshift.io",
            "v1",
            "Build",
            "builds",
        )),
        BuiltinKind::namespaced(ResourceKind::new(
            "image.openshift.io",
            "v1",
            "ImageStream",
            "imagestreams",
        )),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tables_hold_no_duplicate_kinds() {
        let mut seen = HashSet::new();
        for entry in kubernetes_kinds().into_iter().chain(openshift_kinds()) {
            assert!(seen.insert(entry.kind.clone()), "duplicate {}", entry.kind);
        }
    }

    #[test]
    fn openshift_kinds_live_in_openshift_groups() {
        for entry in openshift_kinds() {
            assert!(entry.kind.group().ends_with(".openshift.io"));
        }
    }

    #[test]
    fn well_known_scopes_are_preserved() {
        let namespaced: Vec<_> = kubernetes_kinds()
            .into_iter()
            .filter(|entry| entry.namespaced)
            .map(|entry| entry.kind.kind().to_owned())
            .collect();
        assert!(namespaced.contains(&"Pod".to_owned()));
        assert!(!namespaced.contains(&"Namespace".to_owned()));
        assert!(!namespaced.contains(&"CustomResourceDefinition".to_owned()));
    }
}
