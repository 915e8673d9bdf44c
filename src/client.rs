//! Cluster client wrapper hiding the Kubernetes-vs-OpenShift distinction.

use std::collections::HashMap;

use kube_client::{Api, Client};
use kube_core::DynamicObject;
use parking_lot::Mutex;

use crate::kind::ResourceKind;

/// API flavor served by the connected cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterFlavor {
    Kubernetes,
    OpenShift,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ApiScope {
    All,
    Namespaced(String),
}

/// Wraps the cluster client together with the API flavor it speaks, and hands
/// out `Api` handles for dynamic objects, one cached handle per kind and
/// scope. Dropping the adapter releases the client and every derived handle.
pub struct ClientAdapter {
    client: Client,
    flavor: ClusterFlavor,
    apis: Mutex<HashMap<(ResourceKind, ApiScope), Api<DynamicObject>>>,
}

impl std::fmt::Debug for ClientAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAdapter")
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}

impl ClientAdapter {
    /// Probes the cluster's API group list to decide the flavor.
    ///
    /// A cluster exposing any `*.openshift.io` group is OpenShift. A probe
    /// rejected with 401/403/404 is the expected "plain Kubernetes or not
    /// allowed to tell" case and falls back to [`ClusterFlavor::Kubernetes`];
    /// any other failure is fatal and propagates.
    pub async fn detect(client: Client) -> Result<Self, kube_client::Error> {
        let flavor = match client.list_api_groups().await {
            Ok(list) => {
                let openshift = list
                    .groups
                    .iter()
                    .any(|group| group.name.ends_with(".openshift.io"));
                if openshift {
                    ClusterFlavor::OpenShift
                } else {
                    ClusterFlavor::Kubernetes
                }
            }
            Err(kube_client::Error::Api(response))
                if matches!(response.code, 401 | 403 | 404) =>
            {
                log::debug!(
                    "api group discovery denied ({}), assuming plain kubernetes",
                    response.code
                );
                ClusterFlavor::Kubernetes
            }
            Err(error) => return Err(error),
        };
        log::debug!("detected cluster flavor {flavor:?}");
        Ok(Self::with_flavor(client, flavor))
    }

    /// Wraps a client whose flavor is already known.
    pub fn with_flavor(client: Client, flavor: ClusterFlavor) -> Self {
        Self {
            client,
            flavor,
            apis: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn flavor(&self) -> ClusterFlavor {
        self.flavor
    }

    pub fn is_openshift(&self) -> bool {
        self.flavor == ClusterFlavor::OpenShift
    }

    /// Handle listing and watching a kind across the whole cluster. Repeated
    /// calls return clones of the same cached handle.
    pub fn api_all(&self, kind: &ResourceKind) -> Api<DynamicObject> {
        let mut apis = self.apis.lock();
        apis.entry((kind.clone(), ApiScope::All))
            .or_insert_with(|| Api::all_with(self.client.clone(), &kind.api_resource()))
            .clone()
    }

    /// Handle scoped to one namespace. Repeated calls for the same namespace
    /// return clones of the same cached handle.
    pub fn api_namespaced(&self, kind: &ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let mut apis = self.apis.lock();
        apis.entry((kind.clone(), ApiScope::Namespaced(namespace.to_owned())))
            .or_insert_with(|| {
                Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
            })
            .clone()
    }
}
