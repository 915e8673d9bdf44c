//! Identity values used as map keys throughout the crate.

use std::fmt;
use std::hash::{Hash, Hasher};

use kube_core::{ApiResource, DynamicObject, GroupVersionKind, Resource, TypeMeta};

/// Uniquely identifies a type of resources in a cluster.
///
/// Two kinds are the same kind iff their group, version and kind name match.
/// The plural is carried along because it is needed to build API paths, but it
/// does not take part in equality or hashing, so a key built from a bare
/// `TypeMeta` (which has no plural) still finds the matching provider or watch.
#[derive(Debug, Clone)]
pub struct ResourceKind {
    group: String,
    version: String,
    kind: String,
    plural: String,
}

impl ResourceKind {
    /// Kind of a compiled-in `k8s-openapi` type.
    pub fn of<K>() -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self::from_api_resource(&ApiResource::erase::<K>(&()))
    }

    /// Kind with explicit coordinates, for types that are not compiled in
    /// (OpenShift kinds, custom resources).
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_owned(),
            version: version.to_owned(),
            kind: kind.to_owned(),
            plural: plural.to_owned(),
        }
    }

    pub fn from_api_resource(resource: &ApiResource) -> Self {
        Self {
            group: resource.group.clone(),
            version: resource.version.clone(),
            kind: resource.kind.clone(),
            plural: resource.plural.clone(),
        }
    }

    /// Lookup key from the type fields of a wire object. The plural is left
    /// empty; such a key can locate providers but cannot build API paths.
    pub fn from_type_meta(types: &TypeMeta) -> Self {
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            // Core group resources have a bare version for an apiVersion.
            None => ("", types.api_version.as_str()),
        };
        Self::new(group, version, &types.kind, "")
    }

    /// Lookup key for an object delivered by a watch or handed in by a caller.
    /// `None` when the object carries no type information.
    pub fn from_object(object: &DynamicObject) -> Option<Self> {
        object.types.as_ref().map(Self::from_type_meta)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// The `apiVersion` rendering: `group/version`, or a bare version for the
    /// core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Rebuilds the `ApiResource` needed to construct an `Api` for this kind.
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }

    /// Type fields stamped onto cached objects that arrived without them.
    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version(),
            kind: self.kind.clone(),
        }
    }
}

impl PartialEq for ResourceKind {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.version == other.version && self.kind == other.kind
    }
}

impl Eq for ResourceKind {}

impl Hash for ResourceKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.version.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Uniquely identifies an object of a known kind by namespace and name.
///
/// Cache membership and removal go through this value rather than instance
/// identity: an object delivered by a watch event is never the same instance
/// as the one originally cached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any.
    pub namespace: Option<String>,
    /// The object name.
    pub name: String,
}

impl QualifiedName {
    /// `None` when the object has no name yet (never the case for objects the
    /// API server has accepted); such objects are not cacheable.
    pub fn from_object(object: &DynamicObject) -> Option<Self> {
        Some(Self {
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone()?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use k8s_openapi::api::core::v1::Pod;

    use super::*;

    #[test]
    fn of_uses_compiled_in_coordinates() {
        let kind = ResourceKind::of::<Pod>();
        assert_eq!(kind.group(), "");
        assert_eq!(kind.version(), "v1");
        assert_eq!(kind.kind(), "Pod");
        assert_eq!(kind.plural(), "pods");
        assert_eq!(kind.api_version(), "v1");
    }

    #[test]
    fn equality_ignores_plural() {
        let with_plural = ResourceKind::new("apps", "v1", "Deployment", "deployments");
        let without = ResourceKind::new("apps", "v1", "Deployment", "");
        assert_eq!(with_plural, without);

        let mut map = HashMap::new();
        map.insert(with_plural, 1);
        assert_eq!(map.get(&without), Some(&1));
    }

    #[test]
    fn equality_distinguishes_groups_and_versions() {
        let v1 = ResourceKind::new("things.example.com", "v1", "Thing", "things");
        let v2 = ResourceKind::new("things.example.com", "v2", "Thing", "things");
        let other_group = ResourceKind::new("other.example.com", "v1", "Thing", "things");
        assert_ne!(v1, v2);
        assert_ne!(v1, other_group);
    }

    #[test]
    fn from_type_meta_splits_api_version() {
        let grouped = ResourceKind::from_type_meta(&TypeMeta {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
        });
        assert_eq!(grouped.group(), "apps");
        assert_eq!(grouped.version(), "v1");

        let core = ResourceKind::from_type_meta(&TypeMeta {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
        });
        assert_eq!(core.group(), "");
        assert_eq!(core.version(), "v1");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn api_resource_round_trip() {
        let kind = ResourceKind::new("route.openshift.io", "v1", "Route", "routes");
        let resource = kind.api_resource();
        assert_eq!(resource.group, "route.openshift.io");
        assert_eq!(resource.api_version, "route.openshift.io/v1");
        assert_eq!(resource.plural, "routes");
        assert_eq!(ResourceKind::from_api_resource(&resource), kind);
    }

    #[test]
    fn qualified_name_requires_a_name() {
        let kind = ResourceKind::of::<Pod>();
        let named = DynamicObject::new("nginx", &kind.api_resource()).within("dev");
        let name = QualifiedName::from_object(&named).unwrap();
        assert_eq!(name.name, "nginx");
        assert_eq!(name.namespace.as_deref(), Some("dev"));
        assert_eq!(name.to_string(), "dev/nginx");

        let mut unnamed = DynamicObject::new("x", &kind.api_resource());
        unnamed.metadata.name = None;
        assert_eq!(QualifiedName::from_object(&unnamed), None);
    }
}
