//! Dynamic resource kinds derived from `CustomResourceDefinition` objects.
//!
//! Custom resources are not compiled in, so their kinds are built at runtime
//! from the definition's group, served version and names, and flow through the
//! same provider machinery as every other kind.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionVersion,
};
use thiserror::Error;

use crate::kind::ResourceKind;
use crate::provider::ProviderScope;

/// Errors raised by a single malformed definition. They never affect other
/// providers.
#[derive(Debug, Error)]
pub enum CustomResourceError {
    #[error("custom resource definition {name} has scope {scope:?}, expected \"Cluster\" or \"Namespaced\"")]
    UnsupportedScope { name: String, scope: String },

    #[error("custom resource definition {name} serves no version")]
    NoServedVersion { name: String },
}

/// Kind of the definition objects themselves.
pub fn definition_kind() -> ResourceKind {
    ResourceKind::of::<CustomResourceDefinition>()
}

/// Derives the kind of the custom resources a definition describes.
///
/// The version is the one marked `storage`, or the first served version when
/// no storage version is flagged yet.
pub fn kind_for_definition(
    definition: &CustomResourceDefinition,
) -> Result<ResourceKind, CustomResourceError> {
    let version = served_version(definition)?;
    Ok(ResourceKind::new(
        &definition.spec.group,
        &version.name,
        &definition.spec.names.kind,
        &definition.spec.names.plural,
    ))
}

/// Maps the definition's `spec.scope` onto a provider scope.
pub fn scope_for_definition(
    definition: &CustomResourceDefinition,
) -> Result<ProviderScope, CustomResourceError> {
    match definition.spec.scope.as_str() {
        "Namespaced" => Ok(ProviderScope::Namespaced),
        "Cluster" => Ok(ProviderScope::Cluster),
        other => Err(CustomResourceError::UnsupportedScope {
            name: definition_name(definition),
            scope: other.to_owned(),
        }),
    }
}

fn served_version(
    definition: &CustomResourceDefinition,
) -> Result<&CustomResourceDefinitionVersion, CustomResourceError> {
    let versions = &definition.spec.versions;
    versions
        .iter()
        .find(|version| version.storage)
        .or_else(|| versions.iter().find(|version| version.served))
        .ok_or_else(|| CustomResourceError::NoServedVersion {
            name: definition_name(definition),
        })
}

fn definition_name(definition: &CustomResourceDefinition) -> String {
    definition.metadata.name.clone().unwrap_or_else(|| {
        format!(
            "{}.{}",
            definition.spec.names.plural, definition.spec.group
        )
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn version(name: &str, served: bool, storage: bool) -> CustomResourceDefinitionVersion {
        CustomResourceDefinitionVersion {
            name: name.to_owned(),
            served,
            storage,
            ..Default::default()
        }
    }

    fn definition(scope: &str, versions: Vec<CustomResourceDefinitionVersion>) -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some("crontabs.stable.example.com".to_owned()),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: "stable.example.com".to_owned(),
                names: CustomResourceDefinitionNames {
                    kind: "CronTab".to_owned(),
                    plural: "crontabs".to_owned(),
                    ..Default::default()
                },
                scope: scope.to_owned(),
                versions,
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn kind_prefers_the_storage_version() {
        let definition = definition(
            "Namespaced",
            vec![version("v1alpha1", true, false), version("v1", true, true)],
        );
        let kind = kind_for_definition(&definition).unwrap();
        assert_eq!(kind.group(), "stable.example.com");
        assert_eq!(kind.version(), "v1");
        assert_eq!(kind.kind(), "CronTab");
        assert_eq!(kind.plural(), "crontabs");
    }

    #[test]
    fn kind_falls_back_to_the_first_served_version() {
        let definition = definition(
            "Namespaced",
            vec![version("v1beta1", true, false), version("v1beta2", true, false)],
        );
        let kind = kind_for_definition(&definition).unwrap();
        assert_eq!(kind.version(), "v1beta1");
    }

    #[test]
    fn kind_requires_a_served_version() {
        let definition = definition("Namespaced", vec![version("v1", false, false)]);
        assert_matches!(
            kind_for_definition(&definition),
            Err(CustomResourceError::NoServedVersion { name }) if name == "crontabs.stable.example.com"
        );
    }

    #[test]
    fn scope_maps_onto_provider_scope() {
        let namespaced = definition("Namespaced", vec![version("v1", true, true)]);
        assert_eq!(scope_for_definition(&namespaced).unwrap(), ProviderScope::Namespaced);

        let cluster = definition("Cluster", vec![version("v1", true, true)]);
        assert_eq!(scope_for_definition(&cluster).unwrap(), ProviderScope::Cluster);
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let definition = definition("Regional", vec![version("v1", true, true)]);
        assert_matches!(
            scope_for_definition(&definition),
            Err(CustomResourceError::UnsupportedScope { scope, .. }) if scope == "Regional"
        );
    }

    #[test]
    fn definition_kind_matches_the_apiextensions_group() {
        let kind = definition_kind();
        assert_eq!(kind.group(), "apiextensions.k8s.io");
        assert_eq!(kind.kind(), "CustomResourceDefinition");
        assert_eq!(kind.plural(), "customresourcedefinitions");
    }
}
