//! Deployment configuration: one namespace definition plus groups of
//! resource definitions keyed by kind.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::{Resource, ResourceDefinition};

/// Key reserved for the target namespace definition.
const NAMESPACE_KEY: &str = "namespace";

/// Immutable deployment configuration.
///
/// Declaration order is preserved (kinds in document order, names in document
/// order within a kind) because it doubles as the default deployment
/// sequence. Lookups are linear; configurations are small.
#[derive(Debug, Clone)]
pub struct Configuration {
    namespace: ResourceDefinition,
    groups: Vec<(String, Vec<(String, ResourceDefinition)>)>,
}

impl Configuration {
    /// The namespace definition.
    pub fn namespace(&self) -> &ResourceDefinition {
        &self.namespace
    }

    /// `metadata.name` of the namespace definition.
    pub fn namespace_name(&self) -> Option<&str> {
        self.namespace.metadata_name()
    }

    /// Look up one definition by kind and name.
    pub fn get(&self, kind: &str, name: &str) -> Option<&ResourceDefinition> {
        self.groups
            .iter()
            .find(|(k, _)| k == kind)
            .and_then(|(_, names)| names.iter().find(|(n, _)| n == name))
            .map(|(_, def)| def)
    }

    /// All resource paths in declaration order, namespace excluded.
    pub fn resource_paths(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|(kind, names)| {
                names.iter().map(move |(name, _)| format!("{kind}/{name}"))
            })
            .collect()
    }

    /// Resolve a `kind/name` path, splitting on the first separator. An
    /// unknown path yields a resource with no definition rather than an
    /// error.
    pub fn resolve<'a>(&'a self, path: &'a str) -> Resource<'a> {
        let (kind, name) = path.split_once('/').unwrap_or((path, ""));
        Resource {
            kind,
            name,
            definition: self.get(kind, name),
        }
    }
}

// One kind's worth of definitions, deserialized through a visitor so the
// document order of names survives regardless of input format.
struct Group(Vec<(String, ResourceDefinition)>);

impl<'de> Deserialize<'de> for Group {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct GroupVisitor;

        impl<'de> Visitor<'de> for GroupVisitor {
            type Value = Group;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of resource name to definition")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Group, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, ResourceDefinition>()? {
                    entries.push(entry);
                }
                Ok(Group(entries))
            }
        }

        deserializer.deserialize_map(GroupVisitor)
    }
}

impl<'de> Deserialize<'de> for Configuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ConfigVisitor;

        impl<'de> Visitor<'de> for ConfigVisitor {
            type Value = Configuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of resource kind to named definitions, with a namespace entry")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Configuration, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut namespace = None;
                let mut groups: Vec<(String, Vec<(String, ResourceDefinition)>)> = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    if key == NAMESPACE_KEY {
                        if namespace.is_some() {
                            return Err(de::Error::duplicate_field(NAMESPACE_KEY));
                        }
                        namespace = Some(map.next_value::<ResourceDefinition>()?);
                    } else {
                        if groups.iter().any(|(k, _)| *k == key) {
                            return Err(de::Error::custom(format!(
                                "duplicate resource kind: {key}"
                            )));
                        }
                        let Group(entries) = map.next_value()?;
                        groups.push((key, entries));
                    }
                }
                let namespace =
                    namespace.ok_or_else(|| de::Error::missing_field(NAMESPACE_KEY))?;
                Ok(Configuration { namespace, groups })
            }
        }

        deserializer.deserialize_map(ConfigVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        serde_yaml::from_str(
            r#"
namespace:
  metadata:
    name: ns1
service:
  a:
    metadata: {}
  b:
    metadata: {}
deployment:
  a:
    metadata:
      annotations:
        x-truder.net/dependencies: service/a
"#,
        )
        .expect("valid configuration")
    }

    #[test]
    fn resource_paths_follow_declaration_order() {
        let config = sample();
        assert_eq!(
            config.resource_paths(),
            ["service/a", "service/b", "deployment/a"]
        );
    }

    #[test]
    fn namespace_is_excluded_and_named() {
        let config = sample();
        assert_eq!(config.namespace_name(), Some("ns1"));
        assert!(!config.resource_paths().iter().any(|p| p.starts_with("namespace")));
    }

    #[test]
    fn resolve_splits_on_first_separator() {
        let config = sample();
        let res = config.resolve("service/a");
        assert_eq!((res.kind, res.name), ("service", "a"));
        assert!(res.definition.is_some());

        // Extra separators stay in the name and simply fail to resolve.
        let res = config.resolve("service/a/b");
        assert_eq!((res.kind, res.name), ("service", "a/b"));
        assert!(res.definition.is_none());
    }

    #[test]
    fn resolve_unknown_path_has_no_definition() {
        let config = sample();
        assert!(config.resolve("service/missing").definition.is_none());
        assert!(config.resolve("nosuchkind/a").definition.is_none());
        assert!(config.resolve("noseparator").definition.is_none());
    }

    #[test]
    fn missing_namespace_entry_is_rejected() {
        let err = serde_yaml::from_str::<Configuration>("service:\n  a: {}\n").unwrap_err();
        assert!(err.to_string().contains("namespace"), "err={err}");
    }

    #[test]
    fn scalar_group_is_rejected() {
        let err = serde_yaml::from_str::<Configuration>(
            "namespace:\n  metadata:\n    name: ns1\nservice: 3\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("mapping"), "err={err}");
    }
}
