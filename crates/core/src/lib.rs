//! Truder core types: the configuration model, resource addressing, and the
//! applier seam the deployer drives.

#![forbid(unsafe_code)]

mod config;

pub use config::Configuration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;

/// Reserved annotation listing the resource paths that must be deployed
/// before the annotated resource, comma-separated.
pub const DEPENDENCY_ANNOTATION: &str = "x-truder.net/dependencies";

/// A deployable definition as declared in the configuration. The payload is
/// opaque nested data destined for the cluster; the deployer only reads a
/// handful of well-known fields through the typed accessors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceDefinition(Json);

impl ResourceDefinition {
    pub fn new(value: Json) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &Json {
        &self.0
    }

    /// `metadata.name`, when present.
    pub fn metadata_name(&self) -> Option<&str> {
        self.0.get("metadata")?.get("name")?.as_str()
    }

    /// A single `metadata.annotations` value, when present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get("annotations")?.get(key)?.as_str()
    }

    /// Resource paths this definition depends on, parsed from the reserved
    /// annotation. Tokens are trimmed and empty tokens (stray commas) are
    /// dropped; an absent annotation means no prerequisites.
    pub fn dependencies(&self) -> SmallVec<[String; 4]> {
        match self.annotation(DEPENDENCY_ANNOTATION) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|tok| !tok.is_empty())
                .map(String::from)
                .collect(),
            None => SmallVec::new(),
        }
    }
}

impl From<Json> for ResourceDefinition {
    fn from(value: Json) -> Self {
        Self(value)
    }
}

/// A resolved view of a resource path. `definition` is `None` when the path
/// does not address anything in the configuration; callers decide whether
/// absence is fatal.
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    pub kind: &'a str,
    pub name: &'a str,
    pub definition: Option<&'a ResourceDefinition>,
}

impl Resource<'_> {
    pub fn path(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Errors surfaced by the deployer. Applier failures pass through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A requested or referenced path has no definition in the
    /// configuration. This is a caller/config bug, fatal to the branch.
    #[error("Resource not defined: {0}")]
    ResourceNotDefined(String),

    /// The namespace definition does not expose `metadata.name`.
    #[error("namespace definition is missing metadata.name")]
    MissingNamespaceName,

    #[error(transparent)]
    Apply(#[from] anyhow::Error),
}

/// The collaborator performing the actual apply call against a cluster for
/// one resource. Used for ordinary resources and for the namespace resource
/// itself. Implementations must tolerate concurrent invocations for distinct
/// resources.
#[async_trait::async_trait]
pub trait Applier: Send + Sync {
    async fn apply(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        definition: &ResourceDefinition,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_name_reads_nested_field() {
        let def = ResourceDefinition::new(json!({"metadata": {"name": "ns1"}}));
        assert_eq!(def.metadata_name(), Some("ns1"));

        let def = ResourceDefinition::new(json!({"metadata": {}}));
        assert_eq!(def.metadata_name(), None);

        let def = ResourceDefinition::new(json!({}));
        assert_eq!(def.metadata_name(), None);
    }

    #[test]
    fn dependencies_split_on_commas() {
        let def = ResourceDefinition::new(json!({
            "metadata": {"annotations": {"x-truder.net/dependencies": "service/a,configmap/b"}}
        }));
        assert_eq!(def.dependencies().as_slice(), ["service/a", "configmap/b"]);
    }

    #[test]
    fn dependencies_trim_tokens_and_drop_empties() {
        let def = ResourceDefinition::new(json!({
            "metadata": {"annotations": {"x-truder.net/dependencies": " service/a , ,configmap/b,"}}
        }));
        assert_eq!(def.dependencies().as_slice(), ["service/a", "configmap/b"]);

        let def = ResourceDefinition::new(json!({
            "metadata": {"annotations": {"x-truder.net/dependencies": ""}}
        }));
        assert!(def.dependencies().is_empty());
    }

    #[test]
    fn dependencies_absent_annotation_means_none() {
        let def = ResourceDefinition::new(json!({"metadata": {}}));
        assert!(def.dependencies().is_empty());

        let def = ResourceDefinition::new(json!({
            "metadata": {"annotations": {"unrelated": "x"}}
        }));
        assert!(def.dependencies().is_empty());
    }
}
