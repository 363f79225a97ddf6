//! Kubernetes applier backend: server-side apply for configured resources.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::debug;

use truder_core::{Applier, ResourceDefinition};

const FIELD_MANAGER: &str = "truder";

/// Applies definitions through the Kubernetes API using server-side apply.
///
/// Safe to invoke concurrently for distinct resources; whether a repeated
/// apply of the same resource is a no-op is the server's concern (SSA makes
/// it one in practice).
pub struct KubeApplier {
    client: Client,
    dry_run: bool,
}

impl KubeApplier {
    /// Connect using the ambient kubeconfig / in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("building kube client")?;
        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        Self {
            client,
            dry_run: false,
        }
    }

    /// Route every patch through the server-side dry-run path.
    pub fn dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }
}

#[async_trait::async_trait]
impl Applier for KubeApplier {
    async fn apply(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
        definition: &ResourceDefinition,
    ) -> Result<()> {
        let t0 = std::time::Instant::now();
        counter!("apply_attempts", 1u64);

        let mut json = definition.as_json().clone();
        let gvk = target_gvk(kind, &json);
        let (ar, namespaced) = find_api_resource(self.client.clone(), &gvk).await?;
        ensure_type_meta(&mut json, &gvk);
        ensure_metadata(&mut json, name, namespaced.then_some(namespace));

        let api: Api<DynamicObject> = if namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };

        let mut pp = PatchParams::apply(FIELD_MANAGER);
        if self.dry_run {
            pp = pp.dry_run();
        }
        debug!(namespace, kind, name, dry_run = self.dry_run, "server-side apply");
        match api.patch(name, &pp, &Patch::Apply(&json)).await {
            Ok(_) => {
                histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("apply_ok", 1u64);
                Ok(())
            }
            Err(e) => {
                counter!("apply_err", 1u64);
                Err(anyhow!("server-side apply failed for {}/{}: {}", kind, name, e))
            }
        }
    }
}

/// GVK for a definition: explicit `apiVersion`/`kind` fields win; a bare
/// spec falls back to core/v1 with the configured kind capitalized
/// ("service" -> Service), which covers the built-in types the original
/// tool handed straight to kubectl.
fn target_gvk(config_kind: &str, json: &Json) -> GroupVersionKind {
    let kind = json
        .get("kind")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| capitalize(config_kind));
    let (group, version) = match json.get("apiVersion").and_then(|v| v.as_str()) {
        Some(av) => match av.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), av.to_string()),
        },
        None => (String::new(), "v1".to_string()),
    };
    GroupVersionKind {
        group,
        version,
        kind,
    }
}

fn capitalize(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn ensure_type_meta(v: &mut Json, gvk: &GroupVersionKind) {
    let Some(obj) = v.as_object_mut() else { return };
    let api_version = if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    };
    obj.entry("apiVersion")
        .or_insert(Json::String(api_version));
    obj.entry("kind").or_insert(Json::String(gvk.kind.clone()));
}

fn ensure_metadata(v: &mut Json, name: &str, namespace: Option<&str>) {
    let Some(obj) = v.as_object_mut() else { return };
    let meta = obj
        .entry("metadata")
        .or_insert(Json::Object(serde_json::Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("name".into(), Json::String(name.to_string()));
        if let Some(ns) = namespace {
            meta.insert("namespace".into(), Json::String(ns.to_string()));
        }
    }
}

async fn find_api_resource(
    client: Client,
    gvk: &GroupVersionKind,
) -> Result<(kube::core::ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!(
        "GVK not found: {}/{}/{}",
        gvk.group,
        gvk.version,
        gvk.kind
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_gvk_prefers_explicit_fields() {
        let v = json!({"apiVersion": "apps/v1", "kind": "Deployment"});
        let gvk = target_gvk("deployment", &v);
        assert_eq!(
            (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()),
            ("apps", "v1", "Deployment")
        );

        let v = json!({"apiVersion": "v1", "kind": "Service"});
        let gvk = target_gvk("service", &v);
        assert_eq!(
            (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()),
            ("", "v1", "Service")
        );
    }

    #[test]
    fn target_gvk_falls_back_to_core_v1_and_capitalizes() {
        let gvk = target_gvk("namespace", &json!({"metadata": {"name": "ns1"}}));
        assert_eq!(
            (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()),
            ("", "v1", "Namespace")
        );
    }

    #[test]
    fn ensure_type_meta_fills_missing_fields_only() {
        let mut v = json!({"metadata": {}});
        let gvk = GroupVersionKind {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
        };
        ensure_type_meta(&mut v, &gvk);
        assert_eq!(v["apiVersion"], "apps/v1");
        assert_eq!(v["kind"], "Deployment");

        let mut v = json!({"apiVersion": "v1", "kind": "Service"});
        let gvk = target_gvk("service", &v.clone());
        ensure_type_meta(&mut v, &gvk);
        assert_eq!(v["apiVersion"], "v1");
        assert_eq!(v["kind"], "Service");
    }

    #[test]
    fn ensure_metadata_sets_name_and_namespace() {
        let mut v = json!({});
        ensure_metadata(&mut v, "a", Some("ns1"));
        assert_eq!(v["metadata"]["name"], "a");
        assert_eq!(v["metadata"]["namespace"], "ns1");

        // Cluster-scoped: no namespace injected.
        let mut v = json!({"metadata": {"labels": {"k": "v"}}});
        ensure_metadata(&mut v, "ns1", None);
        assert_eq!(v["metadata"]["name"], "ns1");
        assert!(v["metadata"].get("namespace").is_none());
        assert_eq!(v["metadata"]["labels"]["k"], "v");
    }
}
