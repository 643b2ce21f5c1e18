//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction for both API surfaces, idempotent namespace creation,
//! and server-side apply of raw manifests resolved through API discovery.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Discovery;
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::{Error, FIELD_MANAGER};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
///
/// Watch requests must time out server-side before this elapses.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path and context
///
/// Without a path the config is inferred (in-cluster service account or
/// `$KUBECONFIG`).
pub async fn create_client(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            let options = KubeConfigOptions {
                context: context.map(str::to_string),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Ensure a namespace exists (idempotent).
///
/// Uses server-side apply so it never fails on "already exists" and doesn't
/// race with concurrent creators.
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use vcluster_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Get priority for a Kubernetes resource kind (lower = apply first)
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" | "DaemonSet" | "StatefulSet" => 7,
        _ => 10,
    }
}

fn manifest_field<'a>(doc: &'a Value, pointer: &str) -> Option<&'a str> {
    doc.pointer(pointer).and_then(Value::as_str)
}

/// Apply a single parsed manifest using API discovery
///
/// Namespaced kinds without an explicit namespace land in `default`.
pub async fn apply_manifest_with_discovery(
    client: &Client,
    discovery: &Discovery,
    doc: &Value,
) -> Result<(), Error> {
    let kind = manifest_field(doc, "/kind")
        .ok_or_else(|| Error::serialization("manifest missing kind"))?;
    let api_version = manifest_field(doc, "/apiVersion")
        .ok_or_else(|| Error::serialization_for_kind(kind, "manifest missing apiVersion"))?;
    let name = manifest_field(doc, "/metadata/name")
        .ok_or_else(|| Error::serialization_for_kind(kind, "manifest missing metadata.name"))?;
    let namespace = manifest_field(doc, "/metadata/namespace");

    let (group, version) = parse_api_version(api_version);
    let gvk = GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    };

    let Some((api_resource, capabilities)) = discovery.resolve_gvk(&gvk) else {
        return Err(Error::internal_with_context(
            "apply_manifest",
            format!("unknown resource type: {}/{}", api_version, kind),
        ));
    };

    let api: Api<DynamicObject> = match capabilities.scope {
        kube::discovery::Scope::Namespaced => Api::namespaced_with(
            client.clone(),
            namespace.unwrap_or("default"),
            &api_resource,
        ),
        kube::discovery::Scope::Cluster => Api::all_with(client.clone(), &api_resource),
    };

    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &params, &Patch::Apply(doc))
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "apply_manifest",
                format!("failed to apply {}/{}: {}", kind, name, e),
            )
        })?;

    trace!(kind = %kind, name = %name, namespace = ?namespace, "applied manifest");
    Ok(())
}

/// Apply a multi-document YAML string
///
/// Documents are applied in kind priority order. Discovery runs again after
/// CRDs are applied so custom resources in the same bundle resolve. Every
/// document is attempted; the first failure is returned.
pub async fn apply_manifests(client: &Client, manifests: &str) -> Result<usize, Error> {
    let mut docs = crate::yaml::parse_documents(manifests)?;
    if docs.is_empty() {
        return Ok(0);
    }
    docs.sort_by_key(|d| kind_priority(manifest_field(d, "/kind").unwrap_or("")));

    let (foundational, rest): (Vec<Value>, Vec<Value>) = docs.into_iter().partition(|d| {
        matches!(
            manifest_field(d, "/kind"),
            Some("Namespace") | Some("CustomResourceDefinition")
        )
    });
    let has_crds = foundational
        .iter()
        .any(|d| manifest_field(d, "/kind") == Some("CustomResourceDefinition"));

    let mut discovery = run_discovery(client).await?;
    for doc in &foundational {
        apply_manifest_with_discovery(client, &discovery, doc).await?;
    }
    if has_crds && !rest.is_empty() {
        discovery = run_discovery(client).await?;
    }

    let mut first_error = None;
    for doc in &rest {
        if let Err(e) = apply_manifest_with_discovery(client, &discovery, doc).await {
            warn!(
                error = %e,
                kind = manifest_field(doc, "/kind").unwrap_or(""),
                "manifest apply failed, continuing with remaining manifests"
            );
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            debug!(count = foundational.len() + rest.len(), "applied manifests");
            Ok(foundational.len() + rest.len())
        }
    }
}

async fn run_discovery(client: &Client) -> Result<Discovery, Error> {
    Discovery::new(client.clone()).run().await.map_err(|e| {
        Error::internal_with_context("discovery", format!("API discovery failed: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_version_handles_core_group() {
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
        assert_eq!(
            parse_api_version("rbac.authorization.k8s.io/v1"),
            ("rbac.authorization.k8s.io".to_string(), "v1".to_string())
        );
    }

    #[test]
    fn namespaces_apply_before_workloads() {
        let mut kinds = vec!["Deployment", "ConfigMap", "Namespace", "Widget", "Role"];
        kinds.sort_by_key(|k| kind_priority(k));
        assert_eq!(
            kinds,
            vec!["Namespace", "Role", "ConfigMap", "Deployment", "Widget"]
        );
    }
}
