//! Discover virtual clusters on the host cluster
//!
//! A virtual cluster is a StatefulSet labelled `app=vcluster`; its status is
//! the phase of the first replica pod.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use tracing::debug;

use vcluster_common::CONTEXT_PREFIX;

use crate::Result;

/// Label selector matching virtual cluster StatefulSets
pub const VCLUSTER_SELECTOR: &str = "app=vcluster";

/// Status reported when the first replica pod does not exist
pub const UNKNOWN_STATUS: &str = "Unknown";

/// A virtual cluster found on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VCluster {
    /// StatefulSet name
    pub name: String,
    /// Host namespace the cluster runs in
    pub namespace: String,
    /// StatefulSet creation time
    pub created: DateTime<Utc>,
    /// Seconds since `created` at listing time
    pub age_seconds: i64,
    /// Phase of the `<name>-0` pod, or [`UNKNOWN_STATUS`]
    pub status: String,
    /// Host context the cluster was found through
    pub context: String,
}

/// Kube context name created when connecting to a virtual cluster
pub fn context_name(name: &str, namespace: &str, context: &str) -> String {
    format!("{}{}_{}_{}", CONTEXT_PREFIX, name, namespace, context)
}

/// Phase of `pod`, or [`UNKNOWN_STATUS`] when it is absent
pub fn pod_status(pod: Option<&Pod>) -> String {
    pod.and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| UNKNOWN_STATUS.to_string())
}

/// Build the listing entry of one StatefulSet
pub fn vcluster_from(
    statefulset: &StatefulSet,
    pod: Option<&Pod>,
    context: &str,
    now: DateTime<Utc>,
) -> VCluster {
    let created = statefulset
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or(now);
    VCluster {
        name: statefulset.name_any(),
        namespace: statefulset.namespace().unwrap_or_default(),
        created,
        age_seconds: now.signed_duration_since(created).num_seconds().max(0),
        status: pod_status(pod),
        context: context.to_string(),
    }
}

/// List virtual clusters reachable through `client`
///
/// `namespace` of `None` searches every namespace. Only StatefulSets whose
/// name starts with `name_prefix` are returned.
pub async fn list_vclusters(
    client: &Client,
    context: &str,
    name_prefix: &str,
    namespace: Option<&str>,
) -> Result<Vec<VCluster>> {
    let statefulsets: Api<StatefulSet> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let list = statefulsets
        .list(&ListParams::default().labels(VCLUSTER_SELECTOR))
        .await?;

    let now = Utc::now();
    let mut vclusters = Vec::new();
    for statefulset in list.items {
        let name = statefulset.name_any();
        if !name.starts_with(name_prefix) {
            continue;
        }
        let ns = statefulset.namespace().unwrap_or_default();
        let pods: Api<Pod> = Api::namespaced(client.clone(), &ns);
        let pod = pods.get_opt(&format!("{}-0", name)).await?;
        debug!(vcluster = %name, namespace = %ns, found_pod = pod.is_some(), "found vcluster");
        vclusters.push(vcluster_from(&statefulset, pod.as_ref(), context, now));
    }
    Ok(vclusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn statefulset(name: &str, namespace: &str, created: DateTime<Utc>) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn context_name_joins_identity_and_host_context() {
        assert_eq!(
            context_name("vc1", "team-a", "kind-host"),
            "vcluster_vc1_team-a_kind-host"
        );
    }

    #[test]
    fn status_comes_from_first_replica_phase() {
        assert_eq!(pod_status(Some(&pod("Running"))), "Running");
        assert_eq!(pod_status(Some(&Pod::default())), "Unknown");
        assert_eq!(pod_status(None), "Unknown");
    }

    #[test]
    fn entry_carries_identity_age_and_context() {
        let now = Utc::now();
        let created = now - Duration::minutes(5);
        let sts = statefulset("vc1", "team-a", created);

        let vcluster = vcluster_from(&sts, Some(&pod("Pending")), "kind-host", now);
        assert_eq!(vcluster.name, "vc1");
        assert_eq!(vcluster.namespace, "team-a");
        assert_eq!(vcluster.created, created);
        assert_eq!(vcluster.age_seconds, 300);
        assert_eq!(vcluster.status, "Pending");
        assert_eq!(vcluster.context, "kind-host");
    }

    #[test]
    fn json_uses_pascal_case_keys() {
        let now = Utc::now();
        let vcluster = vcluster_from(&statefulset("vc1", "team-a", now), None, "host", now);
        let json = serde_json::to_value(&vcluster).unwrap();
        assert_eq!(json["Name"], "vc1");
        assert_eq!(json["Status"], "Unknown");
        assert_eq!(json["AgeSeconds"], 0);
    }
}
