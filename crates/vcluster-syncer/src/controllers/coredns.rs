//! CoreDNS NodeHosts maintenance
//!
//! CoreDNS in the virtual cluster resolves node names through the `NodeHosts`
//! key of its configmap. Any node change rebuilds the whole entry.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::runtime::{error_policy, log_reconcile_result};
use crate::manager::{Reconciler, WATCH_TIMEOUT_SECS};
use crate::Result;

const COREDNS_NAMESPACE: &str = "kube-system";
const COREDNS_CONFIGMAP: &str = "coredns";
const NODE_HOSTS_KEY: &str = "NodeHosts";

/// Keeps `kube-system/coredns` NodeHosts in sync with virtual nodes
#[derive(Clone)]
pub struct CoreDnsController {
    client: Client,
}

impl CoreDnsController {
    /// Controller over the virtual surface
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `<InternalIP> <hostname>` lines for every node with an internal address
///
/// Nodes are sorted by name so the output is stable. The hostname address
/// is used when present, the node name otherwise.
pub fn node_hosts(nodes: &[Node]) -> String {
    let mut entries: Vec<(String, String, String)> = nodes
        .iter()
        .filter_map(|node| {
            let addresses = node.status.as_ref()?.addresses.as_ref()?;
            let ip = addresses.iter().find(|a| a.type_ == "InternalIP")?.address.clone();
            let host = addresses
                .iter()
                .find(|a| a.type_ == "Hostname")
                .map(|a| a.address.clone())
                .unwrap_or_else(|| node.name_any());
            Some((node.name_any(), ip, host))
        })
        .collect();
    entries.sort();

    entries
        .into_iter()
        .map(|(_, ip, host)| format!("{} {}\n", ip, host))
        .collect()
}

async fn reconcile(_node: Arc<Node>, ctx: Arc<CoreDnsController>) -> Result<Action> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    let hosts = node_hosts(&list.items);

    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), COREDNS_NAMESPACE);
    let Some(current) = configmaps.get_opt(COREDNS_CONFIGMAP).await? else {
        debug!("CoreDNS configmap not found yet");
        return Ok(Action::requeue(std::time::Duration::from_secs(10)));
    };

    let existing = current.data.as_ref().and_then(|d| d.get(NODE_HOSTS_KEY));
    if existing.map(String::as_str) == Some(hosts.as_str()) {
        return Ok(Action::await_change());
    }

    let patch = json!({ "data": { NODE_HOSTS_KEY: hosts } });
    configmaps
        .patch(COREDNS_CONFIGMAP, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(nodes = list.items.len(), "updated CoreDNS NodeHosts");
    Ok(Action::await_change())
}

#[async_trait]
impl Reconciler for CoreDnsController {
    fn name(&self) -> &str {
        "coredns-nodehosts"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, Arc::new(self.clone()))
            .for_each(log_reconcile_result("CoreDNS"))
            .await;
        Ok(())
    }
}
