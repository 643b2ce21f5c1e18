//! Init manifests bootstrap
//!
//! The `<name>-init-manifests` configmap in the syncer's namespace holds a
//! multi-document YAML bundle under [`MANIFESTS_KEY`]. Its documents are
//! applied to the virtual surface; the hash of the last applied bundle is
//! recorded on the configmap so unchanged bundles are not re-applied.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::manager::runtime::{error_policy, log_reconcile_result};
use crate::manager::{Reconciler, WATCH_TIMEOUT_SECS};
use crate::Result;
use vcluster_common::kube_utils::apply_manifests;
use vcluster_common::names::deterministic_hash;

/// Configmap key holding the manifests
pub const MANIFESTS_KEY: &str = "manifests";

/// Annotation recording the hash of the last applied bundle
const APPLIED_HASH_ANNOTATION: &str = "vcluster.loft.sh/applied-manifests-hash";

/// Retry interval while the bundle fails to apply
const APPLY_RETRY: Duration = Duration::from_secs(30);

/// Applies the init manifests configmap to the virtual surface
#[derive(Clone)]
pub struct InitManifestsController {
    local: Client,
    virtual_client: Client,
    namespace: String,
    configmap: String,
}

impl InitManifestsController {
    /// Watch `<vcluster_name>-init-manifests` in `namespace` through `local`
    pub fn new(
        local: Client,
        virtual_client: Client,
        namespace: impl Into<String>,
        vcluster_name: &str,
    ) -> Self {
        Self {
            local,
            virtual_client,
            namespace: namespace.into(),
            configmap: configmap_name(vcluster_name),
        }
    }
}

/// Name of the init manifests configmap of a virtual cluster
pub fn configmap_name(vcluster_name: &str) -> String {
    format!("{}-init-manifests", vcluster_name)
}

/// Manifests and their hash, `None` when there is nothing new to apply
pub fn pending_manifests(configmap: &ConfigMap) -> Option<(&str, String)> {
    let manifests = configmap.data.as_ref()?.get(MANIFESTS_KEY)?.as_str();
    if manifests.trim().is_empty() {
        return None;
    }
    let hash = deterministic_hash(manifests);
    let applied = configmap.annotations().get(APPLIED_HASH_ANNOTATION);
    if applied == Some(&hash) {
        return None;
    }
    Some((manifests, hash))
}

#[instrument(skip(configmap, ctx), fields(configmap = %ctx.configmap))]
async fn reconcile(configmap: Arc<ConfigMap>, ctx: Arc<InitManifestsController>) -> Result<Action> {
    let Some((manifests, hash)) = pending_manifests(&configmap) else {
        return Ok(Action::await_change());
    };

    if let Err(e) = apply_manifests(&ctx.virtual_client, manifests).await {
        tracing::warn!(error = %e, "init manifests failed to apply, retrying");
        return Ok(Action::requeue(APPLY_RETRY));
    }

    let api: Api<ConfigMap> = Api::namespaced(ctx.local.clone(), &ctx.namespace);
    let patch = json!({
        "metadata": { "annotations": BTreeMap::from([(APPLIED_HASH_ANNOTATION, hash.as_str())]) }
    });
    api.patch(&ctx.configmap, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(hash = %hash, "applied init manifests");
    Ok(Action::await_change())
}

#[async_trait]
impl Reconciler for InitManifestsController {
    fn name(&self) -> &str {
        "init-manifests"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.local.clone(), &self.namespace);
        let config = WatcherConfig::default()
            .timeout(WATCH_TIMEOUT_SECS)
            .fields(&format!("metadata.name={}", self.configmap));

        Controller::new(api, config)
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, Arc::new(self.clone()))
            .for_each(log_reconcile_result("InitManifests"))
            .await;
        Ok(())
    }
}
