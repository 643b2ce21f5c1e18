//! Virtual `default/kubernetes` endpoints
//!
//! Workloads in the virtual cluster reach its API server through the
//! `kubernetes` service, so its endpoints must track the physical endpoints of
//! the syncer's own service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{EndpointPort, EndpointSubset, Endpoints};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::manager::runtime::{error_policy, log_reconcile_result};
use crate::manager::{Reconciler, WATCH_TIMEOUT_SECS};
use crate::Result;
use vcluster_common::FIELD_MANAGER;

const DEFAULT_NAMESPACE: &str = "default";
const KUBERNETES_SERVICE: &str = "kubernetes";
const HTTPS_PORT_NAME: &str = "https";
const RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Mirrors the syncer service's endpoints into the virtual cluster
#[derive(Clone)]
pub struct DefaultEndpointController {
    physical: Client,
    virtual_client: Client,
    namespace: String,
    service_name: String,
}

impl DefaultEndpointController {
    /// Watch endpoints `service_name` in `namespace` on the physical surface
    pub fn new(
        physical: Client,
        virtual_client: Client,
        namespace: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            physical,
            virtual_client,
            namespace: namespace.into(),
            service_name: service_name.into(),
        }
    }
}

/// Virtual `default/kubernetes` endpoints for the given physical endpoints
///
/// Only the port named `https` is kept when present; otherwise every port is
/// exposed under that name. Target references are dropped.
pub fn default_endpoints(physical: &Endpoints) -> Endpoints {
    let subsets = physical.subsets.clone().map(|subsets| {
        subsets
            .into_iter()
            .map(|subset| {
                let ports = subset.ports.unwrap_or_default();
                let https: Vec<EndpointPort> = ports
                    .iter()
                    .filter(|p| p.name.as_deref() == Some(HTTPS_PORT_NAME))
                    .cloned()
                    .collect();
                let ports = if https.is_empty() { ports } else { https };

                EndpointSubset {
                    addresses: subset.addresses.map(|addrs| {
                        addrs
                            .into_iter()
                            .map(|mut a| {
                                a.target_ref = None;
                                a
                            })
                            .collect()
                    }),
                    not_ready_addresses: None,
                    ports: Some(
                        ports
                            .into_iter()
                            .map(|p| EndpointPort {
                                name: Some(HTTPS_PORT_NAME.to_string()),
                                ..p
                            })
                            .collect(),
                    ),
                }
            })
            .collect::<Vec<_>>()
    });

    Endpoints {
        metadata: ObjectMeta {
            name: Some(KUBERNETES_SERVICE.to_string()),
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            ..Default::default()
        },
        subsets,
    }
}

#[instrument(skip(endpoints, ctx), fields(service = %ctx.service_name))]
async fn reconcile(endpoints: Arc<Endpoints>, ctx: Arc<DefaultEndpointController>) -> Result<Action> {
    let desired = default_endpoints(&endpoints);
    let api: Api<Endpoints> = Api::namespaced(ctx.virtual_client.clone(), DEFAULT_NAMESPACE);
    api.patch(
        KUBERNETES_SERVICE,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    Ok(Action::requeue(RESYNC_INTERVAL))
}

#[async_trait]
impl Reconciler for DefaultEndpointController {
    fn name(&self) -> &str {
        "default-endpoint"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let api: Api<Endpoints> = Api::namespaced(self.physical.clone(), &self.namespace);
        let config = WatcherConfig::default()
            .timeout(WATCH_TIMEOUT_SECS)
            .fields(&format!("metadata.name={}", self.service_name));

        Controller::new(api, config)
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, Arc::new(self.clone()))
            .for_each(log_reconcile_result("DefaultEndpoint"))
            .await;
        Ok(())
    }
}
