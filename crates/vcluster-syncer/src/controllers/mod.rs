//! Always-on controllers wired during the register phase
//!
//! These are constructed directly rather than through the unit registry.
//! Each one is a kube-rs [`Controller`](kube::runtime::Controller) wrapped in
//! a [`Reconciler`](crate::manager::Reconciler) so it runs under a manager.

mod coredns;
mod default_endpoint;
mod init_manifests;
mod pod_security;

use std::sync::Arc;

use tracing::info;

#[cfg(test)]
use mockall::automock;

pub use self::coredns::{node_hosts, CoreDnsController};
pub use self::default_endpoint::{default_endpoints, DefaultEndpointController};
pub use self::init_manifests::{InitManifestsController, MANIFESTS_KEY};
pub use self::pod_security::{PodSecurityController, ENFORCE_LABEL};
use crate::context::RegisterContext;
use crate::manager::Manager;
use crate::Result;

/// Sets up the always-on controllers
#[cfg_attr(test, automock)]
pub trait ControllerRegistrar: Send + Sync {
    /// Keep virtual `default/kubernetes` endpoints pointing at the syncer service
    fn default_endpoint(&self, ctx: &RegisterContext) -> Result<()>;

    /// Enforce a pod security standard on every virtual namespace
    fn pod_security(&self, ctx: &RegisterContext, standard: &str) -> Result<()>;

    /// Keep the CoreDNS NodeHosts entry in sync with virtual nodes
    fn coredns(&self, ctx: &RegisterContext) -> Result<()>;

    /// Apply init manifests, watching the configmap through `local`
    fn init_manifests(&self, ctx: &RegisterContext, local: Arc<dyn Manager>) -> Result<()>;
}

/// Registers the kube-rs controllers of this module
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeControllerRegistrar;

impl ControllerRegistrar for KubeControllerRegistrar {
    fn default_endpoint(&self, ctx: &RegisterContext) -> Result<()> {
        let controller = DefaultEndpointController::new(
            ctx.physical_manager.client(),
            ctx.virtual_manager.client(),
            ctx.namespaces.current.clone(),
            ctx.options.service_name.clone(),
        );
        ctx.physical_manager.add_reconciler(Arc::new(controller))?;
        info!("registered default endpoint controller");
        Ok(())
    }

    fn pod_security(&self, ctx: &RegisterContext, standard: &str) -> Result<()> {
        let controller = PodSecurityController::new(ctx.virtual_manager.client(), standard)?;
        ctx.virtual_manager.add_reconciler(Arc::new(controller))?;
        info!(standard = %standard, "registered pod security controller");
        Ok(())
    }

    fn coredns(&self, ctx: &RegisterContext) -> Result<()> {
        let controller = CoreDnsController::new(ctx.virtual_manager.client());
        ctx.virtual_manager.add_reconciler(Arc::new(controller))?;
        info!("registered CoreDNS NodeHosts controller");
        Ok(())
    }

    fn init_manifests(&self, ctx: &RegisterContext, local: Arc<dyn Manager>) -> Result<()> {
        let controller = InitManifestsController::new(
            local.client(),
            ctx.virtual_manager.client(),
            ctx.namespaces.current.clone(),
            &ctx.options.name,
        );
        local.add_reconciler(Arc::new(controller))?;
        info!(manager = %local.name(), "registered init manifests controller");
        Ok(())
    }
}
