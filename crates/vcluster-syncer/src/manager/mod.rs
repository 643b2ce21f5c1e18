//! Manager capability: one API surface's client, caches, and reconcilers
//!
//! A manager owns the watch caches of one API surface (virtual or physical),
//! runs the reconcilers registered on it, and tells callers when its caches
//! have completed their initial sync. Bring-up only uses the operations on
//! [`Manager`]; [`KubeManager`] is the kube-rs implementation.

mod background;
mod kube_manager;
pub(crate) mod runtime;

use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

pub use self::background::BackgroundManagers;
pub use self::kube_manager::{KubeManager, KubeManagerFactory};
use crate::Result;

/// Watch timeout (seconds); must stay below the client read timeout (30s)
pub(crate) const WATCH_TIMEOUT_SECS: u32 = 25;

/// A long-running controller driven by a manager
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Stable name used in logs and to reject duplicate registration
    fn name(&self) -> &str;

    /// Reconcile until `shutdown` is cancelled
    ///
    /// Returning an error stops the owning manager.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

/// One API surface as seen by bring-up
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Manager: Send + Sync {
    /// Name used in logs
    fn name(&self) -> String;

    /// Client bound to this surface
    fn client(&self) -> Client;

    /// Namespace the caches are scoped to (`None` = all namespaces)
    fn namespace(&self) -> Option<String>;

    /// Register a reconciler; started immediately if the manager is running
    fn add_reconciler(&self, reconciler: Arc<dyn Reconciler>) -> Result<()>;

    /// Run caches and reconcilers until `shutdown` is cancelled
    ///
    /// Blocks. Returns the first reconciler failure.
    async fn start(&self, shutdown: CancellationToken) -> Result<()>;

    /// Block until the caches completed their initial list
    ///
    /// Returns `false` if `shutdown` was cancelled first. There is no timeout.
    async fn wait_for_cache_sync(&self, shutdown: CancellationToken) -> bool;
}

/// Builds managers that share an existing manager's connection
#[cfg_attr(test, automock)]
pub trait ManagerFactory: Send + Sync {
    /// New manager on `base`'s surface with caches scoped to `namespace`
    /// (`None` = all namespaces)
    fn scoped(&self, base: &dyn Manager, namespace: Option<String>) -> Result<Arc<dyn Manager>>;
}

/// Start `manager` in the background and block until its caches are synced
///
/// The wait is unbounded. If it ends because a background manager failed,
/// that failure is returned; a plain root cancellation aborts it with
/// [`Error::Cancelled`](crate::Error::Cancelled).
pub async fn start_and_wait(
    background: &mut BackgroundManagers,
    manager: Arc<dyn Manager>,
) -> Result<()> {
    let name = manager.name();
    background.start(manager.clone());
    if !manager.wait_for_cache_sync(background.root()).await {
        if let Some(fatal) = background.take_fatal() {
            return Err(fatal);
        }
        return Err(crate::Error::cancelled(format!("{} cache sync", name)));
    }
    tracing::info!(manager = %name, "manager caches synced");
    Ok(())
}
