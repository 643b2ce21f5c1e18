//! Managers running as background tasks
//!
//! A manager that stops with an error leaves the syncer with caches that no
//! longer move, so the failure is fatal to the process. It is reported on a
//! channel and the root token is cancelled; nothing is restarted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::Manager;
use crate::{Error, Result};

/// Background manager tasks bound to one root cancellation token
pub struct BackgroundManagers {
    root: CancellationToken,
    tasks: JoinSet<()>,
    fatal_tx: mpsc::UnboundedSender<Error>,
    fatal_rx: mpsc::UnboundedReceiver<Error>,
}

impl BackgroundManagers {
    /// Create an empty set bound to `root`
    pub fn new(root: CancellationToken) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            root,
            tasks: JoinSet::new(),
            fatal_tx,
            fatal_rx,
        }
    }

    /// The root token every manager runs under
    pub fn root(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Number of managers started
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no manager has been started
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start `manager` on a child of the root token
    pub fn start(&mut self, manager: Arc<dyn Manager>) {
        let token = self.root.child_token();
        let root = self.root.clone();
        let fatal_tx = self.fatal_tx.clone();

        self.tasks.spawn(async move {
            let name = manager.name();
            info!(manager = %name, "starting manager");
            match manager.start(token).await {
                Ok(()) => info!(manager = %name, "manager stopped"),
                Err(e) => {
                    error!(manager = %name, error = %e, "manager failed, shutting down");
                    let _ = fatal_tx.send(Error::manager(name, e));
                    root.cancel();
                }
            }
        });
    }

    /// Failure reported by a manager that already stopped, if any
    ///
    /// A failing manager reports before it cancels the root token, so after
    /// observing the cancellation the failure is already here.
    pub fn take_fatal(&mut self) -> Option<Error> {
        self.fatal_rx.try_recv().ok()
    }

    /// Wait until shutdown or the first manager failure
    ///
    /// Every manager task has finished when this returns.
    pub async fn wait(mut self) -> Result<()> {
        let fatal = tokio::select! {
            Some(err) = self.fatal_rx.recv() => Some(err),
            _ = self.root.cancelled() => None,
        };
        self.root.cancel();
        while self.tasks.join_next().await.is_some() {}

        match fatal.or_else(|| self.fatal_rx.try_recv().ok()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
