//! Bring-up contexts
//!
//! [`ControllerContext`] is what the binary hands to the orchestrator. Every
//! constructor and phase call receives a [`RegisterContext`] snapshot derived
//! from it; the snapshot shares the same option, enabled-set and namespace
//! instances, so all units observe identical configuration.

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::manager::Manager;
use crate::options::{EnabledControllers, NamespaceScope, SyncerOptions};

/// Root context owned by the orchestrator for the duration of bring-up
pub struct ControllerContext {
    /// Root cancellation token; cancelling it tears down every manager
    pub shutdown: CancellationToken,
    /// Syncer options
    pub options: Arc<SyncerOptions>,
    /// Enabled resource kinds
    pub controllers: Arc<EnabledControllers>,
    /// Target and current namespace
    pub namespaces: Arc<NamespaceScope>,
    /// Manager of the virtual API surface
    pub virtual_manager: Arc<dyn Manager>,
    /// Manager of the physical API surface, scoped to the target namespace
    pub physical_manager: Arc<dyn Manager>,
}

impl ControllerContext {
    /// Snapshot handed to constructors and phase calls
    pub fn register_context(&self) -> RegisterContext {
        RegisterContext {
            shutdown: self.shutdown.clone(),
            options: self.options.clone(),
            controllers: self.controllers.clone(),
            namespaces: self.namespaces.clone(),
            virtual_manager: self.virtual_manager.clone(),
            physical_manager: self.physical_manager.clone(),
        }
    }
}

/// Immutable snapshot passed to every constructor and phase call
///
/// Cloning shares the underlying configuration; units must not derive mutable
/// state from it beyond their own fields.
#[derive(Clone)]
pub struct RegisterContext {
    /// Cancellation for the current phase (a child token during initialize)
    pub shutdown: CancellationToken,
    /// Syncer options
    pub options: Arc<SyncerOptions>,
    /// Enabled resource kinds
    pub controllers: Arc<EnabledControllers>,
    /// Target and current namespace
    pub namespaces: Arc<NamespaceScope>,
    /// Manager of the virtual API surface
    pub virtual_manager: Arc<dyn Manager>,
    /// Manager of the physical API surface
    pub physical_manager: Arc<dyn Manager>,
}

impl RegisterContext {
    /// Same snapshot bound to a different cancellation token
    pub fn with_shutdown(&self, shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            ..self.clone()
        }
    }

    /// Surfaces and naming inputs used by reconcilers
    pub fn sync_context(&self) -> SyncContext {
        SyncContext {
            virtual_manager: self.virtual_manager.clone(),
            physical_manager: self.physical_manager.clone(),
            target_namespace: self.namespaces.target.clone(),
            suffix: self.options.name.clone(),
        }
    }
}

/// What a sync unit needs while reconciling a single object
#[derive(Clone)]
pub struct SyncContext {
    /// Manager of the virtual API surface
    pub virtual_manager: Arc<dyn Manager>,
    /// Manager of the physical API surface
    pub physical_manager: Arc<dyn Manager>,
    /// Physical namespace that receives synced objects
    pub target_namespace: String,
    /// Virtual cluster name appended to translated physical names
    pub suffix: String,
}

impl SyncContext {
    /// Client of the virtual API surface
    pub fn virtual_client(&self) -> Client {
        self.virtual_manager.client()
    }

    /// Client of the physical API surface
    pub fn physical_client(&self) -> Client {
        self.physical_manager.client()
    }
}
