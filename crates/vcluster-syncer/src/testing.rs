//! In-memory managers and units for bring-up tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ApiResource, DynamicObject};
use kube::{Client, ResourceExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::context::{ControllerContext, RegisterContext, SyncContext};
use crate::manager::{Manager, ManagerFactory, Reconciler};
use crate::options::{EnabledControllers, NamespaceScope, SyncerOptions};
use crate::syncer::{FakeSyncer, IndicesRegisterer, Initializer, SyncAction, SyncUnit, Syncer};
use crate::{Error, Result};
use vcluster_common::NamespacedName;

/// Manager without an API server: records reconcilers and blocks in `start`
///
/// Its caches report synced only once `start` is running, the same ordering
/// a real manager has.
pub(crate) struct TestManager {
    name: String,
    namespace: Option<String>,
    start_error: Option<String>,
    synced: bool,
    started: AtomicBool,
    stopped: AtomicBool,
    running: watch::Sender<bool>,
    reconcilers: Mutex<Vec<String>>,
}

impl TestManager {
    pub(crate) fn new(name: &str) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            namespace: None,
            start_error: None,
            synced: true,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            running,
            reconcilers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn in_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub(crate) fn failing_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    pub(crate) fn never_synced(mut self) -> Self {
        self.synced = false;
        self
    }

    pub(crate) fn reconcilers(&self) -> Vec<String> {
        self.reconcilers.lock().unwrap().clone()
    }

    pub(crate) fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Manager for TestManager {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn client(&self) -> Client {
        panic!("test manager {} has no API server", self.name)
    }

    fn namespace(&self) -> Option<String> {
        self.namespace.clone()
    }

    fn add_reconciler(&self, reconciler: Arc<dyn Reconciler>) -> Result<()> {
        let mut reconcilers = self.reconcilers.lock().unwrap();
        let name = reconciler.name().to_string();
        if reconcilers.contains(&name) {
            return Err(Error::internal_with_context(
                "add_reconciler",
                format!("reconciler {} already registered on {}", name, self.name),
            ));
        }
        reconcilers.push(name);
        Ok(())
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        if let Some(message) = &self.start_error {
            return Err(Error::internal_with_context("watch", message.clone()));
        }
        self.running.send_replace(true);
        shutdown.cancelled().await;
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_cache_sync(&self, shutdown: CancellationToken) -> bool {
        if !self.synced {
            shutdown.cancelled().await;
            return false;
        }
        let mut running = self.running.subscribe();
        tokio::select! {
            _ = shutdown.cancelled() => false,
            synced = async { running.wait_for(|r| *r).await.is_ok() } => synced,
        }
    }
}

/// Factory handing out [`TestManager`]s and keeping them for inspection
#[derive(Default)]
pub(crate) struct TestFactory {
    never_synced: bool,
    created: Mutex<Vec<Arc<TestManager>>>,
}

impl TestFactory {
    /// Managers whose caches never finish syncing
    pub(crate) fn never_synced() -> Self {
        Self {
            never_synced: true,
            ..Default::default()
        }
    }

    pub(crate) fn created(&self) -> Vec<Arc<TestManager>> {
        self.created.lock().unwrap().clone()
    }
}

impl ManagerFactory for TestFactory {
    fn scoped(&self, base: &dyn Manager, namespace: Option<String>) -> Result<Arc<dyn Manager>> {
        let name = format!("{}/{}", base.name(), namespace.as_deref().unwrap_or("*"));
        let mut manager = TestManager::new(&name).in_namespace(namespace);
        if self.never_synced {
            manager = manager.never_synced();
        }
        let manager = Arc::new(manager);
        self.created.lock().unwrap().push(manager.clone());
        Ok(manager)
    }
}

/// Sync unit that records every sync call it receives
pub(crate) struct NamedUnit {
    name: String,
    fake: bool,
    real: bool,
    initializer: Option<Arc<dyn Initializer>>,
    indices: Option<Arc<dyn IndicesRegisterer>>,
    calls: Mutex<Vec<String>>,
}

impl NamedUnit {
    fn with_roles(name: &str, fake: bool, real: bool) -> Self {
        Self {
            name: name.to_string(),
            fake,
            real,
            initializer: None,
            indices: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn real(name: &str) -> Self {
        Self::with_roles(name, false, true)
    }

    pub(crate) fn fake(name: &str) -> Self {
        Self::with_roles(name, true, false)
    }

    pub(crate) fn both(name: &str) -> Self {
        Self::with_roles(name, true, true)
    }

    pub(crate) fn bare(name: &str) -> Self {
        Self::with_roles(name, false, false)
    }

    pub(crate) fn with_initializer(mut self, initializer: Arc<dyn Initializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub(crate) fn with_indices(mut self, indices: Arc<dyn IndicesRegisterer>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<SyncAction> {
        self.calls.lock().unwrap().push(call);
        Ok(SyncAction::Done)
    }
}

impl SyncUnit for NamedUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn initializer(self: Arc<Self>) -> Option<Arc<dyn Initializer>> {
        self.initializer.clone()
    }

    fn indices_registerer(&self) -> Option<&dyn IndicesRegisterer> {
        self.indices.as_deref()
    }

    fn fake_syncer(self: Arc<Self>) -> Option<Arc<dyn FakeSyncer>> {
        if self.fake {
            Some(self)
        } else {
            None
        }
    }

    fn syncer(self: Arc<Self>) -> Option<Arc<dyn Syncer>> {
        if self.real {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl Syncer for NamedUnit {
    fn resource(&self) -> ApiResource {
        ApiResource::erase::<ConfigMap>(&())
    }

    async fn sync_down(&self, _ctx: &SyncContext, virtual_obj: &DynamicObject) -> Result<SyncAction> {
        self.record(format!("down:{}", virtual_obj.name_any()))
    }

    async fn sync(
        &self,
        _ctx: &SyncContext,
        _physical: &DynamicObject,
        virtual_obj: &DynamicObject,
    ) -> Result<SyncAction> {
        self.record(format!("sync:{}", virtual_obj.name_any()))
    }

    async fn sync_up(&self, _ctx: &SyncContext, physical: &DynamicObject) -> Result<SyncAction> {
        self.record(format!("up:{}", physical.name_any()))
    }
}

#[async_trait]
impl FakeSyncer for NamedUnit {
    fn resource(&self) -> ApiResource {
        ApiResource::erase::<ConfigMap>(&())
    }

    async fn fake_sync_up(&self, _ctx: &SyncContext, key: &NamespacedName) -> Result<SyncAction> {
        self.record(format!("fake-up:{}", key))
    }

    async fn fake_sync(&self, _ctx: &SyncContext, virtual_obj: &DynamicObject) -> Result<SyncAction> {
        self.record(format!("fake-sync:{}", virtual_obj.name_any()))
    }
}

/// Sync context over in-memory managers
pub(crate) fn sync_context(target: &str, suffix: &str) -> SyncContext {
    SyncContext {
        virtual_manager: Arc::new(TestManager::new("virtual")),
        physical_manager: Arc::new(TestManager::new("physical").in_namespace(Some(target.to_string()))),
        target_namespace: target.to_string(),
        suffix: suffix.to_string(),
    }
}

/// Root context with `enabled` kinds; the syncer runs in `current`
pub(crate) fn controller_context(
    enabled: &[&str],
    options: SyncerOptions,
    current: &str,
) -> (ControllerContext, Arc<TestManager>, Arc<TestManager>) {
    let virtual_manager = Arc::new(TestManager::new("virtual"));
    let physical_manager = Arc::new(
        TestManager::new("physical").in_namespace(Some(options.target_namespace.clone())),
    );
    let namespaces = NamespaceScope {
        target: options.target_namespace.clone(),
        current: current.to_string(),
    };
    let ctx = ControllerContext {
        shutdown: CancellationToken::new(),
        options: Arc::new(options),
        controllers: Arc::new(EnabledControllers::from_names(enabled.iter().copied())),
        namespaces: Arc::new(namespaces),
        virtual_manager: virtual_manager.clone(),
        physical_manager: physical_manager.clone(),
    };
    (ctx, virtual_manager, physical_manager)
}

/// Registration snapshot for cluster `vc1` syncing into `vc-ns`
pub(crate) fn register_context(enabled: &[&str]) -> (RegisterContext, Arc<TestManager>, Arc<TestManager>) {
    let options = SyncerOptions {
        name: "vc1".to_string(),
        target_namespace: "vc-ns".to_string(),
        service_name: "vc1".to_string(),
        ..Default::default()
    };
    let (ctx, virtual_manager, physical_manager) = controller_context(enabled, options, "vc-ns");
    (ctx.register_context(), virtual_manager, physical_manager)
}
