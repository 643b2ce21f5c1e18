//! Generic registration paths for sync units
//!
//! A real syncer runs two kube-rs controllers. One is keyed by the virtual
//! object and handles everything that exists virtually; the other is keyed
//! by the physical object and only handles physical objects whose virtual
//! counterpart is gone. Each is triggered by changes on the other surface.
//! A fake syncer runs one controller on the virtual surface. All of them are
//! added to the virtual manager and run as its reconcilers.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{FakeSyncer, SyncAction, Syncer};
use crate::context::{RegisterContext, SyncContext};
use crate::manager::runtime::{drive, error_policy, ignore_missing, object_key, object_ref};
use crate::manager::{Reconciler, WATCH_TIMEOUT_SECS};
use crate::Result;
use vcluster_common::{NamespacedName, MANAGED_BY_LABEL};

/// Dynamic API for `ar`, namespaced when `namespace` is given
pub(crate) fn dynamic_api(
    client: Client,
    ar: &ApiResource,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, ar),
        None => Api::all_with(client, ar),
    }
}

/// Route one key to the matching syncer call
pub(crate) async fn dispatch(
    unit: &dyn Syncer,
    ctx: &SyncContext,
    virtual_obj: Option<DynamicObject>,
    physical: Option<DynamicObject>,
) -> Result<SyncAction> {
    match (virtual_obj, physical) {
        (Some(v), None) => unit.sync_down(ctx, &v).await,
        (Some(v), Some(p)) => unit.sync(ctx, &p, &v).await,
        (None, Some(p)) => unit.sync_up(ctx, &p).await,
        (None, None) => Ok(SyncAction::Done),
    }
}

/// Bidirectional controller for a real syncer
#[derive(Clone)]
pub struct SyncController {
    name: String,
    unit: Arc<dyn Syncer>,
    ctx: SyncContext,
}

impl SyncController {
    /// Create a controller for `unit`
    pub fn new(name: impl Into<String>, unit: Arc<dyn Syncer>, ctx: SyncContext) -> Self {
        Self {
            name: name.into(),
            unit,
            ctx,
        }
    }

    /// Physical identity of a virtual key, without namespace for cluster-scoped kinds
    fn physical_key(&self, key: &NamespacedName) -> NamespacedName {
        let mut physical = self.unit.physical_name(&self.ctx, key);
        if !self.unit.namespaced() {
            physical.namespace.clear();
        }
        physical
    }

    /// Trigger for the virtual object paired with `physical`, if it names one
    fn virtual_ref(&self, physical: &DynamicObject) -> Option<ObjectRef<DynamicObject>> {
        let key = self.unit.virtual_name(&self.ctx, physical)?;
        Some(object_ref(&self.unit.resource(), &key))
    }

    /// Trigger for the physical object paired with `virtual_obj`
    fn physical_ref(&self, virtual_obj: &DynamicObject) -> ObjectRef<DynamicObject> {
        let key = self.physical_key(&object_key(virtual_obj));
        object_ref(&self.unit.resource(), &key)
    }

    fn virtual_api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        dynamic_api(self.ctx.virtual_client(), &self.unit.resource(), namespace)
    }

    fn physical_api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        dynamic_api(self.ctx.physical_client(), &self.unit.resource(), namespace)
    }

    fn namespace_of<'a>(&self, key: &'a NamespacedName) -> Option<&'a str> {
        self.unit.namespaced().then_some(key.namespace.as_str())
    }

    /// The virtual object exists: pair it with its physical counterpart
    #[instrument(skip(self, virtual_obj), fields(controller = %self.name))]
    async fn reconcile_virtual(&self, virtual_obj: &DynamicObject) -> Result<SyncAction> {
        let physical_key = self.physical_key(&object_key(virtual_obj));
        let physical = self
            .physical_api(self.namespace_of(&physical_key))
            .get_opt(&physical_key.name)
            .await?;
        dispatch(self.unit.as_ref(), &self.ctx, Some(virtual_obj.clone()), physical).await
    }

    /// The physical object exists: act only if its virtual counterpart is gone
    #[instrument(skip(self, physical), fields(controller = %self.name))]
    async fn reconcile_physical(&self, physical: &DynamicObject) -> Result<SyncAction> {
        let Some(key) = self.unit.virtual_name(&self.ctx, physical) else {
            return Ok(SyncAction::Done);
        };
        let virtual_obj = self
            .virtual_api(self.namespace_of(&key))
            .get_opt(&key.name)
            .await?;
        if virtual_obj.is_some() {
            return Ok(SyncAction::Done);
        }
        dispatch(self.unit.as_ref(), &self.ctx, None, Some(physical.clone())).await
    }
}

async fn reconcile_virtual(obj: Arc<DynamicObject>, ctx: Arc<SyncController>) -> Result<Action> {
    Ok(ctx.reconcile_virtual(&obj).await?.into())
}

async fn reconcile_physical(obj: Arc<DynamicObject>, ctx: Arc<SyncController>) -> Result<Action> {
    Ok(ctx.reconcile_physical(&obj).await?.into())
}

#[async_trait]
impl Reconciler for SyncController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let ar = self.unit.resource();
        let virtual_config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let physical_config = virtual_config
            .clone()
            .labels(&format!("{}={}", MANAGED_BY_LABEL, self.ctx.suffix));
        let physical_ns = self
            .unit
            .namespaced()
            .then_some(self.ctx.target_namespace.as_str());
        let state = Arc::new(self.clone());

        let to_virtual = state.clone();
        let virtual_side = Controller::new_with(self.virtual_api(None), virtual_config.clone(), ar.clone())
            .watches_with(
                self.physical_api(physical_ns),
                ar.clone(),
                physical_config.clone(),
                move |physical| to_virtual.virtual_ref(&physical),
            )
            .graceful_shutdown_on(shutdown.clone().cancelled_owned())
            .run(reconcile_virtual, error_policy, state.clone());

        let to_physical = state.clone();
        let physical_side = Controller::new_with(self.physical_api(physical_ns), physical_config, ar.clone())
            .watches_with(
                self.virtual_api(None),
                ar,
                virtual_config,
                move |virtual_obj| Some(to_physical.physical_ref(&virtual_obj)),
            )
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile_physical, error_policy, state);

        let physical_name = format!("{}-physical", self.name);
        tokio::join!(
            drive(&self.name, virtual_side, ignore_missing),
            drive(&physical_name, physical_side, ignore_missing),
        );
        Ok(())
    }
}

/// Virtual-only controller for a fake syncer
#[derive(Clone)]
pub struct FakeSyncController {
    name: String,
    unit: Arc<dyn FakeSyncer>,
    ctx: SyncContext,
}

impl FakeSyncController {
    /// Create a controller for `unit`
    pub fn new(name: impl Into<String>, unit: Arc<dyn FakeSyncer>, ctx: SyncContext) -> Self {
        Self {
            name: name.into(),
            unit,
            ctx,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        dynamic_api(self.ctx.virtual_client(), &self.unit.resource(), namespace)
    }

    /// Reconcile `key` against live virtual state
    #[instrument(skip(self), fields(controller = %self.name))]
    async fn reconcile_key(&self, key: &NamespacedName) -> Result<SyncAction> {
        let namespace = (!key.namespace.is_empty()).then_some(key.namespace.as_str());
        match self.api(namespace).get_opt(&key.name).await? {
            Some(obj) => self.unit.fake_sync(&self.ctx, &obj).await,
            None => self.unit.fake_sync_up(&self.ctx, key).await,
        }
    }
}

async fn reconcile_fake(obj: Arc<DynamicObject>, ctx: Arc<FakeSyncController>) -> Result<Action> {
    Ok(ctx.unit.fake_sync(&ctx.ctx, &obj).await?.into())
}

#[async_trait]
impl Reconciler for FakeSyncController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let ar = self.unit.resource();
        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let state = Arc::new(self.clone());

        // The main watch only triggers on applied objects; the second one
        // also reports deletions, which come back as missing keys.
        let trigger_ar = ar.clone();
        let results = Controller::new_with(self.api(None), config.clone(), ar.clone())
            .watches_with(self.api(None), ar, config, move |obj| {
                Some(object_ref(&trigger_ar, &object_key(&obj)))
            })
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile_fake, error_policy, state.clone());

        drive(&self.name, results, |key| {
            let state = state.clone();
            async move { state.reconcile_key(&key).await.map(|_| ()) }
        })
        .await;
        Ok(())
    }
}

/// Real registration path: reconcile `unit` between both surfaces
pub fn register_syncer(ctx: &RegisterContext, name: &str, unit: Arc<dyn Syncer>) -> Result<()> {
    let controller = SyncController::new(name, unit, ctx.sync_context());
    ctx.virtual_manager.add_reconciler(Arc::new(controller))?;
    info!(unit = %name, "registered sync controller");
    Ok(())
}

/// Fake registration path: no physical watch is established
pub fn register_fake_syncer(
    ctx: &RegisterContext,
    name: &str,
    unit: Arc<dyn FakeSyncer>,
) -> Result<()> {
    let controller = FakeSyncController::new(name, unit, ctx.sync_context());
    ctx.virtual_manager.add_reconciler(Arc::new(controller))?;
    info!(unit = %name, "registered fake sync controller");
    Ok(())
}
