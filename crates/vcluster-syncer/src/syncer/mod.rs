//! Sync unit capability model
//!
//! Every unit has a name. On top of that a unit may expose any subset of the
//! optional roles below through its accessor methods; the defaults report the
//! role as absent. Registration requires exactly one of [`FakeSyncer`] or
//! [`Syncer`], and `sync_role` makes that choice explicit so the
//! register phase can match on it exhaustively.

mod controller;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::controller::Action;
use kube::ResourceExt;

pub(crate) use self::controller::dynamic_api;
pub use self::controller::{register_fake_syncer, register_syncer, FakeSyncController, SyncController};
use crate::context::{RegisterContext, SyncContext};
use crate::Result;
use vcluster_common::names::physical_name;
use vcluster_common::{
    NamespacedName, MANAGED_BY_LABEL, OBJECT_NAMESPACE_ANNOTATION, OBJECT_NAME_ANNOTATION,
};

/// Outcome of a single reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Converged; wait for the next change
    Done,
    /// Reconcile the same object again after the delay
    RequeueAfter(Duration),
}

impl From<SyncAction> for Action {
    fn from(action: SyncAction) -> Self {
        match action {
            SyncAction::Done => Action::await_change(),
            SyncAction::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// A reconciliation component responsible for one resource kind
pub trait SyncUnit: Send + Sync {
    /// Stable name, usually the resource kind
    fn name(&self) -> &str;

    /// One-time setup run concurrently with other units before indexing
    fn initializer(self: Arc<Self>) -> Option<Arc<dyn Initializer>> {
        None
    }

    /// Registers cache indices before any reconciliation starts
    fn indices_registerer(&self) -> Option<&dyn IndicesRegisterer> {
        None
    }

    /// Synthesizes virtual objects without a physical counterpart
    fn fake_syncer(self: Arc<Self>) -> Option<Arc<dyn FakeSyncer>> {
        None
    }

    /// Reconciles virtual and physical representations both ways
    fn syncer(self: Arc<Self>) -> Option<Arc<dyn Syncer>> {
        None
    }
}

/// The sync role a unit is registered under
#[derive(Clone)]
pub enum SyncRole {
    /// Registered on the fake path
    Fake(Arc<dyn FakeSyncer>),
    /// Registered on the real path
    Real(Arc<dyn Syncer>),
}

impl dyn SyncUnit {
    /// Pick the registration role; a fake syncer wins over a real one
    pub fn sync_role(self: Arc<Self>) -> Option<SyncRole> {
        if let Some(fake) = self.clone().fake_syncer() {
            return Some(SyncRole::Fake(fake));
        }
        self.syncer().map(SyncRole::Real)
    }
}

/// One-time, concurrency-safe setup
#[async_trait]
pub trait Initializer: Send + Sync {
    /// Prepare prerequisites; should return early once `ctx.shutdown` is cancelled
    async fn init(&self, ctx: &RegisterContext) -> Result<()>;
}

/// Registers lookup indices against a manager's cache
#[async_trait]
pub trait IndicesRegisterer: Send + Sync {
    /// Register indices
    async fn register_indices(&self, ctx: &RegisterContext) -> Result<()>;
}

/// Bidirectional reconciliation of one resource kind
#[async_trait]
pub trait Syncer: Send + Sync {
    /// The synced resource
    fn resource(&self) -> ApiResource;

    /// Whether the resource is namespaced
    fn namespaced(&self) -> bool {
        true
    }

    /// Physical identity of a virtual object
    fn physical_name(&self, ctx: &SyncContext, key: &NamespacedName) -> NamespacedName {
        NamespacedName::new(
            ctx.target_namespace.clone(),
            physical_name(&key.name, &key.namespace, &ctx.suffix),
        )
    }

    /// Virtual identity of a physical object, `None` if it isn't one of ours
    fn virtual_name(&self, _ctx: &SyncContext, physical: &DynamicObject) -> Option<NamespacedName> {
        let annotations = physical.annotations();
        Some(NamespacedName::new(
            annotations.get(OBJECT_NAMESPACE_ANNOTATION)?.clone(),
            annotations.get(OBJECT_NAME_ANNOTATION)?.clone(),
        ))
    }

    /// Virtual object exists, physical does not
    async fn sync_down(&self, ctx: &SyncContext, virtual_obj: &DynamicObject) -> Result<SyncAction>;

    /// Both exist
    async fn sync(
        &self,
        ctx: &SyncContext,
        physical: &DynamicObject,
        virtual_obj: &DynamicObject,
    ) -> Result<SyncAction>;

    /// Physical object exists, virtual does not
    async fn sync_up(&self, ctx: &SyncContext, physical: &DynamicObject) -> Result<SyncAction>;
}

/// Virtual-only synthesis of one resource kind
#[async_trait]
pub trait FakeSyncer: Send + Sync {
    /// The synthesized resource
    fn resource(&self) -> ApiResource;

    /// The virtual object is missing; create it if it is still needed
    async fn fake_sync_up(&self, ctx: &SyncContext, key: &NamespacedName) -> Result<SyncAction>;

    /// The virtual object exists; update or remove it
    async fn fake_sync(&self, ctx: &SyncContext, virtual_obj: &DynamicObject) -> Result<SyncAction>;
}

/// Metadata of the physical copy of `virtual_obj`
///
/// Carries the translated name, the origin annotations, and the managed-by
/// label. Virtual labels are copied; annotations are not.
pub fn translate_meta(
    ctx: &SyncContext,
    physical: &NamespacedName,
    virtual_obj: &DynamicObject,
) -> ObjectMeta {
    let mut labels: BTreeMap<String, String> = virtual_obj.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), ctx.suffix.clone());

    let mut annotations = BTreeMap::new();
    annotations.insert(OBJECT_NAME_ANNOTATION.to_string(), virtual_obj.name_any());
    annotations.insert(
        OBJECT_NAMESPACE_ANNOTATION.to_string(),
        virtual_obj.namespace().unwrap_or_default(),
    );

    ObjectMeta {
        name: Some(physical.name.clone()),
        namespace: Some(physical.namespace.clone()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    }
}
