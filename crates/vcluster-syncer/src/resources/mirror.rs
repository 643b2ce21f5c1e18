//! Data-carrying objects mirrored into the physical target namespace
//!
//! ConfigMaps and Secrets are copied field by field under their translated
//! names. Physical copies whose virtual object is gone are deleted.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ApiResource, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::context::SyncContext;
use crate::syncer::{dynamic_api, translate_meta, SyncAction, SyncUnit, Syncer};
use crate::Result;
use vcluster_common::{NamespacedName, FIELD_MANAGER, MANAGED_BY_LABEL};

/// Real-sync unit copying selected top-level fields
pub struct MirrorSyncer {
    name: &'static str,
    resource: ApiResource,
    fields: &'static [&'static str],
    ignored: &'static [&'static str],
}

impl MirrorSyncer {
    /// Mirror ConfigMaps (`data`, `binaryData`)
    ///
    /// `kube-root-ca.crt` is published by the physical cluster itself.
    pub fn config_maps() -> Self {
        Self {
            name: "configmaps",
            resource: ApiResource::erase::<ConfigMap>(&()),
            fields: &["data", "binaryData"],
            ignored: &["kube-root-ca.crt"],
        }
    }

    /// Mirror Secrets (`data`, `type`)
    pub fn secrets() -> Self {
        Self {
            name: "secrets",
            resource: ApiResource::erase::<Secret>(&()),
            fields: &["data", "type"],
            ignored: &[],
        }
    }

    fn is_ignored(&self, obj: &DynamicObject) -> bool {
        self.ignored.contains(&obj.name_any().as_str())
    }

    /// Desired physical copy of `virtual_obj`
    pub fn build_physical(
        &self,
        ctx: &SyncContext,
        physical: &NamespacedName,
        virtual_obj: &DynamicObject,
    ) -> DynamicObject {
        let mut obj = DynamicObject::new(&physical.name, &self.resource);
        obj.metadata = translate_meta(ctx, physical, virtual_obj);
        for field in self.fields {
            if let Some(value) = virtual_obj.data.get(field) {
                obj.data[*field] = value.clone();
            }
        }
        obj
    }

    /// Whether `physical` differs from `desired` in a mirrored field or label
    pub fn drifted(&self, physical: &DynamicObject, desired: &DynamicObject) -> bool {
        let field = |obj: &DynamicObject, name: &str| obj.data.get(name).cloned().unwrap_or(Value::Null);
        self.fields
            .iter()
            .any(|f| field(physical, f) != field(desired, f))
            || physical.labels() != desired.labels()
    }

    async fn apply(&self, ctx: &SyncContext, desired: &DynamicObject) -> Result<()> {
        let api = dynamic_api(
            ctx.physical_client(),
            &self.resource,
            desired.metadata.namespace.as_deref(),
        );
        api.patch(
            &desired.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(desired),
        )
        .await?;
        Ok(())
    }
}

impl SyncUnit for MirrorSyncer {
    fn name(&self) -> &str {
        self.name
    }

    fn syncer(self: Arc<Self>) -> Option<Arc<dyn Syncer>> {
        Some(self)
    }
}

#[async_trait]
impl Syncer for MirrorSyncer {
    fn resource(&self) -> ApiResource {
        self.resource.clone()
    }

    async fn sync_down(&self, ctx: &SyncContext, virtual_obj: &DynamicObject) -> Result<SyncAction> {
        if self.is_ignored(virtual_obj) {
            return Ok(SyncAction::Done);
        }
        let key = NamespacedName::new(virtual_obj.namespace().unwrap_or_default(), virtual_obj.name_any());
        let physical = self.physical_name(ctx, &key);
        let desired = self.build_physical(ctx, &physical, virtual_obj);
        self.apply(ctx, &desired).await?;
        info!(kind = self.name, virtual_obj = %key, physical = %physical, "created physical copy");
        Ok(SyncAction::Done)
    }

    async fn sync(
        &self,
        ctx: &SyncContext,
        physical: &DynamicObject,
        virtual_obj: &DynamicObject,
    ) -> Result<SyncAction> {
        if self.is_ignored(virtual_obj) {
            return Ok(SyncAction::Done);
        }
        let key = NamespacedName::new(
            physical.namespace().unwrap_or_default(),
            physical.name_any(),
        );
        let desired = self.build_physical(ctx, &key, virtual_obj);
        if self.drifted(physical, &desired) {
            self.apply(ctx, &desired).await?;
            debug!(kind = self.name, physical = %key, "updated physical copy");
        }
        Ok(SyncAction::Done)
    }

    async fn sync_up(&self, ctx: &SyncContext, physical: &DynamicObject) -> Result<SyncAction> {
        // Only delete copies this virtual cluster owns
        if physical.labels().get(MANAGED_BY_LABEL) != Some(&ctx.suffix) {
            return Ok(SyncAction::Done);
        }
        let api = dynamic_api(
            ctx.physical_client(),
            &self.resource,
            physical.metadata.namespace.as_deref(),
        );
        match api.delete(&physical.name_any(), &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
        info!(kind = self.name, physical = %physical.name_any(), "deleted orphaned physical copy");
        Ok(SyncAction::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sync_context;
    use serde_json::json;

    fn virtual_config_map(data: Value) -> DynamicObject {
        let ar = ApiResource::erase::<ConfigMap>(&());
        let mut obj = DynamicObject::new("app-config", &ar).within("team-a");
        obj.data = json!({ "data": data });
        obj
    }

    #[test]
    fn physical_copy_carries_data_and_translated_identity() {
        let unit = MirrorSyncer::config_maps();
        let ctx = sync_context("vc-ns", "vc1");
        let v = virtual_config_map(json!({ "key": "value" }));
        let key = NamespacedName::new("team-a", "app-config");

        let physical = unit.physical_name(&ctx, &key);
        let obj = unit.build_physical(&ctx, &physical, &v);

        assert_eq!(obj.name_any(), "app-config-x-team-a-x-vc1");
        assert_eq!(obj.namespace().as_deref(), Some("vc-ns"));
        assert_eq!(obj.data["data"]["key"], "value");
        assert!(obj.data.get("binaryData").is_none());
        assert_eq!(obj.types.as_ref().map(|t| t.kind.as_str()), Some("ConfigMap"));
        assert_eq!(unit.virtual_name(&ctx, &obj), Some(key));
    }

    #[test]
    fn drift_is_detected_on_mirrored_fields_only() {
        let unit = MirrorSyncer::config_maps();
        let ctx = sync_context("vc-ns", "vc1");
        let physical = NamespacedName::new("vc-ns", "app-config-x-team-a-x-vc1");

        let current = unit.build_physical(&ctx, &physical, &virtual_config_map(json!({ "key": "old" })));
        let desired = unit.build_physical(&ctx, &physical, &virtual_config_map(json!({ "key": "new" })));
        assert!(unit.drifted(&current, &desired));
        assert!(!unit.drifted(&desired, &desired.clone()));

        let mut with_status = desired.clone();
        with_status.data["unrelated"] = json!("ignored");
        assert!(!unit.drifted(&with_status, &desired));
    }

    #[test]
    fn secrets_mirror_their_type() {
        let unit = MirrorSyncer::secrets();
        let ctx = sync_context("vc-ns", "vc1");
        let ar = ApiResource::erase::<Secret>(&());
        let mut v = DynamicObject::new("creds", &ar).within("team-a");
        v.data = json!({ "type": "Opaque", "data": { "password": "aHVudGVyMg==" } });

        let physical = unit.physical_name(&ctx, &NamespacedName::new("team-a", "creds"));
        let obj = unit.build_physical(&ctx, &physical, &v);
        assert_eq!(obj.data["type"], "Opaque");
        assert_eq!(obj.data["data"]["password"], "aHVudGVyMg==");
    }

    #[test]
    fn mirror_units_register_as_real_syncers() {
        let unit: Arc<dyn SyncUnit> = Arc::new(MirrorSyncer::secrets());
        assert_eq!(unit.name(), "secrets");
        assert!(matches!(unit.sync_role(), Some(crate::syncer::SyncRole::Real(_))));
    }
}
