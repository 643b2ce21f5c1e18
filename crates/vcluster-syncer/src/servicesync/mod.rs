//! Service projection between two API surfaces
//!
//! For every entry of a [`MappingTable`], a `ClusterIP` service on the
//! destination surface mirrors the ports of the source service. Destinations
//! carry the controlled-by label; objects without it are never modified or
//! deleted. With endpoint creation the destination has no selector and its
//! Endpoints are copied from the source instead.

mod surface;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use self::surface::{KubeSurface, ServiceSurface};
#[cfg(test)]
pub use self::surface::MockServiceSurface;
use crate::manager::runtime::{drive, error_policy, object_key};
use crate::manager::{Manager, Reconciler, WATCH_TIMEOUT_SECS};
use crate::mapping::MappingTable;
use crate::syncer::SyncAction;
use crate::Result;
use vcluster_common::{NamespacedName, CONTROLLED_BY_LABEL, CONTROLLED_BY_VALUE};

/// What a projection may create on the destination surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// Create missing destination namespaces
    pub create_namespace: bool,
    /// Copy Endpoints instead of the selector
    pub create_endpoints: bool,
}

/// Projection controller for one mapping table
pub struct ServiceSyncer {
    name: String,
    mapping: MappingTable,
    from: Arc<dyn Manager>,
    to: Arc<dyn Manager>,
    options: ProjectionOptions,
}

impl ServiceSyncer {
    /// Project `mapping` from `from` to `to`
    pub fn new(
        name: impl Into<String>,
        mapping: MappingTable,
        from: Arc<dyn Manager>,
        to: Arc<dyn Manager>,
    ) -> Self {
        Self {
            name: name.into(),
            mapping,
            from,
            to,
            options: ProjectionOptions::default(),
        }
    }

    /// Create destination namespaces that don't exist yet
    pub fn create_namespace(mut self, enabled: bool) -> Self {
        self.options.create_namespace = enabled;
        self
    }

    /// Copy endpoints to the destination
    pub fn create_endpoints(mut self, enabled: bool) -> Self {
        self.options.create_endpoints = enabled;
        self
    }

    /// The projected entries
    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    /// Enabled projection options
    pub fn options(&self) -> ProjectionOptions {
        self.options
    }

    /// Add the controller to the source surface's manager
    pub fn register(self) -> Result<Arc<Self>> {
        let syncer = Arc::new(self);
        syncer.from.add_reconciler(syncer.clone())?;
        info!(
            controller = %syncer.name,
            entries = syncer.mapping.len(),
            "registered service projection"
        );
        Ok(syncer)
    }
}

/// Api for `K` on a surface, scoped like its manager
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn service_ref(key: &NamespacedName) -> ObjectRef<Service> {
    ObjectRef::new(&key.name).within(&key.namespace)
}

/// Maps objects on the source surface to the mapped source service
fn source_trigger<K: ResourceExt + 'static>(
    mapping: Arc<MappingTable>,
) -> impl Fn(K) -> Option<ObjectRef<Service>> + Send + Sync + 'static {
    move |obj| {
        let key = object_key(&obj);
        mapping.contains_key(&key).then(|| service_ref(&key))
    }
}

/// Maps objects on the destination surface back to their source service
fn destination_trigger<K: ResourceExt + 'static>(
    reverse: Arc<HashMap<NamespacedName, NamespacedName>>,
) -> impl Fn(K) -> Option<ObjectRef<Service>> + Send + Sync + 'static {
    move |obj| reverse.get(&object_key(&obj)).map(service_ref)
}

async fn reconcile(service: Arc<Service>, projector: Arc<Projector>) -> Result<Action> {
    Ok(projector.reconcile_key(&object_key(service.as_ref())).await?.into())
}

#[async_trait]
impl Reconciler for ServiceSyncer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let from_client = self.from.client();
        let to_client = self.to.client();
        let from_ns = self.from.namespace();
        let to_ns = self.to.namespace();
        let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

        let projector = Arc::new(Projector::new(
            self.name.clone(),
            self.mapping.clone(),
            Arc::new(KubeSurface::new(from_client.clone())),
            Arc::new(KubeSurface::new(to_client.clone())),
            self.options,
        ));
        let sources = Arc::new(self.mapping.clone());
        let reverse: Arc<HashMap<NamespacedName, NamespacedName>> = Arc::new(
            self.mapping
                .iter()
                .map(|(source, dest)| (dest.clone(), source.clone()))
                .collect(),
        );

        // Source deletions never reach the main watch, so a second watch on
        // the source services reports them as missing keys.
        let mut controller = Controller::new(
            scoped_api::<Service>(from_client.clone(), from_ns.as_deref()),
            config.clone(),
        )
        .watches(
            scoped_api::<Service>(from_client.clone(), from_ns.as_deref()),
            config.clone(),
            source_trigger(sources.clone()),
        )
        .watches(
            scoped_api::<Service>(to_client.clone(), to_ns.as_deref()),
            config.clone(),
            destination_trigger(reverse.clone()),
        );
        if self.options.create_endpoints {
            controller = controller
                .watches(
                    scoped_api::<Endpoints>(from_client, from_ns.as_deref()),
                    config.clone(),
                    source_trigger(sources),
                )
                .watches(
                    scoped_api::<Endpoints>(to_client, to_ns.as_deref()),
                    config,
                    destination_trigger(reverse),
                );
        }

        let results = controller
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, projector.clone());
        drive(&self.name, results, |key| {
            let projector = projector.clone();
            async move { projector.reconcile_key(&key).await.map(|_| ()) }
        })
        .await;
        Ok(())
    }
}

/// Reconciles mapping entries keyed by source identity
struct Projector {
    name: String,
    mapping: MappingTable,
    from: Arc<dyn ServiceSurface>,
    to: Arc<dyn ServiceSurface>,
    options: ProjectionOptions,
}

impl Projector {
    fn new(
        name: String,
        mapping: MappingTable,
        from: Arc<dyn ServiceSurface>,
        to: Arc<dyn ServiceSurface>,
        options: ProjectionOptions,
    ) -> Self {
        Self {
            name,
            mapping,
            from,
            to,
            options,
        }
    }

    /// Reconcile the entry whose source is `key`; other keys are ignored
    #[instrument(skip(self), fields(controller = %self.name))]
    async fn reconcile_key(&self, key: &NamespacedName) -> Result<SyncAction> {
        let Some(dest) = self.mapping.get(key) else {
            return Ok(SyncAction::Done);
        };
        reconcile_entry(self.from.as_ref(), self.to.as_ref(), key, dest, self.options).await
    }
}

fn is_controlled(meta: &ObjectMeta) -> bool {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(CONTROLLED_BY_LABEL))
        .is_some_and(|v| v == CONTROLLED_BY_VALUE)
}

fn controlled_meta(dest: &NamespacedName) -> ObjectMeta {
    ObjectMeta {
        name: Some(dest.name.clone()),
        namespace: Some(dest.namespace.clone()),
        labels: Some(BTreeMap::from([(
            CONTROLLED_BY_LABEL.to_string(),
            CONTROLLED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

/// Destination service mirroring `source`
pub fn projected_service(source: &Service, dest: &NamespacedName, create_endpoints: bool) -> Service {
    let spec = source.spec.as_ref();
    let ports = spec.and_then(|s| s.ports.clone()).map(|ports| {
        ports
            .into_iter()
            .map(|port| ServicePort {
                node_port: None,
                ..port
            })
            .collect::<Vec<_>>()
    });
    let selector = if create_endpoints {
        None
    } else {
        spec.and_then(|s| s.selector.clone())
    };

    Service {
        metadata: controlled_meta(dest),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports,
            selector,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Destination endpoints mirroring `source`
///
/// Target references point at objects of the source surface and are dropped.
pub fn projected_endpoints(source: Option<&Endpoints>, dest: &NamespacedName) -> Endpoints {
    let subsets = source.and_then(|eps| eps.subsets.clone()).map(|subsets| {
        subsets
            .into_iter()
            .map(|subset| EndpointSubset {
                addresses: subset.addresses.map(|addrs| {
                    addrs
                        .into_iter()
                        .map(|mut addr| {
                            addr.target_ref = None;
                            addr
                        })
                        .collect()
                }),
                not_ready_addresses: subset.not_ready_addresses.map(|addrs| {
                    addrs
                        .into_iter()
                        .map(|mut addr| {
                            addr.target_ref = None;
                            addr
                        })
                        .collect()
                }),
                ports: subset.ports,
            })
            .collect::<Vec<_>>()
    });

    Endpoints {
        metadata: controlled_meta(dest),
        subsets,
    }
}

fn service_matches(existing: &Service, desired: &Service) -> bool {
    let spec = |s: &Service| {
        s.spec
            .as_ref()
            .map(|spec| (spec.ports.clone(), spec.selector.clone(), spec.type_.clone()))
    };
    is_controlled(&existing.metadata) && spec(existing) == spec(desired)
}

/// Bring the destination of one mapping entry in line with its source
pub(crate) async fn reconcile_entry(
    from: &dyn ServiceSurface,
    to: &dyn ServiceSurface,
    source: &NamespacedName,
    dest: &NamespacedName,
    options: ProjectionOptions,
) -> Result<SyncAction> {
    let existing = to.get_service(dest).await?;
    if let Some(existing) = &existing {
        if !is_controlled(&existing.metadata) {
            warn!(source = %source, dest = %dest, "destination service exists and is not projected, skipping");
            return Ok(SyncAction::Done);
        }
    }

    let Some(source_service) = from.get_service(source).await? else {
        if existing.is_some() {
            info!(source = %source, dest = %dest, "source service gone, deleting projection");
            to.delete_service(dest).await?;
            if options.create_endpoints {
                to.delete_endpoints(dest).await?;
            }
        }
        return Ok(SyncAction::Done);
    };

    if existing.is_none() && options.create_namespace {
        to.ensure_namespace(&dest.namespace).await?;
    }

    let desired = projected_service(&source_service, dest, options.create_endpoints);
    if !existing.is_some_and(|e| service_matches(&e, &desired)) {
        to.apply_service(&desired).await?;
    }

    if options.create_endpoints {
        let source_endpoints = from.get_endpoints(source).await?;
        let desired = projected_endpoints(source_endpoints.as_ref(), dest);
        let current = to.get_endpoints(dest).await?;
        if !current.is_some_and(|c| is_controlled(&c.metadata) && c.subsets == desired.subsets) {
            to.apply_endpoints(&desired).await?;
        }
    }

    Ok(SyncAction::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, ObjectReference};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use mockall::predicate::eq;

    fn source_service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc1".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                selector: Some(BTreeMap::from([("app".to_string(), "db".to_string())])),
                ports: Some(vec![ServicePort {
                    name: Some("pg".to_string()),
                    port: 5432,
                    node_port: Some(30432),
                    target_port: Some(IntOrString::Int(5432)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn source_endpoints() -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("svc1".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.7".to_string(),
                    target_ref: Some(ObjectReference {
                        kind: Some("Pod".to_string()),
                        name: Some("db-0".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    port: 5432,
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        }
    }

    fn source() -> NamespacedName {
        NamespacedName::new("default", "svc1")
    }

    fn dest() -> NamespacedName {
        NamespacedName::new("ns2", "svc2")
    }

    #[test]
    fn projected_service_is_cluster_ip_without_node_ports() {
        let svc = projected_service(&source_service(), &dest(), false);
        assert_eq!(svc.metadata.name.as_deref(), Some("svc2"));
        assert_eq!(svc.metadata.namespace.as_deref(), Some("ns2"));
        assert!(is_controlled(&svc.metadata));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports[0].port, 5432);
        assert_eq!(ports[0].node_port, None);
        assert_eq!(spec.selector.unwrap().get("app").map(String::as_str), Some("db"));
    }

    #[test]
    fn endpoint_projection_drops_selector_and_target_refs() {
        let svc = projected_service(&source_service(), &dest(), true);
        assert_eq!(svc.spec.unwrap().selector, None);

        let eps = projected_endpoints(Some(&source_endpoints()), &dest());
        let subsets = eps.subsets.unwrap();
        let address = &subsets[0].addresses.as_ref().unwrap()[0];
        assert_eq!(address.ip, "10.0.0.7");
        assert_eq!(address.target_ref, None);
        assert!(is_controlled(&eps.metadata));
    }

    #[tokio::test]
    async fn missing_destination_is_created_with_namespace_and_endpoints() {
        let mut from = MockServiceSurface::new();
        let mut to = MockServiceSurface::new();
        from.expect_get_service()
            .with(eq(source()))
            .returning(|_| Ok(Some(source_service())));
        from.expect_get_endpoints()
            .returning(|_| Ok(Some(source_endpoints())));
        to.expect_get_service().returning(|_| Ok(None));
        to.expect_get_endpoints().returning(|_| Ok(None));
        to.expect_ensure_namespace()
            .withf(|ns| ns == "ns2")
            .times(1)
            .returning(|_| Ok(()));
        to.expect_apply_service()
            .withf(|svc| svc.metadata.name.as_deref() == Some("svc2"))
            .times(1)
            .returning(|_| Ok(()));
        to.expect_apply_endpoints().times(1).returning(|_| Ok(()));

        let options = ProjectionOptions {
            create_namespace: true,
            create_endpoints: true,
        };
        let action = reconcile_entry(&from, &to, &source(), &dest(), options).await.unwrap();
        assert_eq!(action, SyncAction::Done);
    }

    #[tokio::test]
    async fn unchanged_destination_is_left_alone() {
        let mut from = MockServiceSurface::new();
        let mut to = MockServiceSurface::new();
        from.expect_get_service().returning(|_| Ok(Some(source_service())));
        to.expect_get_service()
            .returning(|_| Ok(Some(projected_service(&source_service(), &dest(), false))));
        to.expect_apply_service().never();
        to.expect_ensure_namespace().never();

        reconcile_entry(&from, &to, &source(), &dest(), ProjectionOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn vanished_source_deletes_controlled_destination() {
        let mut from = MockServiceSurface::new();
        let mut to = MockServiceSurface::new();
        from.expect_get_service().returning(|_| Ok(None));
        to.expect_get_service()
            .returning(|_| Ok(Some(projected_service(&source_service(), &dest(), true))));
        to.expect_delete_service()
            .with(eq(dest()))
            .times(1)
            .returning(|_| Ok(()));
        to.expect_delete_endpoints()
            .with(eq(dest()))
            .times(1)
            .returning(|_| Ok(()));

        let options = ProjectionOptions {
            create_namespace: false,
            create_endpoints: true,
        };
        reconcile_entry(&from, &to, &source(), &dest(), options).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_destination_is_never_touched() {
        let mut from = MockServiceSurface::new();
        let mut to = MockServiceSurface::new();
        from.expect_get_service().returning(|_| Ok(None));
        to.expect_get_service().returning(|_| {
            Ok(Some(Service {
                metadata: ObjectMeta {
                    name: Some("svc2".to_string()),
                    namespace: Some("ns2".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }))
        });
        to.expect_delete_service().never();
        to.expect_apply_service().never();

        reconcile_entry(&from, &to, &source(), &dest(), ProjectionOptions::default())
            .await
            .unwrap();
    }

    fn service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn changes_on_either_surface_trigger_the_mapped_source() {
        let mapping = Arc::new(MappingTable::from([(source(), dest())]));
        let reverse = Arc::new(HashMap::from([(dest(), source())]));

        let from_side = source_trigger::<Service>(mapping);
        assert_eq!(from_side(service("default", "svc1")), Some(service_ref(&source())));
        assert_eq!(from_side(service("default", "other")), None);

        let to_side = destination_trigger::<Service>(reverse);
        assert_eq!(to_side(service("ns2", "svc2")), Some(service_ref(&source())));
        assert_eq!(to_side(service("default", "svc1")), None);
    }

    #[tokio::test]
    async fn keys_outside_the_mapping_are_ignored() {
        let from = MockServiceSurface::new();
        let to = MockServiceSurface::new();
        let projector = Projector::new(
            "map-virtual-service-syncer".to_string(),
            MappingTable::from([(source(), dest())]),
            Arc::new(from),
            Arc::new(to),
            ProjectionOptions::default(),
        );
        let action = projector
            .reconcile_key(&NamespacedName::new("default", "unrelated"))
            .await
            .unwrap();
        assert_eq!(action, SyncAction::Done);
    }
}
