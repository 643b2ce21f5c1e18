//! kube-rs backed manager
//!
//! Services and Endpoints are reflected into in-memory stores. The manager
//! reports its caches synced once both stores have completed their initial
//! list.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::runtime::object_key;
use super::{Manager, ManagerFactory, Reconciler, WATCH_TIMEOUT_SECS};
use crate::{Error, Result};

/// State consumed by the first call to `start`
struct Pending {
    services: reflector::store::Writer<Service>,
    endpoints: reflector::store::Writer<Endpoints>,
    late_rx: mpsc::UnboundedReceiver<Arc<dyn Reconciler>>,
}

/// Manager over one API surface, optionally scoped to a namespace
pub struct KubeManager {
    name: String,
    client: Client,
    namespace: Option<String>,
    services: Store<Service>,
    endpoints: Store<Endpoints>,
    reconcilers: DashMap<String, Arc<dyn Reconciler>>,
    started: AtomicBool,
    late_tx: mpsc::UnboundedSender<Arc<dyn Reconciler>>,
    pending: Mutex<Option<Pending>>,
}

impl KubeManager {
    /// Create a manager; nothing is watched until [`Manager::start`]
    pub fn new(name: impl Into<String>, client: Client, namespace: Option<String>) -> Self {
        let (services, services_writer) = reflector::store();
        let (endpoints, endpoints_writer) = reflector::store();
        let (late_tx, late_rx) = mpsc::unbounded_channel();

        Self {
            name: name.into(),
            client,
            namespace,
            services,
            endpoints,
            reconcilers: DashMap::new(),
            started: AtomicBool::new(false),
            late_tx,
            pending: Mutex::new(Some(Pending {
                services: services_writer,
                endpoints: endpoints_writer,
                late_rx,
            })),
        }
    }

    /// Cached services
    pub fn services(&self) -> Store<Service> {
        self.services.clone()
    }

    /// Cached endpoints
    pub fn endpoints(&self) -> Store<Endpoints> {
        self.endpoints.clone()
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Reflect `api` into `writer` until the stream ends
async fn reflect_into<K>(api: Api<K>, writer: reflector::store::Writer<K>, manager: String) -> Result<()>
where
    K: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
    <K as Resource>::DynamicType: Default + Eq + std::hash::Hash + Clone + Send + Sync,
{
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
    let mut stream = watcher(api, config)
        .default_backoff()
        .reflect(writer)
        .touched_objects()
        .boxed();

    while let Some(item) = stream.next().await {
        match item {
            Ok(obj) => debug!(manager = %manager, key = %object_key(&obj), "cache updated"),
            Err(e) => warn!(manager = %manager, error = %e, "watch error, backing off"),
        }
    }
    Ok(())
}

fn spawn_reconciler(
    tasks: &mut JoinSet<Result<()>>,
    launched: &mut HashSet<String>,
    reconciler: Arc<dyn Reconciler>,
    token: CancellationToken,
) {
    let name = reconciler.name().to_string();
    if !launched.insert(name.clone()) {
        return;
    }
    debug!(reconciler = %name, "starting reconciler");
    tasks.spawn(async move { reconciler.run(token).await });
}

#[async_trait]
impl Manager for KubeManager {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn client(&self) -> Client {
        self.client.clone()
    }

    fn namespace(&self) -> Option<String> {
        self.namespace.clone()
    }

    fn add_reconciler(&self, reconciler: Arc<dyn Reconciler>) -> Result<()> {
        let name = reconciler.name().to_string();
        match self.reconcilers.entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::internal_with_context(
                    "add_reconciler",
                    format!("reconciler {} already registered on {}", name, self.name),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(reconciler.clone());
            }
        }

        if self.started.load(Ordering::SeqCst) {
            // The running start loop skips names it already launched
            let _ = self.late_tx.send(reconciler);
        }
        Ok(())
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let Some(pending) = self.pending.lock().await.take() else {
            return Err(Error::internal_with_context(
                "manager start",
                format!("manager {} already started", self.name),
            ));
        };
        let Pending {
            services,
            endpoints,
            mut late_rx,
        } = pending;

        self.started.store(true, Ordering::SeqCst);
        info!(manager = %self.name, namespace = ?self.namespace, "manager starting");

        let workers = shutdown.child_token();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(reflect_into(self.api::<Service>(), services, self.name.clone()));
        tasks.spawn(reflect_into(self.api::<Endpoints>(), endpoints, self.name.clone()));

        let mut launched = HashSet::new();
        let initial: Vec<_> = self.reconcilers.iter().map(|r| r.value().clone()).collect();
        for reconciler in initial {
            spawn_reconciler(&mut tasks, &mut launched, reconciler, workers.child_token());
        }

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                Some(reconciler) = late_rx.recv() => {
                    spawn_reconciler(&mut tasks, &mut launched, reconciler, workers.child_token());
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break Err(e),
                    Err(e) => break Err(Error::internal_with_context(
                        "manager task",
                        format!("task in {} panicked or was aborted: {}", self.name, e),
                    )),
                },
            }
        };

        workers.cancel();
        tasks.shutdown().await;
        info!(manager = %self.name, "manager stopped");
        result
    }

    async fn wait_for_cache_sync(&self, shutdown: CancellationToken) -> bool {
        let ready = async {
            self.services.wait_until_ready().await.is_ok()
                && self.endpoints.wait_until_ready().await.is_ok()
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            synced = ready => synced,
        }
    }
}

/// Builds [`KubeManager`]s on an existing manager's client
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeManagerFactory;

impl ManagerFactory for KubeManagerFactory {
    fn scoped(&self, base: &dyn Manager, namespace: Option<String>) -> Result<Arc<dyn Manager>> {
        let name = scoped_name(&base.name(), namespace.as_deref());
        Ok(Arc::new(KubeManager::new(name, base.client(), namespace)))
    }
}

/// Name of a manager derived from `base` with the given scope
fn scoped_name(base: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", base, ns),
        None => format!("{}/*", base),
    }
}
