//! Bring-up lifecycle: construct, initialize, index, register
//!
//! Construction, indexing and registration walk the unit list in order, one
//! unit at a time, and stop at the first failure. Initialization is the only
//! concurrent phase: every initializer is spawned before any is awaited, the
//! first failure cancels the shared phase token, and the phase returns only
//! after every task has finished.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::{ControllerContext, RegisterContext};
use crate::controllers::ControllerRegistrar;
use crate::manager::{start_and_wait, BackgroundManagers, Manager, ManagerFactory};
use crate::mapping::{parse_mapping, MappingTable};
use crate::registry::Registry;
use crate::servicesync::ServiceSyncer;
use crate::syncer::{register_fake_syncer, register_syncer, SyncRole, SyncUnit};
use crate::{Error, Result};

/// Name of the host to virtual projection controller
pub const HOST_SERVICE_SYNCER: &str = "map-host-service-syncer";

/// Name of the virtual to host projection controller
pub const VIRTUAL_SERVICE_SYNCER: &str = "map-virtual-service-syncer";

/// Registration path a unit was handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Virtual-only synthesis
    Fake,
    /// Bidirectional sync
    Real,
}

/// A unit that completed registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredUnit {
    /// Unit name
    pub name: String,
    /// Registration path
    pub mode: SyncMode,
}

/// A projection controller that was wired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Controller name
    pub name: String,
    /// Projected entries
    pub mapping: MappingTable,
}

/// What bring-up registered, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BringUpReport {
    /// Units handed to a registration path
    pub registered: Vec<RegisteredUnit>,
    /// Service projection controllers
    pub projections: Vec<Projection>,
}

/// Result of a successful bring-up
pub struct BringUp {
    /// Constructed units in construction order
    pub units: Vec<Arc<dyn SyncUnit>>,
    /// What was registered
    pub report: BringUpReport,
    /// Managers started during bring-up; wait on these to observe fatal errors
    pub background: BackgroundManagers,
}

/// Drives the four bring-up phases
pub struct Orchestrator {
    registry: Registry,
    managers: Arc<dyn ManagerFactory>,
    controllers: Arc<dyn ControllerRegistrar>,
}

impl Orchestrator {
    /// Create an orchestrator over `registry`
    pub fn new(
        registry: Registry,
        managers: Arc<dyn ManagerFactory>,
        controllers: Arc<dyn ControllerRegistrar>,
    ) -> Self {
        Self {
            registry,
            managers,
            controllers,
        }
    }

    /// Run every phase in order
    ///
    /// Any failure aborts bring-up; the caller is expected to exit rather than
    /// run with a partial sync set.
    pub async fn bring_up(&self, ctx: &ControllerContext) -> Result<BringUp> {
        let register_ctx = ctx.register_context();
        let mut background = BackgroundManagers::new(ctx.shutdown.clone());

        info!(
            enabled = ?register_ctx.controllers.enabled().collect::<Vec<_>>(),
            "constructing sync units"
        );
        let units = self.registry.create(&register_ctx)?;

        info!(units = units.len(), "running initializers");
        initialize(&units, &register_ctx).await?;

        info!("registering indices");
        register_indices(&units, &register_ctx).await?;

        info!("registering controllers");
        let report = self
            .register_controllers(&units, &register_ctx, &mut background)
            .await?;

        info!(
            registered = report.registered.len(),
            projections = report.projections.len(),
            "bring-up complete"
        );
        Ok(BringUp {
            units,
            report,
            background,
        })
    }

    async fn register_controllers(
        &self,
        units: &[Arc<dyn SyncUnit>],
        ctx: &RegisterContext,
        background: &mut BackgroundManagers,
    ) -> Result<BringUpReport> {
        self.controllers
            .default_endpoint(ctx)
            .map_err(|e| Error::controller("register default endpoint controller", e))?;

        let standard = ctx.options.enforce_pod_security_standard.as_str();
        if !standard.is_empty() {
            self.controllers
                .pod_security(ctx, standard)
                .map_err(|e| Error::controller("register pod security controller", e))?;
        }

        self.controllers
            .coredns(ctx)
            .map_err(|e| Error::controller("register CoreDNS controller", e))?;

        let local = self.current_namespace_manager(ctx, background).await?;
        self.controllers
            .init_manifests(ctx, local)
            .map_err(|e| Error::controller("register init manifests controller", e))?;

        let projections = self.register_service_sync(ctx, background).await?;
        let registered = register_units(units, ctx)?;

        Ok(BringUpReport {
            registered,
            projections,
        })
    }

    /// Manager watching the syncer's own namespace
    ///
    /// The physical manager already covers it unless synced objects land in a
    /// different namespace.
    async fn current_namespace_manager(
        &self,
        ctx: &RegisterContext,
        background: &mut BackgroundManagers,
    ) -> Result<Arc<dyn Manager>> {
        if !ctx.namespaces.is_split() {
            return Ok(ctx.physical_manager.clone());
        }
        let manager = self
            .managers
            .scoped(
                ctx.physical_manager.as_ref(),
                Some(ctx.namespaces.current.clone()),
            )
            .map_err(|e| Error::controller("create current namespace manager", e))?;
        start_and_wait(background, manager.clone()).await?;
        Ok(manager)
    }

    async fn register_service_sync(
        &self,
        ctx: &RegisterContext,
        background: &mut BackgroundManagers,
    ) -> Result<Vec<Projection>> {
        let mut projections = Vec::new();
        let target = ctx.namespaces.target.as_str();

        if !ctx.options.map_host_services.is_empty() {
            let mapping = parse_mapping(&ctx.options.map_host_services, target, "")
                .map_err(|e| Error::controller("parse physical service mapping", e))?;

            // Host services may live in any namespace
            let global = self
                .managers
                .scoped(ctx.physical_manager.as_ref(), None)
                .map_err(|e| Error::controller("create global physical manager", e))?;
            start_and_wait(background, global.clone()).await?;

            let syncer = ServiceSyncer::new(
                HOST_SERVICE_SYNCER,
                mapping,
                global,
                ctx.virtual_manager.clone(),
            )
            .create_namespace(true)
            .create_endpoints(true)
            .register()
            .map_err(|e| Error::controller("register physical service sync controller", e))?;
            projections.push(Projection {
                name: HOST_SERVICE_SYNCER.to_string(),
                mapping: syncer.mapping().clone(),
            });
        }

        if !ctx.options.map_virtual_services.is_empty() {
            let mapping = parse_mapping(&ctx.options.map_virtual_services, "", target)
                .map_err(|e| Error::controller("parse virtual service mapping", e))?;

            let syncer = ServiceSyncer::new(
                VIRTUAL_SERVICE_SYNCER,
                mapping,
                ctx.virtual_manager.clone(),
                ctx.physical_manager.clone(),
            )
            .register()
            .map_err(|e| Error::controller("register virtual service sync controller", e))?;
            projections.push(Projection {
                name: VIRTUAL_SERVICE_SYNCER.to_string(),
                mapping: syncer.mapping().clone(),
            });
        }

        Ok(projections)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "initializer panicked".to_string())
}

/// Run every initializer concurrently under one cancellable phase token
///
/// Returns the first failure in completion order, wrapped with its unit's
/// name, after all tasks have terminated.
pub async fn initialize(units: &[Arc<dyn SyncUnit>], ctx: &RegisterContext) -> Result<()> {
    let phase = ctx.shutdown.child_token();
    let phase_ctx = ctx.with_shutdown(phase.clone());
    let mut tasks = JoinSet::new();

    for unit in units {
        let Some(initializer) = unit.clone().initializer() else {
            continue;
        };
        let name = unit.name().to_string();
        let ctx = phase_ctx.clone();
        let phase = phase.clone();
        debug!(unit = %name, "starting initializer");

        tasks.spawn(async move {
            let result = match AssertUnwindSafe(initializer.init(&ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(Error::internal_with_context(
                    "initializer",
                    panic_message(panic.as_ref()),
                )),
            };
            if result.is_err() {
                phase.cancel();
            }
            result.map_err(|e| Error::initialize(name, e))
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| Error::internal_with_context("initialize", e.to_string()))
            .and_then(|r| r);
        if let Err(e) = result {
            phase.cancel();
            match first_error {
                None => first_error = Some(e),
                Some(_) => warn!(error = %e, "additional initializer failure"),
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Register indices one unit at a time, stopping at the first failure
pub async fn register_indices(units: &[Arc<dyn SyncUnit>], ctx: &RegisterContext) -> Result<()> {
    for unit in units {
        if let Some(registerer) = unit.indices_registerer() {
            debug!(unit = %unit.name(), "registering indices");
            registerer
                .register_indices(ctx)
                .await
                .map_err(|e| Error::index(unit.name(), e))?;
        }
    }
    Ok(())
}

/// Hand every unit to its registration path, in order
///
/// A unit with neither sync role stops registration; later units are not
/// registered.
pub fn register_units(
    units: &[Arc<dyn SyncUnit>],
    ctx: &RegisterContext,
) -> Result<Vec<RegisteredUnit>> {
    let mut registered = Vec::with_capacity(units.len());
    for unit in units {
        let name = unit.name().to_string();
        let mode = match unit.clone().sync_role() {
            Some(SyncRole::Fake(fake)) => {
                register_fake_syncer(ctx, &name, fake).map_err(|e| Error::register(&name, e))?;
                SyncMode::Fake
            }
            Some(SyncRole::Real(real)) => {
                register_syncer(ctx, &name, real).map_err(|e| Error::register(&name, e))?;
                SyncMode::Real
            }
            None => return Err(Error::MissingCapability { unit: name }),
        };
        registered.push(RegisteredUnit { name, mode });
    }
    Ok(registered)
}
