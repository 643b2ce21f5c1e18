//! vcluster syncer - keeps a virtual cluster's objects in sync with its host

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vcluster_common::kube_utils::create_client;
use vcluster_common::telemetry::{init_telemetry, TelemetryConfig};
use vcluster_syncer::context::ControllerContext;
use vcluster_syncer::controllers::KubeControllerRegistrar;
use vcluster_syncer::manager::{BackgroundManagers, KubeManager, KubeManagerFactory, Manager};
use vcluster_syncer::options::{
    current_namespace, EnabledControllers, NamespaceScope, SyncerArgs, SyncerOptions,
    DEFAULT_CONTROLLERS,
};
use vcluster_syncer::orchestrator::Orchestrator;
use vcluster_syncer::resources::default_registry;

/// vcluster syncer
#[derive(Parser, Debug)]
#[command(name = "vcluster-syncer", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: SyncerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(TelemetryConfig::default())?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
        }
        signal.cancel();
    });

    if let Err(e) = run(cli.args, shutdown).await {
        error!(error = %e, "syncer stopped");
        return Err(e);
    }
    Ok(())
}

async fn run(args: SyncerArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let current = current_namespace(args.target_namespace.as_deref());
    let options = SyncerOptions::from_args(&args, &current);
    let namespaces = NamespaceScope {
        target: options.target_namespace.clone(),
        current,
    };
    info!(
        name = %options.name,
        target_namespace = %namespaces.target,
        current_namespace = %namespaces.current,
        "starting syncer"
    );

    let virtual_client = create_client(args.virtual_kubeconfig.as_deref(), None)
        .await
        .context("connect to virtual API server")?;
    let physical_client = create_client(args.physical_kubeconfig.as_deref(), None)
        .await
        .context("connect to host API server")?;

    let registry = default_registry()?;
    let controllers = EnabledControllers::parse(&registry.names(), DEFAULT_CONTROLLERS, &args.sync)?;

    let virtual_manager: Arc<dyn Manager> = Arc::new(KubeManager::new("virtual", virtual_client, None));
    let physical_manager: Arc<dyn Manager> = Arc::new(KubeManager::new(
        "physical",
        physical_client,
        Some(namespaces.target.clone()),
    ));

    let ctx = ControllerContext {
        shutdown: shutdown.clone(),
        options: Arc::new(options),
        controllers: Arc::new(controllers),
        namespaces: Arc::new(namespaces),
        virtual_manager: virtual_manager.clone(),
        physical_manager: physical_manager.clone(),
    };

    let orchestrator = Orchestrator::new(
        registry,
        Arc::new(KubeManagerFactory),
        Arc::new(KubeControllerRegistrar),
    );
    let bring_up = orchestrator.bring_up(&ctx).await?;

    let mut background: BackgroundManagers = bring_up.background;
    background.start(virtual_manager);
    background.start(physical_manager);
    info!(
        units = bring_up.report.registered.len(),
        projections = bring_up.report.projections.len(),
        managers = background.len(),
        "syncer running"
    );

    background.wait().await?;
    info!("syncer stopped");
    Ok(())
}
