//! vcluster CLI
//!
//! Inspects virtual clusters running in the current kube context.

use clap::Parser;

use vcluster_cli::{Cli, Result};
use vcluster_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(TelemetryConfig {
        service_name: "vcluster".to_string(),
        format: LogFormat::Compact,
    })?;
    cli.run().await
}
