//! `vcluster list` - list virtual clusters on the host cluster

use chrono::{DateTime, Utc};
use clap::Args;

use vcluster_common::CONTEXT_PREFIX;

use super::format::{format_age, print_table, OutputFormat};
use super::{active_context, kube_client, load_kubeconfig};
use crate::find::{context_name, list_vclusters, VCluster};
use crate::Result;

const HEADERS: &[&str] = &["NAME", "NAMESPACE", "STATUS", "CONNECTED", "CREATED", "AGE"];

/// Lists all virtual clusters
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Namespace to search (default: all namespaces)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Kube context to use (default: current context)
    #[arg(long)]
    pub context: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub output: OutputFormat,

    /// Path to kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,
}

pub async fn run(args: ListArgs) -> Result<()> {
    let kubeconfig = load_kubeconfig(args.kubeconfig.as_deref())?;
    let context = active_context(&kubeconfig, args.context.as_deref())?;
    let client = kube_client(kubeconfig, &context).await?;

    let vclusters = list_vclusters(&client, &context, "", args.namespace.as_deref()).await?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&vclusters)?);
        }
        OutputFormat::Table => {
            print_table(HEADERS, &table_rows(&vclusters, &context, Utc::now()));
            if let Some(hint) = disconnect_hint(&context) {
                println!("{}", hint);
            }
        }
    }
    Ok(())
}

/// Whether `active` is the context created for `vcluster`
pub fn is_connected(vcluster: &VCluster, active: &str) -> bool {
    active == context_name(&vcluster.name, &vcluster.namespace, &vcluster.context)
}

fn table_rows(vclusters: &[VCluster], active: &str, now: DateTime<Utc>) -> Vec<Vec<String>> {
    vclusters
        .iter()
        .map(|vc| {
            let connected = if is_connected(vc, active) { "True" } else { "" };
            vec![
                vc.name.clone(),
                vc.namespace.clone(),
                vc.status.clone(),
                connected.to_string(),
                vc.created.format("%Y-%m-%d %H:%M:%S %z").to_string(),
                format_age(&vc.created, now),
            ]
        })
        .collect()
}

fn disconnect_hint(active: &str) -> Option<&'static str> {
    active
        .starts_with(CONTEXT_PREFIX)
        .then_some("Run `vcluster disconnect` to switch back to the parent context")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn vcluster(name: &str, context: &str, created: DateTime<Utc>) -> VCluster {
        VCluster {
            name: name.to_string(),
            namespace: "team-a".to_string(),
            created,
            age_seconds: 0,
            status: "Running".to_string(),
            context: context.to_string(),
        }
    }

    #[test]
    fn connected_only_for_the_derived_context() {
        let now = Utc::now();
        let vc = vcluster("vc1", "kind-host", now);
        assert!(is_connected(&vc, "vcluster_vc1_team-a_kind-host"));
        assert!(!is_connected(&vc, "kind-host"));
        assert!(!is_connected(&vc, "vcluster_vc2_team-a_kind-host"));
    }

    #[test]
    fn rows_follow_header_columns() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let now = created + Duration::hours(2);
        let rows = table_rows(
            &[
                vcluster("vc1", "kind-host", created),
                vcluster("vc2", "kind-host", created),
            ],
            "vcluster_vc2_team-a_kind-host",
            now,
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            vec!["vc1", "team-a", "Running", "", "2024-03-01 12:00:00 +0000", "2h"]
        );
        assert_eq!(rows[1][3], "True");
        assert!(rows.iter().all(|r| r.len() == HEADERS.len()));
    }

    #[test]
    fn hint_only_inside_a_virtual_cluster_context() {
        assert!(disconnect_hint("vcluster_vc1_team-a_kind-host").is_some());
        assert!(disconnect_hint("kind-host").is_none());
    }
}
