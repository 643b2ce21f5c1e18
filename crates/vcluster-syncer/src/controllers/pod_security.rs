//! Pod security standard enforcement on virtual namespaces

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::manager::runtime::{error_policy, log_reconcile_result};
use crate::manager::{Reconciler, WATCH_TIMEOUT_SECS};
use crate::{Error, Result};

/// Namespace label read by the pod security admission plugin
pub const ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";

const STANDARDS: &[&str] = &["privileged", "baseline", "restricted"];

/// Labels every virtual namespace with the configured standard
#[derive(Clone)]
pub struct PodSecurityController {
    client: Client,
    standard: String,
}

impl PodSecurityController {
    /// Fails on an unknown standard
    pub fn new(client: Client, standard: &str) -> Result<Self> {
        validate_standard(standard)?;
        Ok(Self {
            client,
            standard: standard.to_string(),
        })
    }
}

fn validate_standard(standard: &str) -> Result<()> {
    if STANDARDS.contains(&standard) {
        Ok(())
    } else {
        Err(Error::config(
            standard,
            format!("unknown pod security standard, expected one of {}", STANDARDS.join(", ")),
        ))
    }
}

/// Whether `namespace` lacks the enforcement label for `standard`
pub fn needs_enforcement(namespace: &Namespace, standard: &str) -> bool {
    namespace.labels().get(ENFORCE_LABEL).map(String::as_str) != Some(standard)
}

async fn reconcile(namespace: Arc<Namespace>, ctx: Arc<PodSecurityController>) -> Result<Action> {
    if !needs_enforcement(&namespace, &ctx.standard) {
        return Ok(Action::await_change());
    }

    let name = namespace.name_any();
    let api: Api<Namespace> = Api::all(ctx.client.clone());
    let patch = json!({ "metadata": { "labels": { ENFORCE_LABEL: ctx.standard } } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(namespace = %name, standard = %ctx.standard, "enforced pod security standard");
    Ok(Action::await_change())
}

#[async_trait]
impl Reconciler for PodSecurityController {
    fn name(&self) -> &str {
        "pod-security"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, Arc::new(self.clone()))
            .for_each(log_reconcile_result("PodSecurity"))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn namespace(label: Option<&str>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("team-a".to_string()),
                labels: label.map(|l| BTreeMap::from([(ENFORCE_LABEL.to_string(), l.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn namespaces_without_matching_label_need_enforcement() {
        assert!(needs_enforcement(&namespace(None), "baseline"));
        assert!(needs_enforcement(&namespace(Some("privileged")), "baseline"));
        assert!(!needs_enforcement(&namespace(Some("baseline")), "baseline"));
    }

    #[test]
    fn only_known_standards_are_accepted() {
        for standard in ["privileged", "baseline", "restricted"] {
            assert!(validate_standard(standard).is_ok());
        }
        match validate_standard("strict") {
            Err(Error::Config { input, .. }) => assert_eq!(input, "strict"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
