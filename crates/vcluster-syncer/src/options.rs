//! Syncer configuration: command-line flags, options, and the enabled set
//!
//! Flags fold into [`SyncerOptions`], which is shared read-only with every
//! sync unit. [`EnabledControllers`] is computed here from defaults plus the
//! `--sync` list; the unit registry only consults it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Resource kinds enabled when `--sync` does not mention them
pub const DEFAULT_CONTROLLERS: &[&str] = &[
    "services",
    "configmaps",
    "secrets",
    "endpoints",
    "pods",
    "events",
    "persistentvolumeclaims",
    "fake-nodes",
    "fake-persistentvolumes",
];

/// Path of the mounted service account namespace file
const SERVICE_ACCOUNT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Command-line arguments of the syncer
#[derive(Args, Debug, Clone)]
pub struct SyncerArgs {
    /// Name of the virtual cluster (suffix of translated physical names)
    #[arg(long, env = "VCLUSTER_NAME", default_value = "vcluster")]
    pub name: String,

    /// Physical namespace that receives synced objects (default: current namespace)
    #[arg(long, env = "VCLUSTER_TARGET_NAMESPACE")]
    pub target_namespace: Option<String>,

    /// Physical service fronting the virtual API server
    #[arg(long, env = "VCLUSTER_SERVICE_NAME", default_value = "vcluster")]
    pub service_name: String,

    /// Resource kinds to sync, comma separated; `-kind` disables, `*` enables all
    #[arg(long, value_delimiter = ',')]
    pub sync: Vec<String>,

    /// Host service to project into the virtual cluster (`[namespace/]name=namespace/name`)
    #[arg(long = "map-host-service")]
    pub map_host_services: Vec<String>,

    /// Virtual service to project into the host cluster (`namespace/name=name`)
    #[arg(long = "map-virtual-service")]
    pub map_virtual_services: Vec<String>,

    /// Pod security standard enforced on virtual namespaces (privileged, baseline, restricted)
    #[arg(long, default_value = "")]
    pub enforce_pod_security_standard: String,

    /// Kubeconfig for the virtual API server
    #[arg(long, env = "VCLUSTER_VIRTUAL_KUBECONFIG")]
    pub virtual_kubeconfig: Option<PathBuf>,

    /// Kubeconfig for the host cluster (default: in-cluster config)
    #[arg(long, env = "VCLUSTER_PHYSICAL_KUBECONFIG")]
    pub physical_kubeconfig: Option<PathBuf>,
}

/// Options shared read-only with every sync unit and controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncerOptions {
    /// Name of the virtual cluster
    pub name: String,
    /// Physical namespace that receives synced objects
    pub target_namespace: String,
    /// Physical service fronting the virtual API server
    pub service_name: String,
    /// Host to virtual service mappings
    #[serde(default)]
    pub map_host_services: Vec<String>,
    /// Virtual to host service mappings
    #[serde(default)]
    pub map_virtual_services: Vec<String>,
    /// Pod security standard, empty when not enforced
    #[serde(default)]
    pub enforce_pod_security_standard: String,
}

impl SyncerOptions {
    /// Build options from flags, defaulting the target namespace
    pub fn from_args(args: &SyncerArgs, current_namespace: &str) -> Self {
        Self {
            name: args.name.clone(),
            target_namespace: args
                .target_namespace
                .clone()
                .unwrap_or_else(|| current_namespace.to_string()),
            service_name: args.service_name.clone(),
            map_host_services: args.map_host_services.clone(),
            map_virtual_services: args.map_virtual_services.clone(),
            enforce_pod_security_standard: args.enforce_pod_security_standard.clone(),
        }
    }
}

/// Namespace scoping of one virtual cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceScope {
    /// Physical namespace that receives synced objects
    pub target: String,
    /// Physical namespace the syncer itself runs in
    pub current: String,
}

impl NamespaceScope {
    /// Whether synced objects land outside the syncer's own namespace
    pub fn is_split(&self) -> bool {
        self.target != self.current
    }
}

/// Resolve the namespace the syncer runs in
///
/// Reads the mounted service account namespace, then `POD_NAMESPACE`, then
/// falls back to `fallback`.
pub fn current_namespace(fallback: Option<&str>) -> String {
    if let Ok(ns) = std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE) {
        let ns = ns.trim();
        if !ns.is_empty() {
            return ns.to_string();
        }
    }
    std::env::var("POD_NAMESPACE")
        .ok()
        .filter(|ns| !ns.is_empty())
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| "default".to_string())
}

/// Resource-kind name to enabled flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledControllers(BTreeMap<String, bool>);

impl EnabledControllers {
    /// Enable exactly the given names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| (n.into(), true)).collect())
    }

    /// Apply `--sync` flags on top of defaults
    ///
    /// `*` enables every known name, `-name` disables, `name` enables.
    /// Names outside `known` are rejected.
    pub fn parse(known: &[&str], defaults: &[&str], flags: &[String]) -> Result<Self> {
        let mut enabled: BTreeMap<String, bool> = defaults
            .iter()
            .filter(|d| known.contains(d))
            .map(|d| (d.to_string(), true))
            .collect();

        for flag in flags {
            let flag = flag.trim();
            if flag == "*" {
                for name in known {
                    enabled.insert(name.to_string(), true);
                }
                continue;
            }

            let (name, value) = match flag.strip_prefix('-') {
                Some(name) => (name, false),
                None => (flag, true),
            };
            if name.is_empty() {
                return Err(Error::config(flag, "empty resource kind in --sync"));
            }
            if !known.contains(&name) {
                return Err(Error::config(
                    flag,
                    format!("unknown resource kind, expected one of {}", known.join(", ")),
                ));
            }
            enabled.insert(name.to_string(), value);
        }

        Ok(Self(enabled))
    }

    /// Whether the given resource kind is enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Set a resource kind's flag
    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.0.insert(name.into(), enabled);
    }

    /// Enabled names in sorted order
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|(_, v)| **v).map(|(k, _)| k.as_str())
    }
}
