//! CLI commands

use std::fmt::Display;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::{Error, Result};

pub mod format;
pub mod list;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Load the kubeconfig from `explicit` or the kube defaults
/// (`KUBECONFIG` env / `~/.kube/config`)
pub fn load_kubeconfig(explicit: Option<&str>) -> Result<Kubeconfig> {
    match explicit {
        Some(path) => Kubeconfig::read_from(path).map_err(|e| {
            Error::command_failed(format!("failed to read kubeconfig {}: {}", path, e))
        }),
        None => Kubeconfig::read()
            .map_err(|e| Error::command_failed(format!("failed to read kubeconfig: {}", e))),
    }
}

/// Context to operate on: the explicit one, else the kubeconfig's current context
pub fn active_context(kubeconfig: &Kubeconfig, explicit: Option<&str>) -> Result<String> {
    explicit
        .map(str::to_string)
        .or_else(|| kubeconfig.current_context.clone())
        .filter(|c| !c.is_empty())
        .ok_or(Error::NoContext)
}

/// Build a kube [`Client`] for `context` of an already-loaded [`Kubeconfig`]
pub async fn kube_client(kubeconfig: Kubeconfig, context: &str) -> Result<Client> {
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .cmd_err()?;
    Client::try_from(config).cmd_err()
}
