//! Error types for the CLI

use vcluster_common::telemetry::TelemetryError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("no kube context selected; pass --context or set a current context")]
    NoContext,

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}
