//! Error types shared across vcluster crates
//!
//! Variants carry the context needed to diagnose a failure from the message
//! alone: the raw input that failed validation, the resource kind being
//! parsed, or the operation that was running.

use thiserror::Error;

/// Main error type for shared vcluster operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid configuration value, echoed back as given
    #[error("invalid configuration {input:?}: {message}")]
    Config {
        /// The raw configuration input that was rejected
        input: String,
        /// Description of what's invalid
        message: String,
    },

    /// Manifest parsing or serialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "apply_manifest")
        context: String,
    },
}

impl Error {
    /// Create a configuration error for the given raw input
    pub fn config(input: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            input: input.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether retrying the failed operation can help
    ///
    /// Configuration errors never resolve on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } | Error::Internal { .. } => true,
            Error::Config { .. } | Error::Serialization { .. } => false,
        }
    }
}
