//! Error types for syncer bring-up and reconciliation
//!
//! Every bring-up failure is wrapped with the phase it happened in and the
//! resource kind or unit name involved, so the message alone says where
//! bring-up stopped.

use thiserror::Error;

/// Main error type for the syncer
#[derive(Debug, Error)]
pub enum Error {
    /// Error from shared utilities
    #[error(transparent)]
    Common(#[from] vcluster_common::Error),

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid configuration, echoing the raw input back
    #[error("invalid configuration {input:?}: {message}")]
    Config {
        /// The offending raw input
        input: String,
        /// Description of what's invalid
        message: String,
    },

    /// A unit constructor failed
    #[error("register {kind} controller: {source}")]
    Construct {
        /// Resource kind name whose constructor failed
        kind: String,
        /// The constructor's error
        source: Box<Error>,
    },

    /// A unit's initializer failed
    #[error("ensure prerequisites for {unit} syncer: {source}")]
    Initialize {
        /// Name of the failing unit
        unit: String,
        /// The initializer's error
        source: Box<Error>,
    },

    /// A unit failed to register its indices
    #[error("register indices for {unit} syncer: {source}")]
    Index {
        /// Name of the failing unit
        unit: String,
        /// The registerer's error
        source: Box<Error>,
    },

    /// A unit could not be handed to its registration path
    #[error("start {unit} syncer: {source}")]
    Register {
        /// Name of the failing unit
        unit: String,
        /// The registration error
        source: Box<Error>,
    },

    /// A unit implements neither sync capability
    #[error("syncer {unit} does not implement fake syncer or syncer interface")]
    MissingCapability {
        /// Name of the misconfigured unit
        unit: String,
    },

    /// An always-on controller failed to set up
    #[error("{controller}: {source}")]
    Controller {
        /// What was being set up (e.g. "register physical service sync controller")
        controller: String,
        /// The setup error
        source: Box<Error>,
    },

    /// A manager failed to start or run
    #[error("manager {manager} failed: {source}")]
    Manager {
        /// Name of the failing manager
        manager: String,
        /// The manager's error
        source: Box<Error>,
    },

    /// The root context was cancelled while waiting
    #[error("cancelled while waiting for {operation}")]
    Cancelled {
        /// What was being waited on
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
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

    /// Wrap a constructor failure with the resource kind name
    pub fn construct(kind: impl Into<String>, source: Error) -> Self {
        Self::Construct {
            kind: kind.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an initializer failure with the unit name
    pub fn initialize(unit: impl Into<String>, source: Error) -> Self {
        Self::Initialize {
            unit: unit.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an index registration failure with the unit name
    pub fn index(unit: impl Into<String>, source: Error) -> Self {
        Self::Index {
            unit: unit.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a registration failure with the unit name
    pub fn register(unit: impl Into<String>, source: Error) -> Self {
        Self::Register {
            unit: unit.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an always-on controller setup failure
    pub fn controller(controller: impl Into<String>, source: Error) -> Self {
        Self::Controller {
            controller: controller.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a manager start failure
    pub fn manager(manager: impl Into<String>, source: Error) -> Self {
        Self::Manager {
            manager: manager.into(),
            source: Box::new(source),
        }
    }

    /// Create a cancellation error for the given wait
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Name of the unit or resource kind the error is attributed to, if any
    pub fn unit(&self) -> Option<&str> {
        match self {
            Error::Construct { kind, .. } => Some(kind),
            Error::Initialize { unit, .. }
            | Error::Index { unit, .. }
            | Error::Register { unit, .. }
            | Error::MissingCapability { unit } => Some(unit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_name_phase_and_unit() {
        let err = Error::initialize("pods", Error::internal_with_context("init", "boom"));
        assert_eq!(
            err.to_string(),
            "ensure prerequisites for pods syncer: internal error [init]: boom"
        );
        assert_eq!(err.unit(), Some("pods"));

        let err = Error::construct("fake-nodes", Error::config("x", "bad"));
        assert!(err.to_string().starts_with("register fake-nodes controller: "));
        assert_eq!(err.unit(), Some("fake-nodes"));
    }

    #[test]
    fn missing_capability_names_the_unit() {
        let err = Error::MissingCapability {
            unit: "widgets".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "syncer widgets does not implement fake syncer or syncer interface"
        );
    }

    #[test]
    fn controller_errors_keep_the_setup_step() {
        let err = Error::controller(
            "parse physical service mapping",
            Error::config("bad", "missing '='"),
        );
        assert!(err
            .to_string()
            .starts_with("parse physical service mapping: invalid configuration \"bad\""));
        assert_eq!(err.unit(), None);
    }
}
