//! Syncer orchestration for virtual clusters
//!
//! Sync units are declared in a [`registry::Registry`] and brought up by the
//! [`orchestrator::Orchestrator`] in four phases: construct, initialize,
//! index, register. Alongside the units the orchestrator wires the always-on
//! controllers and the service projection controllers.

#![deny(missing_docs)]

pub mod context;
pub mod controllers;
pub mod error;
pub mod manager;
pub mod mapping;
pub mod options;
pub mod orchestrator;
pub mod registry;
pub mod resources;
pub mod servicesync;
pub mod syncer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using the syncer error
pub type Result<T> = std::result::Result<T, Error>;
