//! Common types for vcluster: errors, object identities, and kube utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod names;
pub mod telemetry;
pub mod yaml;

pub use error::Error;
pub use names::NamespacedName;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Annotation on physical objects holding the virtual object's name
pub const OBJECT_NAME_ANNOTATION: &str = "vcluster.loft.sh/object-name";

/// Annotation on physical objects holding the virtual object's namespace
pub const OBJECT_NAMESPACE_ANNOTATION: &str = "vcluster.loft.sh/object-namespace";

/// Label on physical objects naming the virtual cluster that owns them
pub const MANAGED_BY_LABEL: &str = "vcluster.loft.sh/managed-by";

/// Label on objects created by the service projection controller
pub const CONTROLLED_BY_LABEL: &str = "vcluster.loft.sh/controlled-by";

/// Value of [`CONTROLLED_BY_LABEL`] for projected services
pub const CONTROLLED_BY_VALUE: &str = "vcluster";

/// Field manager used for all server-side apply calls
pub const FIELD_MANAGER: &str = "vcluster-syncer";

/// Prefix of kubeconfig contexts created for virtual clusters
pub const CONTEXT_PREFIX: &str = "vcluster_";
