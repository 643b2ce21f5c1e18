//! Object identities and virtual-to-physical name translation
//!
//! Virtual objects from every namespace of the virtual cluster land in a
//! single physical target namespace, so their physical names encode both the
//! virtual namespace and the owning virtual cluster:
//! `<name>-x-<namespace>-x-<suffix>`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum length of a Kubernetes object name that is also a DNS label
pub const MAX_NAME_LENGTH: usize = 63;

/// Length of the hash suffix appended to truncated names
const HASH_SUFFIX_LENGTH: usize = 10;

/// Fully qualified identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl NamespacedName {
    /// Create a new identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Translate a virtual object's identity to its physical name
pub fn physical_name(name: &str, namespace: &str, suffix: &str) -> String {
    safe_concat_name(&[name, "x", namespace, "x", suffix])
}

/// Join name parts with `-`, truncating with a stable hash when too long
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let keep = MAX_NAME_LENGTH - HASH_SUFFIX_LENGTH - 1;
    let prefix: String = full.chars().take(keep).collect();
    let hash = deterministic_hash(&full);
    format!("{}-{}", prefix, &hash[..HASH_SUFFIX_LENGTH])
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so the value is stable across toolchains; physical
/// names derived from it are persisted in the host cluster.
pub fn deterministic_hash(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hash[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
