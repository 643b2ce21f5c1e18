//! Service mapping parser
//!
//! Entries look like `<from>=<to>` where each side is `name` or
//! `namespace/name`. A bare name takes the side's default namespace, and at
//! most one side may rely on a default: when the "to" default is set, the
//! "to" side must be a bare name.

use std::collections::BTreeMap;

use crate::{Error, Result};
use vcluster_common::NamespacedName;

/// Source identity to destination identity
pub type MappingTable = BTreeMap<NamespacedName, NamespacedName>;

const USAGE: &str = "invalid service mapping, please use namespace1/service1=service2";
const USAGE_QUALIFIED: &str =
    "invalid service mapping, please use namespace1/service1=namespace2/service2";

/// Parse mapping entries into a table
///
/// The first invalid entry aborts the parse and is echoed in the error. A
/// later entry with the same source replaces an earlier one. Empty namespace
/// or name segments (`/a=ns/b`, `ns/=ns/b`) are rejected.
pub fn parse_mapping(
    mappings: &[String],
    from_default_namespace: &str,
    to_default_namespace: &str,
) -> Result<MappingTable> {
    let mut table = MappingTable::new();
    for entry in mappings {
        let (from, to) = parse_entry(entry, from_default_namespace, to_default_namespace)?;
        table.insert(from, to);
    }
    Ok(table)
}

fn parse_entry(
    entry: &str,
    from_default_namespace: &str,
    to_default_namespace: &str,
) -> Result<(NamespacedName, NamespacedName)> {
    let invalid = |message: &str| Error::config(entry, message);

    let (from, to) = match entry.split('=').collect::<Vec<_>>()[..] {
        [from, to] if !from.is_empty() && !to.is_empty() => (from, to),
        _ => return Err(invalid(USAGE)),
    };

    let from = match split_identity(from).ok_or_else(|| invalid(USAGE))? {
        (None, _) if from_default_namespace.is_empty() => return Err(invalid(USAGE)),
        (None, name) => NamespacedName::new(from_default_namespace, name),
        (Some(ns), name) => NamespacedName::new(ns, name),
    };

    let to = match split_identity(to).ok_or_else(|| invalid(USAGE))? {
        (None, _) if to_default_namespace.is_empty() => return Err(invalid(USAGE_QUALIFIED)),
        (None, name) => NamespacedName::new(to_default_namespace, name),
        (Some(_), _) if !to_default_namespace.is_empty() => return Err(invalid(USAGE)),
        (Some(ns), name) => NamespacedName::new(ns, name),
    };

    Ok((from, to))
}

/// Split `name` or `namespace/name`; `None` for any other shape
fn split_identity(side: &str) -> Option<(Option<&str>, &str)> {
    match side.split('/').collect::<Vec<_>>()[..] {
        [name] if !name.is_empty() => Some((None, name)),
        [ns, name] if !ns.is_empty() && !name.is_empty() => Some((Some(ns), name)),
        _ => None,
    }
}
