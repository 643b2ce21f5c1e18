//! Unit registry: resource kinds to constructors, grouped for fallback
//!
//! Groups are kept in declaration order so construction, and with it every
//! later bring-up phase, runs in the same order on every start.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::context::RegisterContext;
use crate::syncer::SyncUnit;
use crate::{Error, Result};

/// Builds one sync unit from the registration context
pub type Constructor = Box<dyn Fn(&RegisterContext) -> Result<Arc<dyn SyncUnit>> + Send + Sync>;

/// Mutually exclusive resource-kind names sharing one constructor list
pub struct FallbackGroup {
    names: Vec<String>,
    constructors: Vec<Constructor>,
}

impl FallbackGroup {
    /// Alternative names in declared order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// First name enabled in `ctx`, if any
    fn selected<'a>(&'a self, ctx: &RegisterContext) -> Option<&'a str> {
        self.names
            .iter()
            .map(String::as_str)
            .find(|name| ctx.controllers.is_enabled(name))
    }
}

/// Ordered list of fallback groups
pub struct Registry {
    groups: Vec<FallbackGroup>,
}

impl Registry {
    /// Start declaring a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every resource-kind name the registry knows, in declared order
    pub fn names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.names.iter().map(String::as_str))
            .collect()
    }

    /// Declared groups
    pub fn groups(&self) -> &[FallbackGroup] {
        &self.groups
    }

    /// Construct the units of every group with an enabled name
    ///
    /// Within a group only the first enabled name counts; all of the group's
    /// constructors run for it. The first constructor failure aborts the pass.
    pub fn create(&self, ctx: &RegisterContext) -> Result<Vec<Arc<dyn SyncUnit>>> {
        let mut units = Vec::new();
        for group in &self.groups {
            let Some(name) = group.selected(ctx) else {
                continue;
            };
            info!(kind = %name, "Start {} sync controller", name);
            for constructor in &group.constructors {
                let unit = constructor(ctx).map_err(|e| Error::construct(name, e))?;
                units.push(unit);
            }
        }
        Ok(units)
    }
}

/// Declares fallback groups in order
#[derive(Default)]
pub struct RegistryBuilder {
    groups: Vec<FallbackGroup>,
}

impl RegistryBuilder {
    /// Declare a group of alternative names sharing `constructors`
    pub fn group<I, S>(mut self, names: I, constructors: Vec<Constructor>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(FallbackGroup {
            names: names.into_iter().map(Into::into).collect(),
            constructors,
        });
        self
    }

    /// Declare a single-name group with one constructor
    pub fn unit<F>(self, name: &str, constructor: F) -> Self
    where
        F: Fn(&RegisterContext) -> Result<Arc<dyn SyncUnit>> + Send + Sync + 'static,
    {
        self.group([name], vec![Box::new(constructor) as Constructor])
    }

    /// Validate and build
    ///
    /// Rejects groups without names or constructors and names declared twice.
    pub fn build(self) -> Result<Registry> {
        let mut seen = HashSet::new();
        for group in &self.groups {
            let label = group.names.join("|");
            if group.names.is_empty() {
                return Err(Error::config(label, "fallback group has no names"));
            }
            if group.constructors.is_empty() {
                return Err(Error::config(label, "fallback group has no constructors"));
            }
            for name in &group.names {
                if name.is_empty() {
                    return Err(Error::config(label, "empty resource kind name"));
                }
                if !seen.insert(name.clone()) {
                    return Err(Error::config(name.clone(), "resource kind declared twice"));
                }
            }
        }
        Ok(Registry {
            groups: self.groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{register_context, NamedUnit};

    fn constructor(unit: &'static str) -> Constructor {
        Box::new(move |_: &RegisterContext| {
            Ok(Arc::new(NamedUnit::real(unit)) as Arc<dyn SyncUnit>)
        })
    }

    fn nodes_registry() -> Registry {
        Registry::builder()
            .group(
                ["nodes", "fake-nodes"],
                vec![constructor("node-class"), constructor("node-instances")],
            )
            .unit("services", |_| Ok(Arc::new(NamedUnit::real("services")) as Arc<dyn SyncUnit>))
            .build()
            .unwrap()
    }

    fn unit_names(units: &[Arc<dyn SyncUnit>]) -> Vec<String> {
        units.iter().map(|u| u.name().to_string()).collect()
    }

    #[test]
    fn only_the_enabled_alternative_constructs_units() {
        let registry = nodes_registry();
        let (ctx, _, _) = register_context(&["fake-nodes"]);
        let units = registry.create(&ctx).unwrap();
        assert_eq!(unit_names(&units), vec!["node-class", "node-instances"]);
    }

    #[test]
    fn group_without_enabled_name_contributes_nothing() {
        let registry = nodes_registry();
        let (ctx, _, _) = register_context(&["services"]);
        let units = registry.create(&ctx).unwrap();
        assert_eq!(unit_names(&units), vec!["services"]);
    }

    #[test]
    fn first_enabled_name_wins_and_runs_constructors_once() {
        let registry = nodes_registry();
        let (ctx, _, _) = register_context(&["nodes", "fake-nodes"]);
        let units = registry.create(&ctx).unwrap();
        assert_eq!(unit_names(&units), vec!["node-class", "node-instances"]);
    }

    #[test]
    fn groups_are_constructed_in_declared_order() {
        let registry = Registry::builder()
            .unit("services", |_| Ok(Arc::new(NamedUnit::real("services")) as Arc<dyn SyncUnit>))
            .unit("configmaps", |_| Ok(Arc::new(NamedUnit::real("configmaps")) as Arc<dyn SyncUnit>))
            .unit("secrets", |_| Ok(Arc::new(NamedUnit::real("secrets")) as Arc<dyn SyncUnit>))
            .build()
            .unwrap();
        let (ctx, _, _) = register_context(&["secrets", "services", "configmaps"]);
        for _ in 0..5 {
            let units = registry.create(&ctx).unwrap();
            assert_eq!(unit_names(&units), vec!["services", "configmaps", "secrets"]);
        }
    }

    #[test]
    fn constructor_failure_names_the_resource_kind() {
        let registry = Registry::builder()
            .unit("services", |_| Ok(Arc::new(NamedUnit::real("services")) as Arc<dyn SyncUnit>))
            .group(
                ["nodes", "fake-nodes"],
                vec![Box::new(|_: &RegisterContext| {
                    Err::<Arc<dyn SyncUnit>, _>(Error::internal_with_context(
                        "node syncer",
                        "no node informer",
                    ))
                }) as Constructor],
            )
            .build()
            .unwrap();
        let (ctx, _, _) = register_context(&["services", "fake-nodes"]);

        let err = registry.create(&ctx).err().unwrap();
        assert_eq!(err.unit(), Some("fake-nodes"));
        assert!(err.to_string().starts_with("register fake-nodes controller: "));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Registry::builder()
            .group(["nodes", "fake-nodes"], vec![constructor("a")])
            .group(["fake-nodes"], vec![constructor("b")])
            .build()
            .err()
            .unwrap();
        match err {
            Error::Config { input, .. } => assert_eq!(input, "fake-nodes"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_groups_are_rejected() {
        assert!(Registry::builder().group(["nodes"], vec![]).build().is_err());
        assert!(Registry::builder()
            .group(Vec::<String>::new(), vec![constructor("a")])
            .build()
            .is_err());
    }

    #[test]
    fn names_lists_every_alternative() {
        assert_eq!(nodes_registry().names(), vec!["nodes", "fake-nodes", "services"]);
    }
}
