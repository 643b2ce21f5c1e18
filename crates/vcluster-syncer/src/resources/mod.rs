//! Built-in sync units and the default registry

mod mirror;

use std::sync::Arc;

pub use self::mirror::MirrorSyncer;
use crate::registry::Registry;
use crate::syncer::SyncUnit;
use crate::Result;

/// Registry of the units shipped with the syncer
pub fn default_registry() -> Result<Registry> {
    Registry::builder()
        .unit("configmaps", |_| {
            Ok(Arc::new(MirrorSyncer::config_maps()) as Arc<dyn SyncUnit>)
        })
        .unit("secrets", |_| Ok(Arc::new(MirrorSyncer::secrets()) as Arc<dyn SyncUnit>))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_declares_mirrored_kinds() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.names(), vec!["configmaps", "secrets"]);
    }
}
