//! kube-rs controller plumbing shared by every reconciler
//!
//! kube-rs only reconciles objects present in a controller's store. A trigger
//! for a key whose object is gone comes back as `ObjectNotFound` on the
//! result stream; [`drive`] routes those keys to a handler so deletions can
//! still be acted on.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::ResourceExt;
use tracing::{debug, error, warn};

use crate::Result;
use vcluster_common::NamespacedName;

/// Requeue delay after a failed reconcile
pub(crate) const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Shared error policy: log and retry after [`ERROR_REQUEUE`]
pub(crate) fn error_policy<K: ResourceExt, C>(obj: Arc<K>, error: &crate::Error, _ctx: Arc<C>) -> Action {
    error!(?error, object = %obj.name_any(), "reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

/// Logs each reconcile result of a kube-rs controller stream
pub(crate) fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: impl Into<String>,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    let controller_name = controller_name.into();
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

/// Identity of a kube object
pub(crate) fn object_key<K: ResourceExt>(obj: &K) -> NamespacedName {
    NamespacedName::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Controller trigger for `key`; an empty namespace means cluster scoped
pub(crate) fn object_ref(ar: &ApiResource, key: &NamespacedName) -> ObjectRef<DynamicObject> {
    let obj_ref = ObjectRef::new_with(&key.name, ar.clone());
    if key.namespace.is_empty() {
        obj_ref
    } else {
        obj_ref.within(&key.namespace)
    }
}

/// Consume a controller's result stream until it ends
///
/// Keys whose object left the store before the reconcile ran are passed to
/// `on_missing`, which must read live state itself. Its failures are logged
/// and picked up again on the next trigger for that key.
pub(crate) async fn drive<T, E, F, Fut>(
    controller_name: &str,
    results: impl Stream<Item = std::result::Result<T, controller::Error<E, watcher::Error>>>,
    on_missing: F,
) where
    T: Debug,
    E: Debug + 'static,
    F: Fn(NamespacedName) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let on_missing = &on_missing;
    results
        .for_each_concurrent(None, |result| async move {
            match result {
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    let key = NamespacedName::new(obj_ref.namespace.unwrap_or_default(), obj_ref.name);
                    if let Err(e) = on_missing(key.clone()).await {
                        warn!(controller = %controller_name, key = %key, error = %e, "reconcile of removed object failed");
                    }
                }
                Ok(action) => debug!(controller = %controller_name, ?action, "reconciliation completed"),
                Err(e) => error!(controller = %controller_name, error = ?e, "reconciliation error"),
            }
        })
        .await;
}

/// `on_missing` handler for controllers that leave removals to another watch
pub(crate) fn ignore_missing(_key: NamespacedName) -> std::future::Ready<Result<()>> {
    std::future::ready(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use k8s_openapi::api::core::v1::ConfigMap;

    type ControllerResult = std::result::Result<(), controller::Error<crate::Error, watcher::Error>>;

    fn not_found(namespace: Option<&str>, name: &str) -> ControllerResult {
        let ar = ApiResource::erase::<ConfigMap>(&());
        let mut obj_ref = ObjectRef::<DynamicObject>::new_with(name, ar);
        obj_ref.namespace = namespace.map(str::to_string);
        Err(controller::Error::ObjectNotFound(obj_ref))
    }

    #[tokio::test]
    async fn removed_objects_reach_the_missing_handler() {
        let seen = Mutex::new(Vec::new());
        let results = futures::stream::iter(vec![
            Ok(()),
            not_found(Some("team-a"), "gone"),
            not_found(None, "cluster-wide"),
        ]);

        drive("configmaps", results, |key| {
            seen.lock().unwrap().push(key);
            std::future::ready(Ok(()))
        })
        .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                NamespacedName::new("team-a", "gone"),
                NamespacedName::new("", "cluster-wide"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_handler_failures_do_not_stop_the_stream() {
        let calls = Mutex::new(0);
        let results = futures::stream::iter(vec![not_found(Some("a"), "one"), not_found(Some("a"), "two")]);

        drive("configmaps", results, |_| {
            *calls.lock().unwrap() += 1;
            std::future::ready(Err(crate::Error::internal_with_context("test", "transient")))
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn object_refs_are_cluster_scoped_without_namespace() {
        let ar = ApiResource::erase::<ConfigMap>(&());
        let namespaced = object_ref(&ar, &NamespacedName::new("team-a", "cm"));
        assert_eq!(namespaced.namespace.as_deref(), Some("team-a"));
        assert_eq!(namespaced.name, "cm");
        assert_eq!(object_ref(&ar, &NamespacedName::new("", "node-1")).namespace, None);
    }
}
