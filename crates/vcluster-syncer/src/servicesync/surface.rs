//! Service and Endpoints access on one API surface
//!
//! The projection logic only talks to [`ServiceSurface`], so it can be tested
//! against mocks without a cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};
use vcluster_common::kube_utils::ensure_namespace;
use vcluster_common::{NamespacedName, FIELD_MANAGER};

/// Reads and writes services and endpoints on one surface
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceSurface: Send + Sync {
    /// Fetch a service, `None` if missing
    async fn get_service(&self, key: &NamespacedName) -> Result<Option<Service>>;

    /// Fetch endpoints, `None` if missing
    async fn get_endpoints(&self, key: &NamespacedName) -> Result<Option<Endpoints>>;

    /// Create or update a service
    async fn apply_service(&self, service: &Service) -> Result<()>;

    /// Create or update endpoints
    async fn apply_endpoints(&self, endpoints: &Endpoints) -> Result<()>;

    /// Delete a service; missing is not an error
    async fn delete_service(&self, key: &NamespacedName) -> Result<()>;

    /// Delete endpoints; missing is not an error
    async fn delete_endpoints(&self, key: &NamespacedName) -> Result<()>;

    /// Create the namespace if it does not exist
    async fn ensure_namespace(&self, name: &str) -> Result<()>;
}

/// [`ServiceSurface`] backed by a kube client
#[derive(Clone)]
pub struct KubeSurface {
    client: Client,
}

impl KubeSurface {
    /// Create a surface over `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn endpoints(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn identity(namespace: Option<&String>, name: Option<&String>, kind: &str) -> Result<NamespacedName> {
    match (namespace, name) {
        (Some(ns), Some(name)) => Ok(NamespacedName::new(ns.clone(), name.clone())),
        _ => Err(Error::internal_with_context(
            "apply",
            format!("{} without namespace or name", kind),
        )),
    }
}

fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ServiceSurface for KubeSurface {
    async fn get_service(&self, key: &NamespacedName) -> Result<Option<Service>> {
        Ok(self.services(&key.namespace).get_opt(&key.name).await?)
    }

    async fn get_endpoints(&self, key: &NamespacedName) -> Result<Option<Endpoints>> {
        Ok(self.endpoints(&key.namespace).get_opt(&key.name).await?)
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        let key = identity(
            service.metadata.namespace.as_ref(),
            service.metadata.name.as_ref(),
            "service",
        )?;
        self.services(&key.namespace)
            .patch(&key.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(service))
            .await?;
        debug!(service = %key, "applied projected service");
        Ok(())
    }

    async fn apply_endpoints(&self, endpoints: &Endpoints) -> Result<()> {
        let key = identity(
            endpoints.metadata.namespace.as_ref(),
            endpoints.metadata.name.as_ref(),
            "endpoints",
        )?;
        self.endpoints(&key.namespace)
            .patch(&key.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(endpoints))
            .await?;
        debug!(endpoints = %key, "applied projected endpoints");
        Ok(())
    }

    async fn delete_service(&self, key: &NamespacedName) -> Result<()> {
        let result = self
            .services(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(result)
    }

    async fn delete_endpoints(&self, key: &NamespacedName) -> Result<()> {
        let result = self
            .endpoints(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(result)
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        Ok(ensure_namespace(&self.client, name).await?)
    }
}
