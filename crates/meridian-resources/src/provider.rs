//! Per-resource providers
//!
//! A provider answers get/list for one resource kind in any member cluster.
//! [`KubeResourceProvider`] is the generic implementation over a
//! k8s-openapi type: it resolves the member cluster's client through the
//! registry, lists with the label selector server-side, and hands the
//! result to [`default_list`].

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use meridian_common::cluster_client::KubeClientRegistry;
use meridian_common::Error;

use crate::query::{default_list, ListResult, ResourceQuery};

/// The member cluster a request is for
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterTarget {
    /// Region label of the cluster
    pub region: String,
    /// Cluster name
    pub cluster: String,
}

impl ClusterTarget {
    /// Target `cluster` in `region`
    pub fn new(region: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cluster: cluster.into(),
        }
    }
}

impl std::fmt::Display for ClusterTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region, self.cluster)
    }
}

/// Get/list for one resource kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Fetch one object; `namespace` is empty for cluster-scoped kinds
    async fn get(&self, target: &ClusterTarget, namespace: &str, name: &str)
        -> Result<Value, Error>;

    /// List objects; `namespace` is empty for cluster-scoped kinds
    async fn list(
        &self,
        target: &ClusterTarget,
        namespace: &str,
        query: &ResourceQuery,
    ) -> Result<ListResult, Error>;
}

/// [`ResourceProvider`] for a k8s-openapi type
pub struct KubeResourceProvider<K> {
    registry: Arc<KubeClientRegistry>,
    api: fn(Client, &str) -> Api<K>,
}

impl<K> KubeResourceProvider<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    /// Provider for a namespaced kind
    pub fn namespaced(registry: Arc<KubeClientRegistry>) -> Self {
        Self {
            registry,
            api: |client, ns| Api::namespaced(client, ns),
        }
    }
}

impl<K> KubeResourceProvider<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    /// Provider for a cluster-scoped kind
    pub fn cluster_scoped(registry: Arc<KubeClientRegistry>) -> Self {
        Self {
            registry,
            api: |client, _| Api::all(client),
        }
    }
}

impl<K> KubeResourceProvider<K> {
    async fn api(&self, target: &ClusterTarget, namespace: &str) -> Result<Api<K>, Error> {
        let client = self
            .registry
            .client(&target.region, &target.cluster)
            .await?;
        Ok((self.api)(client, namespace))
    }
}

#[async_trait]
impl<K> ResourceProvider for KubeResourceProvider<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(
        &self,
        target: &ClusterTarget,
        namespace: &str,
        name: &str,
    ) -> Result<Value, Error> {
        let api = self.api(target, namespace).await?;
        let object = api.get(name).await?;
        Ok(serde_json::to_value(object)?)
    }

    async fn list(
        &self,
        target: &ClusterTarget,
        namespace: &str,
        query: &ResourceQuery,
    ) -> Result<ListResult, Error> {
        let api = self.api(target, namespace).await?;
        let mut params = ListParams::default();
        if !query.label_selector.is_empty() {
            params = params.labels(&query.label_selector);
        }
        let objects = api.list(&params).await?;
        debug!(
            kind = %K::kind(&()),
            cluster = %target,
            namespace,
            count = objects.items.len(),
            "listed objects"
        );
        let items = objects
            .items
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        default_list(items, query)
    }
}
