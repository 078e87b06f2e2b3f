//! Cluster API abstraction for bootstrap
//!
//! The orchestrator, pre-flight checks and readiness waiter only talk to a
//! cluster through [`ClusterApi`], so every phase can be exercised against a
//! mock. [`KubeClusterApi`] is the real implementation over a kube Client.
//!
//! Create methods report an existing object as [`Error::AlreadyExists`];
//! callers decide whether that is fine.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::Discovery;
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use meridian_common::{kube_utils, Error, FIELD_MANAGER};

/// Ready/total counts for a label-selected pod set
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PodReadiness {
    /// Pods with a `Ready=True` condition
    pub ready: usize,
    /// Pods matching the selector
    pub total: usize,
}

/// Operations bootstrap performs against a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List services across all namespaces
    async fn list_services(&self) -> Result<Vec<Service>, Error>;

    /// List nodes; an empty selector lists all nodes
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, Error>;

    /// Set a label on a node
    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<(), Error>;

    /// Remove a label from a node
    async fn unlabel_node(&self, node: &str, key: &str) -> Result<(), Error>;

    /// Create a namespace
    async fn create_namespace(&self, name: &str) -> Result<(), Error>;

    /// Whether a namespace exists
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error>;

    /// Delete a namespace
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create a service account
    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a cluster role
    async fn create_cluster_role(&self, role: ClusterRole) -> Result<(), Error>;

    /// Delete a cluster role
    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error>;

    /// Create a cluster role binding
    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<(), Error>;

    /// Delete a cluster role binding
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error>;

    /// Create a secret in the namespace named by its metadata
    async fn create_secret(&self, secret: Secret) -> Result<(), Error>;

    /// Create a service in the namespace named by its metadata
    async fn create_service(&self, service: Service) -> Result<(), Error>;

    /// Create a stateful set in the namespace named by its metadata
    async fn create_stateful_set(&self, sts: StatefulSet) -> Result<(), Error>;

    /// Create a deployment in the namespace named by its metadata
    async fn create_deployment(&self, deployment: Deployment) -> Result<(), Error>;

    /// Count ready pods matching a label selector
    async fn pod_readiness(&self, namespace: &str, label_selector: &str)
        -> Result<PodReadiness, Error>;

    /// Server-side apply an arbitrary manifest, resolving its type by discovery
    async fn apply(&self, manifest: serde_json::Value) -> Result<(), Error>;
}

/// Connects to a freshly installed control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneConnector: Send + Sync {
    /// Build a [`ClusterApi`] from admin kubeconfig bytes
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>, Error>;
}

/// [`ClusterApi`] over a kube Client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn namespace_of(meta: &ObjectMeta, kind: &str) -> Result<String, Error> {
    meta.namespace
        .clone()
        .ok_or_else(|| Error::validation(format!("{kind} {:?} has no namespace", meta.name)))
}

async fn create_namespaced<K>(client: &Client, obj: K) -> Result<(), Error>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + std::fmt::Debug,
{
    let kind = K::kind(&()).to_string();
    let ns = namespace_of(obj.meta(), &kind)?;
    let api: Api<K> = Api::namespaced(client.clone(), &ns);
    api.create(&PostParams::default(), &obj).await?;
    debug!(kind = %kind, name = ?obj.meta().name, namespace = %ns, "created");
    Ok(())
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Split `group/version` (core group has no slash)
fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_services(&self) -> Result<Vec<Service>, Error> {
        let api: Api<Service> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut lp = ListParams::default();
        if !label_selector.is_empty() {
            lp = lp.labels(label_selector);
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut labels = serde_json::Map::new();
        labels.insert(key.to_string(), serde_json::Value::from(value));
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(node, key, value, "labelled node");
        Ok(())
    }

    async fn unlabel_node(&self, node: &str, key: &str) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut labels = serde_json::Map::new();
        labels.insert(key.to_string(), serde_json::Value::Null);
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(node, key, "removed node label");
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        create_namespaced(&self.client, sa).await
    }

    async fn create_cluster_role(&self, role: ClusterRole) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.create(&PostParams::default(), &role).await?;
        Ok(())
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&PostParams::default(), &binding).await?;
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_secret(&self, secret: Secret) -> Result<(), Error> {
        create_namespaced(&self.client, secret).await
    }

    async fn create_service(&self, service: Service) -> Result<(), Error> {
        create_namespaced(&self.client, service).await
    }

    async fn create_stateful_set(&self, sts: StatefulSet) -> Result<(), Error> {
        create_namespaced(&self.client, sts).await
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<(), Error> {
        create_namespaced(&self.client, deployment).await
    }

    async fn pod_readiness(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<PodReadiness, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::transport(format!("list pods {label_selector}"), e.to_string()))?;
        Ok(PodReadiness {
            ready: pods.items.iter().filter(|p| is_pod_ready(p)).count(),
            total: pods.items.len(),
        })
    }

    async fn apply(&self, manifest: serde_json::Value) -> Result<(), Error> {
        let field = |ptr: &str| {
            manifest
                .pointer(ptr)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| Error::validation(format!("manifest is missing {ptr}")))
        };
        let api_version = field("/apiVersion")?;
        let kind = field("/kind")?;
        let name = field("/metadata/name")?;
        let namespace = manifest
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let (group, version) = parse_api_version(&api_version);
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group.as_str()])
            .run()
            .await
            .map_err(|e| Error::transport("api discovery", e.to_string()))?;
        let gvk = kube::api::GroupVersionKind {
            group,
            version,
            kind: kind.clone(),
        };
        let Some((api_resource, _)) = discovery.resolve_gvk(&gvk) else {
            return Err(Error::validation(format!(
                "unknown resource type {api_version}/{kind}"
            )));
        };

        let api: Api<DynamicObject> = match namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        };
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&manifest))
            .await?;
        trace!(kind = %kind, name = %name, namespace = ?namespace, "applied manifest");
        Ok(())
    }
}

/// Connects to a control plane by building a kube Client from its kubeconfig
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeControlPlaneConnector;

#[async_trait]
impl ControlPlaneConnector for KubeControlPlaneConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>, Error> {
        let client = kube_utils::client_from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(KubeClusterApi::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn pod(ready: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                conditions: ready.map(|status| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_readiness_requires_ready_condition() {
        assert!(is_pod_ready(&pod(Some("True"))));
        assert!(!is_pod_ready(&pod(Some("False"))));
        assert!(!is_pod_ready(&pod(None)));
        assert!(!is_pod_ready(&Pod::default()));
    }

    #[test]
    fn api_version_parsing() {
        assert_eq!(
            parse_api_version("apiextensions.k8s.io/v1"),
            ("apiextensions.k8s.io".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn namespaced_objects_must_name_a_namespace() {
        let meta = ObjectMeta {
            name: Some("etcd-cert".to_string()),
            ..Default::default()
        };
        assert!(namespace_of(&meta, "Secret").is_err());
    }
}
