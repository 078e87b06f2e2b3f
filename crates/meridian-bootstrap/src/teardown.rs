//! Control-plane teardown
//!
//! Removes what bootstrap created on the host cluster. Deleting the
//! namespace takes every namespaced object with it; the cluster-scoped
//! RBAC and the etcd placement label on nodes are removed explicitly.

use kube::ResourceExt;
use meridian_common::error::ignore_not_found;
use meridian_common::Error;
use tracing::{info, instrument};

use crate::cluster_api::ClusterApi;
use crate::config::ETCD_NODE_LABEL;
use crate::manifests::CONTROLLER_MANAGER_NAME;

/// Uninstall the control plane from `namespace`.
///
/// A missing namespace means nothing is installed and is not an error.
#[instrument(skip(api))]
pub async fn uninstall(api: &dyn ClusterApi, namespace: &str) -> Result<(), Error> {
    if !api.namespace_exists(namespace).await? {
        info!("control plane not installed");
        return Ok(());
    }

    ignore_not_found(api.delete_cluster_role_binding(CONTROLLER_MANAGER_NAME).await)?;
    ignore_not_found(api.delete_cluster_role(CONTROLLER_MANAGER_NAME).await)?;
    ignore_not_found(api.delete_namespace(namespace).await)?;

    for node in api.list_nodes(ETCD_NODE_LABEL).await? {
        let name = node.name_any();
        ignore_not_found(api.unlabel_node(&name, ETCD_NODE_LABEL).await)?;
        info!(node = %name, label = ETCD_NODE_LABEL, "removed etcd placement label");
    }
    info!("control plane uninstalled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_api::MockClusterApi;
    use k8s_openapi::api::core::v1::Node;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn absent_namespace_is_not_installed() {
        let mut api = MockClusterApi::new();
        api.expect_namespace_exists()
            .with(eq("karmada-system"))
            .returning(|_| Ok(false));
        api.expect_delete_namespace().never();
        api.expect_delete_cluster_role().never();
        api.expect_unlabel_node().never();

        uninstall(&api, "karmada-system").await.expect("nothing to do");
    }

    #[tokio::test]
    async fn story_uninstall_removes_namespace_rbac_and_etcd_label() {
        let mut api = MockClusterApi::new();
        api.expect_namespace_exists().returning(|_| Ok(true));
        api.expect_delete_cluster_role_binding()
            .with(eq(CONTROLLER_MANAGER_NAME))
            .times(1)
            .returning(|_| Err(Error::NotFound("binding".to_string())));
        api.expect_delete_cluster_role()
            .with(eq(CONTROLLER_MANAGER_NAME))
            .times(1)
            .returning(|_| Ok(()));
        api.expect_delete_namespace()
            .with(eq("karmada-system"))
            .times(1)
            .returning(|_| Ok(()));
        api.expect_list_nodes()
            .with(eq(ETCD_NODE_LABEL))
            .times(1)
            .returning(|_| Ok(vec![node("worker-0"), node("worker-3")]));
        api.expect_unlabel_node()
            .with(eq("worker-0"), eq(ETCD_NODE_LABEL))
            .times(1)
            .returning(|_, _| Ok(()));
        api.expect_unlabel_node()
            .with(eq("worker-3"), eq(ETCD_NODE_LABEL))
            .times(1)
            .returning(|_, _| Err(Error::NotFound("node worker-3".to_string())));

        uninstall(&api, "karmada-system").await.expect("uninstalled");
    }

    #[tokio::test]
    async fn unlabel_failures_propagate() {
        let mut api = MockClusterApi::new();
        api.expect_namespace_exists().returning(|_| Ok(true));
        api.expect_delete_cluster_role_binding().returning(|_| Ok(()));
        api.expect_delete_cluster_role().returning(|_| Ok(()));
        api.expect_delete_namespace().returning(|_| Ok(()));
        api.expect_list_nodes()
            .returning(|_| Ok(vec![node("worker-0")]));
        api.expect_unlabel_node()
            .returning(|_, _| Err(Error::transport("kube", "forbidden")));

        let err = uninstall(&api, "karmada-system").await.expect_err("forbidden");
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn delete_failures_propagate() {
        let mut api = MockClusterApi::new();
        api.expect_namespace_exists().returning(|_| Ok(true));
        api.expect_delete_cluster_role_binding()
            .returning(|_| Err(Error::transport("kube", "forbidden")));

        let err = uninstall(&api, "karmada-system").await.expect_err("forbidden");
        assert!(matches!(err, Error::Transport { .. }));
    }
}
