//! Pre-flight checks
//!
//! Run before any bootstrap phase. Checks that can fail run before the one
//! step with a side effect (auto-labelling an etcd node), so a failed
//! pre-flight leaves the cluster untouched.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::{Node, Service};
use meridian_common::crd::StorageMode;
use meridian_common::Error;
use tracing::{info, warn};

use crate::cluster_api::ClusterApi;
use crate::config::{BootstrapConfig, NodeSelector, ETCD_NODE_LABEL};

/// Label marking control-plane nodes
pub const MASTER_NODE_LABEL: &str = "node-role.kubernetes.io/master";

/// Nodes used for API server IPs when no control-plane node is labelled
const FALLBACK_HOST_COUNT: usize = 3;

/// Run every pre-flight check and return the config completed with the
/// discovered topology
pub async fn run_preflight(
    api: &dyn ClusterApi,
    config: BootstrapConfig,
) -> Result<BootstrapConfig, Error> {
    check_node_port(api, config.apiserver_node_port).await?;

    let host_ips = resolve_host_ips(api).await?;
    info!(?host_ips, "resolved API server host IPs");
    let mut config = config.with_host_ips(host_ips);

    if config.storage.mode == StorageMode::HostPath {
        config = place_etcd_storage(api, config).await?;
    }
    Ok(config)
}

fn node_port_owner(services: &[Service], port: i32) -> Option<String> {
    services.iter().find_map(|svc| {
        let claims = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .is_some_and(|ports| ports.iter().any(|p| p.node_port == Some(port)));
        claims.then(|| {
            format!(
                "{}/{}",
                svc.metadata.namespace.as_deref().unwrap_or_default(),
                svc.metadata.name.as_deref().unwrap_or_default()
            )
        })
    })
}

/// Fail if any service already holds `port` as a NodePort
pub async fn check_node_port(api: &dyn ClusterApi, port: i32) -> Result<(), Error> {
    let services = api.list_services().await?;
    match node_port_owner(&services, port) {
        Some(service) => Err(Error::NodePortConflict { port, service }),
        None => Ok(()),
    }
}

fn first_address(node: &Node) -> Option<IpAddr> {
    let address = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|a| a.first())?;
    match address.address.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!(
                node = ?node.metadata.name,
                address = %address.address,
                "node address is not an IP, skipping"
            );
            None
        }
    }
}

/// Control-plane node IPs, else the first three nodes' IPs
pub async fn resolve_host_ips(api: &dyn ClusterApi) -> Result<Vec<IpAddr>, Error> {
    let masters = api.list_nodes(MASTER_NODE_LABEL).await?;
    if !masters.is_empty() {
        let ips: Vec<_> = masters.iter().filter_map(first_address).collect();
        if !ips.is_empty() {
            return Ok(ips);
        }
    }

    warn!("cluster has no addressable control-plane node, falling back to arbitrary nodes");
    let nodes = api.list_nodes("").await?;
    let ips: Vec<_> = nodes
        .iter()
        .filter_map(first_address)
        .take(FALLBACK_HOST_COUNT)
        .collect();
    if ips.is_empty() {
        return Err(Error::NoAvailableHost(
            "cluster has no node with an IP address".to_string(),
        ));
    }
    Ok(ips)
}

fn is_schedulable(node: &Node) -> bool {
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    let no_schedule_taint = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .is_some_and(|taints| taints.iter().any(|t| t.effect == "NoSchedule"));
    !unschedulable && !no_schedule_taint
}

/// Host-path storage must be pinned: verify an explicit selector matches a
/// node, or label one node and pin to it
async fn place_etcd_storage(
    api: &dyn ClusterApi,
    config: BootstrapConfig,
) -> Result<BootstrapConfig, Error> {
    if let Some(selector) = &config.storage.node_selector {
        let label_selector = selector.to_label_selector();
        let nodes = api.list_nodes(&label_selector).await?;
        let Some(node) = nodes.first() else {
            return Err(Error::NodeSelectorNotFound {
                selector: label_selector,
            });
        };
        info!(node = ?node.metadata.name, selector = %label_selector, "etcd node found");
        return Ok(config);
    }

    let nodes = api.list_nodes("").await?;
    let node = nodes
        .iter()
        .find(|n| is_schedulable(n))
        .or_else(|| nodes.first())
        .and_then(|n| n.metadata.name.clone())
        .ok_or_else(|| Error::NoAvailableHost("no node to hold etcd data".to_string()))?;

    api.label_node(&node, ETCD_NODE_LABEL, "").await?;
    info!(node = %node, label = ETCD_NODE_LABEL, "labelled node for etcd host-path storage");
    Ok(config.with_etcd_node_selector(NodeSelector {
        key: ETCD_NODE_LABEL.to_string(),
        value: String::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_api::MockClusterApi;
    use k8s_openapi::api::core::v1::{
        NodeAddress, NodeSpec, NodeStatus, ServicePort, ServiceSpec, Taint,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;

    fn node(name: &str, ip: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: ip.to_string(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node_port_service(ns: &str, name: &str, port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 443,
                    node_port: Some(port),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn story_node_port_conflict_fails_before_anything_else() {
        let mut api = MockClusterApi::new();
        api.expect_list_services()
            .returning(|| Ok(vec![node_port_service("ingress", "gateway", 32443)]));
        api.expect_list_nodes().never();
        api.expect_label_node().never();

        let err = run_preflight(&api, BootstrapConfig::default())
            .await
            .expect_err("port is taken");
        match err {
            Error::NodePortConflict { port, service } => {
                assert_eq!(port, 32443);
                assert_eq!(service, "ingress/gateway");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn masters_are_preferred_for_host_ips() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes()
            .with(eq(MASTER_NODE_LABEL))
            .returning(|_| Ok(vec![node("cp-0", "10.0.0.1"), node("cp-1", "10.0.0.2")]));

        let ips = resolve_host_ips(&api).await.expect("ips");
        assert_eq!(
            ips,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn without_masters_three_nodes_are_taken() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes()
            .with(eq(MASTER_NODE_LABEL))
            .returning(|_| Ok(vec![]));
        api.expect_list_nodes().with(eq("")).returning(|_| {
            Ok((0..5)
                .map(|i| node(&format!("n{i}"), &format!("10.0.1.{i}")))
                .collect())
        });

        let ips = resolve_host_ips(&api).await.expect("ips");
        assert_eq!(ips.len(), 3);
        assert_eq!(ips[0], "10.0.1.0".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn empty_cluster_has_no_available_host() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes().returning(|_| Ok(vec![]));
        let err = resolve_host_ips(&api).await.expect_err("no nodes");
        assert!(matches!(err, Error::NoAvailableHost(_)));
    }

    #[tokio::test]
    async fn story_host_path_without_selector_labels_a_schedulable_node() {
        let mut api = MockClusterApi::new();
        api.expect_list_services().returning(|| Ok(vec![]));
        api.expect_list_nodes()
            .with(eq(MASTER_NODE_LABEL))
            .returning(|_| Ok(vec![node("cp-0", "10.0.0.1")]));
        api.expect_list_nodes().with(eq("")).returning(|_| {
            let mut tainted = node("cp-0", "10.0.0.1");
            tainted.spec = Some(NodeSpec {
                taints: Some(vec![Taint {
                    key: MASTER_NODE_LABEL.to_string(),
                    effect: "NoSchedule".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            });
            Ok(vec![tainted, node("worker-0", "10.0.0.2")])
        });
        api.expect_label_node()
            .with(eq("worker-0"), eq(ETCD_NODE_LABEL), eq(""))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let cfg = run_preflight(&api, BootstrapConfig::default())
            .await
            .expect("preflight passes");
        assert_eq!(cfg.host_ips, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(
            cfg.storage.node_selector.map(|s| s.key),
            Some(ETCD_NODE_LABEL.to_string())
        );
    }

    #[tokio::test]
    async fn explicit_selector_must_match_a_node() {
        let mut api = MockClusterApi::new();
        api.expect_list_services().returning(|| Ok(vec![]));
        api.expect_list_nodes()
            .with(eq(MASTER_NODE_LABEL))
            .returning(|_| Ok(vec![node("cp-0", "10.0.0.1")]));
        api.expect_list_nodes()
            .with(eq("disk=ssd"))
            .returning(|_| Ok(vec![]));
        api.expect_label_node().never();

        let cfg = BootstrapConfig::default()
            .with_etcd_node_selector(NodeSelector::parse("disk=ssd").unwrap());
        let err = run_preflight(&api, cfg).await.expect_err("no ssd nodes");
        assert!(matches!(
            err,
            Error::NodeSelectorNotFound { selector } if selector == "disk=ssd"
        ));
    }

    #[tokio::test]
    async fn non_host_path_storage_needs_no_placement() {
        let mut api = MockClusterApi::new();
        api.expect_list_services().returning(|| Ok(vec![]));
        api.expect_list_nodes()
            .with(eq(MASTER_NODE_LABEL))
            .returning(|_| Ok(vec![node("cp-0", "fd00::1")]));
        api.expect_label_node().never();

        let mut cfg = BootstrapConfig::default();
        cfg.storage.mode = StorageMode::EmptyDir;
        let cfg = run_preflight(&api, cfg).await.expect("preflight passes");
        assert!(cfg.storage.node_selector.is_none());
        assert!(cfg.host_ips[0].is_ipv6());
    }
}
