//! Bootstrap orchestrator
//!
//! Runs pre-flight, then each phase in order. The first failing phase ends
//! the run with its error wrapped in [`Error::Phase`]. Nothing is rolled
//! back: every create tolerates an existing object, so re-running the
//! bootstrap is the recovery path.

use std::sync::Arc;

use meridian_common::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cluster_api::{ClusterApi, ControlPlaneConnector};
use crate::config::BootstrapConfig;
use crate::phases::{default_phases, BootstrapState, Phase, PhaseContext};
use crate::preflight::run_preflight;
use crate::readiness::ReadinessWaiter;

/// Phase name used for errors raised before the first phase
pub const PREFLIGHT_PHASE: &str = "preflight";

/// What a successful bootstrap hands back
#[derive(Clone)]
pub struct BootstrapResult {
    /// Admin kubeconfig for the new control plane
    pub kubeconfig: Vec<u8>,
    /// Token member clusters use to register
    pub bootstrap_token: String,
    /// Components that were not ready when the bootstrap finished
    pub degraded: Vec<String>,
}

impl std::fmt::Debug for BootstrapResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapResult")
            .field("kubeconfig_bytes", &self.kubeconfig.len())
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

/// Installs a federation control plane into a host cluster
pub struct BootstrapOrchestrator {
    host: Arc<dyn ClusterApi>,
    connector: Arc<dyn ControlPlaneConnector>,
    phases: Vec<Box<dyn Phase>>,
}

impl BootstrapOrchestrator {
    /// Orchestrator running [`default_phases`]
    pub fn new(host: Arc<dyn ClusterApi>, connector: Arc<dyn ControlPlaneConnector>) -> Self {
        Self {
            host,
            connector,
            phases: default_phases(),
        }
    }

    /// Replace the phase list
    pub fn with_phases(mut self, phases: Vec<Box<dyn Phase>>) -> Self {
        self.phases = phases;
        self
    }

    /// Run pre-flight and every phase
    #[instrument(skip_all, fields(namespace = %config.namespace))]
    pub async fn run(
        &self,
        config: BootstrapConfig,
        cancel: &CancellationToken,
    ) -> Result<BootstrapResult, Error> {
        let config = run_preflight(self.host.as_ref(), config)
            .await
            .map_err(|e| e.in_phase(PREFLIGHT_PHASE))?;

        let ctx = PhaseContext {
            waiter: ReadinessWaiter::new(self.host.clone(), config.timeouts.poll_interval),
            host: self.host.clone(),
            connector: self.connector.clone(),
            config,
            cancel: cancel.clone(),
        };
        let mut state = BootstrapState::default();

        for phase in &self.phases {
            let name = phase.name();
            info!(phase = name, "running bootstrap phase");
            phase
                .run(&ctx, &mut state)
                .await
                .map_err(|e| e.in_phase(name))?;
        }

        let kubeconfig = state
            .kubeconfig
            .ok_or_else(|| Error::internal("bootstrap", "no phase produced a kubeconfig"))?;
        let token = state
            .token
            .ok_or_else(|| Error::internal("bootstrap", "no phase produced a bootstrap token"))?;

        if state.degraded.is_empty() {
            info!("control plane installed");
        } else {
            warn!(degraded = ?state.degraded, "control plane installed with components not ready");
        }
        Ok(BootstrapResult {
            kubeconfig,
            bootstrap_token: token.token(),
            degraded: state.degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_api::{MockClusterApi, MockControlPlaneConnector, PodReadiness};
    use crate::crds::CrdSource;
    use crate::manifests::selectors;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus, Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CRD: &str = "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: clusters.cluster.karmada.io\n";

    fn write_bundle(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("crds.tar.gz");
        let file = std::fs::File::create(&path).expect("create tarball");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(CRD.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "crds/bases/cluster.yaml", CRD.as_bytes())
            .expect("append");
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");
        path
    }

    fn master(name: &str, ip: &str) -> Node {
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

    /// A host that accepts every create and reports pods per `ready`
    fn host(ready: fn(&str) -> bool) -> MockClusterApi {
        let mut api = MockClusterApi::new();
        api.expect_list_services().returning(|| Ok(vec![]));
        api.expect_list_nodes()
            .returning(|_| Ok(vec![master("cp-0", "10.0.0.5")]));
        api.expect_label_node().returning(|_, _, _| Ok(()));
        api.expect_create_namespace().returning(|_| Ok(()));
        api.expect_create_service_account().returning(|_, _| Ok(()));
        api.expect_create_cluster_role().returning(|_| Ok(()));
        api.expect_create_cluster_role_binding().returning(|_| Ok(()));
        api.expect_create_secret().returning(|_| Ok(()));
        api.expect_create_service().returning(|_| Ok(()));
        api.expect_create_stateful_set().returning(|_| Ok(()));
        api.expect_create_deployment().returning(|_| Ok(()));
        api.expect_pod_readiness().returning(move |_, selector| {
            let n = usize::from(ready(selector));
            Ok(PodReadiness { ready: n, total: 1 })
        });
        api
    }

    fn control_plane(applied: Arc<AtomicUsize>) -> MockClusterApi {
        let mut api = MockClusterApi::new();
        api.expect_create_namespace().returning(|_| Ok(()));
        api.expect_create_service().returning(|_| Ok(()));
        api.expect_create_secret().returning(|_| Ok(()));
        api.expect_create_cluster_role_binding().returning(|_| Ok(()));
        api.expect_apply().returning(move |_| {
            applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        api
    }

    fn connector(applied: Arc<AtomicUsize>) -> MockControlPlaneConnector {
        let mut connector = MockControlPlaneConnector::new();
        connector.expect_connect().returning(move |kubeconfig| {
            assert!(!kubeconfig.is_empty());
            let api: Arc<dyn ClusterApi> = Arc::new(control_plane(applied.clone()));
            Ok(api)
        });
        connector
    }

    fn config(dir: &Path) -> BootstrapConfig {
        let src = dir.join("src");
        std::fs::create_dir_all(&src).expect("src dir");
        BootstrapConfig {
            crd_source: CrdSource::Local(write_bundle(&src)),
            data_path: dir.join("data"),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn story_successful_bootstrap_returns_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let applied = Arc::new(AtomicUsize::new(0));
        let orchestrator = BootstrapOrchestrator::new(
            Arc::new(host(|_| true)),
            Arc::new(connector(applied.clone())),
        );

        let result = orchestrator
            .run(config(dir.path()), &CancellationToken::new())
            .await
            .expect("bootstrap succeeds");

        assert!(!result.kubeconfig.is_empty());
        let kubeconfig = String::from_utf8(result.kubeconfig).expect("utf-8");
        assert!(kubeconfig.contains("https://10.0.0.5:32443"));
        let (id, secret) = result.bootstrap_token.split_once('.').expect("token");
        assert_eq!((id.len(), secret.len()), (6, 16));
        assert!(result.degraded.is_empty());
        // one CRD plus the APIService
        assert_eq!(applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn story_node_port_conflict_creates_nothing() {
        let mut api = MockClusterApi::new();
        api.expect_list_services().returning(|| {
            Ok(vec![Service {
                metadata: ObjectMeta {
                    name: Some("existing".to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                spec: Some(ServiceSpec {
                    type_: Some("NodePort".to_string()),
                    ports: Some(vec![ServicePort {
                        port: 443,
                        node_port: Some(32443),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }])
        });
        api.expect_list_nodes().never();
        api.expect_label_node().never();
        api.expect_create_namespace().never();
        api.expect_create_secret().never();
        api.expect_create_service().never();
        api.expect_create_deployment().never();
        let mut connector = MockControlPlaneConnector::new();
        connector.expect_connect().never();

        let dir = tempfile::tempdir().expect("tempdir");
        let err = BootstrapOrchestrator::new(Arc::new(api), Arc::new(connector))
            .run(config(dir.path()), &CancellationToken::new())
            .await
            .expect_err("conflict");

        assert_eq!(err.phase(), Some(PREFLIGHT_PHASE));
        assert!(matches!(
            err.root(),
            Error::NodePortConflict { port: 32443, .. }
        ));
        assert!(!dir.path().join("data").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn story_apiserver_timeout_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut connector = MockControlPlaneConnector::new();
        connector.expect_connect().never();

        let err = BootstrapOrchestrator::new(
            Arc::new(host(|selector| selector != selectors::APISERVER)),
            Arc::new(connector),
        )
        .run(config(dir.path()), &CancellationToken::new())
        .await
        .expect_err("apiserver never ready");

        assert_eq!(err.phase(), Some("deploy-apiserver-tier"));
        assert!(matches!(
            err.root(),
            Error::Timeout { timeout_secs: 120, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn story_slow_auxiliary_components_only_degrade() {
        let dir = tempfile::tempdir().expect("tempdir");
        let applied = Arc::new(AtomicUsize::new(0));
        let result = BootstrapOrchestrator::new(
            Arc::new(host(|selector| {
                selector != selectors::ETCD && selector != selectors::CONTROLLER_MANAGER
            })),
            Arc::new(connector(applied)),
        )
        .run(config(dir.path()), &CancellationToken::new())
        .await
        .expect("bootstrap completes");

        assert_eq!(
            result.degraded,
            vec!["etcd".to_string(), "karmada-controller-manager".to_string()]
        );
        assert!(!result.bootstrap_token.is_empty());
    }

    #[tokio::test]
    async fn cancelled_bootstrap_stops_at_first_wait() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut connector = MockControlPlaneConnector::new();
        connector.expect_connect().never();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = BootstrapOrchestrator::new(Arc::new(host(|_| false)), Arc::new(connector))
            .run(config(dir.path()), &cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(err.phase(), Some("deploy-apiserver-tier"));
        assert!(matches!(err.root(), Error::Cancelled(_)));
    }
}
