//! Registration dispatch
//!
//! A newly registered cluster either hosts the federation control plane, in
//! which case the control plane is bootstrapped onto it and the resulting
//! credentials persisted, or it is joined to the existing control plane.
//! Deregistration unjoins the cluster and drops its cached client.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Config, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use meridian_bootstrap::{
    BootstrapConfig, BootstrapOrchestrator, BootstrapResult, KubeClusterApi,
    KubeControlPlaneConnector,
};
use meridian_common::cluster_client::{ClientCache, ClusterKey};
use meridian_common::crd::{MemberCluster, MemberClusterStatus};
use meridian_common::kube_utils::{client_from_config, config_for_connection, config_from_kubeconfig};
use meridian_common::options::FederationImageOverrides;
use meridian_common::{Error, FIELD_MANAGER, MERIDIAN_SYSTEM_NAMESPACE};

use crate::lifecycle::ClusterLifecycle;

/// Secret key holding the control-plane admin kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";
/// Secret key holding the member bootstrap token
pub const BOOTSTRAP_TOKEN_KEY: &str = "bootstrap-token";

/// Name of the secret persisting a hosting cluster's control-plane credentials
pub fn control_plane_secret_name(cluster: &str) -> String {
    format!("{cluster}-control-plane")
}

/// Installs the federation control plane onto a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneInstaller: Send + Sync {
    /// Bootstrap the control plane onto `cluster`, reachable through `member`
    async fn install(
        &self,
        member: &Config,
        cluster: &MemberCluster,
    ) -> Result<BootstrapResult, Error>;
}

/// Persists lifecycle outcomes on the management cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterRecordStore: Send + Sync {
    /// Store a bootstrap result for `cluster`; returns the `namespace/name`
    /// of the secret holding it
    async fn save_control_plane(
        &self,
        cluster: &str,
        result: &BootstrapResult,
    ) -> Result<String, Error>;

    /// Admin kubeconfig of the federation control plane
    async fn control_plane_kubeconfig(&self) -> Result<Vec<u8>, Error>;

    /// Merge `status` into the `cluster` record
    async fn update_status(&self, cluster: &str, status: MemberClusterStatus)
        -> Result<(), Error>;
}

/// [`ControlPlaneInstaller`] running the bootstrap orchestrator
pub struct KubeControlPlaneInstaller {
    images: FederationImageOverrides,
    cancel: CancellationToken,
}

impl KubeControlPlaneInstaller {
    /// Installer applying `images` on top of each cluster's overrides
    pub fn new(images: FederationImageOverrides, cancel: CancellationToken) -> Self {
        Self { images, cancel }
    }
}

#[async_trait]
impl ControlPlaneInstaller for KubeControlPlaneInstaller {
    async fn install(
        &self,
        member: &Config,
        cluster: &MemberCluster,
    ) -> Result<BootstrapResult, Error> {
        let mut config = BootstrapConfig::default();
        if let Some(federation) = &cluster.spec.federation {
            config = config.with_overrides(&federation.overrides)?;
        }
        let config = config.with_image_overrides(&self.images);

        let host = KubeClusterApi::new(client_from_config(member.clone())?);
        BootstrapOrchestrator::new(Arc::new(host), Arc::new(KubeControlPlaneConnector))
            .run(config, &self.cancel)
            .await
    }
}

/// [`ClusterRecordStore`] backed by the management cluster
pub struct KubeClusterRecordStore {
    client: Client,
    host_cluster_name: String,
}

impl KubeClusterRecordStore {
    /// Store on `client`; `host_cluster_name` names the hosting cluster
    pub fn new(client: Client, host_cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            host_cluster_name: host_cluster_name.into(),
        }
    }
}

/// Secret persisting a bootstrap result
fn control_plane_secret(cluster: &str, result: &BootstrapResult) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(control_plane_secret_name(cluster)),
            namespace: Some(MERIDIAN_SYSTEM_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "meridian".to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (KUBECONFIG_KEY.to_string(), ByteString(result.kubeconfig.clone())),
            (
                BOOTSTRAP_TOKEN_KEY.to_string(),
                ByteString(result.bootstrap_token.clone().into_bytes()),
            ),
        ])),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterRecordStore for KubeClusterRecordStore {
    async fn save_control_plane(
        &self,
        cluster: &str,
        result: &BootstrapResult,
    ) -> Result<String, Error> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": MERIDIAN_SYSTEM_NAMESPACE }
        });
        namespaces
            .patch(MERIDIAN_SYSTEM_NAMESPACE, &params, &Patch::Apply(&ns))
            .await?;

        let name = control_plane_secret_name(cluster);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), MERIDIAN_SYSTEM_NAMESPACE);
        let secret = control_plane_secret(cluster, result);
        secrets
            .patch(&name, &params, &Patch::Apply(&secret))
            .await?;
        debug!(secret = %name, "control plane credentials saved");
        Ok(format!("{MERIDIAN_SYSTEM_NAMESPACE}/{name}"))
    }

    async fn control_plane_kubeconfig(&self) -> Result<Vec<u8>, Error> {
        let name = control_plane_secret_name(&self.host_cluster_name);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), MERIDIAN_SYSTEM_NAMESPACE);
        let secret = secrets.get_opt(&name).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "control plane on host cluster {} is not installed",
                self.host_cluster_name
            ))
        })?;
        secret
            .data
            .and_then(|mut data| data.remove(KUBECONFIG_KEY))
            .map(|kubeconfig| kubeconfig.0)
            .ok_or_else(|| Error::validation(format!("secret {name} has no {KUBECONFIG_KEY}")))
    }

    async fn update_status(
        &self,
        cluster: &str,
        status: MemberClusterStatus,
    ) -> Result<(), Error> {
        let api: Api<MemberCluster> = Api::all(self.client.clone());
        api.patch_status(
            cluster,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

/// Reacts to clusters being registered and deregistered
pub struct ClusterRegistration {
    lifecycle: ClusterLifecycle,
    installer: Arc<dyn ControlPlaneInstaller>,
    store: Arc<dyn ClusterRecordStore>,
    clients: Arc<dyn ClientCache>,
}

impl ClusterRegistration {
    /// Create a registration handler
    pub fn new(
        lifecycle: ClusterLifecycle,
        installer: Arc<dyn ControlPlaneInstaller>,
        store: Arc<dyn ClusterRecordStore>,
        clients: Arc<dyn ClientCache>,
    ) -> Self {
        Self {
            lifecycle,
            installer,
            store,
            clients,
        }
    }

    async fn control_plane(&self) -> Result<Config, Error> {
        let kubeconfig = self.store.control_plane_kubeconfig().await?;
        config_from_kubeconfig(&kubeconfig).await
    }

    /// Bootstrap or join a newly registered cluster
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn on_registered(&self, cluster: &MemberCluster) -> Result<(), Error> {
        let name = cluster.name_any();
        if !cluster.spec.enable {
            debug!("cluster disabled, skipping");
            return Ok(());
        }
        let member = config_for_connection(&cluster.spec.connection).await?;

        if cluster.hosts_control_plane() {
            let result = self.installer.install(&member, cluster).await?;
            let secret = self.store.save_control_plane(&name, &result).await?;
            let message = if result.degraded.is_empty() {
                "control plane installed".to_string()
            } else {
                warn!(degraded = ?result.degraded, "control plane installed with unready components");
                format!(
                    "control plane installed; not ready: {}",
                    result.degraded.join(", ")
                )
            };
            let status = MemberClusterStatus {
                control_plane_secret: Some(secret),
                ..Default::default()
            }
            .message(message);
            self.store.update_status(&name, status).await?;
            info!("control plane installed");
            return Ok(());
        }

        let host = self.control_plane().await?;
        self.lifecycle.join(&host, &member, cluster).await?;
        self.store
            .update_status(&name, MemberClusterStatus::joined().message("joined federation"))
            .await
    }

    /// Unjoin a deregistered cluster and forget its client
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn on_deregistered(&self, cluster: &MemberCluster) -> Result<(), Error> {
        let member = config_for_connection(&cluster.spec.connection).await?;
        let host = self.control_plane().await?;
        self.lifecycle.unjoin(&host, &member, cluster).await?;

        let key = ClusterKey::new(cluster.region(), cluster.name_any());
        self.clients.invalidate(&key);
        Ok(())
    }
}
