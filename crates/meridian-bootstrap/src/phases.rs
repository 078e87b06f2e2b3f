//! Bootstrap phases
//!
//! Each phase is a value implementing [`Phase`]; the orchestrator runs
//! [`default_phases`] in order against one [`PhaseContext`] and one
//! [`BootstrapState`]. A phase returning `Err` ends the bootstrap. Phases
//! that tolerate a slow component record it in
//! [`BootstrapState::degraded`] and return `Ok`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use meridian_common::error::ignore_already_exists;
use meridian_common::Error;
use meridian_infra::pki::{generate_hierarchy, PkiConfig, PkiHierarchy};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster_api::{ClusterApi, ControlPlaneConnector};
use crate::config::BootstrapConfig;
use crate::crds::{self, CrdBundle, CrdSource};
use crate::kubeconfig;
use crate::manifests::{self, selectors, CONTROLLER_MANAGER_NAME};
use crate::readiness::ReadinessWaiter;
use crate::token::BootstrapToken;

/// Everything a phase may read
pub struct PhaseContext {
    /// Host cluster the control plane is installed into
    pub host: Arc<dyn ClusterApi>,
    /// Connects to the new control plane once it is serving
    pub connector: Arc<dyn ControlPlaneConnector>,
    /// Readiness polling against the host cluster
    pub waiter: ReadinessWaiter,
    /// Completed bootstrap configuration
    pub config: BootstrapConfig,
    /// Fires when the caller abandons the bootstrap
    pub cancel: CancellationToken,
}

/// Values produced by earlier phases for later ones
#[derive(Default)]
pub struct BootstrapState {
    /// Full PKI; dropped once it is persisted as secrets
    pub pki: Option<PkiHierarchy>,
    /// Root CA certificate, kept for the APIService CA bundle
    pub ca_cert_pem: Option<String>,
    /// Unpacked CRD bundle
    pub crds: Option<CrdBundle>,
    /// Admin kubeconfig pointing at the external API server URL
    pub kubeconfig: Option<Vec<u8>>,
    /// Bootstrap token minted in the control plane
    pub token: Option<BootstrapToken>,
    /// Components that did not become ready in time
    pub degraded: Vec<String>,
}

impl BootstrapState {
    fn pki(&self) -> Result<&PkiHierarchy, Error> {
        self.pki
            .as_ref()
            .ok_or_else(|| Error::internal("bootstrap", "PKI is not available"))
    }

    fn kubeconfig(&self) -> Result<&[u8], Error> {
        self.kubeconfig
            .as_deref()
            .ok_or_else(|| Error::internal("bootstrap", "kubeconfig is not available"))
    }
}

/// One step of the bootstrap
#[async_trait]
pub trait Phase: Send + Sync {
    /// Stable name used in logs and error context
    fn name(&self) -> &'static str;

    /// Run the phase
    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error>;
}

/// The bootstrap phases in execution order
pub fn default_phases() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(GenerateCerts),
        Box::new(PrepareCrds),
        Box::new(CreateKubeconfig),
        Box::new(CreateNamespace),
        Box::new(CreateSecrets),
        Box::new(DeployApiServerTier),
        Box::new(InstallResources),
        Box::new(DeployControllerTier),
    ]
}

/// Create, treating an existing object as success
async fn create(
    what: &str,
    fut: impl std::future::Future<Output = Result<(), Error>>,
) -> Result<(), Error> {
    ignore_already_exists(fut.await).map_err(|e| match e {
        Error::Transport { message, .. } => Error::transport(format!("create {what}"), message),
        other => other,
    })?;
    info!(what, "created");
    Ok(())
}

/// Wait for a component whose slowness is survivable.
///
/// A timeout is logged and recorded; transport failures and cancellation
/// still end the bootstrap.
async fn wait_or_degrade(
    ctx: &PhaseContext,
    state: &mut BootstrapState,
    component: &str,
    selector: &str,
    replicas: i32,
    timeout: Duration,
) -> Result<(), Error> {
    let expected = usize::try_from(replicas).unwrap_or(0);
    match ctx
        .waiter
        .wait_ready(&ctx.config.namespace, selector, expected, timeout, &ctx.cancel)
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.is_timeout() => {
            warn!(component, error = %e, "component not ready, continuing");
            state.degraded.push(component.to_string());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Generate the PKI hierarchy
pub struct GenerateCerts;

#[async_trait]
impl Phase for GenerateCerts {
    fn name(&self) -> &'static str {
        "generate-certs"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let cfg = &ctx.config;
        let pki_config = PkiConfig {
            namespace: cfg.namespace.clone(),
            external_ips: cfg.external_ips.clone(),
            external_dns: cfg.external_dns.clone(),
            host_ips: cfg.host_ips.clone(),
            etcd_replicas: cfg.replicas.etcd,
        };
        // Key generation is CPU bound
        let pki = tokio::task::spawn_blocking(move || generate_hierarchy(&pki_config))
            .await
            .map_err(|e| Error::internal("pki", format!("generation task failed: {e}")))??;

        state.ca_cert_pem = Some(pki.ca_cert_pem().to_string());
        state.pki = Some(pki);
        info!("certificates generated");
        Ok(())
    }
}

/// Download and unpack the CRD bundle
pub struct PrepareCrds;

fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

#[async_trait]
impl Phase for PrepareCrds {
    fn name(&self) -> &'static str {
        "prepare-crds"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let cfg = &ctx.config;
        let keeps_source =
            matches!(&cfg.crd_source, CrdSource::Local(p) if is_within(p, &cfg.data_path));
        if !keeps_source && tokio::fs::try_exists(&cfg.data_path).await? {
            info!(path = %cfg.data_path.display(), "clearing stale data path");
            tokio::fs::remove_dir_all(&cfg.data_path).await?;
        }

        state.crds = Some(crds::prepare(&cfg.crd_source, &cfg.data_path).await?);
        Ok(())
    }
}

/// Render the admin kubeconfig returned to the caller
pub struct CreateKubeconfig;

#[async_trait]
impl Phase for CreateKubeconfig {
    fn name(&self) -> &'static str {
        "create-kubeconfig"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let cfg = &ctx.config;
        let server = kubeconfig::external_server_url(&cfg.host_ips, cfg.apiserver_node_port)?;
        let pki = state.pki()?;
        let rendered = kubeconfig::render(
            &server,
            pki.ca_cert_pem(),
            &pki.admin.cert_pem,
            &pki.admin.key_pem,
        )?;
        info!(server = %server, "admin kubeconfig created");
        state.kubeconfig = Some(rendered);
        Ok(())
    }
}

/// Namespace, service account and controller-manager RBAC
pub struct CreateNamespace;

#[async_trait]
impl Phase for CreateNamespace {
    fn name(&self) -> &'static str {
        "create-namespace"
    }

    async fn run(&self, ctx: &PhaseContext, _state: &mut BootstrapState) -> Result<(), Error> {
        let ns = &ctx.config.namespace;
        let host = &ctx.host;
        create("namespace", host.create_namespace(ns)).await?;
        create(
            "service account",
            host.create_service_account(ns, CONTROLLER_MANAGER_NAME),
        )
        .await?;
        create(
            "cluster role",
            host.create_cluster_role(manifests::controller_manager_cluster_role()),
        )
        .await?;
        create(
            "cluster role binding",
            host.create_cluster_role_binding(manifests::controller_manager_cluster_role_binding(
                ns,
            )),
        )
        .await
    }
}

/// Persist credentials and certificates as secrets, then drop the PKI
pub struct CreateSecrets;

#[async_trait]
impl Phase for CreateSecrets {
    fn name(&self) -> &'static str {
        "create-secrets"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let cfg = &ctx.config;
        let ns = &cfg.namespace;
        let pki = state.pki()?;

        let in_cluster = kubeconfig::render(
            &cfg.in_cluster_server_url(),
            pki.ca_cert_pem(),
            &pki.admin.cert_pem,
            &pki.admin.key_pem,
        )?;
        let secrets = [
            manifests::kubeconfig_secret(ns, &in_cluster),
            manifests::etcd_cert_secret(ns, pki),
            manifests::karmada_cert_secret(ns, pki),
            manifests::webhook_cert_secret(ns, pki),
        ];
        for secret in secrets {
            let name = secret.metadata.name.clone().unwrap_or_default();
            create(&format!("secret {name}"), ctx.host.create_secret(secret)).await?;
        }

        // Private keys now live only in the cluster
        state.pki = None;
        Ok(())
    }
}

/// etcd, the API server and the aggregated API server.
///
/// Only the API server's readiness is required to continue.
pub struct DeployApiServerTier;

#[async_trait]
impl Phase for DeployApiServerTier {
    fn name(&self) -> &'static str {
        "deploy-apiserver-tier"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let cfg = &ctx.config;
        let host = &ctx.host;
        let timeouts = &cfg.timeouts;

        create("etcd service", host.create_service(manifests::etcd_service(cfg))).await?;
        create(
            "etcd client service",
            host.create_service(manifests::etcd_client_service(cfg)),
        )
        .await?;
        create(
            "etcd stateful set",
            host.create_stateful_set(manifests::etcd_stateful_set(cfg)),
        )
        .await?;
        wait_or_degrade(
            ctx,
            state,
            "etcd",
            selectors::ETCD,
            cfg.replicas.etcd,
            timeouts.etcd,
        )
        .await?;

        create(
            "apiserver service",
            host.create_service(manifests::apiserver_service(cfg)),
        )
        .await?;
        create(
            "apiserver deployment",
            host.create_deployment(manifests::apiserver_deployment(cfg)),
        )
        .await?;
        ctx.waiter
            .wait_ready(
                &cfg.namespace,
                selectors::APISERVER,
                usize::try_from(cfg.replicas.apiserver).unwrap_or(0),
                timeouts.apiserver,
                &ctx.cancel,
            )
            .await?;

        create(
            "aggregated apiserver service",
            host.create_service(manifests::aggregated_apiserver_service(cfg)),
        )
        .await?;
        create(
            "aggregated apiserver deployment",
            host.create_deployment(manifests::aggregated_apiserver_deployment(cfg)),
        )
        .await?;
        wait_or_degrade(
            ctx,
            state,
            "karmada-aggregated-apiserver",
            selectors::AGGREGATED_APISERVER,
            cfg.replicas.aggregated_apiserver,
            timeouts.aggregated_apiserver,
        )
        .await
    }
}

/// CRDs, aggregated API registration and the bootstrap token, applied
/// inside the new control plane
pub struct InstallResources;

#[async_trait]
impl Phase for InstallResources {
    fn name(&self) -> &'static str {
        "install-resources"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let ns = &ctx.config.namespace;
        let control_plane = ctx.connector.connect(state.kubeconfig()?).await?;

        create("control-plane namespace", control_plane.create_namespace(ns)).await?;

        let bundle = state
            .crds
            .as_ref()
            .ok_or_else(|| Error::internal("bootstrap", "CRD bundle is not available"))?;
        let documents = bundle.documents()?;
        let count = documents.len();
        for doc in documents {
            control_plane.apply(doc).await?;
        }
        info!(count, "CRDs installed");

        create(
            "aggregated apiserver external service",
            control_plane.create_service(manifests::aggregated_apiserver_external_service(ns)),
        )
        .await?;
        let ca = state
            .ca_cert_pem
            .as_deref()
            .ok_or_else(|| Error::internal("bootstrap", "CA certificate is not available"))?;
        control_plane
            .apply(manifests::aggregated_apiservice(ns, ca))
            .await?;

        let token = BootstrapToken::generate();
        create(
            "bootstrap token",
            control_plane.create_secret(token.to_secret(Utc::now())),
        )
        .await?;
        for binding in manifests::bootstrap_token_bindings() {
            create(
                "bootstrap token binding",
                control_plane.create_cluster_role_binding(binding),
            )
            .await?;
        }
        info!(token_id = token.id(), "bootstrap token created");
        state.token = Some(token);
        Ok(())
    }
}

/// kube-controller-manager, scheduler, controller-manager and webhook.
///
/// None of them gate anything later, so readiness timeouts only degrade.
pub struct DeployControllerTier;

#[async_trait]
impl Phase for DeployControllerTier {
    fn name(&self) -> &'static str {
        "deploy-controller-tier"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut BootstrapState) -> Result<(), Error> {
        let cfg = &ctx.config;
        let host = &ctx.host;
        let timeout = cfg.timeouts.components;

        create(
            "kube-controller-manager service",
            host.create_service(manifests::kube_controller_manager_service(cfg)),
        )
        .await?;
        create(
            "kube-controller-manager deployment",
            host.create_deployment(manifests::kube_controller_manager_deployment(cfg)),
        )
        .await?;
        wait_or_degrade(
            ctx,
            state,
            manifests::KUBE_CONTROLLER_MANAGER_NAME,
            selectors::KUBE_CONTROLLER_MANAGER,
            cfg.replicas.kube_controller_manager,
            timeout,
        )
        .await?;

        create(
            "scheduler deployment",
            host.create_deployment(manifests::scheduler_deployment(cfg)),
        )
        .await?;
        wait_or_degrade(
            ctx,
            state,
            manifests::SCHEDULER_NAME,
            selectors::SCHEDULER,
            cfg.replicas.scheduler,
            timeout,
        )
        .await?;

        create(
            "controller-manager deployment",
            host.create_deployment(manifests::controller_manager_deployment(cfg)),
        )
        .await?;
        wait_or_degrade(
            ctx,
            state,
            CONTROLLER_MANAGER_NAME,
            selectors::CONTROLLER_MANAGER,
            cfg.replicas.controller_manager,
            timeout,
        )
        .await?;

        create(
            "webhook service",
            host.create_service(manifests::webhook_service(cfg)),
        )
        .await?;
        create(
            "webhook deployment",
            host.create_deployment(manifests::webhook_deployment(cfg)),
        )
        .await?;
        wait_or_degrade(
            ctx,
            state,
            meridian_infra::pki::WEBHOOK_SERVICE,
            selectors::WEBHOOK,
            cfg.replicas.webhook,
            timeout,
        )
        .await
    }
}
