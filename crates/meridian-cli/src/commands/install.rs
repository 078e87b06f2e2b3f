//! Install and uninstall the federation control plane

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use meridian_bootstrap::config::DEFAULT_NAMESPACE;
use meridian_bootstrap::{
    teardown, BootstrapConfig, BootstrapOrchestrator, KubeClusterApi, KubeControlPlaneConnector,
};
use meridian_common::crd::BootstrapOverrides;
use tracing::{info, warn};

use super::{shutdown_token, Context};
use crate::Result;

/// Install the control plane into the cluster the kubeconfig points at
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Namespace for the control plane
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// CRD bundle: a local .tar.gz path or an http(s) URL
    #[arg(long)]
    pub crds: Option<String>,

    /// NodePort exposing the federation API server
    #[arg(long)]
    pub node_port: Option<i32>,

    /// Extra IP for the API server certificate (repeatable)
    #[arg(long = "external-ip")]
    pub external_ips: Vec<String>,

    /// Where to write the control-plane kubeconfig
    #[arg(short, long, default_value = "karmada-apiserver.config")]
    pub output: PathBuf,
}

/// Remove the control plane
#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Namespace the control plane was installed into
    #[arg(short, long)]
    pub namespace: Option<String>,
}

/// Layer command-line flags over the config file's overrides
fn merged_overrides(base: &BootstrapOverrides, args: &InstallArgs) -> BootstrapOverrides {
    let mut overrides = base.clone();
    if let Some(ns) = &args.namespace {
        overrides.namespace = Some(ns.clone());
    }
    if let Some(crds) = &args.crds {
        overrides.crd_source = Some(crds.clone());
    }
    if let Some(port) = args.node_port {
        overrides.apiserver_node_port = Some(port);
    }
    if !args.external_ips.is_empty() {
        overrides.external_ips = Some(args.external_ips.clone());
    }
    overrides
}

/// Run `install`
pub async fn install(ctx: &Context, args: InstallArgs) -> Result<()> {
    let overrides = merged_overrides(&ctx.config.bootstrap, &args);
    let config = BootstrapConfig::default()
        .with_overrides(&overrides)?
        .with_image_overrides(&ctx.config.multicluster.federation);

    let host = KubeClusterApi::new(ctx.client().await?);
    let orchestrator =
        BootstrapOrchestrator::new(Arc::new(host), Arc::new(KubeControlPlaneConnector));
    let result = orchestrator.run(config, &shutdown_token()).await?;

    tokio::fs::write(&args.output, &result.kubeconfig).await?;
    info!(path = %args.output.display(), "control-plane kubeconfig written");
    if !result.degraded.is_empty() {
        warn!(degraded = ?result.degraded, "some components were not ready");
    }

    println!("Control plane installed.");
    println!("  kubeconfig:      {}", args.output.display());
    println!("  bootstrap token: {}", result.bootstrap_token);
    Ok(())
}

/// Run `uninstall`
pub async fn uninstall(ctx: &Context, args: UninstallArgs) -> Result<()> {
    let namespace = args
        .namespace
        .or_else(|| ctx.config.bootstrap.namespace.clone())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let host = KubeClusterApi::new(ctx.client().await?);
    teardown::uninstall(&host, &namespace).await?;
    println!("Control plane removed from {namespace}.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> InstallArgs {
        InstallArgs {
            namespace: None,
            crds: None,
            node_port: None,
            external_ips: Vec::new(),
            output: PathBuf::from("out.config"),
        }
    }

    #[test]
    fn flags_override_config_file() {
        let base = BootstrapOverrides {
            namespace: Some("from-file".to_string()),
            apiserver_node_port: Some(31000),
            ..Default::default()
        };
        let merged = merged_overrides(
            &base,
            &InstallArgs {
                namespace: Some("from-flag".to_string()),
                external_ips: vec!["192.0.2.10".to_string()],
                ..args()
            },
        );

        assert_eq!(merged.namespace.as_deref(), Some("from-flag"));
        assert_eq!(merged.apiserver_node_port, Some(31000));
        assert_eq!(merged.external_ips, Some(vec!["192.0.2.10".to_string()]));
        assert_eq!(merged.crd_source, None);
    }

    #[test]
    fn no_flags_keep_config_file() {
        let base = BootstrapOverrides {
            crd_source: Some("https://example.com/crds.tar.gz".to_string()),
            ..Default::default()
        };
        assert_eq!(merged_overrides(&base, &args()), base);
    }
}
