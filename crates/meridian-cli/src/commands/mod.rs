//! CLI commands

use std::path::PathBuf;

use kube::Client;
use meridian_common::kube_utils;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::CliConfig;
use crate::Result;

pub mod crd;
pub mod install;
pub mod membership;
pub mod resources;

/// What every command runs with
#[derive(Debug)]
pub struct Context {
    kubeconfig: Option<PathBuf>,
    /// Loaded config file
    pub config: CliConfig,
}

impl Context {
    /// Context targeting the cluster in `kubeconfig`, or the inferred one
    pub fn new(kubeconfig: Option<PathBuf>, config: CliConfig) -> Self {
        Self { kubeconfig, config }
    }

    /// Client for the cluster the command targets
    pub async fn client(&self) -> Result<Client> {
        Ok(kube_utils::create_client(self.kubeconfig.as_deref()).await?)
    }
}

/// Token cancelled on Ctrl-C
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}
