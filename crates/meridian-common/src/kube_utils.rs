//! Kubernetes utility functions shared across meridian crates

use std::future::Future;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::crd::{ConnectionSpec, ConnectionType};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll until a condition holds, the deadline elapses, or the token is cancelled.
///
/// `check_fn` returns `Ok(true)` when the condition is met and `Ok(false)` to
/// keep polling. Unlike a best-effort poll, an `Err` from `check_fn` ends the
/// wait immediately so callers can tell transport failures from timeouts.
///
/// On timeout returns [`Error::Timeout`] describing `what`.
pub async fn poll_until<F, Fut>(
    what: &str,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("wait for {what}")));
        }

        if check_fn().await? {
            return Ok(());
        }
        trace!(what, "condition not yet met");

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(Error::timeout(what, timeout.as_secs()));
        }

        let sleep_for = poll_interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled(format!("wait for {what}")));
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

/// Build a kube Client from raw kubeconfig bytes
pub async fn client_from_kubeconfig(kubeconfig: &[u8]) -> Result<Client, Error> {
    client_from_config(config_from_kubeconfig(kubeconfig).await?)
}

/// Build a kube Client for an API endpoint authenticated with a bearer token
pub async fn client_from_token(
    endpoint: &str,
    token: &str,
    insecure_skip_tls_verify: bool,
) -> Result<Client, Error> {
    let parsed = token_kubeconfig(endpoint, token, insecure_skip_tls_verify)?;
    client_from_config(config_from_parsed(parsed).await?)
}

/// Load client configuration from raw kubeconfig bytes
pub async fn config_from_kubeconfig(kubeconfig: &[u8]) -> Result<Config, Error> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| Error::validation(format!("kubeconfig is not valid UTF-8: {e}")))?;
    let parsed = Kubeconfig::from_yaml(text)
        .map_err(|e| Error::validation(format!("invalid kubeconfig: {e}")))?;
    config_from_parsed(parsed).await
}

/// Client configuration for a registered cluster's connection descriptor
pub async fn config_for_connection(conn: &ConnectionSpec) -> Result<Config, Error> {
    conn.validate()?;
    match conn.type_ {
        ConnectionType::Direct => {
            let kubeconfig = conn.kubeconfig.as_deref().unwrap_or_default();
            config_from_kubeconfig(kubeconfig.as_bytes()).await
        }
        ConnectionType::Token => {
            let parsed = token_kubeconfig(
                conn.kubernetes_api_endpoint.as_deref().unwrap_or_default(),
                conn.bearer_token.as_deref().unwrap_or_default(),
                conn.insecure_skip_tls_verify,
            )?;
            config_from_parsed(parsed).await
        }
    }
}

/// Build a minimal single-context kubeconfig for endpoint + bearer token
pub fn token_kubeconfig(
    endpoint: &str,
    token: &str,
    insecure_skip_tls_verify: bool,
) -> Result<Kubeconfig, Error> {
    let doc = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "member",
            "cluster": {
                "server": endpoint,
                "insecure-skip-tls-verify": insecure_skip_tls_verify,
            }
        }],
        "users": [{ "name": "member", "user": { "token": token } }],
        "contexts": [{ "name": "member", "context": { "cluster": "member", "user": "member" } }],
        "current-context": "member",
    });
    Ok(serde_json::from_value(doc)?)
}

async fn config_from_parsed(kubeconfig: Kubeconfig) -> Result<Config, Error> {
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::validation(format!("failed to load kubeconfig: {e}")))?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(config)
}

/// Build a kube Client from loaded configuration
pub fn client_from_config(config: Config) -> Result<Client, Error> {
    Client::try_from(config)
        .map_err(|e| Error::internal("client_from_config", format!("failed to create client: {e}")))
}

/// Infer a kube Client from the environment, or read one from an explicit path
pub async fn create_client(kubeconfig_path: Option<&std::path::Path>) -> Result<Client, Error> {
    match kubeconfig_path {
        Some(path) => {
            let bytes = tokio::fs::read(path).await?;
            client_from_kubeconfig(&bytes).await
        }
        None => {
            let mut config = Config::infer()
                .await
                .map_err(|e| Error::internal("create_client", format!("failed to infer config: {e}")))?;
            config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
            config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
            client_from_config(config)
        }
    }
}
