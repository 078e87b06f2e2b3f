//! Multi-cluster options
//!
//! Loaded from the CLI config file. Image overrides here feed the bootstrap
//! configuration; empty strings mean "use the default".

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default resync period for the cluster controller
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(120);

/// Default name of the cluster hosting the federation control plane
pub const DEFAULT_HOST_CLUSTER_NAME: &str = "host";

/// Top-level multi-cluster options
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiClusterOptions {
    /// Whether multi-cluster mode is enabled at all
    pub enable: bool,
    /// Resync period of the cluster controller, in seconds
    pub cluster_controller_resync_period_secs: u64,
    /// Name of the control-plane cluster
    pub host_cluster_name: String,
    /// Image overrides for the federation control plane
    pub federation: FederationImageOverrides,
}

impl Default for MultiClusterOptions {
    fn default() -> Self {
        Self {
            enable: false,
            cluster_controller_resync_period_secs: DEFAULT_RESYNC_PERIOD.as_secs(),
            host_cluster_name: DEFAULT_HOST_CLUSTER_NAME.to_string(),
            federation: FederationImageOverrides::default(),
        }
    }
}

impl MultiClusterOptions {
    /// The resync period as a Duration
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.cluster_controller_resync_period_secs)
    }

    /// Validate the options, collecting every problem found
    pub fn validate(&self) -> Result<(), Error> {
        let problems = qualified_name_errors(&self.host_cluster_name);
        if problems.is_empty() {
            return Ok(());
        }
        Err(Error::validation(format!(
            "invalid host cluster name {:?}: {}",
            self.host_cluster_name,
            problems.join("; ")
        )))
    }
}

/// Image overrides for control-plane components
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FederationImageOverrides {
    /// Registry for kube components (etcd, kube-apiserver, kube-controller-manager)
    pub kube_image_registry: String,
    /// etcd image
    pub etcd_image: String,
    /// etcd init container image
    pub etcd_init_image: String,
    /// Federation scheduler image
    pub scheduler_image: String,
    /// Federation controller-manager image
    pub controller_manager_image: String,
    /// Admission webhook image
    pub webhook_image: String,
    /// Aggregated API server image
    pub aggregated_apiserver_image: String,
}

const QUALIFIED_NAME_MAX_LENGTH: usize = 63;
const DNS_SUBDOMAIN_MAX_LENGTH: usize = 253;

/// Check a Kubernetes "qualified name" (optional DNS-subdomain prefix + `/` + name).
///
/// Returns a list of problems; empty means valid.
pub fn qualified_name_errors(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let (prefix, name) = match value.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, value),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() {
            errs.push("prefix part must be non-empty".to_string());
        } else if !is_dns_subdomain(prefix) {
            errs.push("prefix part must be a lowercase RFC 1123 subdomain".to_string());
        }
        if name.contains('/') {
            errs.push("must contain at most one '/'".to_string());
        }
    }

    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
        return errs;
    }
    if name.len() > QUALIFIED_NAME_MAX_LENGTH {
        errs.push(format!("name part must be no more than {QUALIFIED_NAME_MAX_LENGTH} characters"));
    }

    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_alphanumeric();
    let valid_inner = bytes
        .iter()
        .all(|&b| alnum(b) || b == b'-' || b == b'_' || b == b'.');
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) || !valid_inner {
        errs.push(
            "name part must consist of alphanumeric characters, '-', '_' or '.', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= DNS_SUBDOMAIN_MAX_LENGTH
        && value.split('.').all(|label| {
            let b = label.as_bytes();
            !b.is_empty()
                && b.len() <= 63
                && b.iter().all(|&c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-')
                && b[0] != b'-'
                && b[b.len() - 1] != b'-'
        })
}
