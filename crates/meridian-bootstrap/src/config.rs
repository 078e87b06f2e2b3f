//! Bootstrap configuration
//!
//! An immutable value assembled once, in order, from:
//! 1. [`BootstrapConfig::default`]
//! 2. operator overrides ([`BootstrapConfig::with_overrides`])
//! 3. image overrides from the multi-cluster options
//! 4. topology discovered during pre-flight ([`BootstrapConfig::with_host_ips`])
//!
//! Every phase reads it; none mutates it.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use meridian_common::crd::{BootstrapOverrides, StorageMode};
use meridian_common::net::parse_ip;
use meridian_common::options::FederationImageOverrides;
use meridian_common::Error;

use crate::crds::CrdSource;

/// Default control-plane namespace
pub const DEFAULT_NAMESPACE: &str = "karmada-system";
/// Default etcd host data directory
pub const DEFAULT_ETCD_HOST_DATA_PATH: &str = "/var/lib/karmada-etcd";
/// Default etcd PVC size
pub const DEFAULT_ETCD_PVC_SIZE: &str = "5Gi";
/// Default API server NodePort
pub const DEFAULT_APISERVER_NODE_PORT: i32 = 32443;
/// Default CRD bundle location
pub const DEFAULT_CRD_SOURCE: &str = "/root/crds.tar.gz";
/// Default local data directory
pub const DEFAULT_DATA_PATH: &str = "/etc/karmada";
/// Default image mirror country
pub const DEFAULT_MIRROR_COUNTRY: &str = "cn";

/// Label applied to the node chosen to hold etcd host-path data
pub const ETCD_NODE_LABEL: &str = "karmada.io/etcd";

const GLOBAL_REGISTRY: &str = "k8s.gcr.io";
const CN_REGISTRY: &str = "registry.cn-hangzhou.aliyuncs.com/google_containers";

const DEFAULT_ETCD_IMAGE: &str = "etcd:3.5.3-0";
const DEFAULT_KUBE_APISERVER_IMAGE: &str = "kube-apiserver:v1.24.2";
const DEFAULT_KUBE_CONTROLLER_MANAGER_IMAGE: &str = "kube-controller-manager:v1.24.2";
const DEFAULT_ETCD_INIT_IMAGE: &str = "docker.io/alpine:3.15.1";
const DEFAULT_SCHEDULER_IMAGE: &str = "docker.io/karmada/karmada-scheduler:v1.2.0";
const DEFAULT_CONTROLLER_MANAGER_IMAGE: &str = "docker.io/karmada/karmada-controller-manager:v1.2.0";
const DEFAULT_WEBHOOK_IMAGE: &str = "docker.io/karmada/karmada-webhook:v1.2.0";
const DEFAULT_AGGREGATED_APISERVER_IMAGE: &str =
    "docker.io/karmada/karmada-aggregated-apiserver:v1.2.0";

/// Registry for a mirror country code, if one is known
fn mirror_registry(country: &str) -> Option<&'static str> {
    match country.to_ascii_lowercase().as_str() {
        "global" => Some(GLOBAL_REGISTRY),
        "cn" => Some(CN_REGISTRY),
        _ => None,
    }
}

/// A `key=value` node label selector; a bare `key` matches any value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSelector {
    /// Label key
    pub key: String,
    /// Label value; empty matches on key presence
    pub value: String,
}

impl NodeSelector {
    /// Parse `key=value` or `key`
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (key, value) = match s.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (s.trim(), ""),
        };
        if key.is_empty() {
            return Err(Error::validation(format!("invalid node selector {s:?}")));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Selector string for a list call
    pub fn to_label_selector(&self) -> String {
        if self.value.is_empty() {
            self.key.clone()
        } else {
            format!("{}={}", self.key, self.value)
        }
    }
}

impl std::fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_label_selector())
    }
}

/// etcd storage settings
#[derive(Clone, Debug, PartialEq)]
pub struct EtcdStorage {
    /// Storage mode
    pub mode: StorageMode,
    /// Host directory (host-path mode)
    pub host_data_path: String,
    /// PVC size (PVC mode)
    pub pvc_size: String,
    /// StorageClass (PVC mode)
    pub storage_class_name: Option<String>,
    /// Nodes etcd is pinned to
    pub node_selector: Option<NodeSelector>,
}

/// Replica counts per component
#[derive(Clone, Debug, PartialEq)]
pub struct Replicas {
    /// etcd
    pub etcd: i32,
    /// Federation API server
    pub apiserver: i32,
    /// Aggregated API server
    pub aggregated_apiserver: i32,
    /// kube-controller-manager
    pub kube_controller_manager: i32,
    /// Federation scheduler
    pub scheduler: i32,
    /// Federation controller-manager
    pub controller_manager: i32,
    /// Admission webhook
    pub webhook: i32,
}

impl Default for Replicas {
    fn default() -> Self {
        Self {
            etcd: 1,
            apiserver: 1,
            aggregated_apiserver: 1,
            kube_controller_manager: 1,
            scheduler: 1,
            controller_manager: 1,
            webhook: 1,
        }
    }
}

/// Image references; `None` resolves to a default
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Images {
    /// Explicit registry for kube components
    pub kube_image_registry: Option<String>,
    /// Mirror country used when no registry is given
    pub mirror_country: String,
    /// etcd
    pub etcd: Option<String>,
    /// etcd init container
    pub etcd_init: Option<String>,
    /// kube-apiserver
    pub apiserver: Option<String>,
    /// kube-controller-manager
    pub kube_controller_manager: Option<String>,
    /// Federation scheduler
    pub scheduler: Option<String>,
    /// Federation controller-manager
    pub controller_manager: Option<String>,
    /// Admission webhook
    pub webhook: Option<String>,
    /// Aggregated API server
    pub aggregated_apiserver: Option<String>,
}

impl Images {
    /// Registry for kube components: explicit, else mirror country, else global
    pub fn kube_registry(&self) -> &str {
        if let Some(registry) = self.kube_image_registry.as_deref() {
            return registry;
        }
        mirror_registry(&self.mirror_country).unwrap_or(GLOBAL_REGISTRY)
    }

    fn kube_image(&self, explicit: &Option<String>, default: &str) -> String {
        explicit
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.kube_registry(), default))
    }

    /// etcd image
    pub fn etcd(&self) -> String {
        self.kube_image(&self.etcd, DEFAULT_ETCD_IMAGE)
    }

    /// kube-apiserver image
    pub fn apiserver(&self) -> String {
        self.kube_image(&self.apiserver, DEFAULT_KUBE_APISERVER_IMAGE)
    }

    /// kube-controller-manager image
    pub fn kube_controller_manager(&self) -> String {
        self.kube_image(
            &self.kube_controller_manager,
            DEFAULT_KUBE_CONTROLLER_MANAGER_IMAGE,
        )
    }

    /// etcd init container image
    pub fn etcd_init(&self) -> String {
        self.etcd_init
            .clone()
            .unwrap_or_else(|| DEFAULT_ETCD_INIT_IMAGE.to_string())
    }

    /// Federation scheduler image
    pub fn scheduler(&self) -> String {
        self.scheduler
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEDULER_IMAGE.to_string())
    }

    /// Federation controller-manager image
    pub fn controller_manager(&self) -> String {
        self.controller_manager
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTROLLER_MANAGER_IMAGE.to_string())
    }

    /// Admission webhook image
    pub fn webhook(&self) -> String {
        self.webhook
            .clone()
            .unwrap_or_else(|| DEFAULT_WEBHOOK_IMAGE.to_string())
    }

    /// Aggregated API server image
    pub fn aggregated_apiserver(&self) -> String {
        self.aggregated_apiserver
            .clone()
            .unwrap_or_else(|| DEFAULT_AGGREGATED_APISERVER_IMAGE.to_string())
    }
}

/// Bounded readiness waits per tier
#[derive(Clone, Debug, PartialEq)]
pub struct ReadinessTimeouts {
    /// etcd (non-fatal)
    pub etcd: Duration,
    /// Federation API server (fatal)
    pub apiserver: Duration,
    /// Aggregated API server (non-fatal)
    pub aggregated_apiserver: Duration,
    /// Each controller-tier component (non-fatal)
    pub components: Duration,
    /// Interval between readiness polls
    pub poll_interval: Duration,
}

impl Default for ReadinessTimeouts {
    fn default() -> Self {
        Self {
            etcd: Duration::from_secs(30),
            apiserver: Duration::from_secs(120),
            aggregated_apiserver: Duration::from_secs(30),
            components: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Everything the bootstrap phases need to know
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapConfig {
    /// Namespace the control plane is installed into
    pub namespace: String,
    /// etcd storage
    pub storage: EtcdStorage,
    /// Replica counts
    pub replicas: Replicas,
    /// Images
    pub images: Images,
    /// NodePort exposing the API server
    pub apiserver_node_port: i32,
    /// Extra certificate IPs
    pub external_ips: Vec<IpAddr>,
    /// Extra certificate DNS names
    pub external_dns: Vec<String>,
    /// CRD bundle location
    pub crd_source: CrdSource,
    /// Local directory for CRD downloads and extraction
    pub data_path: PathBuf,
    /// Node IPs serving the API server; filled in by pre-flight
    pub host_ips: Vec<IpAddr>,
    /// Readiness waits
    pub timeouts: ReadinessTimeouts,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            storage: EtcdStorage {
                mode: StorageMode::HostPath,
                host_data_path: DEFAULT_ETCD_HOST_DATA_PATH.to_string(),
                pvc_size: DEFAULT_ETCD_PVC_SIZE.to_string(),
                storage_class_name: None,
                node_selector: None,
            },
            replicas: Replicas::default(),
            images: Images {
                mirror_country: DEFAULT_MIRROR_COUNTRY.to_string(),
                ..Default::default()
            },
            apiserver_node_port: DEFAULT_APISERVER_NODE_PORT,
            external_ips: Vec::new(),
            external_dns: Vec::new(),
            crd_source: CrdSource::parse(DEFAULT_CRD_SOURCE),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            host_ips: Vec::new(),
            timeouts: ReadinessTimeouts::default(),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl BootstrapConfig {
    /// Apply operator overrides; `None` fields keep the current value
    pub fn with_overrides(mut self, o: &BootstrapOverrides) -> Result<Self, Error> {
        if let Some(ns) = o.namespace.as_deref().and_then(non_empty) {
            self.namespace = ns;
        }
        if let Some(mode) = o.etcd_storage_mode {
            self.storage.mode = mode;
        }
        if let Some(path) = o.etcd_host_data_path.as_deref().and_then(non_empty) {
            self.storage.host_data_path = path;
        }
        if let Some(size) = o.etcd_pvc_size.as_deref().and_then(non_empty) {
            self.storage.pvc_size = size;
        }
        if let Some(class) = o.storage_class_name.as_deref().and_then(non_empty) {
            self.storage.storage_class_name = Some(class);
        }
        if let Some(selector) = o.etcd_node_selector.as_deref().and_then(non_empty) {
            self.storage.node_selector = Some(NodeSelector::parse(&selector)?);
        }

        let r = &mut self.replicas;
        let counts = [
            (&mut r.etcd, o.etcd_replicas, "etcd"),
            (&mut r.apiserver, o.apiserver_replicas, "apiserver"),
            (
                &mut r.aggregated_apiserver,
                o.aggregated_apiserver_replicas,
                "aggregatedApiserver",
            ),
            (
                &mut r.kube_controller_manager,
                o.kube_controller_manager_replicas,
                "kubeControllerManager",
            ),
            (&mut r.scheduler, o.scheduler_replicas, "scheduler"),
            (
                &mut r.controller_manager,
                o.controller_manager_replicas,
                "controllerManager",
            ),
            (&mut r.webhook, o.webhook_replicas, "webhook"),
        ];
        for (slot, value, name) in counts {
            if let Some(n) = value {
                if n < 1 {
                    return Err(Error::validation(format!(
                        "{name} replicas must be at least 1, got {n}"
                    )));
                }
                *slot = n;
            }
        }

        if let Some(port) = o.apiserver_node_port {
            if !(1..=65535).contains(&port) {
                return Err(Error::validation(format!("invalid node port {port}")));
            }
            self.apiserver_node_port = port;
        }
        if let Some(ips) = &o.external_ips {
            self.external_ips = ips
                .iter()
                .map(|ip| parse_ip(ip))
                .collect::<Result<Vec<_>, _>>()?;
        }
        if let Some(dns) = &o.external_dns {
            self.external_dns = dns.iter().filter_map(|d| non_empty(d)).collect();
        }
        if let Some(src) = o.crd_source.as_deref().and_then(non_empty) {
            self.crd_source = CrdSource::parse(&src);
        }
        if let Some(path) = o.data_path.as_deref().and_then(non_empty) {
            self.data_path = PathBuf::from(path);
        }
        if let Some(country) = o.image_mirror_country.as_deref().and_then(non_empty) {
            self.images.mirror_country = country;
        }
        Ok(self)
    }

    /// Apply image overrides; empty strings keep the current value
    pub fn with_image_overrides(mut self, o: &FederationImageOverrides) -> Self {
        let images = &mut self.images;
        let pairs = [
            (&mut images.kube_image_registry, &o.kube_image_registry),
            (&mut images.etcd, &o.etcd_image),
            (&mut images.etcd_init, &o.etcd_init_image),
            (&mut images.scheduler, &o.scheduler_image),
            (&mut images.controller_manager, &o.controller_manager_image),
            (&mut images.webhook, &o.webhook_image),
            (&mut images.aggregated_apiserver, &o.aggregated_apiserver_image),
        ];
        for (slot, value) in pairs {
            if let Some(v) = non_empty(value) {
                *slot = Some(v);
            }
        }
        self
    }

    /// Record the node IPs that will serve the API server
    pub fn with_host_ips(mut self, host_ips: Vec<IpAddr>) -> Self {
        self.host_ips = host_ips;
        self
    }

    /// Pin etcd to nodes matching `selector`
    pub fn with_etcd_node_selector(mut self, selector: NodeSelector) -> Self {
        self.storage.node_selector = Some(selector);
        self
    }

    /// In-cluster URL of the API server, used by in-cluster components
    pub fn in_cluster_server_url(&self) -> String {
        format!(
            "https://{}.{}.svc.cluster.local:{}",
            meridian_infra::pki::APISERVER_SERVICE,
            self.namespace,
            crate::manifests::APISERVER_CONTAINER_PORT
        )
    }
}
