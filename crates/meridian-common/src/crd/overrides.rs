//! Operator-supplied overrides for a control-plane install

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How the federation's etcd stores its data
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StorageMode {
    /// A directory on the node, pinned with a node selector
    #[default]
    HostPath,
    /// A PersistentVolumeClaim per replica
    #[serde(rename = "PVC")]
    Pvc,
    /// Ephemeral emptyDir; data is lost with the pod
    EmptyDir,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostPath => write!(f, "hostPath"),
            Self::Pvc => write!(f, "PVC"),
            Self::EmptyDir => write!(f, "emptyDir"),
        }
    }
}

/// Per-field overrides of the bootstrap defaults.
///
/// Every field is optional; `None` keeps the default.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapOverrides {
    /// Namespace the control plane is installed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// etcd storage mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_storage_mode: Option<StorageMode>,

    /// Host directory for etcd data in hostPath mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_host_data_path: Option<String>,

    /// Size of each etcd PVC (e.g. "5Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_pvc_size: Option<String>,

    /// StorageClass for etcd PVCs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// `key=value` selector pinning etcd to specific nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_node_selector: Option<String>,

    /// etcd replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_replicas: Option<i32>,

    /// Federation API server replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiserver_replicas: Option<i32>,

    /// Aggregated API server replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_apiserver_replicas: Option<i32>,

    /// kube-controller-manager replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_controller_manager_replicas: Option<i32>,

    /// Federation scheduler replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_replicas: Option<i32>,

    /// Federation controller-manager replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_manager_replicas: Option<i32>,

    /// Admission webhook replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_replicas: Option<i32>,

    /// NodePort exposing the federation API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiserver_node_port: Option<i32>,

    /// Extra IPs added to the API server certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ips: Option<Vec<String>>,

    /// Extra DNS names added to the API server certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_dns: Option<Vec<String>>,

    /// CRD bundle location: an http(s) URL or a local `.tar.gz` path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crd_source: Option<String>,

    /// Local directory for downloaded and extracted bundles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,

    /// Country code selecting the image registry mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mirror_country: Option<String>,
}
