//! MemberCluster Custom Resource Definition
//!
//! A MemberCluster is the registration record for a Kubernetes cluster. It
//! carries the connection descriptor used to reach the cluster, the provider
//! tag reported to the federation, and optionally the install configuration
//! when this cluster hosts the federation control plane. Region and zone are
//! metadata labels so they can be used in selectors.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::overrides::BootstrapOverrides;
use crate::{Error, REGION_LABEL, ZONE_LABEL};

/// Specification for a MemberCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "meridian.dev",
    version = "v1alpha1",
    kind = "MemberCluster",
    plural = "memberclusters",
    shortname = "mc",
    status = "MemberClusterStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Joined","type":"boolean","jsonPath":".status.joined"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemberClusterSpec {
    /// Provider tag, e.g. the managed Kubernetes flavor
    #[serde(default)]
    pub provider: String,

    /// Disabled clusters are registered but not reachable through meridian
    #[serde(default = "default_true")]
    pub enable: bool,

    /// How to reach the cluster's API server
    pub connection: ConnectionSpec,

    /// Present when this cluster is to host the federation control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation: Option<FederationSpec>,
}

fn default_true() -> bool {
    true
}

/// How meridian authenticates to a member cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConnectionType {
    /// A complete kubeconfig
    #[default]
    Direct,
    /// API endpoint plus bearer token
    Token,
}

/// Connection descriptor for a member cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Which of the fields below are used
    #[serde(rename = "type", default)]
    pub type_: ConnectionType,

    /// Kubeconfig YAML (Direct)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    /// API server URL (Token)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_api_endpoint: Option<String>,

    /// Bearer token (Token)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    /// Skip TLS verification for token connections
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_tls_verify: bool,
}

impl ConnectionSpec {
    /// Check that the fields required by the connection type are present
    pub fn validate(&self) -> Result<(), Error> {
        match self.type_ {
            ConnectionType::Direct => {
                if self.kubeconfig.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::validation(
                        "direct connection requires a kubeconfig",
                    ));
                }
            }
            ConnectionType::Token => {
                if self.kubernetes_api_endpoint.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::validation(
                        "token connection requires kubernetesApiEndpoint",
                    ));
                }
                if self.bearer_token.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::validation("token connection requires bearerToken"));
                }
            }
        }
        Ok(())
    }
}

/// Federation control-plane settings for a hosting cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FederationSpec {
    /// Install the federation control plane on this cluster
    #[serde(default)]
    pub install_control_plane: bool,

    /// Overrides of the bootstrap defaults
    #[serde(default)]
    pub overrides: BootstrapOverrides,
}

/// Status for a MemberCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberClusterStatus {
    /// Whether the cluster is a member of the federation
    #[serde(default)]
    pub joined: bool,

    /// Secret (namespace/name) holding the control-plane kubeconfig and
    /// bootstrap token, set on the hosting cluster after install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_secret: Option<String>,

    /// Human-readable message about the last lifecycle operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MemberClusterStatus {
    /// Status after a successful join
    pub fn joined() -> Self {
        Self {
            joined: true,
            ..Default::default()
        }
    }

    /// Set the message
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl MemberCluster {
    /// Region label value; empty when unset
    pub fn region(&self) -> &str {
        self.labels().get(REGION_LABEL).map(String::as_str).unwrap_or("")
    }

    /// Zone label value; empty when unset
    pub fn zone(&self) -> &str {
        self.labels().get(ZONE_LABEL).map(String::as_str).unwrap_or("")
    }

    /// Whether this cluster is marked to host the federation control plane
    pub fn hosts_control_plane(&self) -> bool {
        self.spec
            .federation
            .as_ref()
            .is_some_and(|f| f.install_control_plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;
    use std::collections::BTreeMap;

    fn cluster(name: &str, region: Option<&str>) -> MemberCluster {
        let mut mc = MemberCluster::new(
            name,
            MemberClusterSpec {
                provider: "kubeadm".to_string(),
                enable: true,
                connection: ConnectionSpec {
                    type_: ConnectionType::Direct,
                    kubeconfig: Some("apiVersion: v1".to_string()),
                    ..Default::default()
                },
                federation: None,
            },
        );
        if let Some(region) = region {
            mc.metadata.labels = Some(BTreeMap::from([(
                REGION_LABEL.to_string(),
                region.to_string(),
            )]));
        }
        mc
    }

    #[test]
    fn story_region_comes_from_labels() {
        assert_eq!(cluster("east-1", Some("us-east")).region(), "us-east");
        assert_eq!(cluster("east-1", None).region(), "");
        assert_eq!(cluster("east-1", None).zone(), "");
    }

    #[test]
    fn story_only_marked_clusters_host_the_control_plane() {
        let mut mc = cluster("host", None);
        assert!(!mc.hosts_control_plane());

        mc.spec.federation = Some(FederationSpec {
            install_control_plane: true,
            overrides: BootstrapOverrides::default(),
        });
        assert!(mc.hosts_control_plane());
    }

    #[test]
    fn story_connection_requires_fields_for_its_type() {
        let direct = ConnectionSpec::default();
        assert!(direct.validate().is_err());

        let token = ConnectionSpec {
            type_: ConnectionType::Token,
            kubernetes_api_endpoint: Some("https://10.0.0.1:6443".to_string()),
            bearer_token: None,
            ..Default::default()
        };
        assert!(token.validate().is_err());

        let token = ConnectionSpec {
            bearer_token: Some("abc".to_string()),
            ..token
        };
        assert!(token.validate().is_ok());
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: MemberClusterSpec = serde_json::from_value(serde_json::json!({
            "connection": {"type": "Token", "kubernetesApiEndpoint": "https://a", "bearerToken": "t"}
        }))
        .expect("valid spec");
        assert!(spec.enable);
        assert_eq!(spec.connection.type_, ConnectionType::Token);
        assert!(spec.federation.is_none());
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = MemberCluster::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "meridian.dev");
    }
}
