//! Federation membership
//!
//! Push-mode membership: the control plane reaches the member cluster with a
//! service account token minted on the member. Joining creates that identity
//! on the member, stores its credentials in the membership namespace on the
//! control plane and registers a `Cluster` object pointing at them.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Client, Config, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use meridian_common::crd::MemberCluster;
use meridian_common::error::ignore_not_found;
use meridian_common::kube_utils::{client_from_config, poll_until};
use meridian_common::{Error, FIELD_MANAGER};

/// Namespace on both sides holding membership credentials
pub const MEMBERSHIP_NAMESPACE: &str = "karmada-cluster";

/// How long unjoin waits for the control plane to release a cluster
pub const DEFAULT_UNJOIN_WAIT: Duration = Duration::from_secs(60);

const CLUSTER_GROUP: &str = "cluster.karmada.io";
const CLUSTER_VERSION: &str = "v1alpha1";
const CLUSTER_KIND: &str = "Cluster";

const TOKEN_WAIT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Parameters of a join
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOptions {
    /// Name the cluster is known by in the federation
    pub cluster_name: String,
    /// Membership namespace
    pub cluster_namespace: String,
    /// Provider tag for scheduling spread
    pub provider: String,
    /// Region label; empty when unset
    pub region: String,
    /// Zone label; empty when unset
    pub zone: String,
}

impl JoinOptions {
    /// Join request for a registered cluster
    pub fn for_cluster(cluster: &MemberCluster) -> Self {
        Self {
            cluster_name: cluster.name_any(),
            cluster_namespace: MEMBERSHIP_NAMESPACE.to_string(),
            provider: cluster.spec.provider.clone(),
            region: cluster.region().to_string(),
            zone: cluster.zone().to_string(),
        }
    }
}

/// Parameters of an unjoin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnjoinOptions {
    /// Name the cluster is known by in the federation
    pub cluster_name: String,
    /// Membership namespace
    pub cluster_namespace: String,
    /// Bound on waiting for the control plane to drop the cluster
    pub wait: Duration,
}

impl UnjoinOptions {
    /// Unjoin request for a registered cluster
    pub fn for_cluster(cluster: &MemberCluster, wait: Duration) -> Self {
        Self {
            cluster_name: cluster.name_any(),
            cluster_namespace: MEMBERSHIP_NAMESPACE.to_string(),
            wait,
        }
    }
}

/// Adds clusters to and removes them from the federation.
///
/// `host` is the federation control plane, `member` the cluster joining or
/// leaving.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FederationMembership: Send + Sync {
    /// Make `member` a member of the federation at `host`
    async fn join_cluster(
        &self,
        host: &Config,
        member: &Config,
        opts: &JoinOptions,
    ) -> Result<(), Error>;

    /// Remove `member` from the federation.
    ///
    /// Returns [`Error::NotFound`] when the cluster was not a member.
    async fn unjoin_cluster(
        &self,
        host: &Config,
        member: &Config,
        opts: &UnjoinOptions,
    ) -> Result<(), Error>;
}

/// Name of the identity (service account, RBAC) created on the member
pub fn member_identity(cluster_name: &str) -> String {
    format!("karmada-{cluster_name}")
}

fn member_token_secret_name(cluster_name: &str) -> String {
    format!("{}-token", member_identity(cluster_name))
}

fn cluster_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        CLUSTER_GROUP,
        CLUSTER_VERSION,
        CLUSTER_KIND,
    ))
}

fn namespace_manifest(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    })
}

fn service_account_manifest(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": { "name": name, "namespace": namespace }
    })
}

/// Full access for the control plane on the member
fn cluster_role_manifest(name: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRole",
        "metadata": { "name": name },
        "rules": [
            { "apiGroups": ["*"], "resources": ["*"], "verbs": ["*"] },
            { "nonResourceURLs": ["*"], "verbs": ["get"] }
        ]
    })
}

fn cluster_role_binding_manifest(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": { "name": name },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": name
        },
        "subjects": [{ "kind": "ServiceAccount", "name": name, "namespace": namespace }]
    })
}

/// Long-lived token secret the member's token controller fills in
fn token_secret_manifest(namespace: &str, cluster_name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "kubernetes.io/service-account-token",
        "metadata": {
            "name": member_token_secret_name(cluster_name),
            "namespace": namespace,
            "annotations": {
                "kubernetes.io/service-account.name": member_identity(cluster_name)
            }
        }
    })
}

/// Credentials the control plane uses to reach the member
fn credentials_secret_manifest(opts: &JoinOptions, ca_bundle: &[u8], token: &[u8]) -> Value {
    let b64 = base64::engine::general_purpose::STANDARD;
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": opts.cluster_name, "namespace": opts.cluster_namespace },
        "data": {
            "caBundle": b64.encode(ca_bundle),
            "token": b64.encode(token)
        }
    })
}

/// The `Cluster` object registering the member with the control plane
fn cluster_manifest(opts: &JoinOptions, api_endpoint: &str, insecure: bool) -> Value {
    let mut spec = json!({
        "syncMode": "Push",
        "apiEndpoint": api_endpoint,
        "secretRef": { "namespace": opts.cluster_namespace, "name": opts.cluster_name },
        "insecureSkipTLSVerification": insecure
    });
    for (key, value) in [
        ("provider", &opts.provider),
        ("region", &opts.region),
        ("zone", &opts.zone),
    ] {
        if !value.is_empty() {
            spec[key] = json!(value);
        }
    }
    json!({
        "apiVersion": format!("{CLUSTER_GROUP}/{CLUSTER_VERSION}"),
        "kind": CLUSTER_KIND,
        "metadata": { "name": opts.cluster_name },
        "spec": spec
    })
}

fn deleted<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    ignore_not_found(result.map(drop).map_err(Error::from))
}

/// PEM bundle of the member's trusted roots, as configured in `member`
fn ca_bundle(member: &Config) -> Vec<u8> {
    member
        .root_cert
        .iter()
        .flatten()
        .map(|der| ::pem::encode(&::pem::Pem::new("CERTIFICATE", der.clone())))
        .collect::<String>()
        .into_bytes()
}

/// [`FederationMembership`] against live clusters
#[derive(Clone, Default)]
pub struct KubeFederationMembership {
    cancel: CancellationToken,
}

impl KubeFederationMembership {
    /// Membership whose waits end when `cancel` fires
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Set up the control plane's identity on the member and return its token
    async fn prepare_member(&self, member: &Client, opts: &JoinOptions) -> Result<Vec<u8>, Error> {
        let ns = &opts.cluster_namespace;
        let identity = member_identity(&opts.cluster_name);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let namespaces: Api<Namespace> = Api::all(member.clone());
        namespaces
            .patch(ns, &params, &Patch::Apply(&namespace_manifest(ns)))
            .await?;

        let accounts: Api<ServiceAccount> = Api::namespaced(member.clone(), ns);
        accounts
            .patch(&identity, &params, &Patch::Apply(&service_account_manifest(ns, &identity)))
            .await?;

        let roles: Api<ClusterRole> = Api::all(member.clone());
        roles
            .patch(&identity, &params, &Patch::Apply(&cluster_role_manifest(&identity)))
            .await?;

        let bindings: Api<ClusterRoleBinding> = Api::all(member.clone());
        bindings
            .patch(
                &identity,
                &params,
                &Patch::Apply(&cluster_role_binding_manifest(ns, &identity)),
            )
            .await?;

        let secret_name = member_token_secret_name(&opts.cluster_name);
        let secrets: Api<Secret> = Api::namespaced(member.clone(), ns);
        secrets
            .patch(
                &secret_name,
                &params,
                &Patch::Apply(&token_secret_manifest(ns, &opts.cluster_name)),
            )
            .await?;
        debug!(cluster = %opts.cluster_name, "member identity applied");

        poll_until(
            "member service account token",
            TOKEN_WAIT,
            POLL_INTERVAL,
            &self.cancel,
            || {
                let secrets = secrets.clone();
                let secret_name = secret_name.clone();
                async move {
                    let secret = secrets.get(&secret_name).await?;
                    Ok(secret
                        .data
                        .is_some_and(|data| data.get("token").is_some_and(|t| !t.0.is_empty())))
                }
            },
        )
        .await?;

        let secret = secrets.get(&secret_name).await?;
        secret
            .data
            .and_then(|mut data| data.remove("token"))
            .map(|token| token.0)
            .ok_or_else(|| Error::internal("join", "member token disappeared"))
    }

    async fn wait_cluster_gone(
        &self,
        clusters: &Api<DynamicObject>,
        opts: &UnjoinOptions,
    ) -> Result<(), Error> {
        poll_until(
            "cluster removal",
            opts.wait,
            POLL_INTERVAL,
            &self.cancel,
            || {
                let clusters = clusters.clone();
                let name = opts.cluster_name.clone();
                async move {
                    match clusters.get(&name).await {
                        Ok(_) => Ok(false),
                        Err(e) => match Error::from(e) {
                            Error::NotFound(_) => Ok(true),
                            other => Err(other),
                        },
                    }
                }
            },
        )
        .await
    }
}

#[async_trait]
impl FederationMembership for KubeFederationMembership {
    async fn join_cluster(
        &self,
        host: &Config,
        member: &Config,
        opts: &JoinOptions,
    ) -> Result<(), Error> {
        let host_client = client_from_config(host.clone())?;
        let member_client = client_from_config(member.clone())?;

        let token = self.prepare_member(&member_client, opts).await?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let ns = &opts.cluster_namespace;
        let namespaces: Api<Namespace> = Api::all(host_client.clone());
        namespaces
            .patch(ns, &params, &Patch::Apply(&namespace_manifest(ns)))
            .await?;

        let secrets: Api<Secret> = Api::namespaced(host_client.clone(), ns);
        secrets
            .patch(
                &opts.cluster_name,
                &params,
                &Patch::Apply(&credentials_secret_manifest(opts, &ca_bundle(member), &token)),
            )
            .await?;

        let endpoint = member.cluster_url.to_string();
        let cluster: DynamicObject =
            serde_json::from_value(cluster_manifest(opts, &endpoint, member.accept_invalid_certs))?;
        let clusters: Api<DynamicObject> = Api::all_with(host_client, &cluster_api_resource());
        clusters
            .patch(&opts.cluster_name, &params, &Patch::Apply(&cluster))
            .await?;

        info!(cluster = %opts.cluster_name, endpoint = %endpoint, "cluster joined");
        Ok(())
    }

    async fn unjoin_cluster(
        &self,
        host: &Config,
        member: &Config,
        opts: &UnjoinOptions,
    ) -> Result<(), Error> {
        let host_client = client_from_config(host.clone())?;
        let member_client = client_from_config(member.clone())?;

        let clusters: Api<DynamicObject> =
            Api::all_with(host_client.clone(), &cluster_api_resource());
        let was_member = match clusters.delete(&opts.cluster_name, &DeleteParams::default()).await {
            Ok(_) => true,
            Err(e) => match Error::from(e) {
                Error::NotFound(_) => false,
                other => return Err(other),
            },
        };
        if was_member {
            self.wait_cluster_gone(&clusters, opts).await?;
        }

        // Leftovers from a partial join or unjoin are removed either way
        let dp = DeleteParams::default();
        let ns = &opts.cluster_namespace;
        let identity = member_identity(&opts.cluster_name);

        let host_secrets: Api<Secret> = Api::namespaced(host_client, ns);
        deleted(host_secrets.delete(&opts.cluster_name, &dp).await)?;

        let bindings: Api<ClusterRoleBinding> = Api::all(member_client.clone());
        deleted(bindings.delete(&identity, &dp).await)?;
        let roles: Api<ClusterRole> = Api::all(member_client.clone());
        deleted(roles.delete(&identity, &dp).await)?;
        let member_secrets: Api<Secret> = Api::namespaced(member_client.clone(), ns);
        deleted(
            member_secrets
                .delete(&member_token_secret_name(&opts.cluster_name), &dp)
                .await,
        )?;
        let accounts: Api<ServiceAccount> = Api::namespaced(member_client, ns);
        deleted(accounts.delete(&identity, &dp).await)?;

        if !was_member {
            return Err(Error::NotFound(format!(
                "cluster {} is not a federation member",
                opts.cluster_name
            )));
        }
        info!(cluster = %opts.cluster_name, "cluster unjoined");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_common::crd::{ConnectionSpec, MemberClusterSpec};
    use meridian_common::{REGION_LABEL, ZONE_LABEL};
    use std::collections::BTreeMap;

    fn registered(labels: &[(&str, &str)]) -> MemberCluster {
        let mut mc = MemberCluster::new(
            "edge-1",
            MemberClusterSpec {
                provider: "kubeadm".to_string(),
                enable: true,
                connection: ConnectionSpec::default(),
                federation: None,
            },
        );
        mc.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        mc
    }

    #[test]
    fn story_join_request_carries_registration_labels() {
        let cluster = registered(&[(REGION_LABEL, "eu-west"), (ZONE_LABEL, "eu-west-1a")]);
        let opts = JoinOptions::for_cluster(&cluster);

        assert_eq!(opts.cluster_name, "edge-1");
        assert_eq!(opts.cluster_namespace, "karmada-cluster");
        assert_eq!(opts.provider, "kubeadm");
        assert_eq!(opts.region, "eu-west");
        assert_eq!(opts.zone, "eu-west-1a");

        let unjoin = UnjoinOptions::for_cluster(&cluster, DEFAULT_UNJOIN_WAIT);
        assert_eq!(unjoin.cluster_namespace, MEMBERSHIP_NAMESPACE);
        assert_eq!(unjoin.wait, Duration::from_secs(60));
    }

    #[test]
    fn unlabeled_cluster_joins_without_topology() {
        let opts = JoinOptions::for_cluster(&registered(&[]));
        assert!(opts.region.is_empty());
        assert!(opts.zone.is_empty());

        let cluster = cluster_manifest(&opts, "https://10.1.0.1:6443", false);
        assert!(cluster["spec"].get("region").is_none());
        assert!(cluster["spec"].get("zone").is_none());
        assert_eq!(cluster["spec"]["provider"], "kubeadm");
    }

    #[test]
    fn cluster_object_points_at_credentials() {
        let opts = JoinOptions::for_cluster(&registered(&[(REGION_LABEL, "us-east")]));
        let cluster = cluster_manifest(&opts, "https://10.1.0.1:6443", true);

        assert_eq!(cluster["apiVersion"], "cluster.karmada.io/v1alpha1");
        assert_eq!(cluster["kind"], "Cluster");
        assert_eq!(cluster["metadata"]["name"], "edge-1");
        assert_eq!(cluster["spec"]["syncMode"], "Push");
        assert_eq!(cluster["spec"]["apiEndpoint"], "https://10.1.0.1:6443");
        assert_eq!(cluster["spec"]["insecureSkipTLSVerification"], true);
        assert_eq!(cluster["spec"]["region"], "us-east");
        assert_eq!(
            cluster["spec"]["secretRef"],
            json!({ "namespace": "karmada-cluster", "name": "edge-1" })
        );

        let parsed: DynamicObject = serde_json::from_value(cluster).expect("valid object");
        assert_eq!(parsed.name_any(), "edge-1");
    }

    #[test]
    fn credentials_are_base64_encoded() {
        let opts = JoinOptions::for_cluster(&registered(&[]));
        let secret = credentials_secret_manifest(&opts, b"PEM", b"tok");
        assert_eq!(secret["metadata"]["namespace"], "karmada-cluster");
        assert_eq!(secret["data"]["caBundle"], "UEVN");
        assert_eq!(secret["data"]["token"], "dG9r");
    }

    #[test]
    fn member_rbac_binds_the_identity() {
        let identity = member_identity("edge-1");
        assert_eq!(identity, "karmada-edge-1");

        let binding = cluster_role_binding_manifest(MEMBERSHIP_NAMESPACE, &identity);
        assert_eq!(binding["roleRef"]["name"], "karmada-edge-1");
        assert_eq!(binding["subjects"][0]["namespace"], "karmada-cluster");

        let token = token_secret_manifest(MEMBERSHIP_NAMESPACE, "edge-1");
        assert_eq!(token["type"], "kubernetes.io/service-account-token");
        assert_eq!(
            token["metadata"]["annotations"]["kubernetes.io/service-account.name"],
            "karmada-edge-1"
        );
    }

    #[test]
    fn ca_bundle_is_pem_encoded_roots() {
        let mut config = Config::new("https://10.1.0.1:6443".parse().expect("url"));
        assert!(ca_bundle(&config).is_empty());

        config.root_cert = Some(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let bundle = String::from_utf8(ca_bundle(&config)).expect("utf8");
        assert_eq!(bundle.matches("-----BEGIN CERTIFICATE-----").count(), 2);
    }
}
