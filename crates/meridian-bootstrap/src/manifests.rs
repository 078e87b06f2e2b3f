//! Control-plane manifests
//!
//! Typed builders for every object bootstrap creates on the host cluster and
//! inside the new control plane. Builders are pure: they read the
//! [`BootstrapConfig`] and return k8s-openapi values.

use std::collections::BTreeMap;

use base64::Engine;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, HostPathVolumeSource,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use meridian_common::crd::StorageMode;
use meridian_infra::pki::{
    self, CertificatePair, PkiHierarchy, AGGREGATED_APISERVER_SERVICE, APISERVER_SERVICE,
    ETCD_CLIENT_SERVICE, ETCD_SERVICE, WEBHOOK_SERVICE,
};

use crate::config::BootstrapConfig;

/// Port the API server listens on inside its pod
pub const APISERVER_CONTAINER_PORT: i32 = 5443;
/// etcd client port
pub const ETCD_CLIENT_PORT: i32 = 2379;
/// etcd peer port
pub const ETCD_PEER_PORT: i32 = 2380;
const WEBHOOK_CONTAINER_PORT: i32 = 8443;
const KUBE_CONTROLLER_MANAGER_PORT: i32 = 10257;

/// Secret holding the in-cluster admin kubeconfig
pub const KUBECONFIG_SECRET: &str = "kubeconfig";
/// Secret holding the etcd CA and server pairs
pub const ETCD_CERT_SECRET: &str = "etcd-cert";
/// Secret holding every PKI pair
pub const KARMADA_CERT_SECRET: &str = "karmada-cert";
/// Secret holding the webhook serving pair
pub const WEBHOOK_CERT_SECRET: &str = "karmada-webhook-cert";

/// Service account and RBAC name for the federation controller-manager
pub const CONTROLLER_MANAGER_NAME: &str = "karmada-controller-manager";
/// Scheduler deployment name
pub const SCHEDULER_NAME: &str = "karmada-scheduler";
/// kube-controller-manager deployment and service name
pub const KUBE_CONTROLLER_MANAGER_NAME: &str = "kube-controller-manager";

/// APIService registered for the aggregated API server
pub const AGGREGATED_APISERVICE_NAME: &str = "v1alpha1.cluster.karmada.io";

/// Cluster role binding letting bootstrap tokens request node credentials
pub const BOOTSTRAP_TOKEN_BINDING: &str = "karmada:agent-bootstrap";
/// Cluster role binding auto-approving CSRs from bootstrap tokens
pub const BOOTSTRAP_AUTOAPPROVE_BINDING: &str = "karmada:agent-autoapprove-bootstrap";
/// Group bootstrap tokens authenticate as
pub const BOOTSTRAP_TOKEN_GROUP: &str = "system:bootstrappers:karmada:default-cluster-token";

const PKI_DIR: &str = "/etc/karmada/pki";
const ETCD_PKI_DIR: &str = "/etc/etcd/pki";
const KUBECONFIG_DIR: &str = "/etc/kubeconfig";
const ETCD_DATA_DIR: &str = "/var/lib/etcd";
const ETCD_DATA_VOLUME: &str = "etcd-data";

/// Label selector strings for readiness polling
pub mod selectors {
    /// etcd pods
    pub const ETCD: &str = "app=etcd";
    /// Federation API server pods
    pub const APISERVER: &str = "app=karmada-apiserver";
    /// Aggregated API server pods
    pub const AGGREGATED_APISERVER: &str = "app=karmada-aggregated-apiserver";
    /// kube-controller-manager pods
    pub const KUBE_CONTROLLER_MANAGER: &str = "app=kube-controller-manager";
    /// Federation scheduler pods
    pub const SCHEDULER: &str = "app=karmada-scheduler";
    /// Federation controller-manager pods
    pub const CONTROLLER_MANAGER: &str = "app=karmada-controller-manager";
    /// Admission webhook pods
    pub const WEBHOOK: &str = "app=karmada-webhook";
}

fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

fn meta(name: &str, namespace: &str, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(app)),
        ..Default::default()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pki_file(dir: &str, pair: &str, ext: &str) -> String {
    format!("{dir}/{pair}.{ext}")
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn pki_volume() -> Volume {
    secret_volume(KARMADA_CERT_SECRET, KARMADA_CERT_SECRET)
}

fn kubeconfig_volume() -> Volume {
    secret_volume(KUBECONFIG_SECRET, KUBECONFIG_SECRET)
}

fn kubeconfig_flag() -> String {
    format!("--kubeconfig={KUBECONFIG_DIR}/{KUBECONFIG_SECRET}")
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn cluster_ip_service(namespace: &str, name: &str, app: &str, ports: Vec<ServicePort>) -> Service {
    Service {
        metadata: meta(name, namespace, app),
        spec: Some(ServiceSpec {
            selector: Some(labels(app)),
            ports: Some(ports),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(namespace: &str, name: &str, replicas: i32, pod: PodSpec) -> Deployment {
    Deployment {
        metadata: meta(name, namespace, name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(name)),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn single_container_pod(container: Container, volumes: Vec<Volume>) -> PodSpec {
    PodSpec {
        containers: vec![container],
        volumes: Some(volumes),
        ..Default::default()
    }
}

// etcd

fn etcd_peer_host(index: i32, namespace: &str) -> String {
    format!("{ETCD_SERVICE}-{index}.{ETCD_SERVICE}.{namespace}.svc.cluster.local")
}

/// URL the API server uses to reach etcd
pub fn etcd_client_url(namespace: &str) -> String {
    format!("https://{ETCD_CLIENT_SERVICE}.{namespace}.svc.cluster.local:{ETCD_CLIENT_PORT}")
}

/// Headless service giving each etcd replica a stable DNS name
pub fn etcd_service(config: &BootstrapConfig) -> Service {
    Service {
        metadata: meta(ETCD_SERVICE, &config.namespace, ETCD_SERVICE),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels(ETCD_SERVICE)),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![
                service_port("client", ETCD_CLIENT_PORT, ETCD_CLIENT_PORT),
                service_port("server", ETCD_PEER_PORT, ETCD_PEER_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Client-facing etcd service
pub fn etcd_client_service(config: &BootstrapConfig) -> Service {
    cluster_ip_service(
        &config.namespace,
        ETCD_CLIENT_SERVICE,
        ETCD_SERVICE,
        vec![service_port("client", ETCD_CLIENT_PORT, ETCD_CLIENT_PORT)],
    )
}

fn etcd_command(config: &BootstrapConfig) -> Vec<String> {
    let ns = &config.namespace;
    let initial_cluster = (0..config.replicas.etcd)
        .map(|i| {
            format!(
                "{ETCD_SERVICE}-{i}=http://{}:{ETCD_PEER_PORT}",
                etcd_peer_host(i, ns)
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    let self_host = format!("$(POD_NAME).{ETCD_SERVICE}.{ns}.svc.cluster.local");

    vec![
        "/usr/local/bin/etcd".to_string(),
        "--name=$(POD_NAME)".to_string(),
        format!("--data-dir={ETCD_DATA_DIR}"),
        format!("--listen-client-urls=https://0.0.0.0:{ETCD_CLIENT_PORT}"),
        format!("--advertise-client-urls=https://{self_host}:{ETCD_CLIENT_PORT}"),
        format!("--listen-peer-urls=http://0.0.0.0:{ETCD_PEER_PORT}"),
        format!("--initial-advertise-peer-urls=http://{self_host}:{ETCD_PEER_PORT}"),
        format!("--initial-cluster={initial_cluster}"),
        "--initial-cluster-state=new".to_string(),
        "--client-cert-auth=true".to_string(),
        format!("--cert-file={}", pki_file(ETCD_PKI_DIR, pki::ETCD_SERVER_PAIR, "crt")),
        format!("--key-file={}", pki_file(ETCD_PKI_DIR, pki::ETCD_SERVER_PAIR, "key")),
        format!("--trusted-ca-file={}", pki_file(ETCD_PKI_DIR, pki::ETCD_CA_PAIR, "crt")),
    ]
}

/// etcd stateful set; storage follows the configured mode
pub fn etcd_stateful_set(config: &BootstrapConfig) -> StatefulSet {
    let storage = &config.storage;
    let mut volumes = vec![secret_volume(ETCD_CERT_SECRET, ETCD_CERT_SECRET)];
    let mut claims = None;

    match storage.mode {
        StorageMode::HostPath => volumes.push(Volume {
            name: ETCD_DATA_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: storage.host_data_path.clone(),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        }),
        StorageMode::EmptyDir => volumes.push(Volume {
            name: ETCD_DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }),
        StorageMode::Pvc => {
            claims = Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(ETCD_DATA_VOLUME.to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: storage.storage_class_name.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(storage.pvc_size.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
    }

    let node_selector = storage
        .node_selector
        .as_ref()
        .map(|s| BTreeMap::from([(s.key.clone(), s.value.clone())]));

    let data_mount = VolumeMount {
        name: ETCD_DATA_VOLUME.to_string(),
        mount_path: ETCD_DATA_DIR.to_string(),
        ..Default::default()
    };

    StatefulSet {
        metadata: meta(ETCD_SERVICE, &config.namespace, ETCD_SERVICE),
        spec: Some(StatefulSetSpec {
            replicas: Some(config.replicas.etcd),
            service_name: Some(ETCD_SERVICE.to_string()),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(labels(ETCD_SERVICE)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(ETCD_SERVICE)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_selector,
                    init_containers: Some(vec![Container {
                        name: "etcd-init".to_string(),
                        image: Some(config.images.etcd_init()),
                        command: Some(strings(&[
                            "sh",
                            "-c",
                            "mkdir -p /var/lib/etcd && chmod 700 /var/lib/etcd",
                        ])),
                        volume_mounts: Some(vec![data_mount.clone()]),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: ETCD_SERVICE.to_string(),
                        image: Some(config.images.etcd()),
                        command: Some(etcd_command(config)),
                        env: Some(vec![EnvVar {
                            name: "POD_NAME".to_string(),
                            value_from: Some(EnvVarSource {
                                field_ref: Some(ObjectFieldSelector {
                                    field_path: "metadata.name".to_string(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ports: Some(vec![
                            tcp_port("client", ETCD_CLIENT_PORT),
                            tcp_port("server", ETCD_PEER_PORT),
                        ]),
                        volume_mounts: Some(vec![
                            data_mount,
                            mount(ETCD_CERT_SECRET, ETCD_PKI_DIR),
                        ]),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: claims,
            ..Default::default()
        }),
        ..Default::default()
    }
}

// Federation API server

/// NodePort service exposing the API server outside the host cluster
pub fn apiserver_service(config: &BootstrapConfig) -> Service {
    let mut port = service_port(
        "server",
        APISERVER_CONTAINER_PORT,
        APISERVER_CONTAINER_PORT,
    );
    port.node_port = Some(config.apiserver_node_port);
    Service {
        metadata: meta(APISERVER_SERVICE, &config.namespace, APISERVER_SERVICE),
        spec: Some(ServiceSpec {
            selector: Some(labels(APISERVER_SERVICE)),
            ports: Some(vec![port]),
            type_: Some("NodePort".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn apiserver_command(config: &BootstrapConfig) -> Vec<String> {
    let pki = |pair: &str, ext: &str| pki_file(PKI_DIR, pair, ext);
    vec![
        "kube-apiserver".to_string(),
        "--allow-privileged=true".to_string(),
        "--authorization-mode=Node,RBAC".to_string(),
        format!("--client-ca-file={}", pki(pki::CA_PAIR, "crt")),
        "--enable-admission-plugins=NodeRestriction".to_string(),
        "--enable-bootstrap-token-auth=true".to_string(),
        format!("--etcd-cafile={}", pki(pki::ETCD_CA_PAIR, "crt")),
        format!("--etcd-certfile={}", pki(pki::ETCD_CLIENT_PAIR, "crt")),
        format!("--etcd-keyfile={}", pki(pki::ETCD_CLIENT_PAIR, "key")),
        format!("--etcd-servers={}", etcd_client_url(&config.namespace)),
        "--bind-address=0.0.0.0".to_string(),
        format!("--secure-port={APISERVER_CONTAINER_PORT}"),
        "--service-account-issuer=https://kubernetes.default.svc.cluster.local".to_string(),
        format!("--service-account-key-file={}", pki(pki::ADMIN_PAIR, "key")),
        format!("--service-account-signing-key-file={}", pki(pki::ADMIN_PAIR, "key")),
        "--service-cluster-ip-range=10.96.0.0/12".to_string(),
        format!("--tls-cert-file={}", pki(pki::APISERVER_PAIR, "crt")),
        format!("--tls-private-key-file={}", pki(pki::APISERVER_PAIR, "key")),
        format!("--proxy-client-cert-file={}", pki(pki::FRONT_PROXY_CLIENT_PAIR, "crt")),
        format!("--proxy-client-key-file={}", pki(pki::FRONT_PROXY_CLIENT_PAIR, "key")),
        format!("--requestheader-client-ca-file={}", pki(pki::FRONT_PROXY_CA_PAIR, "crt")),
        "--requestheader-allowed-names=front-proxy-client".to_string(),
        "--requestheader-extra-headers-prefix=X-Remote-Extra-".to_string(),
        "--requestheader-group-headers=X-Remote-Group".to_string(),
        "--requestheader-username-headers=X-Remote-User".to_string(),
        "--runtime-config=".to_string(),
    ]
}

/// Federation API server deployment
pub fn apiserver_deployment(config: &BootstrapConfig) -> Deployment {
    let container = Container {
        name: APISERVER_SERVICE.to_string(),
        image: Some(config.images.apiserver()),
        command: Some(apiserver_command(config)),
        ports: Some(vec![tcp_port("http", APISERVER_CONTAINER_PORT)]),
        volume_mounts: Some(vec![mount(KARMADA_CERT_SECRET, PKI_DIR)]),
        ..Default::default()
    };
    deployment(
        &config.namespace,
        APISERVER_SERVICE,
        config.replicas.apiserver,
        single_container_pod(container, vec![pki_volume()]),
    )
}

/// Aggregated API server service
pub fn aggregated_apiserver_service(config: &BootstrapConfig) -> Service {
    cluster_ip_service(
        &config.namespace,
        AGGREGATED_APISERVER_SERVICE,
        AGGREGATED_APISERVER_SERVICE,
        vec![service_port("https", 443, 443)],
    )
}

/// Aggregated API server deployment
pub fn aggregated_apiserver_deployment(config: &BootstrapConfig) -> Deployment {
    let pki = |pair: &str, ext: &str| pki_file(PKI_DIR, pair, ext);
    let container = Container {
        name: AGGREGATED_APISERVER_SERVICE.to_string(),
        image: Some(config.images.aggregated_apiserver()),
        command: Some(vec![
            "/bin/karmada-aggregated-apiserver".to_string(),
            kubeconfig_flag(),
            format!("--authentication-kubeconfig={KUBECONFIG_DIR}/{KUBECONFIG_SECRET}"),
            format!("--authorization-kubeconfig={KUBECONFIG_DIR}/{KUBECONFIG_SECRET}"),
            format!("--etcd-servers={}", etcd_client_url(&config.namespace)),
            format!("--etcd-cafile={}", pki(pki::ETCD_CA_PAIR, "crt")),
            format!("--etcd-certfile={}", pki(pki::ETCD_CLIENT_PAIR, "crt")),
            format!("--etcd-keyfile={}", pki(pki::ETCD_CLIENT_PAIR, "key")),
            format!("--tls-cert-file={}", pki(pki::ADMIN_PAIR, "crt")),
            format!("--tls-private-key-file={}", pki(pki::ADMIN_PAIR, "key")),
            "--audit-log-path=-".to_string(),
            "--feature-gates=APIPriorityAndFairness=false".to_string(),
            "--audit-log-maxage=0".to_string(),
            "--audit-log-maxbackup=0".to_string(),
        ]),
        volume_mounts: Some(vec![
            mount(KUBECONFIG_SECRET, KUBECONFIG_DIR),
            mount(KARMADA_CERT_SECRET, PKI_DIR),
        ]),
        ..Default::default()
    };
    deployment(
        &config.namespace,
        AGGREGATED_APISERVER_SERVICE,
        config.replicas.aggregated_apiserver,
        single_container_pod(container, vec![kubeconfig_volume(), pki_volume()]),
    )
}

// Controller tier

/// kube-controller-manager service
pub fn kube_controller_manager_service(config: &BootstrapConfig) -> Service {
    cluster_ip_service(
        &config.namespace,
        KUBE_CONTROLLER_MANAGER_NAME,
        KUBE_CONTROLLER_MANAGER_NAME,
        vec![service_port(
            "https",
            KUBE_CONTROLLER_MANAGER_PORT,
            KUBE_CONTROLLER_MANAGER_PORT,
        )],
    )
}

/// kube-controller-manager deployment running the namespace, garbage
/// collector and service-account controllers against the control plane
pub fn kube_controller_manager_deployment(config: &BootstrapConfig) -> Deployment {
    let pki = |pair: &str, ext: &str| pki_file(PKI_DIR, pair, ext);
    let container = Container {
        name: KUBE_CONTROLLER_MANAGER_NAME.to_string(),
        image: Some(config.images.kube_controller_manager()),
        command: Some(vec![
            "kube-controller-manager".to_string(),
            "--allocate-node-cidrs=true".to_string(),
            format!("--authentication-kubeconfig={KUBECONFIG_DIR}/{KUBECONFIG_SECRET}"),
            format!("--authorization-kubeconfig={KUBECONFIG_DIR}/{KUBECONFIG_SECRET}"),
            "--bind-address=0.0.0.0".to_string(),
            format!("--client-ca-file={}", pki(pki::CA_PAIR, "crt")),
            "--cluster-cidr=10.244.0.0/16".to_string(),
            format!("--cluster-name={}", crate::kubeconfig::CONTEXT_NAME),
            format!("--cluster-signing-cert-file={}", pki(pki::CA_PAIR, "crt")),
            format!("--cluster-signing-key-file={}", pki(pki::CA_PAIR, "key")),
            "--controllers=namespace,garbagecollector,serviceaccount-token".to_string(),
            kubeconfig_flag(),
            "--leader-elect=true".to_string(),
            "--node-cidr-mask-size=24".to_string(),
            format!("--root-ca-file={}", pki(pki::CA_PAIR, "crt")),
            format!("--service-account-private-key-file={}", pki(pki::ADMIN_PAIR, "key")),
            "--service-cluster-ip-range=10.96.0.0/12".to_string(),
            "--use-service-account-credentials=true".to_string(),
            "--v=4".to_string(),
        ]),
        ports: Some(vec![tcp_port("https", KUBE_CONTROLLER_MANAGER_PORT)]),
        volume_mounts: Some(vec![
            mount(KUBECONFIG_SECRET, KUBECONFIG_DIR),
            mount(KARMADA_CERT_SECRET, PKI_DIR),
        ]),
        ..Default::default()
    };
    deployment(
        &config.namespace,
        KUBE_CONTROLLER_MANAGER_NAME,
        config.replicas.kube_controller_manager,
        single_container_pod(container, vec![kubeconfig_volume(), pki_volume()]),
    )
}

/// Federation scheduler deployment
pub fn scheduler_deployment(config: &BootstrapConfig) -> Deployment {
    let container = Container {
        name: SCHEDULER_NAME.to_string(),
        image: Some(config.images.scheduler()),
        command: Some(vec![
            "/bin/karmada-scheduler".to_string(),
            kubeconfig_flag(),
            "--bind-address=0.0.0.0".to_string(),
            "--secure-port=10351".to_string(),
            "--enable-scheduler-estimator=true".to_string(),
            "--v=4".to_string(),
        ]),
        volume_mounts: Some(vec![mount(KUBECONFIG_SECRET, KUBECONFIG_DIR)]),
        ..Default::default()
    };
    deployment(
        &config.namespace,
        SCHEDULER_NAME,
        config.replicas.scheduler,
        single_container_pod(container, vec![kubeconfig_volume()]),
    )
}

/// Federation controller-manager deployment
pub fn controller_manager_deployment(config: &BootstrapConfig) -> Deployment {
    let container = Container {
        name: CONTROLLER_MANAGER_NAME.to_string(),
        image: Some(config.images.controller_manager()),
        command: Some(vec![
            "/bin/karmada-controller-manager".to_string(),
            kubeconfig_flag(),
            "--bind-address=0.0.0.0".to_string(),
            "--cluster-status-update-frequency=10s".to_string(),
            "--secure-port=10357".to_string(),
            format!("--leader-elect-resource-namespace={}", config.namespace),
            "--v=4".to_string(),
        ]),
        ports: Some(vec![tcp_port("metrics", 8080)]),
        volume_mounts: Some(vec![mount(KUBECONFIG_SECRET, KUBECONFIG_DIR)]),
        ..Default::default()
    };
    let mut pod = single_container_pod(container, vec![kubeconfig_volume()]);
    pod.service_account_name = Some(CONTROLLER_MANAGER_NAME.to_string());
    deployment(
        &config.namespace,
        CONTROLLER_MANAGER_NAME,
        config.replicas.controller_manager,
        pod,
    )
}

/// Admission webhook service
pub fn webhook_service(config: &BootstrapConfig) -> Service {
    cluster_ip_service(
        &config.namespace,
        WEBHOOK_SERVICE,
        WEBHOOK_SERVICE,
        vec![service_port("https", 443, WEBHOOK_CONTAINER_PORT)],
    )
}

/// Admission webhook deployment
pub fn webhook_deployment(config: &BootstrapConfig) -> Deployment {
    const CERT_DIR: &str = "/var/serving-cert";
    let container = Container {
        name: WEBHOOK_SERVICE.to_string(),
        image: Some(config.images.webhook()),
        command: Some(vec![
            "/bin/karmada-webhook".to_string(),
            kubeconfig_flag(),
            "--bind-address=0.0.0.0".to_string(),
            format!("--secure-port={WEBHOOK_CONTAINER_PORT}"),
            format!("--cert-dir={CERT_DIR}"),
            "--v=4".to_string(),
        ]),
        ports: Some(vec![tcp_port("webhook", WEBHOOK_CONTAINER_PORT)]),
        volume_mounts: Some(vec![
            mount(KUBECONFIG_SECRET, KUBECONFIG_DIR),
            mount(WEBHOOK_CERT_SECRET, CERT_DIR),
        ]),
        ..Default::default()
    };
    deployment(
        &config.namespace,
        WEBHOOK_SERVICE,
        config.replicas.webhook,
        single_container_pod(
            container,
            vec![
                kubeconfig_volume(),
                secret_volume(WEBHOOK_CERT_SECRET, WEBHOOK_CERT_SECRET),
            ],
        ),
    )
}

// RBAC

/// Cluster role for the federation controller-manager
pub fn controller_manager_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_MANAGER_NAME.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["*".to_string()]),
                resources: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                non_resource_urls: Some(vec!["*".to_string()]),
                verbs: vec!["get".to_string()],
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Binds the controller-manager service account to its cluster role
pub fn controller_manager_cluster_role_binding(namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_MANAGER_NAME.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CONTROLLER_MANAGER_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: CONTROLLER_MANAGER_NAME.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

fn group_binding(name: &str, role: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "Group".to_string(),
            name: BOOTSTRAP_TOKEN_GROUP.to_string(),
            api_group: Some("rbac.authorization.k8s.io".to_string()),
            ..Default::default()
        }]),
    }
}

/// Bindings letting bootstrap-token holders obtain agent credentials
pub fn bootstrap_token_bindings() -> Vec<ClusterRoleBinding> {
    vec![
        group_binding(BOOTSTRAP_TOKEN_BINDING, "system:node-bootstrapper"),
        group_binding(
            BOOTSTRAP_AUTOAPPROVE_BINDING,
            "system:certificates.k8s.io:certificatesigningrequests:nodeclient",
        ),
    ]
}

// Secrets

fn opaque_secret(namespace: &str, name: &str, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

fn pair_entries<'a>(pairs: impl IntoIterator<Item = &'a CertificatePair>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .flat_map(|p| {
            [
                (format!("{}.crt", p.name), p.cert_pem.clone()),
                (format!("{}.key", p.name), p.key_pem.clone()),
            ]
        })
        .collect()
}

/// In-cluster admin kubeconfig, read by the controller tier
pub fn kubeconfig_secret(namespace: &str, kubeconfig: &[u8]) -> Secret {
    opaque_secret(
        namespace,
        KUBECONFIG_SECRET,
        BTreeMap::from([(
            KUBECONFIG_SECRET.to_string(),
            String::from_utf8_lossy(kubeconfig).into_owned(),
        )]),
    )
}

/// etcd CA and server pairs
pub fn etcd_cert_secret(namespace: &str, pki: &PkiHierarchy) -> Secret {
    opaque_secret(
        namespace,
        ETCD_CERT_SECRET,
        pair_entries([&pki.etcd_ca, &pki.etcd_server]),
    )
}

/// Every pair in the hierarchy
pub fn karmada_cert_secret(namespace: &str, pki: &PkiHierarchy) -> Secret {
    opaque_secret(namespace, KARMADA_CERT_SECRET, pair_entries(pki.pairs()))
}

/// Webhook serving certificate as `tls.crt` / `tls.key`
pub fn webhook_cert_secret(namespace: &str, pki: &PkiHierarchy) -> Secret {
    opaque_secret(
        namespace,
        WEBHOOK_CERT_SECRET,
        BTreeMap::from([
            ("tls.crt".to_string(), pki.admin.cert_pem.clone()),
            ("tls.key".to_string(), pki.admin.key_pem.clone()),
        ]),
    )
}

// Objects applied inside the new control plane

/// ExternalName service letting the control plane reach the aggregated
/// API server running on the host cluster
pub fn aggregated_apiserver_external_service(namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(AGGREGATED_APISERVER_SERVICE.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(format!(
                "{AGGREGATED_APISERVER_SERVICE}.{namespace}.svc.cluster.local"
            )),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// APIService routing the cluster API group to the aggregated API server
pub fn aggregated_apiservice(namespace: &str, ca_cert_pem: &str) -> serde_json::Value {
    let ca_bundle = base64::engine::general_purpose::STANDARD.encode(ca_cert_pem);
    serde_json::json!({
        "apiVersion": "apiregistration.k8s.io/v1",
        "kind": "APIService",
        "metadata": {
            "name": AGGREGATED_APISERVICE_NAME,
            "labels": {
                "app": AGGREGATED_APISERVER_SERVICE,
                "apiserver": "true",
            },
        },
        "spec": {
            "caBundle": ca_bundle,
            "group": "cluster.karmada.io",
            "groupPriorityMinimum": 2000,
            "service": {
                "name": AGGREGATED_APISERVER_SERVICE,
                "namespace": namespace,
            },
            "version": "v1alpha1",
            "versionPriority": 10,
        },
    })
}
