//! Built-in resource kinds

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::storage::v1::StorageClass;
use meridian_common::cluster_client::KubeClientRegistry;

use crate::processor::{KindNameLookup, ResourceKey, Scope};
use crate::provider::KubeResourceProvider;

macro_rules! namespaced {
    ($lookup:expr, $registry:expr, $ty:ty, $group:expr, $kind:expr) => {
        $lookup.register(
            Scope::Namespaced,
            ResourceKey::new($group, "v1", $kind),
            Arc::new(KubeResourceProvider::<$ty>::namespaced($registry.clone())),
        )
    };
}

macro_rules! cluster_scoped {
    ($lookup:expr, $registry:expr, $ty:ty, $group:expr, $kind:expr) => {
        $lookup.register(
            Scope::Cluster,
            ResourceKey::new($group, "v1", $kind),
            Arc::new(KubeResourceProvider::<$ty>::cluster_scoped($registry.clone())),
        )
    };
}

/// Lookup with a provider for every built-in kind
pub fn builtin_lookup(registry: Arc<KubeClientRegistry>) -> KindNameLookup {
    let mut lookup = KindNameLookup::new();

    namespaced!(lookup, registry, Deployment, "apps", "deployment");
    namespaced!(lookup, registry, StatefulSet, "apps", "statefulset");
    namespaced!(lookup, registry, DaemonSet, "apps", "daemonset");
    namespaced!(lookup, registry, Pod, "", "pod");
    namespaced!(lookup, registry, Service, "", "service");
    namespaced!(lookup, registry, ConfigMap, "", "configmap");
    namespaced!(lookup, registry, Secret, "", "secret");
    namespaced!(lookup, registry, Job, "batch", "job");
    namespaced!(lookup, registry, CronJob, "batch", "cronjob");
    namespaced!(lookup, registry, PersistentVolumeClaim, "", "persistentvolumeclaim");

    cluster_scoped!(lookup, registry, Node, "", "node");
    cluster_scoped!(lookup, registry, Namespace, "", "namespace");
    cluster_scoped!(lookup, registry, PersistentVolume, "", "persistentvolume");
    cluster_scoped!(lookup, registry, StorageClass, "storage.k8s.io", "storageclass");

    lookup
}
