//! Resource processor
//!
//! Routes get/list requests to the provider registered for a resource kind.
//! The namespace decides the scope: an empty namespace consults only
//! cluster-scoped providers, anything else only namespaced ones.
//!
//! Lookup matches on the kind name alone, so two kinds sharing a name across
//! API groups cannot be told apart. The match lives behind
//! [`ProviderLookup`] so a stricter group/version/kind lookup can replace
//! [`KindNameLookup`] without touching callers.

use std::sync::Arc;

use meridian_common::Error;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::provider::{ClusterTarget, ResourceProvider};
use crate::query::{ListResult, ResourceQuery};

/// Scope a provider serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Objects living in a namespace
    Namespaced,
    /// Cluster-wide objects
    Cluster,
}

impl Scope {
    /// Scope implied by a request's namespace
    pub fn for_namespace(namespace: &str) -> Self {
        if namespace.is_empty() {
            Self::Cluster
        } else {
            Self::Namespaced
        }
    }
}

/// Identity a provider is registered under
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    /// API group; empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Lowercase singular kind name, e.g. `deployment`
    pub resource: String,
}

impl ResourceKey {
    /// Create a key
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }
}

/// Finds the provider for a kind within a scope
pub trait ProviderLookup: Send + Sync {
    /// Provider for `kind` in `scope`, if any
    fn lookup(&self, scope: Scope, kind: &str) -> Option<Arc<dyn ResourceProvider>>;
}

/// Linear, kind-name-only lookup over per-scope registries
#[derive(Default)]
pub struct KindNameLookup {
    namespaced: Vec<(ResourceKey, Arc<dyn ResourceProvider>)>,
    cluster: Vec<(ResourceKey, Arc<dyn ResourceProvider>)>,
}

impl KindNameLookup {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` for `key` in `scope`
    pub fn register(
        &mut self,
        scope: Scope,
        key: ResourceKey,
        provider: Arc<dyn ResourceProvider>,
    ) -> &mut Self {
        match scope {
            Scope::Namespaced => self.namespaced.push((key, provider)),
            Scope::Cluster => self.cluster.push((key, provider)),
        }
        self
    }

    /// Registered keys in `scope`, in registration order
    pub fn keys(&self, scope: Scope) -> impl Iterator<Item = &ResourceKey> {
        let entries = match scope {
            Scope::Namespaced => &self.namespaced,
            Scope::Cluster => &self.cluster,
        };
        entries.iter().map(|(key, _)| key)
    }
}

impl ProviderLookup for KindNameLookup {
    fn lookup(&self, scope: Scope, kind: &str) -> Option<Arc<dyn ResourceProvider>> {
        let entries = match scope {
            Scope::Namespaced => &self.namespaced,
            Scope::Cluster => &self.cluster,
        };
        entries
            .iter()
            .find(|(key, _)| key.resource == kind)
            .map(|(_, provider)| Arc::clone(provider))
    }
}

/// Routes requests to resource providers
#[derive(Clone)]
pub struct ResourceProcessor {
    lookup: Arc<dyn ProviderLookup>,
}

impl ResourceProcessor {
    /// Processor over `lookup`
    pub fn new(lookup: Arc<dyn ProviderLookup>) -> Self {
        Self { lookup }
    }

    fn provider(&self, kind: &str, namespace: &str) -> Result<Arc<dyn ResourceProvider>, Error> {
        let scope = Scope::for_namespace(namespace);
        self.lookup.lookup(scope, kind).ok_or_else(|| {
            debug!(kind, ?scope, "no provider registered");
            Error::resource_not_supported(kind)
        })
    }

    /// Fetch one object of `kind`
    #[instrument(skip(self), fields(cluster = %target))]
    pub async fn get(
        &self,
        target: &ClusterTarget,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Value, Error> {
        self.provider(kind, namespace)?
            .get(target, namespace, name)
            .await
    }

    /// List objects of `kind`
    #[instrument(skip(self, query), fields(cluster = %target))]
    pub async fn list(
        &self,
        target: &ClusterTarget,
        kind: &str,
        namespace: &str,
        query: &ResourceQuery,
    ) -> Result<ListResult, Error> {
        self.provider(kind, namespace)?
            .list(target, namespace, query)
            .await
    }
}
