//! Cluster client registry
//!
//! Resolves a (region, cluster) pair to a live API client. The first caller
//! for a key creates the client; concurrent callers for the same key wait on
//! that creation instead of racing to build duplicates. Cached clients are
//! read without locking beyond the shard lock of the map. Failed creations
//! are not cached and leave no entry behind, so the next caller retries.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::Api;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::crd::MemberCluster;
use crate::{kube_utils, Error};

/// Identity of a member cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    /// Region label of the cluster
    pub region: String,
    /// Cluster name
    pub cluster: String,
}

impl ClusterKey {
    /// Create a key
    pub fn new(region: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cluster: cluster.into(),
        }
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region, self.cluster)
    }
}

/// Creates API clients for member clusters
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClientFactory<C: Send + Sync + 'static>: Send + Sync {
    /// Build a client for the cluster identified by `key`
    async fn create(&self, key: &ClusterKey) -> Result<C, Error>;
}

/// Cached clients that can be dropped when a cluster goes away
pub trait ClientCache: Send + Sync {
    /// Drop the cached client for `key`, returning whether one was held
    fn invalidate(&self, key: &ClusterKey) -> bool;
}

/// Cache of member-cluster clients keyed by (region, cluster)
pub struct ClusterClientRegistry<C: Send + Sync + 'static> {
    factory: Arc<dyn ClusterClientFactory<C>>,
    clients: DashMap<ClusterKey, Arc<OnceCell<C>>>,
}

/// Registry of kube clients, as used outside tests
pub type KubeClientRegistry = ClusterClientRegistry<Client>;

impl<C: Clone + Send + Sync + 'static> ClusterClientRegistry<C> {
    /// Create an empty registry backed by `factory`
    pub fn new(factory: Arc<dyn ClusterClientFactory<C>>) -> Self {
        Self {
            factory,
            clients: DashMap::new(),
        }
    }

    /// Get the client for (region, cluster), creating it on first use.
    ///
    /// Any creation failure is reported as [`Error::ClusterUnreachable`].
    pub async fn client(&self, region: &str, cluster: &str) -> Result<C, Error> {
        let key = ClusterKey::new(region, cluster);
        // Clone the cell out so no map guard is held across the await
        let cell = Arc::clone(&*self.clients.entry(key.clone()).or_default());

        let factory = Arc::clone(&self.factory);
        let created = cell
            .get_or_try_init(|| {
                let key = key.clone();
                async move {
                    debug!(cluster = %key, "creating cluster client");
                    factory.create(&key).await
                }
            })
            .await;

        match created {
            Ok(client) => Ok(client.clone()),
            Err(e) => {
                self.clients.remove_if(&key, |_, c| c.get().is_none());
                Err(match e {
                    Error::ClusterUnreachable { .. } => e,
                    other => Error::cluster_unreachable(region, cluster, other.to_string()),
                })
            }
        }
    }

    /// Drop a cached client so the next lookup rebuilds it.
    ///
    /// Returns true if a client (or pending creation) was cached.
    pub fn invalidate(&self, key: &ClusterKey) -> bool {
        let removed = self.clients.remove(key).is_some();
        if removed {
            info!(cluster = %key, "invalidated cluster client");
        }
        removed
    }

    /// Number of keys with a cached or pending client
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry holds no keys
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<C: Clone + Send + Sync + 'static> ClientCache for ClusterClientRegistry<C> {
    fn invalidate(&self, key: &ClusterKey) -> bool {
        ClusterClientRegistry::invalidate(self, key)
    }
}

/// Builds kube clients from `MemberCluster` records on the host cluster
pub struct MemberClusterClientFactory {
    host: Client,
}

impl MemberClusterClientFactory {
    /// Create a factory reading registrations through `host`
    pub fn new(host: Client) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ClusterClientFactory<Client> for MemberClusterClientFactory {
    async fn create(&self, key: &ClusterKey) -> Result<Client, Error> {
        let unreachable = |msg: String| Error::cluster_unreachable(&key.region, &key.cluster, msg);

        let api: Api<MemberCluster> = Api::all(self.host.clone());
        let record = api
            .get(&key.cluster)
            .await
            .map_err(|e| unreachable(format!("failed to read registration: {e}")))?;

        if !record.spec.enable {
            return Err(unreachable("cluster is disabled".to_string()));
        }
        if record.region() != key.region {
            return Err(unreachable(format!(
                "cluster is registered in region {:?}",
                record.region()
            )));
        }

        let config = kube_utils::config_for_connection(&record.spec.connection)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let client = kube_utils::client_from_config(config);
        client.map_err(|e| unreachable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Factory that takes a while to build a client and counts invocations
    struct SlowFactory {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ClusterClientFactory<String> for SlowFactory {
        async fn create(&self, key: &ClusterKey) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(format!("client-{key}"))
        }
    }

    #[tokio::test]
    async fn story_concurrent_first_callers_share_one_creation() {
        let factory = Arc::new(SlowFactory {
            calls: AtomicU32::new(0),
        });
        let registry: Arc<ClusterClientRegistry<String>> =
            Arc::new(ClusterClientRegistry::new(factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.client("eu", "west-1").await
            }));
        }
        for handle in handles {
            let client = handle.await.expect("task completes").expect("client created");
            assert_eq!(client, "client-eu/west-1");
        }

        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn story_distinct_keys_get_distinct_clients() {
        let factory = Arc::new(SlowFactory {
            calls: AtomicU32::new(0),
        });
        let registry: ClusterClientRegistry<String> = ClusterClientRegistry::new(factory.clone());

        let a = registry.client("eu", "west-1").await.expect("created");
        let b = registry.client("us", "west-1").await.expect("created");
        assert_ne!(a, b);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn story_failures_are_not_cached() {
        let mut factory = MockClusterClientFactory::<String>::new();
        let mut seq = mockall::Sequence::new();
        factory
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::transport("connect", "connection refused")));
        factory
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|key| Ok(format!("client-{}", key.cluster)));

        let registry: ClusterClientRegistry<String> = ClusterClientRegistry::new(Arc::new(factory));

        let err = registry.client("eu", "west-1").await.expect_err("first attempt fails");
        match err {
            Error::ClusterUnreachable { region, cluster, message } => {
                assert_eq!(region, "eu");
                assert_eq!(cluster, "west-1");
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected ClusterUnreachable, got {other:?}"),
        }

        let client = registry.client("eu", "west-1").await.expect("second attempt succeeds");
        assert_eq!(client, "client-west-1");
    }

    #[tokio::test]
    async fn failed_lookups_leave_no_entries() {
        let mut factory = MockClusterClientFactory::<String>::new();
        factory
            .expect_create()
            .times(100)
            .returning(|key| Err(Error::cluster_unreachable(&key.region, &key.cluster, "unknown")));

        let registry: ClusterClientRegistry<String> = ClusterClientRegistry::new(Arc::new(factory));
        for i in 0..100 {
            let _ = registry.client("eu", &format!("missing-{i}")).await;
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failed_lookup_keeps_other_cached_clients() {
        let mut factory = MockClusterClientFactory::<String>::new();
        factory
            .expect_create()
            .returning(|key| match key.cluster.as_str() {
                "west-1" => Ok("client".to_string()),
                _ => Err(Error::transport("connect", "connection refused")),
            });

        let registry: ClusterClientRegistry<String> = ClusterClientRegistry::new(Arc::new(factory));
        registry.client("eu", "west-1").await.expect("created");
        registry.client("eu", "west-2").await.expect_err("unreachable");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn story_invalidate_forces_rebuild() {
        let mut factory = MockClusterClientFactory::<String>::new();
        factory
            .expect_create()
            .times(2)
            .returning(|_| Ok("client".to_string()));

        let registry: ClusterClientRegistry<String> = ClusterClientRegistry::new(Arc::new(factory));
        let key = ClusterKey::new("eu", "west-1");

        registry.client("eu", "west-1").await.expect("created");
        registry.client("eu", "west-1").await.expect("cached");
        assert!(registry.invalidate(&key));
        assert!(!registry.invalidate(&key));
        registry.client("eu", "west-1").await.expect("rebuilt");
    }
}
