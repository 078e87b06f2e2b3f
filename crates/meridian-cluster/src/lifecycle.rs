//! Join/Unjoin of registered clusters

use std::sync::Arc;
use std::time::Duration;

use kube::{Config, ResourceExt};
use meridian_common::crd::MemberCluster;
use meridian_common::Error;
use tracing::{info, instrument};

use crate::membership::{FederationMembership, JoinOptions, UnjoinOptions, DEFAULT_UNJOIN_WAIT};

/// Moves registered clusters in and out of the federation
#[derive(Clone)]
pub struct ClusterLifecycle {
    membership: Arc<dyn FederationMembership>,
    unjoin_wait: Duration,
}

impl ClusterLifecycle {
    /// Lifecycle over `membership` with the default unjoin wait
    pub fn new(membership: Arc<dyn FederationMembership>) -> Self {
        Self {
            membership,
            unjoin_wait: DEFAULT_UNJOIN_WAIT,
        }
    }

    /// Override how long unjoin waits for teardown
    pub fn with_unjoin_wait(mut self, wait: Duration) -> Self {
        self.unjoin_wait = wait;
        self
    }

    /// Join `cluster`, reachable through `member`, to the control plane at `host`
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn join(
        &self,
        host: &Config,
        member: &Config,
        cluster: &MemberCluster,
    ) -> Result<(), Error> {
        let opts = JoinOptions::for_cluster(cluster);
        info!(
            namespace = %opts.cluster_namespace,
            region = %opts.region,
            "joining cluster"
        );
        self.membership.join_cluster(host, member, &opts).await
    }

    /// Remove `cluster` from the federation.
    ///
    /// A cluster that is not a member counts as unjoined.
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn unjoin(
        &self,
        host: &Config,
        member: &Config,
        cluster: &MemberCluster,
    ) -> Result<(), Error> {
        let opts = UnjoinOptions::for_cluster(cluster, self.unjoin_wait);
        info!(namespace = %opts.cluster_namespace, "unjoining cluster");
        match self.membership.unjoin_cluster(host, member, &opts).await {
            Err(e) if e.is_not_found() => {
                info!("cluster was not a member");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MockFederationMembership;
    use meridian_common::crd::{ConnectionSpec, MemberClusterSpec};
    use meridian_common::REGION_LABEL;
    use std::collections::BTreeMap;

    fn config(url: &str) -> Config {
        Config::new(url.parse().expect("valid url"))
    }

    fn cluster() -> MemberCluster {
        let mut mc = MemberCluster::new(
            "edge-1",
            MemberClusterSpec {
                provider: "k3s".to_string(),
                enable: true,
                connection: ConnectionSpec::default(),
                federation: None,
            },
        );
        mc.metadata.labels = Some(BTreeMap::from([(
            REGION_LABEL.to_string(),
            "eu-west".to_string(),
        )]));
        mc
    }

    #[tokio::test]
    async fn join_delegates_with_request_built_from_record() {
        let mut membership = MockFederationMembership::new();
        membership
            .expect_join_cluster()
            .withf(|host, member, opts| {
                host.cluster_url.host() == Some("cp")
                    && member.cluster_url.host() == Some("edge")
                    && opts.cluster_name == "edge-1"
                    && opts.cluster_namespace == "karmada-cluster"
                    && opts.provider == "k3s"
                    && opts.region == "eu-west"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let lifecycle = ClusterLifecycle::new(Arc::new(membership));
        lifecycle
            .join(&config("https://cp:32443"), &config("https://edge:6443"), &cluster())
            .await
            .expect("joined");
    }

    #[tokio::test]
    async fn story_unjoin_twice_both_succeed() {
        let mut membership = MockFederationMembership::new();
        let mut seq = mockall::Sequence::new();
        membership
            .expect_unjoin_cluster()
            .withf(|_, _, opts| opts.wait == Duration::from_secs(60))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        membership
            .expect_unjoin_cluster()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, opts| {
                Err(Error::NotFound(format!("cluster {}", opts.cluster_name)))
            });

        let lifecycle = ClusterLifecycle::new(Arc::new(membership));
        let (host, member) = (config("https://cp:32443"), config("https://edge:6443"));
        lifecycle.unjoin(&host, &member, &cluster()).await.expect("first unjoin");
        lifecycle.unjoin(&host, &member, &cluster()).await.expect("second unjoin");
    }

    #[tokio::test]
    async fn unjoin_failures_other_than_missing_propagate() {
        let mut membership = MockFederationMembership::new();
        membership
            .expect_unjoin_cluster()
            .withf(|_, _, opts| opts.wait == Duration::from_secs(5))
            .returning(|_, _, _| Err(Error::timeout("cluster removal", 5)));

        let lifecycle =
            ClusterLifecycle::new(Arc::new(membership)).with_unjoin_wait(Duration::from_secs(5));
        let err = lifecycle
            .unjoin(&config("https://cp:32443"), &config("https://edge:6443"), &cluster())
            .await
            .expect_err("timeout surfaces");
        assert!(err.is_timeout());
    }
}
