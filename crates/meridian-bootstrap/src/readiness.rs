//! Readiness waiter
//!
//! Polls a label-selected pod set until enough pods report Ready or a
//! deadline elapses. The three outcomes stay distinct so callers can pick a
//! policy per component:
//!
//! - [`Error::Timeout`]: the deadline elapsed
//! - [`Error::Transport`]: listing pods failed (returned immediately)
//! - [`Error::Cancelled`]: the caller's token fired

use std::sync::Arc;
use std::time::Duration;

use meridian_common::kube_utils::poll_until;
use meridian_common::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster_api::ClusterApi;

/// Waits for workloads to become ready
#[derive(Clone)]
pub struct ReadinessWaiter {
    api: Arc<dyn ClusterApi>,
    poll_interval: Duration,
}

impl ReadinessWaiter {
    /// Create a waiter polling `api` every `poll_interval`
    pub fn new(api: Arc<dyn ClusterApi>, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    /// Wait until at least `expected` pods matching `selector` are Ready.
    ///
    /// With `expected == 0` there is nothing to wait for.
    pub async fn wait_ready(
        &self,
        namespace: &str,
        selector: &str,
        expected: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if expected == 0 {
            return Ok(());
        }

        let what = format!("{expected} ready pod(s) {selector} in {namespace}");
        poll_until(&what, timeout, self.poll_interval, cancel, || async move {
            let readiness = self.api.pod_readiness(namespace, selector).await?;
            debug!(
                selector,
                ready = readiness.ready,
                total = readiness.total,
                expected,
                "polled readiness"
            );
            Ok(readiness.ready >= expected)
        })
        .await?;

        info!(selector, namespace, "pods ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_api::{MockClusterApi, PodReadiness};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn waiter(api: MockClusterApi) -> ReadinessWaiter {
        ReadinessWaiter::new(Arc::new(api), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn story_waits_until_enough_pods_are_ready() {
        let polls = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let mut api = MockClusterApi::new();
        api.expect_pod_readiness().returning(move |_, _| {
            let n = p.fetch_add(1, Ordering::SeqCst);
            Ok(PodReadiness { ready: n, total: 3 })
        });

        waiter(api)
            .wait_ready(
                "karmada-system",
                "app=etcd",
                3,
                Duration::from_secs(30),
                &CancellationToken::new(),
            )
            .await
            .expect("ready on fourth poll");
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn story_timeout_is_distinct_from_transport_failure() {
        let mut api = MockClusterApi::new();
        api.expect_pod_readiness()
            .returning(|_, _| Ok(PodReadiness { ready: 0, total: 1 }));
        let err = waiter(api)
            .wait_ready(
                "karmada-system",
                "app=karmada-apiserver",
                1,
                Duration::from_secs(120),
                &CancellationToken::new(),
            )
            .await
            .expect_err("never ready");
        assert!(matches!(err, Error::Timeout { timeout_secs: 120, .. }));

        let mut api = MockClusterApi::new();
        api.expect_pod_readiness()
            .times(1)
            .returning(|_, _| Err(Error::transport("list pods", "connection refused")));
        let err = waiter(api)
            .wait_ready(
                "karmada-system",
                "app=karmada-apiserver",
                1,
                Duration::from_secs(120),
                &CancellationToken::new(),
            )
            .await
            .expect_err("transport error");
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn story_cancellation_stops_polling() {
        let mut api = MockClusterApi::new();
        api.expect_pod_readiness()
            .returning(|_, _| Ok(PodReadiness { ready: 0, total: 0 }));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = waiter(api)
            .wait_ready("ns", "app=x", 1, Duration::from_secs(30), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn zero_expected_returns_immediately() {
        let api = MockClusterApi::new();
        waiter(api)
            .wait_ready("ns", "app=x", 0, Duration::from_secs(1), &CancellationToken::new())
            .await
            .expect("nothing to wait for");
    }
}
