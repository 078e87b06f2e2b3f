//! Federation control-plane bootstrap for meridian
//!
//! Installs a federation control plane into a host cluster:
//!
//! 1. pre-flight checks against the host ([`preflight`])
//! 2. an ordered list of phases ([`phases`]) driven by the
//!    [`BootstrapOrchestrator`]
//! 3. readiness gating between tiers ([`readiness`])
//!
//! All cluster access goes through [`cluster_api::ClusterApi`] so the
//! orchestrator can be exercised without a cluster.

#![deny(missing_docs)]

pub mod cluster_api;
pub mod config;
pub mod crds;
pub mod kubeconfig;
pub mod manifests;
pub mod orchestrator;
pub mod phases;
pub mod preflight;
pub mod readiness;
pub mod teardown;
pub mod token;

pub use cluster_api::{ClusterApi, ControlPlaneConnector, KubeClusterApi, KubeControlPlaneConnector};
pub use config::BootstrapConfig;
pub use orchestrator::{BootstrapOrchestrator, BootstrapResult};
pub use readiness::ReadinessWaiter;
