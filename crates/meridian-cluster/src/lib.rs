//! Member cluster lifecycle for meridian
//!
//! Joins registered clusters to the federation control plane and removes
//! them again, and decides on registration whether a cluster hosts the
//! control plane or joins it.

#![deny(missing_docs)]

pub mod lifecycle;
pub mod membership;
pub mod registration;

pub use lifecycle::ClusterLifecycle;
pub use membership::{
    FederationMembership, JoinOptions, KubeFederationMembership, UnjoinOptions,
    DEFAULT_UNJOIN_WAIT, MEMBERSHIP_NAMESPACE,
};
pub use registration::{
    ClusterRecordStore, ClusterRegistration, ControlPlaneInstaller, KubeClusterRecordStore,
    KubeControlPlaneInstaller,
};
