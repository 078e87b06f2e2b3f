//! Custom Resource Definitions for meridian
//!
//! `MemberCluster` is the registration record for every cluster meridian
//! manages. Its optional federation block carries the overrides used when
//! the cluster is chosen to host the federation control plane.

mod cluster;
mod overrides;

pub use cluster::{
    ConnectionSpec, ConnectionType, FederationSpec, MemberCluster, MemberClusterSpec,
    MemberClusterStatus,
};
pub use overrides::{BootstrapOverrides, StorageMode};
