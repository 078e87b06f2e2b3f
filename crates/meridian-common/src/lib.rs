//! Common types for meridian: the error taxonomy, the MemberCluster CRD,
//! multi-cluster options, kube helpers and the cluster client registry.

#![deny(missing_docs)]

pub mod cluster_client;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod net;
pub mod options;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding meridian's own resources (persisted control-plane credentials)
pub const MERIDIAN_SYSTEM_NAMESPACE: &str = "meridian-system";

/// Label key carrying a member cluster's region
pub const REGION_LABEL: &str = "meridian.dev/region";

/// Label key carrying a member cluster's zone
pub const ZONE_LABEL: &str = "meridian.dev/zone";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "meridian";
