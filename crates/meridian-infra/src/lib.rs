//! Infrastructure components for meridian
//!
//! - **PKI**: the certificate hierarchy a federation control plane is
//!   bootstrapped with. See [`pki::generate_hierarchy`].
//!
//! The PKI is stateless: it returns PEM buffers and persistence is handled
//! by the bootstrap orchestrator (certificates end up in Kubernetes secrets).

pub mod pki;

pub use pki::{generate_hierarchy, CertificatePair, PkiConfig, PkiError, PkiHierarchy, SanList};
