//! Error types for meridian
//!
//! Variants map one-to-one onto the failure categories callers branch on:
//! readiness timeouts are distinguishable from transport failures, bootstrap
//! failures carry the phase they happened in, and "already exists" /
//! "not found" are surfaced as their own variants so idempotent operations
//! can tolerate them.

use thiserror::Error;

/// Main error type for meridian operations
#[derive(Debug, Error)]
pub enum Error {
    /// Key generation, signing or encoding of a certificate failed
    #[error("certificate generation error: {0}")]
    CertGeneration(String),

    /// A bounded wait elapsed before its condition was met
    #[error("timed out after {timeout_secs}s waiting for {what}")]
    Timeout {
        /// What was being waited on (e.g., "pods app=etcd")
        what: String,
        /// The deadline that elapsed, in seconds
        timeout_secs: u64,
    },

    /// An API call failed for a reason other than a timeout
    #[error("transport error [{context}]: {message}")]
    Transport {
        /// Operation that issued the call
        context: String,
        /// Description of the failure
        message: String,
    },

    /// No provider is registered for the requested resource kind
    #[error("resource {resource} is not supported")]
    ResourceNotSupported {
        /// The resource kind that was requested
        resource: String,
    },

    /// An API client for the member cluster could not be obtained
    #[error("cluster {cluster} in region {region} is unreachable: {message}")]
    ClusterUnreachable {
        /// Region of the cluster
        region: String,
        /// Cluster name
        cluster: String,
        /// Why the client could not be obtained
        message: String,
    },

    /// The target cluster has no node that can serve the control-plane API
    #[error("no available host: {0}")]
    NoAvailableHost(String),

    /// An explicit node selector matched no node
    #[error("no node found by label {selector}")]
    NodeSelectorNotFound {
        /// The selector that matched nothing
        selector: String,
    },

    /// A NodePort service already claims the configured API-server port
    #[error("node port {port} is already claimed by service {service}")]
    NodePortConflict {
        /// The conflicting port
        port: i32,
        /// namespace/name of the service holding it
        service: String,
    },

    /// The object being created already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The object being read or deleted does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller cancelled an in-flight operation
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The CRD bundle could not be downloaded, decompressed or read
    #[error("CRD bundle error: {0}")]
    CrdBundle(String),

    /// Invalid configuration or input
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },

    /// A bootstrap phase failed; wraps the underlying error
    #[error("bootstrap phase {phase} failed: {source}")]
    Phase {
        /// Name of the failed phase
        phase: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout_secs,
        }
    }

    /// Create a transport error with the operation that failed
    pub fn transport(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a resource-not-supported error
    pub fn resource_not_supported(resource: impl Into<String>) -> Self {
        Self::ResourceNotSupported {
            resource: resource.into(),
        }
    }

    /// Create a cluster-unreachable error
    pub fn cluster_unreachable(
        region: impl Into<String>,
        cluster: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterUnreachable {
            region: region.into(),
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a certificate generation error
    pub fn cert_generation(msg: impl Into<String>) -> Self {
        Self::CertGeneration(msg.into())
    }

    /// Create a CRD bundle error
    pub fn crd_bundle(msg: impl Into<String>) -> Self {
        Self::CrdBundle(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Wrap an error with the bootstrap phase it occurred in.
    ///
    /// Already-wrapped errors keep their original phase.
    pub fn in_phase(self, phase: impl Into<String>) -> Self {
        match self {
            Self::Phase { .. } => self,
            other => Self::Phase {
                phase: phase.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any phase context removed
    pub fn root(&self) -> &Error {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the bootstrap phase this error was raised in, if any
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::Phase { phase, .. } => Some(phase),
            _ => None,
        }
    }

    /// Whether this is an "already exists" error (after removing phase context)
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Self::AlreadyExists(_))
    }

    /// Whether this is a "not found" error (after removing phase context)
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    /// Whether this is a readiness timeout (after removing phase context)
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    /// Whether retrying the same call might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Self::Transport { .. } | Self::ClusterUnreachable { .. }
        )
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 409 => Self::AlreadyExists(ae.message),
            other => Self::transport("kube", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Treat "already exists" as success for idempotent creates.
pub fn ignore_already_exists(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

/// Treat "not found" as success for idempotent deletes.
pub fn ignore_not_found(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn kube_conflict_maps_to_already_exists() {
        let err: Error = api_error(409, "namespaces \"karmada-system\" already exists").into();
        assert!(err.is_already_exists());
        assert!(err.to_string().contains("karmada-system"));
    }

    #[test]
    fn kube_missing_maps_to_not_found() {
        let err: Error = api_error(404, "clusters \"member-1\" not found").into();
        assert!(err.is_not_found());
    }

    #[test]
    fn other_kube_failures_are_transport() {
        let err: Error = api_error(500, "etcdserver: request timed out").into();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn phase_context_is_preserved_and_unwrapped() {
        let err = Error::timeout("pods app=karmada-apiserver", 120).in_phase("deploy-apiserver-tier");
        assert_eq!(err.phase(), Some("deploy-apiserver-tier"));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("deploy-apiserver-tier"));
        assert!(err.to_string().contains("120s"));

        // Re-wrapping keeps the innermost phase
        let rewrapped = err.in_phase("other");
        assert_eq!(rewrapped.phase(), Some("deploy-apiserver-tier"));
    }

    #[test]
    fn idempotency_helpers() {
        assert!(ignore_already_exists(Err(Error::AlreadyExists("x".into()))).is_ok());
        assert!(ignore_already_exists(Err(Error::validation("x"))).is_err());
        assert!(ignore_not_found(Err(Error::NotFound("x".into()))).is_ok());
        assert!(ignore_not_found(Err(Error::transport("delete", "boom"))).is_err());
    }

    #[test]
    fn error_categorization_for_callers() {
        fn categorize(err: &Error) -> &'static str {
            match err.root() {
                Error::Timeout { .. } => "degrade_or_abort_by_phase",
                Error::Transport { .. } => "abort",
                Error::NodePortConflict { .. }
                | Error::NoAvailableHost(_)
                | Error::NodeSelectorNotFound { .. } => "preflight_reject",
                _ => "other",
            }
        }

        assert_eq!(
            categorize(&Error::timeout("etcd", 30).in_phase("deploy")),
            "degrade_or_abort_by_phase"
        );
        assert_eq!(categorize(&Error::transport("list", "refused")), "abort");
        assert_eq!(
            categorize(&Error::NodePortConflict {
                port: 32443,
                service: "default/web".into()
            }),
            "preflight_reject"
        );
    }
}
