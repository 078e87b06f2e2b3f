//! PKI for a federation control plane
//!
//! Builds three independent roots and the leaves each of them signs:
//!
//! - `ca` (CN `karmada`): signs the admin client pair and the API server pair
//! - `front-proxy-ca`: signs the front-proxy client pair
//! - `etcd-ca`: signs the etcd server and client pairs
//!
//! CA keys live only in memory while the hierarchy is generated. Each CA pair
//! is returned alongside its leaves so the caller can seed secrets with it;
//! nothing is written anywhere by this module.
//!
//! SAN lists are assembled up front from the namespace and topology. A
//! component reached by a name or IP missing from its certificate fails the
//! TLS handshake at runtime, so every reachable name must be listed here.

use std::net::{IpAddr, Ipv4Addr};

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use tracing::debug;

/// Validity of every certificate in the hierarchy
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Pair name of the federation API root CA
pub const CA_PAIR: &str = "ca";
/// Pair name of the admin client certificate
pub const ADMIN_PAIR: &str = "karmada";
/// Pair name of the API server serving certificate
pub const APISERVER_PAIR: &str = "apiserver";
/// Pair name of the front-proxy root CA
pub const FRONT_PROXY_CA_PAIR: &str = "front-proxy-ca";
/// Pair name of the front-proxy client certificate
pub const FRONT_PROXY_CLIENT_PAIR: &str = "front-proxy-client";
/// Pair name of the etcd root CA
pub const ETCD_CA_PAIR: &str = "etcd-ca";
/// Pair name of the etcd server certificate
pub const ETCD_SERVER_PAIR: &str = "etcd-server";
/// Pair name of the etcd client certificate
pub const ETCD_CLIENT_PAIR: &str = "etcd-client";

/// In-cluster IP of the federation API server's `kubernetes` service
pub const SERVICE_CLUSTER_IP: Ipv4Addr = Ipv4Addr::new(10, 254, 0, 1);

/// Service names the control-plane certificates must cover
pub const APISERVER_SERVICE: &str = "karmada-apiserver";
/// Admission webhook service
pub const WEBHOOK_SERVICE: &str = "karmada-webhook";
/// Aggregated API server service
pub const AGGREGATED_APISERVER_SERVICE: &str = "karmada-aggregated-apiserver";
/// etcd headless service (also the StatefulSet name)
pub const ETCD_SERVICE: &str = "etcd";
/// etcd client service
pub const ETCD_CLIENT_SERVICE: &str = "etcd-client";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Building or signing a certificate failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// A SAN entry is not a valid DNS name
    #[error("invalid SAN '{0}'")]
    InvalidSan(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

impl From<PkiError> for meridian_common::Error {
    fn from(err: PkiError) -> Self {
        meridian_common::Error::cert_generation(err.to_string())
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

fn compute_validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

/// A certificate and its private key, PEM encoded
#[derive(Clone)]
pub struct CertificatePair {
    /// Pair name; secrets store it as `<name>.crt` / `<name>.key`
    pub name: String,
    /// PEM certificate
    pub cert_pem: String,
    /// PEM private key
    pub key_pem: String,
    /// Name of the CA pair that signed this one; `None` for a CA pair
    pub issuer: Option<String>,
}

impl CertificatePair {
    /// Whether this pair is a self-signed CA
    pub fn is_ca(&self) -> bool {
        self.issuer.is_none()
    }
}

impl std::fmt::Debug for CertificatePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificatePair")
            .field("name", &self.name)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// Ordered, de-duplicated subject alternative names
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SanList {
    dns: Vec<String>,
    ips: Vec<IpAddr>,
}

impl SanList {
    /// Add a DNS name unless already present
    pub fn dns(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && !self.dns.contains(&name) {
            self.dns.push(name);
        }
        self
    }

    /// Add an IP unless already present
    pub fn ip(mut self, ip: IpAddr) -> Self {
        if !self.ips.contains(&ip) {
            self.ips.push(ip);
        }
        self
    }

    /// DNS names in insertion order
    pub fn dns_names(&self) -> &[String] {
        &self.dns
    }

    /// IPs in insertion order
    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }

    /// SANs for the admin and API server certificates
    pub fn for_control_plane(
        namespace: &str,
        external_ips: &[IpAddr],
        external_dns: &[String],
        host_ips: &[IpAddr],
    ) -> Self {
        let mut sans = Self::default()
            .dns("localhost")
            .dns("kubernetes")
            .dns("kubernetes.default")
            .dns("kubernetes.default.svc");

        for svc in [APISERVER_SERVICE, WEBHOOK_SERVICE, AGGREGATED_APISERVER_SERVICE] {
            sans = sans
                .dns(svc)
                .dns(format!("{svc}.{namespace}.svc"))
                .dns(format!("{svc}.{namespace}.svc.cluster.local"));
        }
        sans = sans
            .dns(format!("*.{namespace}.svc.cluster.local"))
            .dns(format!("*.{namespace}.svc"));
        for name in external_dns {
            sans = sans.dns(name.trim());
        }

        for ip in external_ips {
            sans = sans.ip(*ip);
        }
        sans = sans
            .ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .ip(IpAddr::V4(SERVICE_CLUSTER_IP));
        for ip in host_ips {
            sans = sans.ip(*ip);
        }
        sans
    }

    /// SANs for the etcd server certificate
    pub fn for_etcd(namespace: &str, replicas: i32) -> Self {
        let mut sans = Self::default().dns("localhost");
        for i in 0..replicas.max(0) {
            sans = sans.dns(format!(
                "{ETCD_SERVICE}-{i}.{ETCD_SERVICE}.{namespace}.svc.cluster.local"
            ));
        }
        sans.dns(format!("{ETCD_CLIENT_SERVICE}.{namespace}.svc.cluster.local"))
            .ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn to_san_types(&self) -> Result<Vec<SanType>> {
        let mut out = Vec::with_capacity(self.dns.len() + self.ips.len());
        for name in &self.dns {
            let ia5 = Ia5String::try_from(name.clone())
                .map_err(|_| PkiError::InvalidSan(name.clone()))?;
            out.push(SanType::DnsName(ia5));
        }
        out.extend(self.ips.iter().copied().map(SanType::IpAddress));
        Ok(out)
    }
}

/// Inputs to [`generate_hierarchy`]
#[derive(Clone, Debug, Default)]
pub struct PkiConfig {
    /// Namespace the control plane runs in
    pub namespace: String,
    /// Operator-supplied extra IPs
    pub external_ips: Vec<IpAddr>,
    /// Operator-supplied extra DNS names
    pub external_dns: Vec<String>,
    /// Node IPs that will serve the API
    pub host_ips: Vec<IpAddr>,
    /// Number of etcd replicas
    pub etcd_replicas: i32,
}

/// Subject and usage of a leaf certificate
struct LeafSpec<'a> {
    name: &'a str,
    common_name: &'a str,
    organization: Option<&'a str>,
    sans: SanList,
}

/// A root CA held in memory while it signs leaves
struct CertificateAuthority {
    name: &'static str,
    key: KeyPair,
    cert_pem: String,
}

impl CertificateAuthority {
    fn new(name: &'static str, common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = compute_validity(CERT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate {name} key: {e}"))
        })?;
        let cert = params.self_signed(&key).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to self-sign {name}: {e}"))
        })?;

        Ok(Self {
            name,
            cert_pem: cert.pem(),
            key,
        })
    }

    fn sign(&self, leaf: LeafSpec<'_>) -> Result<CertificatePair> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(leaf.common_name.to_string()),
        );
        if let Some(org) = leaf.organization {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(org.to_string()));
        }
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let (not_before, not_after) = compute_validity(CERT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;
        params.subject_alt_names = leaf.sans.to_san_types()?;

        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate {} key: {e}", leaf.name))
        })?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &self.key)
            .map_err(|e| PkiError::ParseError(format!("failed to load {} as issuer: {e}", self.name)))?;
        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign {}: {e}", leaf.name))
        })?;

        debug!(pair = leaf.name, issuer = self.name, "signed certificate");
        Ok(CertificatePair {
            name: leaf.name.to_string(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            issuer: Some(self.name.to_string()),
        })
    }

    /// Consume the CA, keeping only its PEM encoding
    fn into_pair(self) -> CertificatePair {
        CertificatePair {
            name: self.name.to_string(),
            cert_pem: self.cert_pem,
            key_pem: self.key.serialize_pem(),
            issuer: None,
        }
    }
}

/// The complete bootstrap PKI
#[derive(Clone, Debug)]
pub struct PkiHierarchy {
    /// Federation API root CA
    pub ca: CertificatePair,
    /// Admin client (`system:admin` in `system:masters`)
    pub admin: CertificatePair,
    /// API server serving certificate
    pub apiserver: CertificatePair,
    /// Front-proxy root CA
    pub front_proxy_ca: CertificatePair,
    /// Front-proxy client
    pub front_proxy_client: CertificatePair,
    /// etcd root CA
    pub etcd_ca: CertificatePair,
    /// etcd server
    pub etcd_server: CertificatePair,
    /// etcd client used by the API server
    pub etcd_client: CertificatePair,
}

impl PkiHierarchy {
    /// All pairs, CAs first within each chain
    pub fn pairs(&self) -> [&CertificatePair; 8] {
        [
            &self.ca,
            &self.admin,
            &self.apiserver,
            &self.front_proxy_ca,
            &self.front_proxy_client,
            &self.etcd_ca,
            &self.etcd_server,
            &self.etcd_client,
        ]
    }

    /// PEM of the federation API root CA
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca.cert_pem
    }

    /// Look up a pair by name
    pub fn get(&self, name: &str) -> Option<&CertificatePair> {
        self.pairs().into_iter().find(|p| p.name == name)
    }
}

/// Generate the complete hierarchy.
///
/// All-or-nothing: the first failure discards everything generated so far.
pub fn generate_hierarchy(config: &PkiConfig) -> Result<PkiHierarchy> {
    let control_plane_sans = SanList::for_control_plane(
        &config.namespace,
        &config.external_ips,
        &config.external_dns,
        &config.host_ips,
    );

    let ca = CertificateAuthority::new(CA_PAIR, "karmada")?;
    let admin = ca.sign(LeafSpec {
        name: ADMIN_PAIR,
        common_name: "system:admin",
        organization: Some("system:masters"),
        sans: control_plane_sans.clone(),
    })?;
    let apiserver = ca.sign(LeafSpec {
        name: APISERVER_PAIR,
        common_name: "karmada-apiserver",
        organization: None,
        sans: control_plane_sans,
    })?;

    let front_proxy_ca = CertificateAuthority::new(FRONT_PROXY_CA_PAIR, "front-proxy-ca")?;
    let front_proxy_client = front_proxy_ca.sign(LeafSpec {
        name: FRONT_PROXY_CLIENT_PAIR,
        common_name: "front-proxy-client",
        organization: None,
        sans: SanList::default(),
    })?;

    let etcd_ca = CertificateAuthority::new(ETCD_CA_PAIR, "etcd-ca")?;
    let etcd_server = etcd_ca.sign(LeafSpec {
        name: ETCD_SERVER_PAIR,
        common_name: "karmada-etcd-server",
        organization: None,
        sans: SanList::for_etcd(&config.namespace, config.etcd_replicas),
    })?;
    let etcd_client = etcd_ca.sign(LeafSpec {
        name: ETCD_CLIENT_PAIR,
        common_name: "karmada-etcd-client",
        organization: None,
        sans: SanList::default(),
    })?;

    Ok(PkiHierarchy {
        ca: ca.into_pair(),
        admin,
        apiserver,
        front_proxy_ca: front_proxy_ca.into_pair(),
        front_proxy_client,
        etcd_ca: etcd_ca.into_pair(),
        etcd_server,
        etcd_client,
    })
}
