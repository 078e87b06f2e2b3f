//! Bootstrap tokens
//!
//! kubeadm-format `<id>.<secret>` tokens stored as `bootstrap-token-<id>`
//! secrets in `kube-system`, which the API server authenticates when
//! started with `--enable-bootstrap-token-auth`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;

use crate::manifests::BOOTSTRAP_TOKEN_GROUP;

/// Namespace bootstrap token secrets live in
pub const TOKEN_NAMESPACE: &str = "kube-system";
/// Secret type the API server recognizes
pub const TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";
/// Token lifetime
pub const TOKEN_TTL_HOURS: i64 = 24;

const ID_LEN: usize = 6;
const SECRET_LEN: usize = 16;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A bootstrap token
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    id: String,
    secret: String,
}

impl fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn random_string(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

impl BootstrapToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            id: random_string(&mut rng, ID_LEN),
            secret: random_string(&mut rng, SECRET_LEN),
        }
    }

    /// Public token id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full `<id>.<secret>` token string
    pub fn token(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }

    /// Name of the backing secret
    pub fn secret_name(&self) -> String {
        format!("bootstrap-token-{}", self.id)
    }

    /// Backing secret, expiring [`TOKEN_TTL_HOURS`] after `now`
    pub fn to_secret(&self, now: DateTime<Utc>) -> Secret {
        let expiration = (now + Duration::hours(TOKEN_TTL_HOURS))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let data = BTreeMap::from([
            ("description".to_string(), "meridian member cluster bootstrap".to_string()),
            ("token-id".to_string(), self.id.clone()),
            ("token-secret".to_string(), self.secret.clone()),
            ("expiration".to_string(), expiration),
            ("usage-bootstrap-authentication".to_string(), "true".to_string()),
            ("usage-bootstrap-signing".to_string(), "true".to_string()),
            ("auth-extra-groups".to_string(), BOOTSTRAP_TOKEN_GROUP.to_string()),
        ]);
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name()),
                namespace: Some(TOKEN_NAMESPACE.to_string()),
                ..Default::default()
            },
            type_: Some(TOKEN_SECRET_TYPE.to_string()),
            string_data: Some(data),
            ..Default::default()
        }
    }
}
