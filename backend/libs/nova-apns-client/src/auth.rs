/// Provider authentication
///
/// Token mode signs `{iss: team_id, iat: now}` with the team's ES256 auth key
/// and caches the result for `TOKEN_LIFETIME`. The token is renewed on the
/// first request after expiry, never ahead of time.
///
/// Certificate mode carries a PKCS#12 identity that the transport binds to
/// the TLS connection when it is created.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::ApnsError;

/// How long a provider token is reused before a new one is signed.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

const TOKEN_ALGORITHM: Algorithm = Algorithm::ES256;

/// Authentication material for one request or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMaterial {
    /// Value of the `authorization` header, `bearer <token>`
    Bearer(String),
    /// Client certificate consumed at connection creation
    Certificate { path: PathBuf, passphrase: String },
}

#[derive(Debug, Clone)]
struct AuthToken {
    value: String,
    issued_at: DateTime<Utc>,
}

impl AuthToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.issued_at + lifetime()
    }
}

fn lifetime() -> chrono::Duration {
    chrono::Duration::seconds(TOKEN_LIFETIME.as_secs() as i64)
}

#[derive(Serialize)]
struct ProviderClaims<'a> {
    iss: &'a str,
    iat: i64,
}

struct TokenSigner {
    key: EncodingKey,
    key_id: String,
    team_id: String,
    cache: Mutex<Option<AuthToken>>,
}

impl TokenSigner {
    fn bearer_at(&self, now: DateTime<Utc>) -> Result<String, ApnsError> {
        // Held for the whole check-then-set so concurrent callers sign once.
        let mut cache = self.cache.lock();

        if let Some(token) = cache.as_ref().filter(|t| t.is_valid_at(now)) {
            return Ok(format!("bearer {}", token.value));
        }

        debug!(key_id = %self.key_id, "Creating a new authentication token");

        let mut header = Header::new(TOKEN_ALGORITHM);
        header.kid = Some(self.key_id.clone());

        let claims = ProviderClaims {
            iss: &self.team_id,
            iat: now.timestamp(),
        };

        let value = encode(&header, &claims, &self.key)
            .map_err(|e| ApnsError::TokenSigning(e.to_string()))?;

        let bearer = format!("bearer {value}");
        *cache = Some(AuthToken {
            value,
            issued_at: now,
        });

        Ok(bearer)
    }
}

enum CredentialKind {
    Token(TokenSigner),
    Certificate {
        path: PathBuf,
        passphrase: String,
        pkcs12: Vec<u8>,
    },
}

/// Credential provider backing an `ApnsClient`.
pub struct Credentials {
    kind: CredentialKind,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CredentialKind::Token(signer) => f
                .debug_struct("Credentials::Token")
                .field("key_id", &signer.key_id)
                .field("team_id", &signer.team_id)
                .finish_non_exhaustive(),
            CredentialKind::Certificate { path, .. } => f
                .debug_struct("Credentials::Certificate")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// Load and validate key material. Malformed keys or certificates fail
    /// here rather than on the first push.
    pub fn from_config(auth: &AuthConfig) -> Result<Self, ApnsError> {
        let kind = match auth {
            AuthConfig::Token {
                key_path,
                key_id,
                team_id,
            } => {
                let pem = read_file(key_path, "auth key")?;
                let key = EncodingKey::from_ec_pem(&pem).map_err(|e| {
                    ApnsError::Config(format!(
                        "invalid auth key {}: {e}",
                        key_path.display()
                    ))
                })?;

                // PEM framing alone does not prove the key can sign.
                let claims = ProviderClaims {
                    iss: team_id,
                    iat: 0,
                };
                encode(&Header::new(TOKEN_ALGORITHM), &claims, &key).map_err(|e| {
                    ApnsError::Config(format!(
                        "auth key {} cannot sign ES256 tokens: {e}",
                        key_path.display()
                    ))
                })?;

                CredentialKind::Token(TokenSigner {
                    key,
                    key_id: key_id.clone(),
                    team_id: team_id.clone(),
                    cache: Mutex::new(None),
                })
            }
            AuthConfig::Certificate {
                cert_path,
                passphrase,
            } => {
                let pkcs12 = read_file(cert_path, "client certificate")?;
                reqwest::Identity::from_pkcs12_der(&pkcs12, passphrase).map_err(|e| {
                    ApnsError::Config(format!(
                        "invalid client certificate {}: {e}",
                        cert_path.display()
                    ))
                })?;

                CredentialKind::Certificate {
                    path: cert_path.clone(),
                    passphrase: passphrase.clone(),
                    pkcs12,
                }
            }
        };

        Ok(Self { kind })
    }

    pub fn is_token_auth(&self) -> bool {
        matches!(self.kind, CredentialKind::Token(_))
    }

    /// Current authentication material, signing a new token if needed.
    pub fn auth_material(&self) -> Result<AuthMaterial, ApnsError> {
        self.auth_material_at(Utc::now())
    }

    pub(crate) fn auth_material_at(&self, now: DateTime<Utc>) -> Result<AuthMaterial, ApnsError> {
        match &self.kind {
            CredentialKind::Token(signer) => signer.bearer_at(now).map(AuthMaterial::Bearer),
            CredentialKind::Certificate {
                path, passphrase, ..
            } => Ok(AuthMaterial::Certificate {
                path: path.clone(),
                passphrase: passphrase.clone(),
            }),
        }
    }

    /// `authorization` header value for token auth; `None` in certificate mode.
    pub fn authorization_header(&self) -> Result<Option<String>, ApnsError> {
        match self.auth_material()? {
            AuthMaterial::Bearer(value) => Ok(Some(value)),
            AuthMaterial::Certificate { .. } => Ok(None),
        }
    }

    /// TLS client identity for certificate auth; `None` in token mode.
    pub fn client_identity(&self) -> Result<Option<reqwest::Identity>, ApnsError> {
        match &self.kind {
            CredentialKind::Token(_) => Ok(None),
            CredentialKind::Certificate {
                path,
                passphrase,
                pkcs12,
            } => reqwest::Identity::from_pkcs12_der(pkcs12, passphrase)
                .map(Some)
                .map_err(|e| {
                    ApnsError::Config(format!(
                        "invalid client certificate {}: {e}",
                        path.display()
                    ))
                }),
        }
    }

    /// Drop the cached provider token, if any.
    pub fn reset_token(&self) {
        if let CredentialKind::Token(signer) = &self.kind {
            debug!("Resetting the existing authentication token");
            signer.cache.lock().take();
        }
    }

    #[cfg(test)]
    fn cached_issue_time(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            CredentialKind::Token(signer) => signer.cache.lock().as_ref().map(|t| t.issued_at),
            CredentialKind::Certificate { .. } => None,
        }
    }
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>, ApnsError> {
    fs::read(path)
        .map_err(|e| ApnsError::Config(format!("failed to read {what} {}: {e}", path.display())))
}
