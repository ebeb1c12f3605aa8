use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ApnsError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// APNs environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApnsMode {
    Production,
    Development,
}

impl ApnsMode {
    /// Get APNs base URL based on environment
    pub fn base_url(&self) -> &'static str {
        match self {
            ApnsMode::Production => "https://api.push.apple.com:443",
            ApnsMode::Development => "https://api.development.push.apple.com:443",
        }
    }
}

impl FromStr for ApnsMode {
    type Err = ApnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(ApnsMode::Production),
            "dev" | "development" | "sandbox" => Ok(ApnsMode::Development),
            other => Err(ApnsError::Config(format!(
                "unknown APNs mode '{other}', expected 'prod' or 'dev'"
            ))),
        }
    }
}

/// TLS trust root used to verify the APNs server certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RootCertificate {
    /// System trust store
    #[default]
    System,
    /// PEM bundle replacing the built-in roots
    Path(PathBuf),
    /// No server certificate verification
    Disabled,
}

/// Provider authentication mechanism. Exactly one is configured per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// ES256 provider token signed with a `.p8` auth key
    Token {
        key_path: PathBuf,
        key_id: String,
        team_id: String,
    },
    /// Mutual TLS with a PKCS#12 client certificate
    Certificate {
        cert_path: PathBuf,
        passphrase: String,
    },
}

/// APNs Configuration
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    pub mode: ApnsMode,
    pub root_certificate: RootCertificate,
    pub auth: AuthConfig,
    /// Replaces the mode's base URL (proxies, local test servers).
    pub endpoint_override: Option<String>,
    pub timeout: Duration,
}

impl ApnsConfig {
    pub fn builder(mode: ApnsMode) -> ApnsConfigBuilder {
        ApnsConfigBuilder::new(mode)
    }

    /// Load configuration from `APNS_*` environment variables.
    pub fn from_env() -> Result<Self, ApnsError> {
        let env: ApnsEnv = envy::prefixed("APNS_")
            .from_env()
            .map_err(|e| ApnsError::Config(format!("failed to read APNS_* variables: {e}")))?;
        env.into_builder()?.build()
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        self.endpoint_override
            .as_deref()
            .unwrap_or_else(|| self.mode.base_url())
    }
}

/// Collects loose credential fields and checks that they describe exactly
/// one authentication mechanism.
#[derive(Debug, Clone)]
pub struct ApnsConfigBuilder {
    mode: ApnsMode,
    root_certificate: RootCertificate,
    auth_key_path: Option<PathBuf>,
    auth_key_id: Option<String>,
    team_id: Option<String>,
    client_cert_path: Option<PathBuf>,
    client_cert_passphrase: Option<String>,
    endpoint_override: Option<String>,
    timeout: Duration,
}

impl ApnsConfigBuilder {
    pub fn new(mode: ApnsMode) -> Self {
        Self {
            mode,
            root_certificate: RootCertificate::System,
            auth_key_path: None,
            auth_key_id: None,
            team_id: None,
            client_cert_path: None,
            client_cert_passphrase: None,
            endpoint_override: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn root_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_certificate = RootCertificate::Path(path.into());
        self
    }

    pub fn disable_certificate_verification(mut self) -> Self {
        self.root_certificate = RootCertificate::Disabled;
        self
    }

    /// Set all token authentication fields at once.
    pub fn token_auth(
        self,
        key_path: impl Into<PathBuf>,
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Self {
        self.auth_key_path(key_path).auth_key_id(key_id).team_id(team_id)
    }

    pub fn auth_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_key_path = Some(path.into());
        self
    }

    pub fn auth_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.auth_key_id = Some(key_id.into());
        self
    }

    pub fn team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Set the PKCS#12 client certificate and its passphrase.
    pub fn client_certificate(
        mut self,
        path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.client_cert_path = Some(path.into());
        self.client_cert_passphrase = Some(passphrase.into());
        self
    }

    pub fn endpoint(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint_override = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ApnsConfig, ApnsError> {
        let key_path = self.auth_key_path.filter(|p| !p.as_os_str().is_empty());
        let key_id = non_empty(self.auth_key_id);
        let team_id = non_empty(self.team_id);
        let cert_path = self.client_cert_path.filter(|p| !p.as_os_str().is_empty());
        let passphrase = non_empty(self.client_cert_passphrase);

        let any_token = key_path.is_some() || key_id.is_some() || team_id.is_some();
        let any_cert = cert_path.is_some() || passphrase.is_some();

        let auth = match (any_token, any_cert) {
            (true, true) => {
                return Err(ApnsError::Config(
                    "both token and certificate credentials were provided; choose one".to_string(),
                ))
            }
            (true, false) => match (key_path, key_id, team_id) {
                (Some(key_path), Some(key_id), Some(team_id)) => AuthConfig::Token {
                    key_path,
                    key_id,
                    team_id,
                },
                _ => {
                    return Err(ApnsError::Config(
                        "token auth requires auth key path, key id and team id".to_string(),
                    ))
                }
            },
            (false, true) => match (cert_path, passphrase) {
                (Some(cert_path), Some(passphrase)) => AuthConfig::Certificate {
                    cert_path,
                    passphrase,
                },
                _ => {
                    return Err(ApnsError::Config(
                        "certificate auth requires certificate path and passphrase".to_string(),
                    ))
                }
            },
            (false, false) => {
                return Err(ApnsError::Config(
                    "either the auth key or the client certificate must be provided".to_string(),
                ))
            }
        };

        Ok(ApnsConfig {
            mode: self.mode,
            root_certificate: self.root_certificate,
            auth,
            endpoint_override: non_empty(self.endpoint_override),
            timeout: self.timeout,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct ApnsEnv {
    mode: String,
    root_cert_path: Option<PathBuf>,
    #[serde(default = "default_verify_tls")]
    verify_tls: bool,
    auth_key_path: Option<PathBuf>,
    auth_key_id: Option<String>,
    team_id: Option<String>,
    client_cert_path: Option<PathBuf>,
    client_cert_passphrase: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

fn default_verify_tls() -> bool {
    true
}

impl ApnsEnv {
    fn into_builder(self) -> Result<ApnsConfigBuilder, ApnsError> {
        let mut builder = ApnsConfigBuilder::new(self.mode.parse()?);
        builder.auth_key_path = self.auth_key_path;
        builder.auth_key_id = self.auth_key_id;
        builder.team_id = self.team_id;
        builder.client_cert_path = self.client_cert_path;
        builder.client_cert_passphrase = self.client_cert_passphrase;
        builder.endpoint_override = self.endpoint;

        if let Some(path) = self.root_cert_path.filter(|p| !p.as_os_str().is_empty()) {
            builder = builder.root_cert_path(path);
        }
        if !self.verify_tls {
            builder = builder.disable_certificate_verification();
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const APNS_VARS: &[&str] = &[
        "APNS_MODE",
        "APNS_ROOT_CERT_PATH",
        "APNS_VERIFY_TLS",
        "APNS_AUTH_KEY_PATH",
        "APNS_AUTH_KEY_ID",
        "APNS_TEAM_ID",
        "APNS_CLIENT_CERT_PATH",
        "APNS_CLIENT_CERT_PASSPHRASE",
        "APNS_ENDPOINT",
        "APNS_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in APNS_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_mode_base_urls() {
        assert_eq!(
            ApnsMode::Production.base_url(),
            "https://api.push.apple.com:443"
        );
        assert_eq!(
            ApnsMode::Development.base_url(),
            "https://api.development.push.apple.com:443"
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("prod".parse::<ApnsMode>().unwrap(), ApnsMode::Production);
        assert_eq!("DEV".parse::<ApnsMode>().unwrap(), ApnsMode::Development);
        assert_eq!("sandbox".parse::<ApnsMode>().unwrap(), ApnsMode::Development);
        assert!("staging".parse::<ApnsMode>().is_err());
    }

    #[test]
    fn test_token_auth_builds() {
        let config = ApnsConfig::builder(ApnsMode::Production)
            .token_auth("/keys/AuthKey.p8", "KEY123", "TEAM123")
            .build()
            .unwrap();

        assert_eq!(
            config.auth,
            AuthConfig::Token {
                key_path: PathBuf::from("/keys/AuthKey.p8"),
                key_id: "KEY123".to_string(),
                team_id: "TEAM123".to_string(),
            }
        );
        assert_eq!(config.root_certificate, RootCertificate::System);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.base_url(), "https://api.push.apple.com:443");
    }

    #[test]
    fn test_certificate_auth_builds() {
        let config = ApnsConfig::builder(ApnsMode::Development)
            .client_certificate("/certs/push.p12", "secret")
            .root_cert_path("/certs/root.pem")
            .build()
            .unwrap();

        assert!(matches!(config.auth, AuthConfig::Certificate { .. }));
        assert_eq!(
            config.root_certificate,
            RootCertificate::Path(PathBuf::from("/certs/root.pem"))
        );
    }

    #[test]
    fn test_missing_auth_fails() {
        let result = ApnsConfig::builder(ApnsMode::Production).build();
        assert!(matches!(result, Err(ApnsError::Config(_))));
    }

    #[test]
    fn test_partial_token_auth_fails() {
        let result = ApnsConfig::builder(ApnsMode::Production)
            .auth_key_path("/keys/AuthKey.p8")
            .auth_key_id("KEY123")
            .build();
        assert!(matches!(result, Err(ApnsError::Config(_))));

        let result = ApnsConfig::builder(ApnsMode::Production)
            .token_auth("/keys/AuthKey.p8", "KEY123", "  ")
            .build();
        assert!(matches!(result, Err(ApnsError::Config(_))));
    }

    #[test]
    fn test_partial_certificate_auth_fails() {
        let result = ApnsConfig::builder(ApnsMode::Production)
            .client_certificate("/certs/push.p12", "")
            .build();
        assert!(matches!(result, Err(ApnsError::Config(_))));
    }

    #[test]
    fn test_mixed_auth_fails() {
        let result = ApnsConfig::builder(ApnsMode::Production)
            .token_auth("/keys/AuthKey.p8", "KEY123", "TEAM123")
            .client_certificate("/certs/push.p12", "secret")
            .build();
        assert!(matches!(result, Err(ApnsError::Config(_))));

        let result = ApnsConfig::builder(ApnsMode::Production)
            .team_id("TEAM123")
            .client_certificate("/certs/push.p12", "secret")
            .build();
        assert!(matches!(result, Err(ApnsError::Config(_))));
    }

    #[test]
    fn test_endpoint_override() {
        let config = ApnsConfig::builder(ApnsMode::Production)
            .token_auth("/keys/AuthKey.p8", "KEY123", "TEAM123")
            .endpoint("http://127.0.0.1:8443")
            .build()
            .unwrap();
        assert_eq!(config.base_url(), "http://127.0.0.1:8443");
    }

    #[test]
    #[serial]
    fn test_from_env_token_auth() {
        clear_env();
        std::env::set_var("APNS_MODE", "dev");
        std::env::set_var("APNS_AUTH_KEY_PATH", "/keys/AuthKey.p8");
        std::env::set_var("APNS_AUTH_KEY_ID", "KEY123");
        std::env::set_var("APNS_TEAM_ID", "TEAM123");
        std::env::set_var("APNS_VERIFY_TLS", "false");
        std::env::set_var("APNS_TIMEOUT_SECS", "5");

        let config = ApnsConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.mode, ApnsMode::Development);
        assert_eq!(config.root_certificate, RootCertificate::Disabled);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(matches!(config.auth, AuthConfig::Token { .. }));
    }

    #[test]
    #[serial]
    fn test_from_env_requires_mode() {
        clear_env();
        std::env::set_var("APNS_CLIENT_CERT_PATH", "/certs/push.p12");
        std::env::set_var("APNS_CLIENT_CERT_PASSPHRASE", "secret");

        let result = ApnsConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ApnsError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_mixed_auth() {
        clear_env();
        std::env::set_var("APNS_MODE", "prod");
        std::env::set_var("APNS_AUTH_KEY_PATH", "/keys/AuthKey.p8");
        std::env::set_var("APNS_CLIENT_CERT_PATH", "/certs/push.p12");
        std::env::set_var("APNS_CLIENT_CERT_PASSPHRASE", "secret");

        let result = ApnsConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ApnsError::Config(_))));
    }
}
