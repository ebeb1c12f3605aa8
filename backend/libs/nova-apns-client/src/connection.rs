/// Connection management
///
/// APNs multiplexes many streams over one long-lived HTTP/2 connection, so a
/// client keeps exactly one transport handle. It is created on first use,
/// torn down on `close` or after a server-side failure, and recreated by the
/// next request.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info};

use crate::auth::Credentials;
use crate::config::{ApnsConfig, RootCertificate};
use crate::error::ApnsError;

/// Status, correlation id and body of an APNs response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub apns_id: Option<String>,
    pub body: Vec<u8>,
}

/// The round trip did not complete.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timeout: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }
}

/// A persistent connection able to POST to APNs.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn post(
        &self,
        path: &str,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<RawResponse, TransportError>;
}

/// Opens new connections with fixed settings.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> Result<Self::Connection, ApnsError>;
}

/// A borrowed handle to the current connection.
#[derive(Debug)]
pub struct Lease<T> {
    pub connection: Arc<T>,
    /// Identifies the connection instance, for `invalidate`.
    pub generation: u64,
}

struct Slot<T> {
    current: Option<Arc<T>>,
    generation: u64,
}

/// Owns at most one live connection.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    slot: Mutex<Slot<C::Connection>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slot: Mutex::new(Slot {
                current: None,
                generation: 0,
            }),
        }
    }

    /// Current connection, created on demand.
    ///
    /// The lock covers only the check-and-create; callers perform I/O on the
    /// returned `Arc` after it is released.
    pub fn get_connection(&self) -> Result<Lease<C::Connection>, ApnsError> {
        let mut slot = self.slot.lock();

        if let Some(connection) = &slot.current {
            return Ok(Lease {
                connection: Arc::clone(connection),
                generation: slot.generation,
            });
        }

        let connection = Arc::new(self.connector.connect()?);
        slot.generation += 1;
        slot.current = Some(Arc::clone(&connection));
        info!(generation = slot.generation, "Created a new APNs connection");

        Ok(Lease {
            connection,
            generation: slot.generation,
        })
    }

    /// Tear down the connection only if it is still `generation`. A newer
    /// connection opened by a concurrent caller is left alone.
    pub fn invalidate(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.current.is_some() && slot.generation == generation {
            slot.current = None;
            info!(generation, "Reset the APNs connection");
            true
        } else {
            debug!(generation, current = slot.generation, "Connection already replaced");
            false
        }
    }

    /// Tear down the current connection, if any.
    pub fn reset_connection(&self) {
        let mut slot = self.slot.lock();
        if slot.current.take().is_some() {
            info!(generation = slot.generation, "Reset the APNs connection");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().current.is_some()
    }

    /// Number of connections created so far.
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

/// HTTP/2 transport backed by `reqwest`.
pub struct ReqwestConnector {
    base_url: String,
    root_certificate: Option<reqwest::Certificate>,
    accept_invalid_certs: bool,
    timeout: std::time::Duration,
    identity: Option<reqwest::Identity>,
}

impl ReqwestConnector {
    pub fn new(config: &ApnsConfig, credentials: &Credentials) -> Result<Self, ApnsError> {
        let root_certificate = match &config.root_certificate {
            RootCertificate::Path(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    ApnsError::Config(format!(
                        "failed to read root certificate {}: {e}",
                        path.display()
                    ))
                })?;
                let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    ApnsError::Config(format!(
                        "invalid root certificate {}: {e}",
                        path.display()
                    ))
                })?;
                Some(certificate)
            }
            RootCertificate::System | RootCertificate::Disabled => None,
        };

        Ok(Self {
            base_url: config.base_url().trim_end_matches('/').to_string(),
            root_certificate,
            accept_invalid_certs: config.root_certificate == RootCertificate::Disabled,
            timeout: config.timeout,
            identity: credentials.client_identity()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Connector for ReqwestConnector {
    type Connection = ReqwestConnection;

    fn connect(&self) -> Result<Self::Connection, ApnsError> {
        let mut builder = reqwest::Client::builder()
            .use_native_tls()
            .http2_prior_knowledge()
            .pool_max_idle_per_host(1)
            .tcp_keepalive(std::time::Duration::from_secs(60))
            .timeout(self.timeout);

        if let Some(certificate) = &self.root_certificate {
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(certificate.clone());
        }
        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }

        let client = builder
            .build()
            .map_err(|e| ApnsError::Connection(format!("failed to build HTTP/2 client: {e}")))?;

        Ok(ReqwestConnection {
            client,
            base_url: self.base_url.clone(),
        })
    }
}

/// One `reqwest::Client` restricted to a single HTTP/2 connection.
pub struct ReqwestConnection {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl Connection for ReqwestConnection {
    async fn post(
        &self,
        path: &str,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<RawResponse, TransportError> {
        let mut header_map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::new(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::new(format!("invalid header value: {e}")))?;
            header_map.insert(name, value);
        }

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .headers(header_map)
            .body(body.to_vec())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport_error)?.to_vec();

        Ok(RawResponse {
            status,
            apns_id,
            body,
        })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    TransportError {
        timeout: e.is_timeout(),
        message: e.to_string(),
    }
}
