use std::time::Instant;

use tracing::{debug, info, warn};

use crate::auth::Credentials;
use crate::config::ApnsConfig;
use crate::connection::{Connection, ConnectionManager, Connector, Lease, ReqwestConnector};
use crate::error::ApnsError;
use crate::payload::Notification;
use crate::reason::classify;

/// Attempts per notification, counting the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Apple Push Notification service (APNs) client
///
/// Owns one cached provider token and one HTTP/2 connection, both shared by
/// every `push` issued through this instance. `ApnsClient` is `Send + Sync`;
/// wrap it in an `Arc` to push from several tasks.
///
/// Dropping the client releases the connection and token, the same as
/// `close`.
pub struct ApnsClient<C: Connector = ReqwestConnector> {
    credentials: Credentials,
    connections: ConnectionManager<C>,
}

impl ApnsClient<ReqwestConnector> {
    /// Creates a client that talks to APNs over `reqwest`.
    ///
    /// Key material is loaded and validated here; the connection itself is
    /// opened by the first `push`.
    pub fn new(config: ApnsConfig) -> Result<Self, ApnsError> {
        let credentials = Credentials::from_config(&config.auth)?;
        let connector = ReqwestConnector::new(&config, &credentials)?;

        info!(
            mode = ?config.mode,
            base_url = config.base_url(),
            token_auth = credentials.is_token_auth(),
            "Initialized APNs client"
        );

        Ok(Self::from_parts(credentials, connector))
    }
}

impl<C: Connector> ApnsClient<C> {
    /// Creates a client over a custom transport.
    pub fn with_connector(config: &ApnsConfig, connector: C) -> Result<Self, ApnsError> {
        let credentials = Credentials::from_config(&config.auth)?;
        Ok(Self::from_parts(credentials, connector))
    }

    fn from_parts(credentials: Credentials, connector: C) -> Self {
        Self {
            credentials,
            connections: ConnectionManager::new(connector),
        }
    }

    /// Sends one notification to one device.
    ///
    /// Server-side failures are retried on a fresh connection, up to
    /// `MAX_ATTEMPTS` in total; every other failure is returned at once.
    pub async fn push(
        &self,
        notification: &Notification,
        device_token: &str,
    ) -> Result<(), ApnsError> {
        let token_prefix = device_token.chars().take(8).collect::<String>();
        let path = format!("/3/device/{device_token}");

        debug!(
            bytes = notification.body.len(),
            device_token = %token_prefix,
            "Sending notification"
        );

        let started = Instant::now();
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;

            let lease = match self.connections.get_connection() {
                Ok(lease) => lease,
                Err(e) => break Err(e),
            };

            match self.send_once(&lease, &path, notification).await {
                Ok(apns_id) => {
                    debug!(attempt, apns_id = ?apns_id, "APNs accepted notification");
                    break Ok(());
                }
                Err(e) if e.is_server_side() => {
                    self.connections.invalidate(lease.generation);
                    if attempt >= MAX_ATTEMPTS {
                        break Err(e);
                    }
                    warn!(
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "APNs server failure, retrying on a new connection"
                    );
                }
                Err(e) => break Err(e),
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(()) => info!(
                device_token = %token_prefix,
                attempts = attempt,
                duration_ms,
                "APNs notification sent"
            ),
            Err(e) => warn!(
                device_token = %token_prefix,
                attempts = attempt,
                duration_ms,
                error = %e,
                "Failed to send APNs notification"
            ),
        }

        outcome
    }

    async fn send_once(
        &self,
        lease: &Lease<C::Connection>,
        path: &str,
        notification: &Notification,
    ) -> Result<Option<String>, ApnsError> {
        let mut headers = notification.headers.clone();
        if let Some(authorization) = self.credentials.authorization_header()? {
            headers.insert("authorization".to_string(), authorization);
        }

        let response = lease
            .connection
            .post(path, &headers, &notification.body)
            .await
            .map_err(|e| {
                debug!(timeout = e.timeout, error = %e, "Failed to receive a response");
                ApnsError::Connection(e.message)
            })?;

        debug!(
            status = response.status,
            success = response.status == 200,
            "Response received"
        );

        if response.status == 200 {
            Ok(response.apns_id)
        } else {
            Err(classify(response.status, response.apns_id, &response.body))
        }
    }

    /// Releases the connection and the cached provider token.
    ///
    /// Safe to call any number of times; a later `push` reopens what it needs.
    pub fn close(&self) {
        self.connections.reset_connection();
        self.credentials.reset_token();
        debug!("Closed APNs client");
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn connections(&self) -> &ConnectionManager<C> {
        &self.connections
    }
}

impl<C: Connector> Drop for ApnsClient<C> {
    fn drop(&mut self) {
        self.close();
    }
}
