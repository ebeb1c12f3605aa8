/// Nova APNs Client Library
///
/// This library provides the Apple Push Notification service (APNs) delivery
/// pipeline used across the Nova platform.
///
/// It handles:
/// - Provider authentication with ES256 tokens or PKCS#12 client certificates
/// - Provider token caching with lazy renewal
/// - A single long-lived HTTP/2 connection, recreated after server failures
/// - Bounded retries of server-side failures
/// - Typed classification of APNs reason codes
///
/// # Example
///
/// ```rust,no_run
/// use nova_apns_client::{ApnsClient, ApnsConfig, ApnsMode, IosPayload, Notification};
///
/// #[tokio::main]
/// async fn main() -> Result<(), nova_apns_client::ApnsError> {
///     let config = ApnsConfig::builder(ApnsMode::Development)
///         .token_auth("/etc/nova/AuthKey_ABC123.p8", "ABC123", "TEAM123456")
///         .build()?;
///     let client = ApnsClient::new(config)?;
///
///     let payload = IosPayload::new().alert("Hello from Nova").badge(1);
///     let notification = Notification::from_payload(&payload)?.topic("com.nova.app");
///
///     client.push(&notification, "0123456789abcdef").await?;
///     client.close();
///     Ok(())
/// }
/// ```
pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod payload;
pub mod reason;

pub use auth::{AuthMaterial, Credentials, TOKEN_LIFETIME};
pub use client::{ApnsClient, MAX_ATTEMPTS};
pub use config::{ApnsConfig, ApnsConfigBuilder, ApnsMode, AuthConfig, RootCertificate};
pub use connection::{
    Connection, ConnectionManager, Connector, Lease, RawResponse, ReqwestConnector, TransportError,
};
pub use error::{ApnsError, Rejection};
pub use payload::{
    Alert, IosPayload, IosPayloadAlert, Notification, Priority, PushType, SafariPayload,
    SafariPayloadAlert,
};
pub use reason::{classify, Reason, ReasonCategory};
