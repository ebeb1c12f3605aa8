/// Delivery pipeline tests against a scripted in-memory transport
use async_trait::async_trait;
use nova_apns_client::{
    ApnsClient, ApnsConfig, ApnsError, ApnsMode, Connection, Connector, IosPayload, Notification,
    RawResponse, Reason, TransportError, MAX_ATTEMPTS,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");
const DEVICE_TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

#[derive(Debug, Clone)]
struct RecordedRequest {
    connection: u32,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

#[derive(Default)]
struct Script {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    connects: AtomicU32,
}

impl Script {
    fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        })
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

struct ScriptedConnector(Arc<Script>);

struct ScriptedConnection {
    id: u32,
    script: Arc<Script>,
}

impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    fn connect(&self) -> Result<ScriptedConnection, ApnsError> {
        let id = self.0.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ScriptedConnection {
            id,
            script: Arc::clone(&self.0),
        })
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn post(
        &self,
        path: &str,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<RawResponse, TransportError> {
        self.script.requests.lock().push(RecordedRequest {
            connection: self.id,
            path: path.to_string(),
            headers: headers.clone(),
            body: body.to_vec(),
        });
        self.script
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ok()))
    }
}

fn ok() -> RawResponse {
    RawResponse {
        status: 200,
        apns_id: Some("ok-id".to_string()),
        body: Vec::new(),
    }
}

fn failure(status: u16, body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        status,
        apns_id: Some(format!("id-{status}")),
        body: body.as_bytes().to_vec(),
    })
}

fn token_config() -> ApnsConfig {
    ApnsConfig::builder(ApnsMode::Development)
        .token_auth(
            format!("{FIXTURES}/AuthKey_TEST.p8"),
            "KEY1234567",
            "TEAM123456",
        )
        .build()
        .unwrap()
}

fn cert_config() -> ApnsConfig {
    ApnsConfig::builder(ApnsMode::Production)
        .client_certificate(format!("{FIXTURES}/client.p12"), "nova-test")
        .build()
        .unwrap()
}

fn client(
    config: &ApnsConfig,
    responses: Vec<Result<RawResponse, TransportError>>,
) -> (ApnsClient<ScriptedConnector>, Arc<Script>) {
    let script = Script::new(responses);
    let client = ApnsClient::with_connector(config, ScriptedConnector(Arc::clone(&script))).unwrap();
    (client, script)
}

fn notification() -> Notification {
    Notification::from_payload(&IosPayload::new().alert("Hello").badge(1))
        .unwrap()
        .topic("com.nova.app")
}

#[tokio::test]
async fn test_success_single_attempt() {
    let (client, script) = client(&token_config(), vec![Ok(ok())]);

    client.push(&notification(), DEVICE_TOKEN).await.unwrap();

    let requests = script.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, format!("/3/device/{DEVICE_TOKEN}"));
    assert_eq!(requests[0].headers["apns-topic"], "com.nova.app");
    assert_eq!(requests[0].body, notification().body);
    assert!(requests[0].headers["authorization"].starts_with("bearer "));
    assert_eq!(script.connects(), 1);
    assert!(client.connections().is_connected());
}

#[tokio::test]
async fn test_server_failure_retried_three_times() {
    let unavailable = r#"{"reason":"ServiceUnavailable"}"#;
    let (client, script) = client(
        &token_config(),
        vec![
            failure(503, unavailable),
            failure(503, unavailable),
            failure(503, unavailable),
        ],
    );

    let err = client.push(&notification(), DEVICE_TOKEN).await.unwrap_err();

    assert_eq!(err.reason(), Some(Reason::ServiceUnavailable));
    assert_eq!(err.status_code(), Some(503));
    assert!(err.is_server_side());

    let requests = script.requests();
    assert_eq!(requests.len() as u32, MAX_ATTEMPTS);
    // Each attempt ran on a freshly created connection.
    let connections: Vec<u32> = requests.iter().map(|r| r.connection).collect();
    assert_eq!(connections, vec![1, 2, 3]);
    assert_eq!(script.connects(), 3);
    assert!(!client.connections().is_connected());
}

#[tokio::test]
async fn test_last_server_failure_is_returned() {
    let (client, script) = client(
        &token_config(),
        vec![
            failure(503, r#"{"reason":"ServiceUnavailable"}"#),
            failure(500, r#"{"reason":"InternalServerError"}"#),
            failure(503, r#"{"reason":"Shutdown"}"#),
        ],
    );

    let err = client.push(&notification(), DEVICE_TOKEN).await.unwrap_err();

    assert_eq!(err.reason(), Some(Reason::Shutdown));
    assert_eq!(err.apns_id(), Some("id-503"));
    assert_eq!(script.requests().len(), 3);
}

#[tokio::test]
async fn test_server_failure_then_success() {
    let (client, script) = client(
        &token_config(),
        vec![failure(500, r#"{"reason":"InternalServerError"}"#), Ok(ok())],
    );

    client.push(&notification(), DEVICE_TOKEN).await.unwrap();

    assert_eq!(script.requests().len(), 2);
    assert_eq!(script.connects(), 2);
    assert!(client.connections().is_connected());
}

#[tokio::test]
async fn test_client_failure_not_retried() {
    let (client, script) = client(
        &token_config(),
        vec![failure(400, r#"{"reason":"BadDeviceToken"}"#)],
    );

    let err = client.push(&notification(), DEVICE_TOKEN).await.unwrap_err();

    assert_eq!(err.reason(), Some(Reason::BadDeviceToken));
    assert!(!err.is_server_side());
    assert_eq!(script.requests().len(), 1);
    assert_eq!(script.connects(), 1);
    // The connection survives client-side failures.
    assert!(client.connections().is_connected());
}

#[tokio::test]
async fn test_unregistered_carries_timestamp() {
    let (client, _script) = client(
        &token_config(),
        vec![failure(
            410,
            r#"{"reason":"Unregistered","timestamp":1458114061260}"#,
        )],
    );

    match client.push(&notification(), DEVICE_TOKEN).await {
        Err(ApnsError::Rejected(rejection)) => {
            assert_eq!(rejection.reason, Reason::Unregistered);
            assert_eq!(rejection.status_code, 410);
            assert_eq!(rejection.timestamp, Some(1458114061260));
            assert_eq!(rejection.apns_id.as_deref(), Some("id-410"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_reason_is_fatal() {
    let (client, script) = client(
        &token_config(),
        vec![failure(400, r#"{"reason":"BrandNewReason"}"#)],
    );

    let err = client.push(&notification(), DEVICE_TOKEN).await.unwrap_err();

    assert!(matches!(
        err,
        ApnsError::UnmappedReason { ref reason, status_code: 400, .. } if reason == "BrandNewReason"
    ));
    assert_eq!(script.requests().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_not_retried() {
    let (client, script) = client(
        &token_config(),
        vec![Err(TransportError {
            message: "operation timed out".to_string(),
            timeout: true,
        })],
    );

    let err = client.push(&notification(), DEVICE_TOKEN).await.unwrap_err();

    assert!(matches!(err, ApnsError::Connection(_)));
    assert_eq!(script.requests().len(), 1);
    assert_eq!(script.connects(), 1);
}

#[tokio::test]
async fn test_token_reused_across_pushes() {
    let (client, script) = client(&token_config(), vec![Ok(ok()), Ok(ok())]);

    client.push(&notification(), DEVICE_TOKEN).await.unwrap();
    client.push(&notification(), DEVICE_TOKEN).await.unwrap();

    let requests = script.requests();
    assert_eq!(
        requests[0].headers["authorization"],
        requests[1].headers["authorization"]
    );
    assert_eq!(script.connects(), 1);
}

#[tokio::test]
async fn test_certificate_mode_sends_no_authorization_header() {
    let (client, script) = client(&cert_config(), vec![Ok(ok())]);

    client.push(&notification(), DEVICE_TOKEN).await.unwrap();

    assert!(!script.requests()[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_close_is_idempotent_and_clears_state() {
    let (client, script) = client(&token_config(), vec![Ok(ok()), Ok(ok())]);

    // Nothing to release yet.
    client.close();
    client.close();

    client.push(&notification(), DEVICE_TOKEN).await.unwrap();
    assert!(client.connections().is_connected());

    client.close();
    assert!(!client.connections().is_connected());
    client.close();

    // A later push reopens a connection and signs a new token.
    client.push(&notification(), DEVICE_TOKEN).await.unwrap();
    let requests = script.requests();
    assert_eq!(script.connects(), 2);
    assert_eq!(requests[1].connection, 2);
    assert_ne!(
        requests[0].headers["authorization"],
        requests[1].headers["authorization"]
    );
}

#[tokio::test]
async fn test_concurrent_pushes_share_connection() {
    let (client, script) = client(&token_config(), Vec::new());
    let client = Arc::new(client);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.push(&notification(), DEVICE_TOKEN).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let requests = script.requests();
    assert_eq!(requests.len(), 16);
    assert_eq!(script.connects(), 1);
    let first = &requests[0].headers["authorization"];
    assert!(requests.iter().all(|r| &r.headers["authorization"] == first));
}

#[test]
fn test_construction_fails_for_bad_key() {
    let config = ApnsConfig::builder(ApnsMode::Development)
        .token_auth(format!("{FIXTURES}/root.pem"), "KEY1234567", "TEAM123456")
        .build()
        .unwrap();

    let result = ApnsClient::with_connector(&config, ScriptedConnector(Script::new(Vec::new())));
    assert!(matches!(result, Err(ApnsError::Config(_))));
}
