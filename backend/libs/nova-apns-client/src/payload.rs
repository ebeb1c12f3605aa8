use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ApnsError;

/// A notification ready to send: APNs request headers and the JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// APNs Notification Priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Immediate delivery
    High,
    /// Delivery scheduled around power considerations
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "10",
            Priority::Low => "5",
        }
    }
}

/// Value of the `apns-push-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    Voip,
    Complication,
    FileProvider,
    Mdm,
    LiveActivity,
}

impl PushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushType::Alert => "alert",
            PushType::Background => "background",
            PushType::Voip => "voip",
            PushType::Complication => "complication",
            PushType::FileProvider => "fileprovider",
            PushType::Mdm => "mdm",
            PushType::LiveActivity => "liveactivity",
        }
    }
}

impl Notification {
    /// Notification with a pre-serialised body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Serialise `payload` as the JSON body.
    pub fn from_payload<P: Serialize>(payload: &P) -> Result<Self, ApnsError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ApnsError::Payload(e.to_string()))?;
        Ok(Self::new(body))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Bundle id of the receiving app (`apns-topic`).
    pub fn topic(self, topic: impl Into<String>) -> Self {
        self.header("apns-topic", topic)
    }

    pub fn priority(self, priority: Priority) -> Self {
        self.header("apns-priority", priority.as_str())
    }

    pub fn push_type(self, push_type: PushType) -> Self {
        self.header("apns-push-type", push_type.as_str())
    }

    /// UNIX epoch seconds after which APNs stops retrying delivery; 0 means
    /// deliver once or not at all.
    pub fn expiration(self, epoch_secs: u64) -> Self {
        self.header("apns-expiration", epoch_secs.to_string())
    }

    pub fn collapse_id(self, collapse_id: impl Into<String>) -> Self {
        self.header("apns-collapse-id", collapse_id)
    }

    /// Canonical UUID echoed back in the `apns-id` response header.
    pub fn id(self, apns_id: impl Into<String>) -> Self {
        self.header("apns-id", apns_id)
    }
}

/// Either a plain alert string or a structured alert dictionary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Alert {
    Text(String),
    Ios(IosPayloadAlert),
    Safari(SafariPayloadAlert),
}

impl From<&str> for Alert {
    fn from(text: &str) -> Self {
        Alert::Text(text.to_string())
    }
}

impl From<String> for Alert {
    fn from(text: String) -> Self {
        Alert::Text(text)
    }
}

impl From<IosPayloadAlert> for Alert {
    fn from(alert: IosPayloadAlert) -> Self {
        Alert::Ios(alert)
    }
}

impl From<SafariPayloadAlert> for Alert {
    fn from(alert: SafariPayloadAlert) -> Self {
        Alert::Safari(alert)
    }
}

/// Structured iOS alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IosPayloadAlert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
}

/// iOS notification payload: the `aps` dictionary plus custom top-level keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IosPayload {
    pub alert: Option<Alert>,
    pub badge: Option<u32>,
    pub sound: Option<String>,
    pub content_available: bool,
    pub mutable_content: bool,
    pub category: Option<String>,
    pub thread_id: Option<String>,
    pub custom: Map<String, Value>,
}

impl IosPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert(mut self, alert: impl Into<Alert>) -> Self {
        self.alert = Some(alert.into());
        self
    }

    pub fn badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn content_available(mut self, content_available: bool) -> Self {
        self.content_available = content_available;
        self
    }

    pub fn mutable_content(mut self, mutable_content: bool) -> Self {
        self.mutable_content = mutable_content;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct IosAps<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'a Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mutable_content: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
}

impl Serialize for IosPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let aps = IosAps {
            alert: self.alert.as_ref(),
            badge: self.badge,
            sound: self.sound.as_deref(),
            content_available: self.content_available.then_some(1),
            mutable_content: self.mutable_content.then_some(1),
            thread_id: self.thread_id.as_deref(),
            category: self.category.as_deref(),
        };
        serialize_with_custom(serializer, &aps, &self.custom)
    }
}

/// Structured Safari alert.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SafariPayloadAlert {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl SafariPayloadAlert {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            action: None,
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Safari website push payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SafariPayload {
    pub alert: Alert,
    /// Substituted into the website's URL format string; defaults to `[]`.
    pub url_args: Value,
    pub custom: Map<String, Value>,
}

impl SafariPayload {
    pub fn new(alert: impl Into<Alert>) -> Self {
        Self {
            alert: alert.into(),
            url_args: Value::Array(Vec::new()),
            custom: Map::new(),
        }
    }

    pub fn url_args(mut self, url_args: impl Into<Value>) -> Self {
        self.url_args = url_args.into();
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

#[derive(Serialize)]
struct SafariAps<'a> {
    alert: &'a Alert,
    #[serde(rename = "url-args")]
    url_args: &'a Value,
}

impl Serialize for SafariPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let aps = SafariAps {
            alert: &self.alert,
            url_args: &self.url_args,
        };
        serialize_with_custom(serializer, &aps, &self.custom)
    }
}

fn serialize_with_custom<S: Serializer, A: Serialize>(
    serializer: S,
    aps: &A,
    custom: &Map<String, Value>,
) -> Result<S::Ok, S::Error> {
    let extra = extra_entries(custom);
    let mut map = serializer.serialize_map(Some(extra.len() + 1))?;
    map.serialize_entry("aps", aps)?;
    for (key, value) in extra {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Custom top-level entries; a custom `aps` key never overrides the dictionary.
fn extra_entries(custom: &Map<String, Value>) -> Vec<(&String, &Value)> {
    custom.iter().filter(|(key, _)| key.as_str() != "aps").collect()
}
