/// APNs reason codes and response classification
///
/// Every non-200 APNs response carries a JSON body with a `reason` string.
/// The vocabulary is closed: each documented code maps to one `Reason`
/// variant, and each variant belongs to exactly one `ReasonCategory`.
/// Codes that are not in the table surface as `ApnsError::UnmappedReason`,
/// which means this client needs an update.
use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ApnsError, Rejection};

/// Who is at fault for a rejected notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCategory {
    /// APNs is unhealthy or overloaded; the request may succeed on a fresh
    /// connection.
    Server,
    /// The device token is bad or no longer registered.
    Device,
    /// The request itself is defective (headers, payload, credentials).
    Request,
}

macro_rules! reasons {
    ($($variant:ident => $category:ident),+ $(,)?) => {
        /// Documented APNs reason codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Reason {
            $($variant),+
        }

        impl Reason {
            pub const ALL: &'static [Reason] = &[$(Reason::$variant),+];

            /// Look up a reason code exactly as APNs spells it.
            pub fn from_code(code: &str) -> Option<Reason> {
                match code {
                    $(stringify!($variant) => Some(Reason::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Reason::$variant => stringify!($variant)),+
                }
            }

            pub fn category(&self) -> ReasonCategory {
                match self {
                    $(Reason::$variant => ReasonCategory::$category),+
                }
            }
        }
    };
}

reasons! {
    // 400
    BadCollapseId => Request,
    BadDeviceToken => Device,
    BadExpirationDate => Request,
    BadMessageId => Request,
    BadPriority => Request,
    BadTopic => Request,
    DeviceTokenNotForTopic => Device,
    DuplicateHeaders => Request,
    IdleTimeout => Server,
    InvalidPushType => Request,
    MissingDeviceToken => Request,
    MissingTopic => Request,
    PayloadEmpty => Request,
    TopicDisallowed => Request,
    // 403
    BadCertificate => Request,
    BadCertificateEnvironment => Request,
    ExpiredProviderToken => Request,
    Forbidden => Request,
    InvalidProviderToken => Request,
    MissingProviderToken => Request,
    // 404, 405
    BadPath => Request,
    MethodNotAllowed => Request,
    // 410
    ExpiredToken => Device,
    Unregistered => Device,
    // 413
    PayloadTooLarge => Request,
    // 429
    TooManyProviderTokenUpdates => Server,
    TooManyRequests => Request,
    // 500, 503
    InternalServerError => Server,
    ServiceUnavailable => Server,
    Shutdown => Server,
}

impl Reason {
    /// Server-side failures are the only ones worth retrying.
    pub fn is_server_side(&self) -> bool {
        self.category() == ReasonCategory::Server
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: String,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Turn a non-200 APNs response into the matching error.
pub fn classify(status_code: u16, apns_id: Option<String>, body: &[u8]) -> ApnsError {
    let parsed: ErrorBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return ApnsError::InvalidResponse {
                status_code,
                apns_id,
                message: format!("unreadable error body: {e}"),
            }
        }
    };

    debug!(reason = %parsed.reason, status_code, "APNs response reason");

    let Some(reason) = Reason::from_code(&parsed.reason) else {
        return ApnsError::UnmappedReason {
            reason: parsed.reason,
            status_code,
            apns_id,
        };
    };

    let timestamp = if reason == Reason::Unregistered {
        if parsed.timestamp.is_none() {
            warn!(status_code, "Unregistered response without timestamp");
        }
        parsed.timestamp
    } else {
        None
    };

    ApnsError::Rejected(Rejection {
        reason,
        status_code,
        apns_id,
        timestamp,
    })
}
