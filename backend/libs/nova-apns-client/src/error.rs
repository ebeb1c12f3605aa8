use std::fmt;

use thiserror::Error;

use crate::reason::Reason;

/// APNs Client Error Types
#[derive(Error, Debug)]
pub enum ApnsError {
    /// Invalid or incomplete credentials, unreadable key material.
    #[error("APNs configuration error: {0}")]
    Config(String),

    /// The round trip could not complete (DNS, TCP, TLS, timeout).
    #[error("Failed to reach APNs: {0}")]
    Connection(String),

    /// APNs answered with a known reason code.
    #[error("APNs rejected the notification: {0}")]
    Rejected(Rejection),

    /// APNs answered with a reason code this client does not know.
    #[error("APNs reason not implemented: {reason} (status {status_code})")]
    UnmappedReason {
        reason: String,
        status_code: u16,
        apns_id: Option<String>,
    },

    /// Non-200 response whose body could not be interpreted.
    #[error("Malformed APNs response (status {status_code}): {message}")]
    InvalidResponse {
        status_code: u16,
        apns_id: Option<String>,
        message: String,
    },

    /// The notification body could not be serialised to JSON.
    #[error("Failed to serialise payload: {0}")]
    Payload(String),

    #[error("Failed to sign provider token: {0}")]
    TokenSigning(String),
}

impl ApnsError {
    /// Whether APNs itself reported being unhealthy or overloaded.
    pub fn is_server_side(&self) -> bool {
        matches!(self, ApnsError::Rejected(rejection) if rejection.reason.is_server_side())
    }

    pub fn reason(&self) -> Option<Reason> {
        match self {
            ApnsError::Rejected(rejection) => Some(rejection.reason),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApnsError::Rejected(rejection) => Some(rejection.status_code),
            ApnsError::UnmappedReason { status_code, .. }
            | ApnsError::InvalidResponse { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Correlation id echoed by APNs for the failed attempt.
    pub fn apns_id(&self) -> Option<&str> {
        match self {
            ApnsError::Rejected(rejection) => rejection.apns_id.as_deref(),
            ApnsError::UnmappedReason { apns_id, .. }
            | ApnsError::InvalidResponse { apns_id, .. } => apns_id.as_deref(),
            _ => None,
        }
    }
}

/// A failed delivery attempt classified by its reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: Reason,
    pub status_code: u16,
    pub apns_id: Option<String>,
    /// Milliseconds since epoch at which APNs confirmed the token was no
    /// longer valid. Only set for `Unregistered`.
    pub timestamp: Option<i64>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {}", self.reason, self.status_code)?;
        if let Some(apns_id) = &self.apns_id {
            write!(f, ", apns-id {}", apns_id)?;
        }
        if let Some(timestamp) = self.timestamp {
            write!(f, ", timestamp {}", timestamp)?;
        }
        write!(f, ")")
    }
}
