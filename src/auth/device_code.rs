use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::TokenPair;

/// Device-authorization session details.
///
/// # Example
/// ```
/// use homeconnect::auth::DeviceCodeSession;
/// use chrono::Utc;
/// use std::time::Duration;
///
/// let session = DeviceCodeSession {
///     verification_uri: "https://api.home-connect.com/security/oauth/device_verify".to_string(),
///     verification_uri_complete: None,
///     user_code: "ABCD-EFGH".to_string(),
///     device_code: "device-code".to_string(),
///     interval: Duration::from_secs(5),
///     expires_at: Utc::now(),
/// };
/// assert_eq!(session.uri_for_user(), session.verification_uri);
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub user_code: String,
    pub device_code: String,
    pub interval: Duration,
    pub expires_at: DateTime<Utc>,
}

impl DeviceCodeSession {
    /// The URI to show the user; prefers the one with the code embedded.
    pub fn uri_for_user(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Polling outcome for a device-code session.
#[derive(Debug, Clone)]
pub enum DeviceCodePoll {
    Pending,
    SlowDown { interval: Duration },
    Authorized { token: TokenPair },
    AccessDenied,
    Expired,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}
