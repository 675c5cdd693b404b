//! Error classification, provider error payloads, and recovery hints.

use serde::Deserialize;

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection or stream failure.
    Transport,
    RateLimit,
    /// The access token was rejected; the refresh token is still usable.
    AccessToken,
    /// The refresh token was rejected; full re-authorization required.
    RefreshToken,
    /// The client registration itself is wrong; needs operator action.
    ClientConfiguration,
    /// Device-flow outcomes (pending, denied, expired) and missing credentials.
    Authorization,
    /// Unexpected response shape from the provider.
    Protocol,
    Server,
    Api,
    Configuration,
    Serialization,
    Cancelled,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    WaitForRefresh,
    Reauthorize,
    CheckClientRegistration,
    CheckConfiguration,
    ReportDefect,
    None,
}

impl RecoverySuggestion {
    /// Short operator-facing hint, if there is one.
    pub fn hint(self) -> Option<&'static str> {
        match self {
            Self::RetryWithBackoff => Some("the request is retried automatically"),
            Self::WaitForRefresh => Some("a new access token is being requested"),
            Self::Reauthorize => Some("run `hcctl auth login` to authorize again"),
            Self::CheckClientRegistration => {
                Some("check the application settings in the developer portal")
            }
            Self::CheckConfiguration => {
                Some("set HOMECONNECT_CLIENT_ID (and HOMECONNECT_CLIENT_SECRET for the simulator)")
            }
            Self::ReportDefect | Self::None => None,
        }
    }
}

/// OAuth-style error body returned by the token endpoints.
///
/// ```json
/// { "error": "authorization_pending", "error_description": "..." }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Resource-API error body.
///
/// ```json
/// { "error": { "key": "invalid_token", "description": "..." } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Usually a string, but the provider sends `429` as a bare number.
    pub key: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl ApiErrorDetail {
    /// The key rendered as a string regardless of its JSON type.
    pub fn key_str(&self) -> String {
        match &self.key {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Operator guidance for `unauthorized_client` rejections, keyed by the
/// provider's `error_description`.
pub fn unauthorized_client_remediation(description: &str) -> Option<&'static str> {
    match description.trim().to_ascii_lowercase().as_str() {
        "client not authorized for this oauth flow (grant_type)" => Some(
            "enable the Device Flow (or Authorization Code Grant Flow for the simulator) \
             for this application in the developer portal",
        ),
        "client has limited user list - user not assigned to client" => Some(
            "add the Home Connect account's e-mail address to the application's \
             user list in the developer portal",
        ),
        "request rejected by client authorization authority (request validation failed)" => {
            Some(
                "check that the client ID matches a registered application and that \
                 the application has not been disabled",
            )
        }
        "client or redirecturi not found" | "invalid redirect_uri" => Some(
            "register a redirect URI for the application; any placeholder URL is accepted",
        ),
        _ => None,
    }
}
