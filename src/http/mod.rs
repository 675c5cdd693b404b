//! Shared HTTP client, request/response types, and provider error classification.

pub mod executor;

pub use executor::Executor;

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Method;
use serde_json::Value;

use crate::error::unified::{unauthorized_client_remediation, ApiErrorBody, OAuthErrorBody};
use crate::error::{HcError, Result};

/// Media type of the appliance API.
pub const BSH_JSON: &str = "application/vnd.bsh.sdk.v1+json";
/// Media type of the event stream.
pub const EVENT_STREAM: &str = "text/event-stream";

/// Build the client shared by all components.
///
/// Redirects are never followed: the simulator code grant reads the
/// `Location` header itself. No overall timeout is set because event
/// streams stay open indefinitely; REST calls set one per request.
pub fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(10)
        .build()?;
    Ok(client)
}

/// Body of an outgoing request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One logical call; re-sent unchanged on every retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Resource path (`/api/...`) or an absolute URL.
    pub target: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Attach the bearer credential.
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            authenticated: true,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn put(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, target).with_body(RequestBody::Json(body))
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// Unauthenticated form POST, as used by the OAuth endpoints.
    pub fn form<K, V>(url: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(Method::POST, url)
            .with_body(RequestBody::Form(fields))
            .without_auth()
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// Successful outcome of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Empty,
    /// A redirect that was not followed; carries the `Location` target.
    Redirect(String),
}

impl ApiResponse {
    /// Unwrap the `{ "data": ... }` envelope of resource responses.
    pub fn into_data(self) -> Result<Value> {
        match self {
            Self::Json(mut value) => match value.get_mut("data") {
                Some(data) => Ok(data.take()),
                None => Err(HcError::Protocol(
                    "resource response without data envelope".to_string(),
                )),
            },
            Self::Empty => Ok(Value::Null),
            Self::Redirect(location) => Err(HcError::Protocol(format!(
                "unexpected redirect to {location}"
            ))),
        }
    }

    /// Deserialize a bare JSON body (OAuth endpoints have no envelope).
    pub fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Json(value) => Ok(serde_json::from_value(value)?),
            Self::Empty => Err(HcError::Protocol("empty response body".to_string())),
            Self::Redirect(location) => Err(HcError::Protocol(format!(
                "unexpected redirect to {location}"
            ))),
        }
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success response to a typed error.
///
/// Handles both the OAuth error shape (`{"error": "...",
/// "error_description": "..."}`) and the resource shape (`{"error":
/// {"key": ..., "description": ...}}`).
pub fn classify_error(status: u16, retry_after: Option<Duration>, body: &str) -> HcError {
    let retry_after_ms = retry_after.map(|d| d.as_millis() as u64);

    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(body) {
        let description = oauth.error_description.unwrap_or_default();
        return match oauth.error.as_str() {
            "access_denied" if description.to_ascii_lowercase().contains("too many requests") => {
                HcError::RateLimited { retry_after_ms }
            }
            "access_denied" => HcError::AccessDenied(description),
            "invalid_grant" | "expired_token" if description.is_empty() => {
                HcError::RefreshTokenInvalid(oauth.error.clone())
            }
            "invalid_grant" | "expired_token" => HcError::RefreshTokenInvalid(description),
            "unauthorized_client" => HcError::ClientMisconfigured {
                remediation: unauthorized_client_remediation(&description).map(str::to_string),
                description,
            },
            "authorization_pending" => HcError::AuthorizationPending,
            "slow_down" => HcError::SlowDown,
            other => HcError::Api {
                status,
                key: Some(other.to_string()),
                message: description,
            },
        };
    }

    if let Ok(api) = serde_json::from_str::<ApiErrorBody>(body) {
        let key = api.error.key_str();
        let description = api.error.description.unwrap_or_default();
        return match key.as_str() {
            "invalid_token" => HcError::AccessTokenInvalid(description),
            "429" => HcError::RateLimited { retry_after_ms },
            _ if status == 429 => HcError::RateLimited { retry_after_ms },
            _ => HcError::Api {
                status,
                key: Some(key),
                message: description,
            },
        };
    }

    if status == 429 {
        return HcError::RateLimited { retry_after_ms };
    }
    HcError::api(status, body.trim())
}
