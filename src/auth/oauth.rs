//! Provider OAuth endpoints: device authorization, token grants, and the
//! simulator's authorize short-circuit.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Url;
use tracing::debug;

use super::device_code::{DeviceAuthorizationResponse, DeviceCodePoll, DeviceCodeSession};
use super::token::{TokenPair, TokenResponse};
use crate::config::ClientConfig;
use crate::error::{HcError, Result};
use crate::http::{ApiRequest, ApiResponse, Executor};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// RFC 8628: each `slow_down` adds five seconds to the poll interval.
const SLOW_DOWN_STEP: std::time::Duration = std::time::Duration::from_secs(5);

/// OAuth client for one registered application.
///
/// All calls go through the [`Executor`], so they share the rate-limit
/// deadline and the provider's error classification.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    executor: Executor,
    client_id: String,
    client_secret: Option<String>,
    scope: String,
    device_authorization_url: String,
    token_url: String,
    authorize_url: String,
}

impl OAuthClient {
    pub fn new(executor: Executor, config: &ClientConfig) -> Self {
        Self {
            executor,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope(),
            device_authorization_url: config.device_authorization_url(),
            token_url: config.token_url(),
            authorize_url: config.authorize_url(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn start_device_code(&self) -> Result<DeviceCodeSession> {
        let request = ApiRequest::form(
            self.device_authorization_url.as_str(),
            [
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
            ],
        );
        let payload: DeviceAuthorizationResponse =
            self.executor.send(&request).await?.into_json()?;
        let expires_at = i64::try_from(payload.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                HcError::Protocol(format!(
                    "device authorization with out-of-range expires_in {}",
                    payload.expires_in
                ))
            })?;
        Ok(DeviceCodeSession {
            verification_uri: payload.verification_uri,
            verification_uri_complete: payload.verification_uri_complete,
            user_code: payload.user_code,
            device_code: payload.device_code,
            interval: std::time::Duration::from_secs(payload.interval.max(1)),
            expires_at,
        })
    }

    /// Poll the token endpoint once. `interval` is the interval currently in
    /// use; a `slow_down` answer returns it increased by five seconds.
    pub async fn poll_device_code(
        &self,
        session: &DeviceCodeSession,
        interval: std::time::Duration,
    ) -> Result<DeviceCodePoll> {
        if session.is_expired(Utc::now()) {
            return Ok(DeviceCodePoll::Expired);
        }
        let request = self.token_request([
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", session.device_code.as_str()),
        ]);
        match self.executor.send(&request).await {
            Ok(response) => {
                let token = response
                    .into_json::<TokenResponse>()?
                    .into_pair(None, Utc::now())?;
                Ok(DeviceCodePoll::Authorized { token })
            }
            Err(HcError::AuthorizationPending) => Ok(DeviceCodePoll::Pending),
            Err(HcError::SlowDown) => Ok(DeviceCodePoll::SlowDown {
                interval: interval + SLOW_DOWN_STEP,
            }),
            Err(HcError::AccessDenied(_)) => Ok(DeviceCodePoll::AccessDenied),
            Err(HcError::RefreshTokenInvalid(_)) => Ok(DeviceCodePoll::Expired),
            Err(other) => Err(other),
        }
    }

    /// Simulator only: request authorization for the synthetic user and
    /// pull the code out of the redirect instead of following it.
    pub async fn authorize_simulator(&self) -> Result<String> {
        let request = ApiRequest::get(self.authorize_url.as_str())
            .without_auth()
            .with_query("client_id", self.client_id.as_str())
            .with_query("response_type", "code")
            .with_query("scope", self.scope.as_str())
            .with_query("user", "me");
        match self.executor.send(&request).await? {
            ApiResponse::Redirect(location) => authorization_code_from(&location),
            other => Err(HcError::Protocol(format!(
                "authorize endpoint answered {other:?} instead of a redirect"
            ))),
        }
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair> {
        let request = self.token_request([
            ("grant_type", "authorization_code"),
            ("code", code),
        ]);
        self.executor
            .send(&request)
            .await?
            .into_json::<TokenResponse>()?
            .into_pair(None, Utc::now())
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let request = self.token_request([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);
        let response = match self.executor.send(&request).await {
            Ok(response) => response,
            Err(HcError::AuthorizationPending) => {
                return Err(HcError::Protocol(
                    "refresh grant answered authorization_pending".to_string(),
                ))
            }
            Err(other) => return Err(other),
        };
        debug!("refresh grant accepted");
        response
            .into_json::<TokenResponse>()?
            .into_pair(Some(refresh_token), Utc::now())
    }

    fn token_request<'a>(
        &'a self,
        grant: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> ApiRequest {
        let mut fields: Vec<(&str, &str)> = vec![("client_id", self.client_id.as_str())];
        if let Some(secret) = &self.client_secret {
            fields.push(("client_secret", secret.as_str()));
        }
        fields.extend(grant);
        ApiRequest::form(self.token_url.as_str(), fields)
    }
}

fn authorization_code_from(location: &str) -> Result<String> {
    let url = Url::parse(location)
        .map_err(|e| HcError::Protocol(format!("unparsable redirect {location}: {e}")))?;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => return Ok(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    match error.as_deref() {
        Some("access_denied") => Err(HcError::AccessDenied(
            "simulator authorization denied".to_string(),
        )),
        Some(other) => Err(HcError::Protocol(format!(
            "simulator authorization failed: {other}"
        ))),
        None => Err(HcError::Protocol(format!(
            "redirect {location} carries no authorization code"
        ))),
    }
}
