//! Rate-limited, self-retrying request executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use tracing::{debug, error, warn};

use super::{
    classify_error, retry_after, ApiRequest, ApiResponse, RequestBody, BSH_JSON, EVENT_STREAM,
};
use crate::auth::AuthEngine;
use crate::config::ClientConfig;
use crate::error::{HcError, Result};

/// Issues calls against the provider, attaching the current credential and
/// honoring the shared rate-limit deadline.
///
/// Each call is retried in place, with identical parameters, for as long as
/// the provider answers with a rate-limit signal. There is no attempt cap;
/// the deadline itself paces the retries.
#[derive(Clone)]
pub struct Executor {
    http: reqwest::Client,
    engine: Arc<AuthEngine>,
    base_url: String,
    language: Option<String>,
    request_timeout: Duration,
    rate_limit_cooldown: Duration,
    counter: Arc<AtomicU64>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .field("requests", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

impl Executor {
    pub fn new(http: reqwest::Client, engine: Arc<AuthEngine>, config: &ClientConfig) -> Self {
        Self {
            http,
            engine,
            base_url: config.api_url().to_string(),
            language: config.language.clone(),
            request_timeout: config.request_timeout,
            rate_limit_cooldown: config.rate_limit_cooldown,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn engine(&self) -> &Arc<AuthEngine> {
        &self.engine
    }

    /// Run `request` until it succeeds or fails with a non-retryable error.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        loop {
            self.engine.wait_for_rate_limit().await;
            let bearer = if request.authenticated {
                Some(self.engine.bearer().await?)
            } else {
                None
            };

            match self.attempt(request, bearer.as_deref()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    self.absorb(&err);
                    if matches!(err, HcError::RateLimited { .. }) {
                        warn!(
                            method = %request.method,
                            target = request.target.as_str(),
                            "rate limited, retrying"
                        );
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Open an event stream. A single attempt: the stream manager owns the
    /// retry loop for long-lived connections.
    pub async fn open_stream(&self, path: &str) -> Result<reqwest::Response> {
        self.engine.wait_for_rate_limit().await;
        let bearer = self.engine.bearer().await?;
        let url = self.resolve(path);
        let number = self.next_request_number();
        debug!(request = number, url = url.as_str(), "opening event stream");

        let mut builder = self
            .http
            .get(&url)
            .header(ACCEPT, EVENT_STREAM)
            .header(AUTHORIZATION, bearer);
        if let Some(language) = &self.language {
            builder = builder.header(ACCEPT_LANGUAGE, language.as_str());
        }

        let response = builder.send().await?;
        if response.status().as_u16() == 200 {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let hint = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let err = classify_error(status, hint, &body);
        self.absorb(&err);
        Err(err)
    }

    /// Apply the side effects an error demands: push the rate-limit
    /// deadline or invalidate credentials.
    pub(crate) fn absorb(&self, err: &HcError) {
        match err {
            HcError::RateLimited { retry_after_ms } => {
                let delay = retry_after_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.rate_limit_cooldown);
                self.engine.push_rate_limit(delay);
            }
            HcError::AccessTokenInvalid(_) => self.engine.invalidate_access_token(),
            HcError::RefreshTokenInvalid(_) => self.engine.invalidate_credentials(),
            HcError::ClientMisconfigured { .. } => {
                error!(error = %err, "client registration rejected by provider");
                self.engine.invalidate_credentials();
            }
            _ => {}
        }
    }

    async fn attempt(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        let url = self.resolve(&request.target);
        let number = self.next_request_number();
        debug!(
            request = number,
            method = %request.method,
            url = url.as_str(),
            "sending request"
        );

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .timeout(self.request_timeout)
            .header(ACCEPT, BSH_JSON);
        if let Some(language) = &self.language {
            builder = builder.header(ACCEPT_LANGUAGE, language.as_str());
        }
        if let Some(bearer) = bearer {
            builder = builder.header(AUTHORIZATION, bearer);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder
                .header(CONTENT_TYPE, BSH_JSON)
                .body(serde_json::to_vec(value)?),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await?;
        let status = response.status();
        debug!(request = number, status = status.as_u16(), "response");

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    HcError::Protocol(format!("redirect {status} without Location header"))
                })?;
            return Ok(ApiResponse::Redirect(location));
        }

        if status.is_success() {
            let bytes = response.bytes().await?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(ApiResponse::Empty);
            }
            return Ok(ApiResponse::Json(serde_json::from_slice(&bytes)?));
        }

        let hint = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), hint, &body))
    }

    fn resolve(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}{}", self.base_url, target)
        }
    }

    fn next_request_number(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
