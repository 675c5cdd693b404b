//! Client configuration (layered: code > env > defaults).

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

use crate::error::{HcError, Result};

/// Production API host.
pub const PRODUCTION_URL: &str = "https://api.home-connect.com";
/// Developer-portal simulator host.
pub const SIMULATOR_URL: &str = "https://simulator.home-connect.com";

const DEFAULT_SCOPES: &[&str] = &["IdentifyAppliance", "Monitor", "Control", "Settings"];

/// Configuration for one client identity.
///
/// # Example
/// ```
/// use homeconnect::config::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .client_id("0123456789ABCDEF")
///     .simulator(true)
///     .build();
/// assert!(config.api_url().starts_with("https://simulator"));
/// ```
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// OAuth client id; also the key credentials are stored under.
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub client_secret: Option<String>,
    /// Use the simulator and the code-grant short-circuit instead of the
    /// device flow.
    #[builder(default)]
    pub simulator: bool,
    #[builder(default = default_scopes())]
    pub scopes: Vec<String>,
    /// Sent as `Accept-Language` on resource calls.
    #[builder(into)]
    pub language: Option<String>,
    /// Overrides the host derived from `simulator`.
    #[builder(into)]
    pub base_url: Option<String>,
    /// Overall limit for one REST call. Event streams have none.
    #[builder(default = Duration::from_secs(20))]
    pub request_timeout: Duration,
    /// Limit for establishing a connection, REST calls and streams alike.
    #[builder(default = Duration::from_secs(10))]
    pub connect_timeout: Duration,
    /// Refresh this long before the access token expires.
    #[builder(default = Duration::from_secs(60 * 60))]
    pub refresh_window: Duration,
    /// Engine backoff when no refresh token exists.
    #[builder(default = Duration::from_secs(60))]
    pub acquire_retry_delay: Duration,
    /// Engine backoff when a refresh failed but the refresh token survives.
    #[builder(default = Duration::from_secs(5))]
    pub refresh_retry_delay: Duration,
    /// Cool-down applied when the provider rate-limits without a hint.
    #[builder(default = Duration::from_secs(60))]
    pub rate_limit_cooldown: Duration,
    /// Delay before reopening a failed or closed event stream.
    #[builder(default = Duration::from_secs(5))]
    pub stream_retry_delay: Duration,
    pub credentials_path: Option<PathBuf>,
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

impl ClientConfig {
    /// Load from environment variables (`HOMECONNECT_CLIENT_ID`, ...).
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let client_id = std::env::var("HOMECONNECT_CLIENT_ID").map_err(|_| {
            HcError::Configuration("HOMECONNECT_CLIENT_ID is not set".to_string())
        })?;

        let mut config = Self::builder().client_id(client_id).build();
        config.client_secret = std::env::var("HOMECONNECT_CLIENT_SECRET").ok();
        config.simulator = std::env::var("HOMECONNECT_SIMULATOR")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        config.language = std::env::var("HOMECONNECT_LANGUAGE").ok();
        config.base_url = std::env::var("HOMECONNECT_BASE_URL").ok();
        config.credentials_path = std::env::var("HOMECONNECT_CREDENTIALS")
            .ok()
            .map(PathBuf::from);
        if let Ok(scopes) = std::env::var("HOMECONNECT_SCOPES") {
            config.scopes = scopes.split_whitespace().map(str::to_string).collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never authorize.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(HcError::Configuration("client id is empty".to_string()));
        }
        if self.scopes.is_empty() {
            return Err(HcError::Configuration("no OAuth scopes requested".to_string()));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(HcError::Configuration(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.refresh_window.is_zero() {
            return Err(HcError::Configuration(
                "refresh window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Host all endpoints are resolved against.
    pub fn api_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/'),
            None if self.simulator => SIMULATOR_URL,
            None => PRODUCTION_URL,
        }
    }

    pub fn device_authorization_url(&self) -> String {
        format!("{}/security/oauth/device_authorization", self.api_url())
    }

    pub fn token_url(&self) -> String {
        format!("{}/security/oauth/token", self.api_url())
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/security/oauth/authorize", self.api_url())
    }

    /// Space-separated scope list as sent to the provider.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
