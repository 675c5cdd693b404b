//! Error types for the Home Connect client.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all client operations.
#[derive(Error, Debug)]
pub enum HcError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        key: Option<String>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Access token rejected: {0}")]
    AccessTokenInvalid(String),

    #[error("Refresh token rejected: {0}")]
    RefreshTokenInvalid(String),

    #[error("Client misconfigured: {description}{}", remediation_suffix(.remediation))]
    ClientMisconfigured {
        description: String,
        remediation: Option<String>,
    },

    #[error("Authorization pending")]
    AuthorizationPending,

    #[error("Polling too fast")]
    SlowDown,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Device code expired before the user approved access")]
    DeviceCodeExpired,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Interrupted by credential invalidation")]
    Interrupted,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Cancelled")]
    Cancelled,
}

fn remediation_suffix(remediation: &Option<String>) -> String {
    remediation
        .as_deref()
        .map(|text| format!(" ({text})"))
        .unwrap_or_default()
}

impl HcError {
    /// Create an API error without a provider key.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            key: None,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) | Self::Stream(_) => ErrorCategory::Transport,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::AccessTokenInvalid(_) => ErrorCategory::AccessToken,
            Self::RefreshTokenInvalid(_) => ErrorCategory::RefreshToken,
            Self::ClientMisconfigured { .. } => ErrorCategory::ClientConfiguration,
            Self::AuthorizationPending
            | Self::SlowDown
            | Self::AccessDenied(_)
            | Self::DeviceCodeExpired
            | Self::NotAuthorized => ErrorCategory::Authorization,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Api { status, .. } => match status {
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::Io(_) | Self::Store(_) => ErrorCategory::Serialization,
            Self::Interrupted | Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether the condition is transient enough that reopening a long-lived
    /// connection is worthwhile.
    ///
    /// The request executor is stricter: it only retries in place on
    /// [`HcError::RateLimited`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Transport | ErrorCategory::Server
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Transport | ErrorCategory::RateLimit | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::AccessToken => RecoverySuggestion::WaitForRefresh,
            ErrorCategory::RefreshToken | ErrorCategory::Authorization => {
                RecoverySuggestion::Reauthorize
            }
            ErrorCategory::ClientConfiguration => RecoverySuggestion::CheckClientRegistration,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Protocol => RecoverySuggestion::ReportDefect,
            _ => RecoverySuggestion::None,
        }
    }
}

impl From<toml::de::Error> for HcError {
    fn from(error: toml::de::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<toml::ser::Error> for HcError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Store(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, HcError>;
