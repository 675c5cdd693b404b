//! OAuth device flow, token lifecycle, and credential storage.

pub mod device_code;
pub mod engine;
pub mod oauth;
pub mod rate_limit;
pub mod store;
pub mod token;

pub use device_code::{DeviceCodePoll, DeviceCodeSession};
pub use engine::{AuthEngine, AuthEvent, AuthState};
pub use oauth::OAuthClient;
pub use rate_limit::RateLimit;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use token::{CredentialMap, TokenPair, TokenResponse};
