#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use homeconnect::auth::{AuthEngine, CredentialMap, MemoryCredentialStore, OAuthClient, TokenPair};
use homeconnect::config::ClientConfig;
use homeconnect::http::{build_client, Executor};
use serde_json::{json, Value};
use wiremock::MockServer;

pub const CLIENT_ID: &str = "client-1";

/// Config pointed at `server` with delays short enough for tests.
pub fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::builder()
        .client_id(CLIENT_ID)
        .base_url(server.uri())
        .acquire_retry_delay(Duration::from_millis(100))
        .refresh_retry_delay(Duration::from_millis(100))
        .stream_retry_delay(Duration::from_millis(100))
        .rate_limit_cooldown(Duration::from_secs(1))
        .build()
}

pub fn pair(access: Option<&str>, refresh: &str) -> TokenPair {
    TokenPair {
        refresh_token: refresh.to_string(),
        access_token: access.map(str::to_string),
        access_expires_at: Utc::now() + ChronoDuration::hours(24),
        scopes: Vec::new(),
    }
}

pub fn store_with(pair: TokenPair) -> Arc<MemoryCredentialStore> {
    let mut credentials = CredentialMap::new();
    credentials.insert(CLIENT_ID.to_string(), pair);
    Arc::new(MemoryCredentialStore::with_credentials(credentials))
}

pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 86400,
        "scope": "IdentifyAppliance Monitor Control Settings",
        "token_type": "Bearer"
    })
}

/// Engine, executor and OAuth client without a running engine loop.
pub fn components(
    config: &ClientConfig,
    credentials: CredentialMap,
) -> (Arc<AuthEngine>, Executor, OAuthClient) {
    let engine = Arc::new(AuthEngine::new(config, credentials));
    let http = build_client(Duration::from_secs(5)).expect("http client");
    let executor = Executor::new(http, engine.clone(), config);
    let oauth = OAuthClient::new(executor.clone(), config);
    (engine, executor, oauth)
}

/// Poll `condition` every 20ms until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
