//! Authorization engine: owns the single token pair, keeps it fresh, and
//! releases callers waiting for a usable credential.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::oauth::OAuthClient;
use super::rate_limit::RateLimit;
use super::token::{CredentialMap, TokenPair};
use super::DeviceCodePoll;
use crate::config::ClientConfig;
use crate::error::{HcError, Result};

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthorized,
    Acquiring,
    Authorized,
    Refreshing,
}

/// Notifications published by the engine.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// Device flow started; the user must visit `uri` before `expires_at`.
    AuthorizationUri {
        uri: String,
        user_code: String,
        expires_at: DateTime<Utc>,
    },
    /// A token was saved; carries the full mapping for persistence.
    CredentialsChanged(CredentialMap),
}

#[derive(Debug, Default)]
struct Inner {
    credentials: CredentialMap,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Lifecycle owner for one OAuth client identity.
///
/// Only the background loop started with [`AuthEngine::run`] acquires or
/// refreshes tokens, so saves are strictly serialized. Everything else
/// reads through the public operations.
#[derive(Debug)]
pub struct AuthEngine {
    client_id: String,
    simulator: bool,
    refresh_window: Duration,
    acquire_retry_delay: Duration,
    refresh_retry_delay: Duration,
    inner: Mutex<Inner>,
    invalidations: watch::Sender<u64>,
    state: watch::Sender<AuthState>,
    events: broadcast::Sender<AuthEvent>,
    rate_limit: RateLimit,
}

impl AuthEngine {
    pub fn new(config: &ClientConfig, credentials: CredentialMap) -> Self {
        let initial = match credentials.get(&config.client_id) {
            Some(pair) if pair.is_access_valid(Utc::now()) => AuthState::Authorized,
            _ => AuthState::Unauthorized,
        };
        let (invalidations, _) = watch::channel(0);
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(16);
        Self {
            client_id: config.client_id.clone(),
            simulator: config.simulator,
            refresh_window: config.refresh_window,
            acquire_retry_delay: config.acquire_retry_delay,
            refresh_retry_delay: config.refresh_retry_delay,
            inner: Mutex::new(Inner {
                credentials,
                waiters: Vec::new(),
            }),
            invalidations,
            state,
            events,
            rate_limit: RateLimit::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Snapshot of the whole credential mapping.
    pub fn credentials(&self) -> CredentialMap {
        self.lock().credentials.clone()
    }

    /// Token pair of this client identity, if any.
    pub fn token(&self) -> Option<TokenPair> {
        self.lock().credentials.get(&self.client_id).cloned()
    }

    /// Resolve once a non-expired access token exists.
    pub async fn wait_until_authorized(&self) -> Result<()> {
        let released = {
            let mut inner = self.lock();
            let valid = inner
                .credentials
                .get(&self.client_id)
                .is_some_and(|pair| pair.is_access_valid(Utc::now()));
            if valid {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            rx
        };
        debug!("waiting for authorization");
        released.await.map_err(|_| HcError::Cancelled)
    }

    /// Current bearer credential, e.g. `"Bearer eyJ..."`.
    ///
    /// Does not wait; call [`AuthEngine::wait_until_authorized`] first.
    pub fn authorization(&self) -> Result<String> {
        self.lock()
            .credentials
            .get(&self.client_id)
            .and_then(|pair| pair.access_token.as_deref())
            .map(|token| format!("Bearer {token}"))
            .ok_or(HcError::NotAuthorized)
    }

    /// Wait for authorization and return the bearer credential, re-waiting
    /// if it was invalidated between release and read.
    pub async fn bearer(&self) -> Result<String> {
        loop {
            self.wait_until_authorized().await?;
            match self.authorization() {
                Ok(bearer) => return Ok(bearer),
                Err(HcError::NotAuthorized) => continue,
                Err(other) => return Err(other),
            }
        }
    }

    /// The provider rejected the access token; keep the refresh token.
    pub fn invalidate_access_token(&self) {
        {
            let mut inner = self.lock();
            if let Some(pair) = inner.credentials.get_mut(&self.client_id) {
                pair.access_token = None;
            }
        }
        warn!("access token rejected, refreshing");
        self.state.send_replace(AuthState::Unauthorized);
        self.interrupt();
    }

    /// The provider rejected the refresh token or the client; forget the
    /// whole identity so the next pass re-authorizes from scratch.
    pub fn invalidate_credentials(&self) {
        self.lock().credentials.remove(&self.client_id);
        warn!("credentials rejected, full re-authorization required");
        self.state.send_replace(AuthState::Unauthorized);
        self.interrupt();
    }

    pub fn push_rate_limit(&self, delay: Duration) {
        if self.rate_limit.push(delay) {
            warn!(delay_secs = delay.as_secs(), "rate limited by provider");
        }
    }

    pub async fn wait_for_rate_limit(&self) {
        self.rate_limit.wait().await
    }

    pub fn rate_limit_deadline(&self) -> Option<tokio::time::Instant> {
        self.rate_limit.deadline()
    }

    /// Background loop; runs until `shutdown` is cancelled.
    pub async fn run(&self, oauth: OAuthClient, shutdown: CancellationToken) {
        info!(client_id = self.client_id.as_str(), "authorization engine started");
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.step(&oauth) => outcome,
            };
            match outcome {
                Ok(()) => {}
                Err(HcError::Interrupted) => {
                    debug!("wait interrupted by invalidation, re-evaluating");
                }
                Err(err) => {
                    self.discard_access_token();
                    let delay = if self.token().is_some() {
                        self.refresh_retry_delay
                    } else {
                        self.acquire_retry_delay
                    };
                    error!(
                        error = %err,
                        retry_secs = delay.as_secs(),
                        "authorization failed"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("authorization engine stopped");
    }

    /// One pass of the state machine: acquire, or wait and refresh.
    async fn step(&self, oauth: &OAuthClient) -> Result<()> {
        let generation = *self.invalidations.borrow();
        match self.token() {
            None => {
                self.state.send_replace(AuthState::Acquiring);
                let pair = if self.simulator {
                    self.acquire_with_code_grant(oauth).await?
                } else {
                    self.acquire_with_device_flow(oauth, generation).await?
                };
                self.save(pair);
            }
            Some(pair) => {
                if let Some(delay) = refresh_delay(&pair, Utc::now(), self.refresh_window) {
                    self.state.send_replace(AuthState::Authorized);
                    debug!(refresh_in_secs = delay.as_secs(), "refresh scheduled");
                    self.interruptible(generation, tokio::time::sleep(delay))
                        .await?;
                }
                self.state.send_replace(AuthState::Refreshing);
                info!("refreshing access token");
                let refreshed = oauth.refresh(&pair.refresh_token).await?;
                self.save(refreshed);
            }
        }
        Ok(())
    }

    async fn acquire_with_code_grant(&self, oauth: &OAuthClient) -> Result<TokenPair> {
        info!("authorizing against the simulator");
        let code = oauth.authorize_simulator().await?;
        oauth.exchange_code(&code).await
    }

    /// Device flow: publish the verification URI and poll until the user
    /// approves, denies, or the code expires.
    pub async fn acquire_with_device_flow(
        &self,
        oauth: &OAuthClient,
        generation: u64,
    ) -> Result<TokenPair> {
        let session = oauth.start_device_code().await?;
        info!(
            uri = session.uri_for_user(),
            user_code = session.user_code.as_str(),
            "visit the verification URI to authorize this client"
        );
        let _ = self.events.send(AuthEvent::AuthorizationUri {
            uri: session.uri_for_user().to_string(),
            user_code: session.user_code.clone(),
            expires_at: session.expires_at,
        });

        let mut interval = session.interval;
        loop {
            self.interruptible(generation, tokio::time::sleep(interval))
                .await?;
            match oauth.poll_device_code(&session, interval).await? {
                DeviceCodePoll::Authorized { token } => {
                    info!("device authorization approved");
                    return Ok(token);
                }
                DeviceCodePoll::Pending => {}
                DeviceCodePoll::SlowDown { interval: slower } => {
                    debug!(interval_secs = slower.as_secs(), "provider asked to slow down");
                    interval = slower;
                }
                DeviceCodePoll::AccessDenied => {
                    return Err(HcError::AccessDenied(
                        "user declined the device authorization".to_string(),
                    ))
                }
                DeviceCodePoll::Expired => return Err(HcError::DeviceCodeExpired),
            }
        }
    }

    /// Store a fresh token pair, announce the new mapping, and release every
    /// waiter, all under one lock. A released waiter can rely on the
    /// announcement already being queued for subscribers.
    pub(crate) fn save(&self, pair: TokenPair) {
        let expires_at = pair.access_expires_at;
        {
            let mut inner = self.lock();
            inner.credentials.insert(self.client_id.clone(), pair);
            let _ = self
                .events
                .send(AuthEvent::CredentialsChanged(inner.credentials.clone()));
            for waiter in inner.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
        info!(expires_at = %expires_at, "access token saved");
        self.state.send_replace(AuthState::Authorized);
    }

    /// Current invalidation generation; pass to [`Self::interruptible`].
    pub fn generation(&self) -> u64 {
        *self.invalidations.borrow()
    }

    /// Run `fut` unless an invalidation happens (or already happened since
    /// `generation` was read), in which case return [`HcError::Interrupted`].
    pub async fn interruptible<F: Future>(&self, generation: u64, fut: F) -> Result<F::Output> {
        let mut rx = self.invalidations.subscribe();
        if *rx.borrow_and_update() != generation {
            return Err(HcError::Interrupted);
        }
        tokio::select! {
            output = fut => Ok(output),
            _ = rx.changed() => Err(HcError::Interrupted),
        }
    }

    fn interrupt(&self) {
        self.invalidations.send_modify(|generation| *generation += 1);
    }

    fn discard_access_token(&self) {
        if let Some(pair) = self.lock().credentials.get_mut(&self.client_id) {
            pair.access_token = None;
        }
        self.state.send_replace(AuthState::Unauthorized);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// How long to wait before refreshing `pair`, or `None` to refresh now.
pub fn refresh_delay(pair: &TokenPair, now: DateTime<Utc>, window: Duration) -> Option<Duration> {
    pair.access_token.as_ref()?;
    let window = chrono::Duration::from_std(window).ok()?;
    (pair.access_expires_at - now - window)
        .to_std()
        .ok()
        .filter(|delay| !delay.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use futures::FutureExt;
    use std::sync::Arc;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .client_id("client-1")
            .base_url("http://127.0.0.1:9")
            .build()
    }

    fn pair(access: Option<&str>, expires_in: i64) -> TokenPair {
        TokenPair {
            refresh_token: "refresh".to_string(),
            access_token: access.map(str::to_string),
            access_expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
            scopes: Vec::new(),
        }
    }

    fn engine_with(pair: Option<TokenPair>) -> Arc<AuthEngine> {
        let mut credentials = CredentialMap::new();
        if let Some(pair) = pair {
            credentials.insert("client-1".to_string(), pair);
        }
        Arc::new(AuthEngine::new(&config(), credentials))
    }

    #[test]
    fn refresh_is_scheduled_window_before_expiry() {
        let now = Utc::now();
        let mut token = pair(Some("a"), 0);
        token.access_expires_at = now + ChronoDuration::seconds(3601);
        let delay = refresh_delay(&token, now, Duration::from_secs(60)).unwrap();
        assert_eq!(delay, Duration::from_secs(3541));
    }

    #[test]
    fn refresh_is_immediate_inside_window_or_without_access_token() {
        let now = Utc::now();
        let mut token = pair(Some("a"), 0);
        token.access_expires_at = now + ChronoDuration::seconds(1800);
        assert_eq!(refresh_delay(&token, now, Duration::from_secs(3600)), None);

        token.access_expires_at = now + ChronoDuration::hours(24);
        token.access_token = None;
        assert_eq!(refresh_delay(&token, now, Duration::from_secs(3600)), None);
    }

    #[test]
    fn valid_token_never_suspends_waiters() {
        let engine = engine_with(Some(pair(Some("a"), 3600)));
        assert_eq!(engine.state(), AuthState::Authorized);
        let waited = engine.wait_until_authorized().now_or_never();
        assert!(matches!(waited, Some(Ok(()))));
        assert_eq!(engine.authorization().unwrap(), "Bearer a");
    }

    #[tokio::test]
    async fn save_releases_all_waiters() {
        let engine = engine_with(None);
        assert!(matches!(engine.authorization(), Err(HcError::NotAuthorized)));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let engine = engine.clone();
            waiters.push(tokio::spawn(async move { engine.bearer().await }));
        }
        tokio::task::yield_now().await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        engine.save(pair(Some("fresh"), 3600));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), "Bearer fresh");
        }
    }

    #[tokio::test]
    async fn save_publishes_full_mapping() {
        let engine = engine_with(None);
        let mut events = engine.subscribe();
        engine.save(pair(Some("fresh"), 3600));
        match events.recv().await.unwrap() {
            AuthEvent::CredentialsChanged(map) => {
                assert_eq!(map["client-1"].access_token.as_deref(), Some("fresh"));
            }
            other => panic!("expected CredentialsChanged, got {other:?}"),
        }
    }

    #[test]
    fn access_invalidation_keeps_refresh_token() {
        let engine = engine_with(Some(pair(Some("a"), 3600)));
        engine.invalidate_access_token();
        let token = engine.token().unwrap();
        assert!(token.access_token.is_none());
        assert_eq!(token.refresh_token, "refresh");
        assert_eq!(engine.state(), AuthState::Unauthorized);
    }

    #[test]
    fn credential_invalidation_removes_identity() {
        let engine = engine_with(Some(pair(Some("a"), 3600)));
        engine.invalidate_credentials();
        assert!(engine.token().is_none());
        assert!(engine.credentials().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_interrupts_a_pending_wait() {
        let engine = engine_with(Some(pair(Some("a"), 3600)));
        let generation = engine.generation();
        let sleeper = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .interruptible(generation, tokio::time::sleep(Duration::from_secs(3000)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.invalidate_access_token();
        assert!(matches!(sleeper.await.unwrap(), Err(HcError::Interrupted)));
    }

    #[tokio::test]
    async fn stale_generation_interrupts_immediately() {
        let engine = engine_with(None);
        let generation = engine.generation();
        engine.invalidate_credentials();
        let result = engine.interruptible(generation, async { 1 }).await;
        assert!(matches!(result, Err(HcError::Interrupted)));
    }

    #[tokio::test(start_paused = true)]
    async fn engine_rate_limit_is_shared_and_monotone() {
        let engine = engine_with(None);
        engine.push_rate_limit(Duration::from_secs(30));
        let first = engine.rate_limit_deadline().unwrap();
        engine.push_rate_limit(Duration::from_secs(1));
        assert_eq!(engine.rate_limit_deadline(), Some(first));
    }
}
