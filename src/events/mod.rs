//! Per-appliance event streams with fan-out delivery and cancellation.

pub mod parser;

pub use parser::{EventKind, EventParser, EventRecord};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{HcError, Result};
use crate::http::Executor;

const SUBSCRIBER_CAPACITY: usize = 64;

/// One event delivered for an appliance.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceEvent {
    pub haid: String,
    pub kind: Option<EventKind>,
    pub id: Option<String>,
    pub data: Option<Value>,
    pub fields: BTreeMap<String, String>,
}

impl ApplianceEvent {
    pub fn new(haid: impl Into<String>, record: EventRecord) -> Self {
        Self {
            haid: haid.into(),
            kind: record.kind,
            id: record.id,
            data: record.data,
            fields: record.fields,
        }
    }
}

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one live event-stream connection per appliance.
pub struct EventStreams {
    executor: Executor,
    retry_delay: Duration,
    shutdown: CancellationToken,
    streams: Mutex<HashMap<String, StreamHandle>>,
    subscribers: Mutex<HashMap<String, broadcast::Sender<ApplianceEvent>>>,
}

impl std::fmt::Debug for EventStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreams")
            .field("active", &self.active())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl EventStreams {
    pub fn new(executor: Executor, config: &ClientConfig, shutdown: CancellationToken) -> Self {
        Self {
            executor,
            retry_delay: config.stream_retry_delay,
            shutdown,
            streams: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Receive events for `haid`. Any number of subscribers may listen.
    pub fn subscribe(&self, haid: &str) -> broadcast::Receiver<ApplianceEvent> {
        self.sender(haid).subscribe()
    }

    /// [`Self::subscribe`] as a `Stream`; lagged events are skipped.
    pub fn subscribe_stream(&self, haid: &str) -> impl Stream<Item = ApplianceEvent> {
        BroadcastStream::new(self.subscribe(haid)).filter_map(|item| async move { item.ok() })
    }

    /// Open (or reopen) the stream for `haid`, cancelling any existing one.
    pub fn start(&self, haid: &str) {
        let sender = self.sender(haid);
        let mut streams = self.lock_streams();
        // The old connection is cancelled before the new task can run.
        if let Some(previous) = streams.remove(haid) {
            debug!(haid, "replacing existing event stream");
            previous.cancel.cancel();
        }
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_stream(
            self.executor.clone(),
            haid.to_string(),
            sender,
            cancel.clone(),
            self.retry_delay,
        ));
        streams.insert(haid.to_string(), StreamHandle { cancel, task });
    }

    /// Cancel the stream for `haid`. Returns whether one was running.
    ///
    /// Never fails; lines already buffered are discarded.
    pub fn stop(&self, haid: &str) -> bool {
        match self.lock_streams().remove(haid) {
            Some(handle) => {
                handle.cancel.cancel();
                info!(haid, "event stream stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (haid, handle) in self.lock_streams().drain() {
            handle.cancel.cancel();
            debug!(haid = haid.as_str(), "event stream stopped");
        }
    }

    pub fn is_active(&self, haid: &str) -> bool {
        self.lock_streams()
            .get(haid)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    pub fn active(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .lock_streams()
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(haid, _)| haid.clone())
            .collect();
        active.sort();
        active
    }

    fn sender(&self, haid: &str) -> broadcast::Sender<ApplianceEvent> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers
            .entry(haid.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .clone()
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<String, StreamHandle>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for EventStreams {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Keep one appliance's stream open until cancelled.
async fn run_stream(
    executor: Executor,
    haid: String,
    sender: broadcast::Sender<ApplianceEvent>,
    cancel: CancellationToken,
    retry_delay: Duration,
) {
    let path = format!("/api/homeappliances/{haid}/events");
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = stream_once(&executor, &path, &haid, &sender, &cancel) => outcome,
        };
        if cancel.is_cancelled() {
            break;
        }
        match outcome {
            Ok(()) => info!(haid = haid.as_str(), "event stream closed by server, reopening"),
            Err(err) => warn!(
                haid = haid.as_str(),
                error = %err,
                retryable = err.is_retryable(),
                "event stream failed, reopening"
            ),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
    debug!(haid = haid.as_str(), "event stream task finished");
}

/// Open the stream once and deliver records until it ends.
async fn stream_once(
    executor: &Executor,
    path: &str,
    haid: &str,
    sender: &broadcast::Sender<ApplianceEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    let response = executor.open_stream(path).await?;
    info!(haid, "event stream connected");

    let mut bytes = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut parser = EventParser::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|e| HcError::Stream(e.to_string()))?;
        buffer.extend_from_slice(&chunk);

        while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=end).collect();
            if cancel.is_cancelled() {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            if let Some(record) = parser.push_line(&line) {
                let _ = sender.send(ApplianceEvent::new(haid, record));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::{AuthEngine, CredentialMap, TokenPair};
    use crate::http::build_client;

    const CLIENT_ID: &str = "client-1";

    fn executor(base_url: String, authorized: bool) -> Executor {
        let config = ClientConfig::builder()
            .client_id(CLIENT_ID)
            .base_url(base_url)
            .build();
        let mut credentials = CredentialMap::new();
        if authorized {
            credentials.insert(
                CLIENT_ID.to_string(),
                TokenPair {
                    refresh_token: "refresh".to_string(),
                    access_token: Some("access".to_string()),
                    access_expires_at: Utc::now() + ChronoDuration::hours(1),
                    scopes: Vec::new(),
                },
            );
        }
        let engine = Arc::new(AuthEngine::new(&config, credentials));
        let http = build_client(Duration::from_secs(5)).expect("http client");
        Executor::new(http, engine, &config)
    }

    fn streams(executor: Executor) -> EventStreams {
        let config = ClientConfig::builder().client_id(CLIENT_ID).build();
        EventStreams::new(executor, &config, CancellationToken::new())
    }

    #[tokio::test]
    async fn cancelled_stream_drops_lines_already_received() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances/HA1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "event: STATUS\ndata: {\"items\":[]}\n\nevent: NOTIFY\ndata: {\"items\":[]}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let executor = executor(server.uri(), true);
        let (sender, mut receiver) = broadcast::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = stream_once(
            &executor,
            "/api/homeappliances/HA1/events",
            "HA1",
            &sender,
            &cancel,
        )
        .await;
        assert!(outcome.is_ok());
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn live_stream_delivers_every_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/homeappliances/HA1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "event: STATUS\ndata: {\"items\":[]}\n\nevent: NOTIFY\ndata: {\"items\":[]}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let executor = executor(server.uri(), true);
        let (sender, mut receiver) = broadcast::channel(8);
        stream_once(
            &executor,
            "/api/homeappliances/HA1/events",
            "HA1",
            &sender,
            &CancellationToken::new(),
        )
        .await
        .expect("stream");

        let kinds: Vec<_> = std::iter::from_fn(|| receiver.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(kinds, vec![Some(EventKind::Status), Some(EventKind::Notify)]);
    }

    #[tokio::test]
    async fn restart_cancels_previous_stream_before_replacing_it() {
        // Unauthorized, so each task parks waiting for a token.
        let streams = streams(executor("http://127.0.0.1:9".to_string(), false));
        streams.start("HA1");
        let first = streams
            .lock_streams()
            .get("HA1")
            .map(|handle| handle.cancel.clone())
            .expect("first stream");

        streams.start("HA1");
        assert!(first.is_cancelled());
        let second = streams
            .lock_streams()
            .get("HA1")
            .map(|handle| handle.cancel.clone())
            .expect("second stream");
        assert!(!second.is_cancelled());
        assert_eq!(streams.active(), vec!["HA1".to_string()]);

        assert!(streams.stop("HA1"));
        assert!(second.is_cancelled());
        assert!(!streams.stop("HA1"));
    }
}
