//! Top-level client: wires storage, the authorization engine, the request
//! executor and the event streams, and owns their background tasks.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ApplianceApi;
use crate::auth::{AuthEngine, AuthEvent, CredentialStore, FileCredentialStore, OAuthClient};
use crate::config::ClientConfig;
use crate::error::{HcError, Result};
use crate::events::EventStreams;
use crate::http::{build_client, Executor};

/// A running client for one OAuth identity.
///
/// ```no_run
/// use homeconnect::{Client, ClientConfig};
///
/// # async fn example() -> homeconnect::error::Result<()> {
/// let client = Client::start(ClientConfig::from_env()?)?;
/// client.auth().wait_until_authorized().await?;
/// for appliance in client.api().get_appliances().await? {
///     println!("{appliance}");
/// }
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    engine: Arc<AuthEngine>,
    executor: Executor,
    api: ApplianceApi,
    events: EventStreams,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.engine.client_id())
            .field("state", &self.engine.state())
            .field("events", &self.events)
            .finish()
    }
}

impl Client {
    /// Start with a file store at `config.credentials_path`, or the default
    /// location when unset.
    pub fn start(config: ClientConfig) -> Result<Self> {
        let store = match &config.credentials_path {
            Some(path) => FileCredentialStore::new(path),
            None => FileCredentialStore::new_default(),
        };
        Self::start_with_store(config, Arc::new(store))
    }

    /// Load credentials from `store`, then spawn the authorization engine and
    /// the persistence task. Must be called from within a Tokio runtime.
    pub fn start_with_store(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HcError::Configuration(format!("no Tokio runtime: {e}")))?;

        let credentials = store.load()?;
        info!(
            client_id = config.client_id.as_str(),
            stored = credentials.contains_key(&config.client_id),
            simulator = config.simulator,
            "starting client"
        );

        let http = build_client(config.connect_timeout)?;
        let engine = Arc::new(AuthEngine::new(&config, credentials));
        let executor = Executor::new(http, engine.clone(), &config);
        let oauth = OAuthClient::new(executor.clone(), &config);
        let shutdown = CancellationToken::new();

        // Subscribe before the engine runs so no save is missed.
        let persist = runtime.spawn(persist_credentials(
            engine.subscribe(),
            store,
            shutdown.clone(),
        ));
        let run = {
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            runtime.spawn(async move { engine.run(oauth, shutdown).await })
        };

        let events = EventStreams::new(executor.clone(), &config, shutdown.child_token());
        Ok(Self {
            api: ApplianceApi::new(executor.clone()),
            engine,
            executor,
            events,
            shutdown,
            tasks: vec![run, persist],
        })
    }

    pub fn auth(&self) -> &Arc<AuthEngine> {
        &self.engine
    }

    pub fn api(&self) -> &ApplianceApi {
        &self.api
    }

    pub fn events(&self) -> &EventStreams {
        &self.events
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Stop every stream and background task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.events.stop_all();
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Write every published credential mapping to `store`. Mappings already
/// queued when `shutdown` fires are still written.
async fn persist_credentials(
    mut events: tokio::sync::broadcast::Receiver<AuthEvent>,
    store: Arc<dyn CredentialStore>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => persist(store.as_ref(), event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "credential events lagged, waiting for the next save");
            }
            Err(RecvError::Closed) => return,
        }
    }
    while let Ok(event) = events.try_recv() {
        persist(store.as_ref(), event);
    }
}

fn persist(store: &dyn CredentialStore, event: AuthEvent) {
    if let AuthEvent::CredentialsChanged(credentials) = event {
        match store.save(&credentials) {
            Ok(()) => debug!(identities = credentials.len(), "credentials persisted"),
            Err(err) => error!(error = %err, "failed to persist credentials"),
        }
    }
}
