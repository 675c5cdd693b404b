//! Long-lived client for the Home Connect appliance cloud.
//!
//! Keeps one OAuth identity authorized (device flow in production, code
//! grant against the simulator), refreshes tokens ahead of expiry, funnels
//! every REST call through a shared rate-limit deadline, and maintains
//! per-appliance event streams.
//!
//! # Quick Start
//!
//! ```no_run
//! use homeconnect::{AuthEvent, Client, ClientConfig};
//!
//! # async fn example() -> homeconnect::error::Result<()> {
//! let client = Client::start(ClientConfig::from_env()?)?;
//! let mut auth_events = client.auth().subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = auth_events.recv().await {
//!         if let AuthEvent::AuthorizationUri { uri, .. } = event {
//!             println!("authorize at {uri}");
//!         }
//!     }
//! });
//!
//! client.auth().wait_until_authorized().await?;
//! let appliances = client.api().get_appliances().await?;
//! println!("{} appliances", appliances.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod http;

#[cfg(feature = "cli")]
pub mod cli;

pub use api::{ApplianceApi, ProgramOption};
pub use auth::{AuthEngine, AuthEvent, AuthState, CredentialStore, TokenPair};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{HcError, Result};
pub use events::{ApplianceEvent, EventKind, EventStreams};
