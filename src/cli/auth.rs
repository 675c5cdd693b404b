//! CLI auth command handlers for login, status, and logout.

use tokio::sync::broadcast::error::RecvError;

use crate::auth::{AuthEvent, CredentialStore, FileCredentialStore};
use crate::client::Client;
use crate::config::ClientConfig;

fn store_for(config: &ClientConfig) -> FileCredentialStore {
    match &config.credentials_path {
        Some(path) => FileCredentialStore::new(path),
        None => FileCredentialStore::new_default(),
    }
}

/// Handle `hcctl auth login`.
pub async fn handle_login(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::start(config)?;
    let mut events = client.auth().subscribe();

    let announcer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AuthEvent::AuthorizationUri {
                    uri,
                    user_code,
                    expires_at,
                }) => {
                    println!("🔗 Visit: {uri}");
                    println!("📋 Code: {user_code}");
                    println!(
                        "⏳ Waiting for authorization (expires {})...",
                        expires_at.format("%H:%M:%S")
                    );
                }
                Ok(AuthEvent::CredentialsChanged(_)) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let authorized = tokio::select! {
        result = client.auth().wait_until_authorized() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    announcer.abort();
    // Shutting down lets the persistence task finish writing the new token.
    client.shutdown().await;
    match authorized {
        Some(result) => {
            result?;
            println!("✅ Home Connect login successful!");
            Ok(())
        }
        None => {
            eprintln!("❌ Login interrupted");
            std::process::exit(1);
        }
    }
}

/// Handle `hcctl auth status`.
pub async fn handle_status(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = store_for(&config);
    println!("🔐 Authorization Status ({})\n", store.path().display());

    let credentials = store.load()?;
    if credentials.is_empty() {
        println!("  ❌ No stored credentials");
        return Ok(());
    }
    let now = chrono::Utc::now();
    for (client_id, pair) in &credentials {
        let marker = if client_id == &config.client_id {
            " (this client)"
        } else {
            ""
        };
        let status = if pair.is_access_valid(now) {
            format!(
                "✅ Authorized (expires {})",
                pair.access_expires_at.format("%Y-%m-%d %H:%M")
            )
        } else {
            "⚠️  Access token expired (will refresh)".to_string()
        };
        println!("  {client_id}{marker}: {status}");
    }
    Ok(())
}

/// Handle `hcctl auth logout`.
pub async fn handle_logout(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = store_for(&config);
    let mut credentials = store.load()?;
    if credentials.remove(&config.client_id).is_none() {
        println!("Nothing stored for {}", config.client_id);
        return Ok(());
    }
    store.save(&credentials)?;
    println!("✅ Logged out {}", config.client_id);
    Ok(())
}
