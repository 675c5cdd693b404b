//! CLI handlers for appliance listing, status, and event streams.

use futures::StreamExt;
use serde_json::Value;

use crate::client::Client;
use crate::config::ClientConfig;

/// Handle `hcctl appliances`.
pub async fn handle_list(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::start(config)?;
    let appliances = client.api().get_appliances().await;
    client.shutdown().await;

    let appliances = appliances?;
    if appliances.is_empty() {
        println!("No appliances paired");
    }
    for appliance in appliances {
        let field = |name: &str| {
            appliance
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string()
        };
        let connected = appliance
            .get("connected")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        println!(
            "{} {} {} ({})",
            if connected { "🟢" } else { "⚪" },
            field("haId"),
            field("name"),
            field("type"),
        );
    }
    Ok(())
}

/// Handle `hcctl status <haid>`.
pub async fn handle_status(
    config: ClientConfig,
    haid: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::start(config)?;
    let status = client.api().get_status(haid).await;
    client.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&status?)?);
    Ok(())
}

/// Handle `hcctl events <haid>`.
pub async fn handle_events(
    config: ClientConfig,
    haid: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::start(config)?;
    let mut events = Box::pin(client.events().subscribe_stream(haid));
    client.events().start(haid);
    eprintln!("📡 Listening for events from {haid} (Ctrl-C to stop)");

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    let kind = event.kind.map(|k| k.to_string()).unwrap_or_default();
                    let data = event.data.map(|d| d.to_string()).unwrap_or_default();
                    println!("{kind} {data}");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.events().stop(haid);
    client.shutdown().await;
    Ok(())
}
