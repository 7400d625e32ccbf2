use frametv_remote::{
    Device, DiscoveryEngine, FileTokenStore, RestEvent, SessionState, TvClient, TvConfig,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Usage: diagnose [ADDRESS]
///
/// Without an address the first television found on the network is used.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frametv_remote=info")),
        )
        .init();

    let config = TvConfig::default();

    let device = match std::env::args().nth(1) {
        Some(address) => Device::from_address(address.parse::<IpAddr>()?),
        None => {
            let engine = DiscoveryEngine::new(config.discovery.clone());
            let mut results = engine.discover(Duration::from_secs(5));
            match results.next().await {
                Some(found) => {
                    println!("Found {} via {}", found.device.name(), found.method);
                    found.device
                }
                None => {
                    println!("No televisions found");
                    return Ok(());
                }
            }
        }
    };

    let store = Arc::new(FileTokenStore::new("frametv-token.json"));
    println!("Connecting to {} (accept the prompt on screen if asked)", device.name());
    let client = TvClient::connect(device, &config, Some(store)).await?;

    let mut states = client.session().state_changes();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("Session state: {}", state);
            if state == SessionState::Closed {
                break;
            }
        }
    });

    client.session().add_raw_observer(|frame| println!("<- {}", frame));
    client.companion().add_rest_observer(|event| match event {
        RestEvent::RequestStarted { method, url, .. } => println!("-> {} {}", method, url),
        RestEvent::ResponseReceived { status, duration, .. } => {
            println!("<- HTTP {} in {:?}", status, duration)
        }
        RestEvent::RequestFailed { message, .. } => println!("<- failed: {}", message),
    });

    let info = client.remote().device_info().await?;
    println!(
        "Model {} (frame support: {})",
        info.device.model_name,
        info.supports_art()
    );

    if info.supports_art() {
        match client.remote().art_mode().await {
            Ok(mode) => println!("Art mode: {:?}", mode),
            Err(e) => println!("Art mode unavailable: {}", e),
        }
        match client.content().list_content().await {
            Ok(items) => println!("{} item(s) in the content library", items.len()),
            Err(e) => println!("Content listing failed: {}", e),
        }
    }

    println!("Listening for events for 10 seconds...");
    let mut events = client.subscribe_events();
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(event) = events.recv().await {
            println!("Event: {:?}", event);
        }
    })
    .await;

    client.disconnect().await;
    Ok(())
}
