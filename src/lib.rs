//! Rust library for discovering and controlling picture-frame televisions
//!
//! This library provides an async API for televisions that expose a local
//! WebSocket remote-control channel and an HTTP companion API. It supports:
//!
//! - Discovery via mDNS service browsing and SSDP multicast search
//! - Pairing, with tokens persisted through a pluggable token store
//! - Remote-control key presses and device queries
//! - Art mode and picture-frame content management
//! - Automatic reconnection with exponential backoff
//! - Real-time event subscriptions and raw-frame observers
//!
//! # Quick Start
//!
//! ```no_run
//! use frametv_remote::{DiscoveryEngine, TvConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TvConfig::default();
//!
//!     // Look for televisions for a few seconds
//!     let engine = DiscoveryEngine::new(config.discovery.clone());
//!     let mut results = engine.discover(Duration::from_secs(5));
//!
//!     if let Some(found) = results.next().await {
//!         println!("Found {} via {}", found.device.name(), found.method);
//!
//!         // Connect; the television may ask to allow the connection on screen
//!         let client = found.device.connect(&config).await?;
//!         client.remote().volume_up().await?;
//!
//!         // Subscribe to events
//!         let mut events = client.subscribe_events();
//!         if let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!
//!         client.disconnect().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Direct Connection
//!
//! If you know the IP address of a television, you can connect directly:
//!
//! ```no_run
//! use frametv_remote::{ImageType, TvClient, TvConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TvClient::connect_address("192.168.1.40".parse()?, &TvConfig::default()).await?;
//!
//!     let image = std::fs::read("sunset.jpg")?;
//!     let id = client.content().upload(image, ImageType::Jpeg, None).await?;
//!     client.content().select(&id, true).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Discovery**: pluggable probes merged into one de-duplicated stream
//! - **Transport**: one WebSocket connection, plain or TLS
//! - **Session**: pairing, state machine and reconnection for one device
//! - **Correlation**: matches responses to the calls that caused them
//! - **Router**: fans inbound frames out to calls and observers
//! - **Companion**: HTTP request/response client with lifecycle events
//! - **Remote / Content**: command builders on top of the session and companion
//! - **Client**: bundles all of the above for one device

mod auth;
mod client;
mod companion;
mod config;
mod content;
mod correlation;
mod discovery;
mod error;
mod observer;
pub mod protocol;
mod remote;
mod router;
mod session;
mod subscription;
mod transport;
mod types;

// Public exports
pub use auth::{AuthStore, AuthenticationToken, FileTokenStore, MemoryTokenStore, Scope, TokenStore};
pub use client::TvClient;
pub use companion::{CompanionClient, Headers, HttpResponse, RestEvent};
pub use config::{CompanionConfig, DiscoveryConfig, ReconnectPolicy, SessionConfig, TvConfig};
pub use content::ContentController;
pub use correlation::CorrelationEngine;
pub use discovery::{DiscoveryCanceller, DiscoveryEngine, DiscoveryStream, MdnsProbe, Probe, SsdpProbe};
pub use error::{
    AuthenticationError, CallError, DiscoveryError, HandshakeError, RequestError, Result,
    TransportError, TvError,
};
pub use observer::ObserverId;
pub use remote::{Key, RemoteControl};
pub use router::{EventRouter, Routing};
pub use session::ConnectionSession;
pub use subscription::{DeviceEvent, EventReceiver, MalformedFrame};
pub use transport::{CloseReason, Endpoint, FrameReceiver, FrameSender, FrameTransport};
pub use types::{
    ArtMode, ContentId, ContentItem, Device, DeviceDetails, DeviceId, DeviceInfo, DiscoveryMethod,
    DiscoveryResult, ImageType, MatteCatalog, MatteDescriptor, PhotoFilter, SecurityMode,
    SessionState,
};
