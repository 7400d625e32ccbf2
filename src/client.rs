use crate::auth::TokenStore;
use crate::companion::CompanionClient;
use crate::config::TvConfig;
use crate::content::ContentController;
use crate::error::Result;
use crate::remote::RemoteControl;
use crate::session::ConnectionSession;
use crate::subscription::EventReceiver;
use crate::types::Device;
use std::net::IpAddr;
use std::sync::Arc;

/// Everything needed to drive one television
///
/// The `TvClient` owns the control-channel session and the companion HTTP
/// client for a device and hands out command builders on top of them.
pub struct TvClient {
    session: Arc<ConnectionSession>,
    companion: Arc<CompanionClient>,
}

impl TvClient {
    /// Connect to `device` and wait for the session to become Ready
    ///
    /// A token from `token_store` is presented when it belongs to the device;
    /// a newly issued token is saved back to it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use frametv_remote::{Device, FileTokenStore, TvClient, TvConfig};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let device = Device::from_address("192.168.1.40".parse()?);
    ///     let store = Arc::new(FileTokenStore::new("tv-token.json"));
    ///     let client = TvClient::connect(device, &TvConfig::default(), Some(store)).await?;
    ///
    ///     let info = client.remote().device_info().await?;
    ///     println!("Connected to {}", info.device.model_name);
    ///
    ///     client.disconnect().await;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(
        device: Device,
        config: &TvConfig,
        token_store: Option<Arc<dyn TokenStore>>,
    ) -> Result<Self> {
        let companion = CompanionClient::for_device(&device, &config.companion)?;
        let session = ConnectionSession::new(device, config.session.clone(), token_store);
        session.connect().await?;

        Ok(Self {
            session: Arc::new(session),
            companion: Arc::new(companion),
        })
    }

    /// Connect to a known address without discovery
    pub async fn connect_address(address: IpAddr, config: &TvConfig) -> Result<Self> {
        Self::connect(Device::from_address(address), config, None).await
    }

    pub fn device(&self) -> &Device {
        self.session.device()
    }

    pub fn remote(&self) -> RemoteControl {
        RemoteControl::new(self.session.clone())
    }

    pub fn content(&self) -> ContentController {
        ContentController::new(self.companion.clone(), Some(self.session.clone()))
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    pub fn companion(&self) -> &Arc<CompanionClient> {
        &self.companion
    }

    /// Subscribe to unsolicited events from the device
    ///
    /// Multiple subscriptions can be active simultaneously.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.session.subscribe_events()
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await
    }
}
