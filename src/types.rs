use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Device identifier (advertised id, or derived from the address)
pub type DeviceId = String;

/// Content identifier assigned by the device on upload
pub type ContentId = String;

/// How a device was found
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// DNS-SD service browsing
    Mdns,
    /// SSDP multicast search
    Ssdp,
    /// Constructed by the caller from a known address
    Manual,
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMethod::Mdns => write!(f, "mdns"),
            DiscoveryMethod::Ssdp => write!(f, "ssdp"),
            DiscoveryMethod::Manual => write!(f, "manual"),
        }
    }
}

/// A television on the local network
///
/// Immutable once constructed; fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    id: Option<DeviceId>,
    name: String,
    address: Option<IpAddr>,
    method: DiscoveryMethod,
}

impl Device {
    pub fn new(
        id: Option<DeviceId>,
        name: impl Into<String>,
        address: Option<IpAddr>,
        method: DiscoveryMethod,
    ) -> Self {
        Self {
            id: id.filter(|id| !id.is_empty()),
            name: name.into(),
            address,
            method,
        }
    }

    /// Device at a known address, skipping discovery
    pub fn from_address(address: IpAddr) -> Self {
        Self::new(None, address.to_string(), Some(address), DiscoveryMethod::Manual)
    }

    /// Stable identity: the advertised id when present, otherwise derived
    /// from the address (or the name when there is no address)
    pub fn id(&self) -> DeviceId {
        self.id.clone().unwrap_or_else(|| self.identity_key())
    }

    /// Key used to merge results from different probes
    pub fn identity_key(&self) -> String {
        match self.address {
            Some(addr) => addr.to_string(),
            None => self.name.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn method(&self) -> DiscoveryMethod {
        self.method
    }

    /// Connect to this device and return a ready [`TvClient`](crate::TvClient)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use frametv_remote::{DiscoveryEngine, TvConfig};
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = TvConfig::default();
    ///     let engine = DiscoveryEngine::new(config.discovery.clone());
    ///     let mut results = engine.discover(Duration::from_secs(3));
    ///
    ///     if let Some(found) = results.next().await {
    ///         let client = found.device.connect(&config).await?;
    ///         client.remote().volume_up().await?;
    ///         client.disconnect().await;
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(
        &self,
        config: &crate::config::TvConfig,
    ) -> crate::error::Result<crate::client::TvClient> {
        crate::client::TvClient::connect(self.clone(), config, None).await
    }
}

/// One probe's report of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub device: Device,
    pub method: DiscoveryMethod,
}

/// Control-channel security
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Plain,
    #[default]
    Tls,
}

impl SecurityMode {
    /// Documented control-channel port for this mode
    pub fn default_port(&self) -> u16 {
        match self {
            SecurityMode::Plain => 8001,
            SecurityMode::Tls => 8002,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            SecurityMode::Plain => "ws",
            SecurityMode::Tls => "wss",
        }
    }
}

/// Lifecycle of a [`ConnectionSession`](crate::ConnectionSession)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    /// Transport lost, automatic reconnection pending
    Degraded,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Art mode state of a picture-frame television
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtMode {
    On,
    Off,
}

/// Image encodings accepted by the upload endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageType {
    Jpeg,
    Png,
}

impl ImageType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "image/jpeg",
            ImageType::Png => "image/png",
        }
    }

    /// Value of the `type` query parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "JPEG",
            ImageType::Png => "PNG",
        }
    }
}

/// Visual mat framing an uploaded picture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatteDescriptor {
    /// e.g. "shadowbox", "modern", "flexible"
    pub style: String,
    /// e.g. "polar", "black", "antique"
    pub color: String,
}

impl MatteDescriptor {
    pub fn new(style: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            color: color.into(),
        }
    }

    /// Wire form `<style>_<color>`
    pub fn as_param(&self) -> String {
        format!("{}_{}", self.style, self.color)
    }
}

/// One entry of the device's content library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub content_id: ContentId,

    #[serde(default)]
    pub category_id: Option<String>,

    #[serde(default)]
    pub matte_id: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// Fields this library does not model
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Photo filter offered by the device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoFilter {
    pub filter_id: String,
    #[serde(default)]
    pub filter_name: String,
}

/// Available mat styles and colors
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatteCatalog {
    #[serde(default)]
    pub matte_types: Vec<String>,
    #[serde(default)]
    pub matte_colors: Vec<String>,
}

/// Device information from the companion surface root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub device: DeviceDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceDetails {
    #[serde(default, rename = "modelName")]
    pub model_name: String,

    #[serde(default, rename = "FrameTVSupport")]
    pub frame_tv_support: Option<String>,

    #[serde(default, rename = "PowerState")]
    pub power_state: Option<String>,

    #[serde(default, rename = "wifiMac")]
    pub wifi_mac: Option<String>,

    #[serde(default)]
    pub ip: Option<String>,
}

impl DeviceInfo {
    /// Whether the device reports picture-frame support
    pub fn supports_art(&self) -> bool {
        self.device.frame_tv_support.as_deref() == Some("true")
    }
}
