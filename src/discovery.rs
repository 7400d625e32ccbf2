use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::types::{Device, DiscoveryMethod, DiscoveryResult};
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const SSDP_ADDR: &str = "239.255.255.250:1900";
const SSDP_MX: u8 = 2;

/// A way of finding devices on the local network
///
/// `run` reports devices through `found` until the receiving side goes away.
/// Probes do not de-duplicate; the stream does.
#[async_trait]
pub trait Probe: Send + Sync {
    fn method(&self) -> DiscoveryMethod;

    async fn run(&self, found: mpsc::Sender<Device>) -> Result<(), DiscoveryError>;
}

/// Runs the configured probes and merges what they find
///
/// # Example
///
/// ```no_run
/// use frametv_remote::{DiscoveryConfig, DiscoveryEngine};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let engine = DiscoveryEngine::new(DiscoveryConfig::default());
///     let mut results = engine.discover(Duration::from_secs(5));
///
///     while let Some(result) = results.next().await {
///         println!("Found {} via {}", result.device.name(), result.method);
///     }
/// }
/// ```
pub struct DiscoveryEngine {
    probes: Vec<Arc<dyn Probe>>,
    current: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

impl DiscoveryEngine {
    /// Engine with the network probes enabled in `config`
    pub fn new(config: DiscoveryConfig) -> Self {
        let mut probes: Vec<Arc<dyn Probe>> = Vec::new();
        if config.mdns_enabled {
            probes.push(Arc::new(MdnsProbe::new(config.mdns_service_type.clone())));
        }
        if config.ssdp_enabled {
            probes.push(Arc::new(SsdpProbe::new(&config)));
        }
        Self::with_probes(probes)
    }

    pub fn with_probes(probes: Vec<Arc<dyn Probe>>) -> Self {
        Self {
            probes,
            current: Mutex::new(None),
        }
    }

    /// Start a probe cycle bounded by `timeout`
    ///
    /// A cycle still running from an earlier call is cancelled.
    pub fn discover(&self, timeout: Duration) -> DiscoveryStream {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);

        if let Some(previous) = self.lock_current().replace(cancel_tx.clone()) {
            previous.send_replace(true);
        }

        tracing::info!("Starting discovery with {} probe(s) for {:?}", self.probes.len(), timeout);

        let (tx, rx) = mpsc::channel(32);
        let tasks = self
            .probes
            .iter()
            .map(|probe| {
                let probe = probe.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let method = probe.method();
                    if let Err(e) = probe.run(tx).await {
                        tracing::warn!("{} probe failed: {}", method, e);
                    }
                })
            })
            .collect();

        DiscoveryStream {
            rx,
            seen: HashSet::new(),
            deadline: Instant::now() + timeout,
            cancel_tx,
            cancel_rx,
            tasks,
            finished: false,
        }
    }

    /// Cancel the running cycle, if any
    pub fn cancel(&self) {
        if let Some(current) = self.lock_current().as_ref() {
            current.send_replace(true);
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<watch::Sender<bool>>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cancels a [`DiscoveryStream`] from another task
#[derive(Clone)]
pub struct DiscoveryCanceller {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl DiscoveryCanceller {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

/// De-duplicated results of one probe cycle, in the order they were found
///
/// Ends when the timeout passes, when the cycle is cancelled, or when every
/// probe has finished. Dropping the stream stops the probes.
pub struct DiscoveryStream {
    rx: mpsc::Receiver<Device>,
    seen: HashSet<String>,
    deadline: Instant,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
    finished: bool,
}

impl DiscoveryStream {
    /// Next previously unseen device, or `None` once the cycle is over
    pub async fn next(&mut self) -> Option<DiscoveryResult> {
        if self.finished {
            return None;
        }

        loop {
            let device = tokio::select! {
                biased;
                _ = wait_cancelled(&mut self.cancel_rx) => {
                    tracing::debug!("Discovery cancelled");
                    None
                }
                _ = tokio::time::sleep_until(self.deadline) => {
                    tracing::debug!("Discovery timeout reached");
                    None
                }
                device = self.rx.recv() => device,
            };

            let Some(device) = device else {
                self.finish();
                return None;
            };

            if self.seen.insert(device.identity_key()) {
                tracing::info!("Discovered {} via {}", device.name(), device.method());
                let method = device.method();
                return Some(DiscoveryResult { device, method });
            }
            tracing::debug!("Already seen {} ({})", device.identity_key(), device.method());
        }
    }

    /// Stop the cycle. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn canceller(&self) -> DiscoveryCanceller {
        DiscoveryCanceller {
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    /// Drain the stream
    pub async fn collect(mut self) -> Vec<DiscoveryResult> {
        let mut results = Vec::new();
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }

    fn finish(&mut self) {
        self.finished = true;
        self.rx.close();
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("Discovery finished with {} device(s)", self.seen.len());
    }
}

impl Drop for DiscoveryStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// DNS-SD browse for the television's service type
pub struct MdnsProbe {
    service_type: String,
}

impl MdnsProbe {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
        }
    }
}

/// Shuts the daemon down however the probe exits
struct DaemonGuard(ServiceDaemon);

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        // Shutdown may report a closed channel; nothing to do about it
        if let Err(e) = self.0.shutdown() {
            tracing::debug!("mDNS shutdown error: {}", e);
        }
    }
}

#[async_trait]
impl Probe for MdnsProbe {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Mdns
    }

    async fn run(&self, found: mpsc::Sender<Device>) -> Result<(), DiscoveryError> {
        let unavailable = |reason: String| DiscoveryError::Unavailable {
            probe: DiscoveryMethod::Mdns,
            reason,
        };

        let daemon = ServiceDaemon::new().map_err(|e| unavailable(e.to_string()))?;
        let guard = DaemonGuard(daemon);
        let receiver = guard
            .0
            .browse(&self.service_type)
            .map_err(|e| unavailable(e.to_string()))?;
        tracing::debug!("Browsing for {}", self.service_type);

        while !found.is_closed() {
            let event = tokio::task::spawn_blocking({
                let receiver = receiver.clone();
                move || receiver.recv_timeout(Duration::from_millis(250))
            })
            .await
            .map_err(|e| unavailable(e.to_string()))?;

            match event {
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    let Some(device) = device_from_service(&info, &self.service_type) else {
                        tracing::debug!("Ignoring {} without an address", info.get_fullname());
                        continue;
                    };
                    if found.send(device).await.is_err() {
                        break;
                    }
                }
                Ok(other) => tracing::trace!("mDNS event: {:?}", other),
                Err(_) if receiver.is_disconnected() => {
                    return Err(unavailable("mDNS daemon stopped".to_string()));
                }
                // recv timeout
                Err(_) => {}
            }
        }

        Ok(())
    }
}

fn device_from_service(info: &ServiceInfo, service_type: &str) -> Option<Device> {
    let addresses = info.get_addresses();
    let address = addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    let name = info
        .get_fullname()
        .strip_suffix(service_type)
        .map(|instance| instance.trim_end_matches('.'))
        .filter(|instance| !instance.is_empty())
        .unwrap_or_else(|| info.get_hostname().trim_end_matches('.'))
        .to_string();
    let id = info.get_property_val_str("id").map(str::to_string);

    Some(Device::new(id, name, Some(address), DiscoveryMethod::Mdns))
}

/// SSDP multicast search, filtered by the responder's UPnP description
pub struct SsdpProbe {
    search_target: String,
    model_filter: Option<String>,
    resend_interval: Duration,
    http: reqwest::Client,
}

impl SsdpProbe {
    pub fn new(config: &DiscoveryConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.description_timeout)
            .build()
            .unwrap_or_default();

        Self {
            search_target: config.ssdp_search_target.clone(),
            model_filter: config.ssdp_model_filter.clone(),
            resend_interval: config.ssdp_resend_interval,
            http,
        }
    }

    async fn describe(&self, location: &str) -> Result<UpnpDescription, String> {
        let xml = self
            .http
            .get(location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?
            .text()
            .await
            .map_err(|e| e.to_string())?;
        parse_description(&xml)
    }
}

#[async_trait]
impl Probe for SsdpProbe {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Ssdp
    }

    async fn run(&self, found: mpsc::Sender<Device>) -> Result<(), DiscoveryError> {
        let socket = ssdp_socket()?;
        let request = msearch(&self.search_target);
        let mut resend = tokio::time::interval(self.resend_interval);
        let mut described = HashSet::new();
        let mut buf = [0u8; 2048];

        loop {
            tokio::select! {
                _ = found.closed() => return Ok(()),
                _ = resend.tick() => {
                    if let Err(e) = socket.send_to(request.as_bytes(), SSDP_ADDR).await {
                        tracing::warn!("Failed to send M-SEARCH: {}", e);
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    let response = String::from_utf8_lossy(&buf[..len]).into_owned();
                    let Some(location) = header(&response, "location") else {
                        continue;
                    };
                    if !described.insert(location.to_string()) {
                        continue;
                    }

                    tracing::debug!("SSDP response from {}, fetching {}", from, location);
                    let description = match self.describe(location).await {
                        Ok(description) => description,
                        Err(e) => {
                            tracing::warn!("Failed to fetch device description from {}: {}", location, e);
                            continue;
                        }
                    };

                    if !description.matches(self.model_filter.as_deref()) {
                        tracing::debug!(
                            "Skipping {} ({:?} {:?})",
                            from,
                            description.manufacturer,
                            description.model_name
                        );
                        continue;
                    }

                    if found.send(description.into_device(from.ip())).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn ssdp_socket() -> Result<UdpSocket, DiscoveryError> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    let any = SocketAddr::from(([0, 0, 0, 0], 0));
    socket.bind(&any.into())?;
    socket.set_multicast_ttl_v4(2)?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    tracing::debug!("SSDP socket bound to {}", socket.local_addr()?);
    Ok(socket)
}

fn msearch(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_ADDR, SSDP_MX, search_target
    )
}

/// Value of an HTTP-style header, matched case-insensitively
fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Fields of interest from a UPnP device description
#[derive(Debug, Default, Clone, PartialEq)]
struct UpnpDescription {
    friendly_name: Option<String>,
    manufacturer: Option<String>,
    model_name: Option<String>,
    udn: Option<String>,
}

impl UpnpDescription {
    fn matches(&self, filter: Option<&str>) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        let filter = filter.to_lowercase();
        [&self.manufacturer, &self.model_name]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&filter))
    }

    fn into_device(self, address: IpAddr) -> Device {
        let id = self
            .udn
            .map(|udn| udn.strip_prefix("uuid:").unwrap_or(&udn).to_string());
        let name = self.friendly_name.unwrap_or_else(|| address.to_string());
        Device::new(id, name, Some(address), DiscoveryMethod::Ssdp)
    }
}

/// First value of each field wins, so embedded sub-devices don't
/// overwrite the root device
fn parse_description(xml: &str) -> Result<UpnpDescription, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut description = UpnpDescription::default();
    let mut current = String::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                text.clear();
            }
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(_)) => {
                let slot = match current.as_str() {
                    "friendlyName" => Some(&mut description.friendly_name),
                    "manufacturer" => Some(&mut description.manufacturer),
                    "modelName" => Some(&mut description.model_name),
                    "UDN" => Some(&mut description.udn),
                    _ => None,
                };
                if let Some(slot) = slot {
                    if slot.is_none() && !text.is_empty() {
                        *slot = Some(text.clone());
                    }
                }
                current.clear();
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML parsing error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    Ok(description)
}
