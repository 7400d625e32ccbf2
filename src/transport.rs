use crate::error::{HandshakeError, Result, TransportError, TvError};
use crate::types::SecurityMode;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::net::Ipv6Addr;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and how to open the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub security: SecurityMode,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, security: SecurityMode) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            path: "/".to_string(),
            query: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Full URL with query parameters percent-encoded
    pub fn url(&self) -> std::result::Result<String, HandshakeError> {
        let base = format!("{}{}", self.authority_url(), self.path);
        let mut url = reqwest::Url::parse(&base).map_err(|e| HandshakeError::InvalidUrl(e.to_string()))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    fn authority_url(&self) -> String {
        let host = match self.host.parse::<Ipv6Addr>() {
            Ok(v6) => format!("[{}]", v6),
            Err(_) => self.host.clone(),
        };
        format!("{}://{}:{}", self.security.scheme(), host, self.port)
    }
}

// Query parameters are left out so tokens never reach the logs
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.authority_url(), self.path)
    }
}

/// Why the inbound frame sequence ended
#[derive(Debug)]
pub enum CloseReason {
    /// The device sent a close frame
    Clean,
    Failed(TransportError),
}

/// One WebSocket connection to a device
pub struct FrameTransport {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl FrameTransport {
    /// Open the connection and complete the WebSocket handshake
    ///
    /// TLS endpoints accept the self-signed certificates televisions ship with.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let url = endpoint.url()?;
        tracing::info!("Connecting to {}", endpoint);

        let connected = match endpoint.security {
            SecurityMode::Plain => tokio_tungstenite::connect_async(url.as_str()).await,
            SecurityMode::Tls => {
                let tls = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(TransportError::from)?;
                tokio_tungstenite::connect_async_tls_with_config(
                    url.as_str(),
                    None,
                    false,
                    Some(Connector::NativeTls(tls)),
                )
                .await
            }
        };

        let (ws_stream, _) = connected.map_err(|e| connect_error(e, endpoint))?;
        let (sink, stream) = ws_stream.split();
        tracing::debug!("WebSocket handshake with {} complete", endpoint);

        Ok(Self {
            sender: FrameSender { sink, closed: false },
            receiver: FrameReceiver {
                stream,
                close_reason: None,
            },
        })
    }

    pub async fn send(&mut self, frame: &str) -> std::result::Result<(), TransportError> {
        self.sender.send(frame).await
    }

    pub async fn next_frame(&mut self) -> Option<String> {
        self.receiver.next_frame().await
    }

    pub async fn close(&mut self) {
        self.sender.close().await
    }

    /// Separate the write and read halves so they can be driven by different tasks
    pub fn split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

/// Write half. One `send` at a time; the session serializes callers.
pub struct FrameSender {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

impl FrameSender {
    pub async fn send(&mut self, frame: &str) -> std::result::Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        self.sink
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::Closed
                }
                other => TransportError::Disconnected(other.to_string()),
            })
    }

    /// Send a close frame and release the write half. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.sink.close().await {
            tracing::debug!("Error while closing control channel: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Read half yielding text frames in wire order
pub struct FrameReceiver {
    stream: SplitStream<WsStream>,
    close_reason: Option<CloseReason>,
}

impl FrameReceiver {
    /// Next inbound frame, or `None` once the channel has ended.
    /// [`close_reason`](Self::close_reason) tells a clean close from a failure.
    pub async fn next_frame(&mut self) -> Option<String> {
        if self.close_reason.is_some() {
            return None;
        }

        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Binary(bytes)) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
                Ok(Message::Close(frame)) => {
                    tracing::info!("Control channel closed by device: {:?}", frame);
                    self.close_reason = Some(CloseReason::Clean);
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Control channel error: {}", e);
                    self.close_reason = Some(CloseReason::Failed(TransportError::Disconnected(e.to_string())));
                    return None;
                }
            }
        }

        self.close_reason = Some(CloseReason::Failed(TransportError::Disconnected(
            "stream ended without close frame".to_string(),
        )));
        None
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn take_close_reason(&mut self) -> Option<CloseReason> {
        self.close_reason.take()
    }
}

fn connect_error(error: tungstenite::Error, endpoint: &Endpoint) -> TvError {
    match error {
        tungstenite::Error::Http(response) => HandshakeError::Rejected {
            status: response.status().as_u16(),
        }
        .into(),
        tungstenite::Error::Url(e) => HandshakeError::InvalidUrl(e.to_string()).into(),
        tungstenite::Error::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            TransportError::Refused(format!("{}:{}", endpoint.host, endpoint.port)).into()
        }
        tungstenite::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            TransportError::Timeout.into()
        }
        other => TransportError::WebSocket(other).into(),
    }
}
