use crate::auth::Scope;
use crate::types::{DiscoveryMethod, SessionState};
use std::time::Duration;
use thiserror::Error;

/// Result type for television operations
pub type Result<T> = std::result::Result<T, TvError>;

/// Errors that can occur when talking to a television
#[derive(Error, Debug)]
pub enum TvError {
    /// Control-channel transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// WebSocket upgrade was refused by the device
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Pairing or token failure
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    /// A correlated control-channel call failed
    #[error(transparent)]
    Call(#[from] CallError),

    /// A companion API request failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Operation requires a Ready session
    #[error("Session not ready (state: {0})")]
    NotReady(SessionState),

    /// `connect()` was called while another attempt is in progress
    #[error("Session busy (state: {0})")]
    SessionBusy(SessionState),

    /// Device record cannot be used for this operation
    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unexpected response from the device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Event channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

/// Failures of the physical control channel
#[derive(Error, Debug)]
pub enum TransportError {
    /// Nothing accepted the TCP connection
    #[error("Connection refused by {0}")]
    Refused(String),

    /// Connect or pairing did not finish within the handshake timeout
    #[error("Transport timeout")]
    Timeout,

    /// Channel dropped without a close frame
    #[error("Connection lost: {0}")]
    Disconnected(String),

    /// `send` after `close`
    #[error("Connection closed")]
    Closed,

    /// Lower-level WebSocket failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// TLS connector could not be built
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

/// The device answered the upgrade request but did not accept it
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Non-101 status in answer to the upgrade
    #[error("Upgrade rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// Endpoint could not be turned into a request URI
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// Pairing and token failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Device refused the pairing exchange or the presented token
    #[error("Authentication rejected: {0}")]
    Rejected(String),

    /// Held token is past its expiry
    #[error("Token expired")]
    Expired,

    /// Held token lacks the scope an operation needs
    #[error("Token does not permit {required}")]
    ScopeInsufficient { required: Scope },

    /// Token belongs to another device
    #[error("Token issued for {found}, session device is {expected}")]
    DeviceMismatch { expected: String, found: String },
}

/// Failure of a single correlated call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// No response before the call's deadline
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Session closed or degraded before a response arrived
    #[error("Call cancelled")]
    Cancelled,

    /// Call frame could not be serialized
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device answered with an `error` object
    #[error("Device error {code}: {message}")]
    Remote { code: i64, message: String },
}

/// Failures of companion API requests
#[derive(Error, Debug)]
pub enum RequestError {
    /// Request never got a response
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response with a non-2xx status; `body` is the response text
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Body did not decode as the expected JSON
    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    /// Path or base URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A probe could not run on this host. Never surfaces from discovery
/// itself; the probe just yields nothing.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Socket or daemon for the probe could not be set up
    #[error("{probe} probe unavailable: {reason}")]
    Unavailable {
        probe: DiscoveryMethod,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
