use crate::auth::Scope;
use crate::protocol::CHANNEL_PATH;
use crate::types::SecurityMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Everything needed to talk to one television
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TvConfig {
    pub session: SessionConfig,
    pub companion: CompanionConfig,
    pub discovery: DiscoveryConfig,
}

/// Control-channel session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name shown on the television's pairing prompt
    pub client_name: String,
    pub security: SecurityMode,
    /// Overrides the port implied by `security`
    pub port: Option<u16>,
    pub channel_path: String,
    /// Bound on the transport handshake and on the pairing exchange
    pub handshake_timeout: Duration,
    /// Default per-call timeout
    pub call_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Scopes recorded on tokens obtained by pairing (empty = unrestricted)
    pub scopes: BTreeSet<Scope>,
    /// Lifetime recorded on tokens obtained by pairing
    pub token_lifetime: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "frametv-remote".to_string(),
            security: SecurityMode::Tls,
            port: None,
            channel_path: CHANNEL_PATH.to_string(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            call_timeout: CALL_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            scopes: BTreeSet::new(),
            token_lifetime: None,
        }
    }
}

impl SessionConfig {
    pub fn with_security(mut self, security: SecurityMode) -> Self {
        self.security = security;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Expire issued tokens after `lifetime`
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = Some(lifetime);
        self
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.security.default_port())
    }
}

/// Automatic reconnection after the control channel drops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before the session gives up and closes; 0 disables reconnection
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: MAX_BACKOFF,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (1-based): doubles from
    /// `initial_backoff`, capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Companion HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub port: u16,
    pub use_tls: bool,
    pub base_path: String,
    pub request_timeout: Duration,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            port: 8001,
            use_tls: false,
            base_path: "/api/v2/".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mdns_enabled: bool,
    pub mdns_service_type: String,
    pub ssdp_enabled: bool,
    pub ssdp_search_target: String,
    /// Case-insensitive substring a responder's manufacturer or model must contain
    pub ssdp_model_filter: Option<String>,
    /// Interval between repeated M-SEARCH broadcasts
    pub ssdp_resend_interval: Duration,
    /// Timeout for fetching a responder's UPnP description
    pub description_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mdns_enabled: true,
            mdns_service_type: "_samsungmsf._tcp.local.".to_string(),
            ssdp_enabled: true,
            ssdp_search_target: "urn:samsung.com:device:RemoteControlReceiver:1".to_string(),
            ssdp_model_filter: Some("samsung".to_string()),
            ssdp_resend_interval: Duration::from_secs(2),
            description_timeout: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(64), Duration::from_secs(10));
    }

    #[test]
    fn port_follows_security_unless_overridden() {
        let config = SessionConfig::default();
        assert_eq!(config.effective_port(), 8002);
        assert_eq!(config.clone().with_security(SecurityMode::Plain).effective_port(), 8001);
        assert_eq!(config.with_port(9000).effective_port(), 9000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TvConfig = serde_json::from_str(
            r#"{ "session": { "client_name": "diag", "security": "plain" } }"#,
        )
        .unwrap();
        assert_eq!(config.session.client_name, "diag");
        assert_eq!(config.session.security, SecurityMode::Plain);
        assert_eq!(config.session.call_timeout, Duration::from_secs(10));
        assert_eq!(config.companion.port, 8001);
    }
}
