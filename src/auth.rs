use crate::error::{AuthenticationError, Result};
use crate::types::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

/// Operation groups a token may permit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Key presses and device queries on the control channel
    Remote,
    /// Picture-frame content management
    Content,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Remote => write!(f, "remote"),
            Scope::Content => write!(f, "content"),
        }
    }
}

/// Token handed out by a device after pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationToken {
    pub value: String,
    pub device_id: DeviceId,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Empty means the device did not restrict the token
    #[serde(default)]
    pub scopes: BTreeSet<Scope>,
}

impl AuthenticationToken {
    pub fn new(value: impl Into<String>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            value: value.into(),
            device_id: device_id.into(),
            issued_at: Utc::now(),
            expires_at: None,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Non-empty value and not past its expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.value.is_empty() && self.expires_at.map_or(true, |expiry| now <= expiry)
    }

    pub fn permits(&self, scope: Scope) -> bool {
        self.scopes.is_empty() || self.scopes.contains(&scope)
    }
}

/// Token held for one device
#[derive(Debug, Clone)]
pub struct AuthStore {
    device_id: DeviceId,
    token: Option<AuthenticationToken>,
    /// Device accepted the channel without issuing a token
    tokenless_grant: bool,
}

impl AuthStore {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            token: None,
            tokenless_grant: false,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn token(&self) -> Option<&AuthenticationToken> {
        self.token.as_ref()
    }

    /// Token worth presenting to the device, if any
    pub fn valid_token(&self) -> Option<&AuthenticationToken> {
        self.token.as_ref().filter(|t| t.is_valid())
    }

    /// Install a token. Tokens issued for another device are refused.
    pub fn replace(&mut self, token: AuthenticationToken) -> std::result::Result<(), AuthenticationError> {
        if token.device_id != self.device_id {
            return Err(AuthenticationError::DeviceMismatch {
                expected: self.device_id.clone(),
                found: token.device_id,
            });
        }
        self.token = Some(token);
        self.tokenless_grant = false;
        Ok(())
    }

    pub(crate) fn grant_tokenless(&mut self) {
        self.tokenless_grant = true;
    }

    /// Drop the token after the device stopped honouring it
    pub fn invalidate(&mut self) {
        self.token = None;
        self.tokenless_grant = false;
    }

    /// Check that the held credentials allow `scope`
    pub fn authorize(&self, scope: Scope) -> std::result::Result<(), AuthenticationError> {
        match &self.token {
            Some(token) if !token.is_valid() => Err(AuthenticationError::Expired),
            Some(token) if !token.permits(scope) => {
                Err(AuthenticationError::ScopeInsufficient { required: scope })
            }
            Some(_) => Ok(()),
            None if self.tokenless_grant => Ok(()),
            None => Err(AuthenticationError::Rejected("not paired".to_string())),
        }
    }
}

/// Persistence boundary for tokens
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<AuthenticationToken>;
    fn save(&self, token: &AuthenticationToken) -> Result<()>;
}

/// Keeps the token for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<AuthenticationToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: AuthenticationToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<AuthenticationToken> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, token: &AuthenticationToken) -> Result<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(())
    }
}

/// Stores the token as a JSON document
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<AuthenticationToken> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read token file {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!("Ignoring unreadable token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn save(&self, token: &AuthenticationToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(token)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!("Saved token for {} to {}", token.device_id, self.path.display());
        Ok(())
    }
}
