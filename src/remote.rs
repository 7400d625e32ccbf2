use crate::auth::Scope;
use crate::error::{Result, TvError};
use crate::protocol::methods;
use crate::session::ConnectionSession;
use crate::types::{ArtMode, DeviceInfo};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Remote-control keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Power,
    VolumeUp,
    VolumeDown,
    Mute,
    ChannelUp,
    ChannelDown,
    Home,
    Back,
    Enter,
    Up,
    Down,
    Left,
    Right,
    Menu,
    Source,
    /// Any other key code, e.g. `KEY_HDMI1`
    Custom(String),
}

impl Key {
    /// Wire code sent as `DataOfCmd`
    pub fn code(&self) -> &str {
        match self {
            Key::Power => "KEY_POWER",
            Key::VolumeUp => "KEY_VOLUP",
            Key::VolumeDown => "KEY_VOLDOWN",
            Key::Mute => "KEY_MUTE",
            Key::ChannelUp => "KEY_CHUP",
            Key::ChannelDown => "KEY_CHDOWN",
            Key::Home => "KEY_HOME",
            Key::Back => "KEY_RETURN",
            Key::Enter => "KEY_ENTER",
            Key::Up => "KEY_UP",
            Key::Down => "KEY_DOWN",
            Key::Left => "KEY_LEFT",
            Key::Right => "KEY_RIGHT",
            Key::Menu => "KEY_MENU",
            Key::Source => "KEY_SOURCE",
            Key::Custom(code) => code,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Key presses and device queries over the control channel
#[derive(Clone)]
pub struct RemoteControl {
    session: Arc<ConnectionSession>,
}

impl RemoteControl {
    /// Control the device behind `session`
    pub fn new(session: Arc<ConnectionSession>) -> Self {
        Self { session }
    }

    /// Press and release `key`
    pub async fn send_key(&self, key: Key) -> Result<()> {
        self.key_command(&key, "Click").await
    }

    /// Hold `key` down for `duration`
    pub async fn hold_key(&self, key: Key, duration: Duration) -> Result<()> {
        self.key_command(&key, "Press").await?;
        tokio::time::sleep(duration).await;
        self.key_command(&key, "Release").await
    }

    /// Toggle power
    pub async fn power(&self) -> Result<()> {
        self.send_key(Key::Power).await
    }

    /// Raise the volume one step
    pub async fn volume_up(&self) -> Result<()> {
        self.send_key(Key::VolumeUp).await
    }

    /// Lower the volume one step
    pub async fn volume_down(&self) -> Result<()> {
        self.send_key(Key::VolumeDown).await
    }

    /// Toggle mute
    pub async fn mute(&self) -> Result<()> {
        self.send_key(Key::Mute).await
    }

    /// Next channel
    pub async fn channel_up(&self) -> Result<()> {
        self.send_key(Key::ChannelUp).await
    }

    /// Previous channel
    pub async fn channel_down(&self) -> Result<()> {
        self.send_key(Key::ChannelDown).await
    }

    /// Open the home screen
    pub async fn home(&self) -> Result<()> {
        self.send_key(Key::Home).await
    }

    /// Go back
    pub async fn back(&self) -> Result<()> {
        self.send_key(Key::Back).await
    }

    /// Confirm the focused item
    pub async fn enter(&self) -> Result<()> {
        self.send_key(Key::Enter).await
    }

    /// Device description as reported over the control channel
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let result = self.session.call(methods::DEVICE_INFO, Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Whether the device is showing art. Needs the content scope.
    pub async fn art_mode(&self) -> Result<ArtMode> {
        self.session.authorize(Scope::Content)?;
        let result = self.session.call(methods::GET_ART_MODE, Value::Null).await?;
        parse_art_mode(&result)
    }

    /// Switch art mode on or off. Needs the content scope.
    pub async fn set_art_mode(&self, mode: ArtMode) -> Result<()> {
        self.session.authorize(Scope::Content)?;
        self.session
            .call(methods::SET_ART_MODE, json!({ "value": mode }))
            .await?;
        tracing::info!("Art mode set to {:?}", mode);
        Ok(())
    }

    /// Send one `Click`, `Press` or `Release` for `key`
    async fn key_command(&self, key: &Key, command: &str) -> Result<()> {
        self.session.authorize(Scope::Remote)?;
        tracing::debug!("{} {}", command, key);
        self.session
            .call(
                methods::REMOTE_CONTROL,
                json!({
                    "Cmd": command,
                    "DataOfCmd": key.code(),
                    "Option": false,
                    "TypeOfRemote": "SendRemoteKey",
                }),
            )
            .await?;
        Ok(())
    }
}

/// Accepts `{"value": "on"}` or a bare `"on"`
fn parse_art_mode(result: &Value) -> Result<ArtMode> {
    let value = result.get("value").unwrap_or(result);
    serde_json::from_value(value.clone())
        .map_err(|_| TvError::InvalidResponse(format!("unexpected art mode status: {}", result)))
}
