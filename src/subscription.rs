use crate::error::{Result, TransportError, TvError};
use crate::protocol::EventFrame;
use serde_json::Value;
use tokio::sync::broadcast;

/// Unsolicited traffic from the device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Event-shaped frame (`{"event": ..., "data": ...}`)
    Notification(EventFrame),

    /// Response whose id matched no pending call (late, duplicate, or
    /// answering another client)
    UnmatchedResponse { id: String, payload: Value },
}

impl DeviceEvent {
    /// Event name, if this is a notification
    pub fn name(&self) -> Option<&str> {
        match self {
            DeviceEvent::Notification(frame) => Some(&frame.event),
            DeviceEvent::UnmatchedResponse { .. } => None,
        }
    }
}

/// Frame that could not be classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFrame {
    pub frame: String,
    pub reason: String,
}

/// Receiver for device events
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `TransportError::Closed` once the session is dropped.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => TvError::Transport(TransportError::Closed),
            broadcast::error::RecvError::Lagged(n) => {
                TvError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `None` if no event is queued.
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => {
                Err(TvError::Transport(TransportError::Closed))
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(TvError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
