use crate::correlation::CorrelationEngine;
use crate::error::CallError;
use crate::observer::{ObserverId, ObserverRegistry};
use crate::protocol::InboundFrame;
use crate::subscription::{DeviceEvent, EventReceiver, MalformedFrame};
use serde_json::Value;
use tokio::sync::broadcast;

/// How a frame was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Delivered to the call waiting on its id
    Response,
    /// Delivered to event observers and subscribers
    Event,
    /// Delivered to diagnostic observers only
    Malformed,
}

/// Fans inbound frames out to pending calls and observers
///
/// Raw observers get every frame verbatim before classification, so
/// monitoring is independent of correlation.
pub struct EventRouter {
    raw: ObserverRegistry<str>,
    events: ObserverRegistry<DeviceEvent>,
    diagnostics: ObserverRegistry<MalformedFrame>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl EventRouter {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            raw: ObserverRegistry::new(),
            events: ObserverRegistry::new(),
            diagnostics: ObserverRegistry::new(),
            event_tx,
        }
    }

    /// Classify and dispatch one frame. Runs to completion before the
    /// next frame is read.
    pub fn route(&self, frame: &str, engine: &CorrelationEngine) -> Routing {
        tracing::debug!("Received: {}", frame);
        self.raw.notify(frame);

        match InboundFrame::parse(frame) {
            Ok(InboundFrame::Response { id, outcome }) => {
                let mut raw_error = Value::Null;
                let outcome = outcome.map_err(|failure| {
                    raw_error = failure.raw;
                    CallError::Remote {
                        code: failure.code,
                        message: failure.message,
                    }
                });

                match engine.try_resolve(&id, outcome) {
                    Ok(()) => return Routing::Response,
                    Err(outcome) => {
                        tracing::debug!("No pending call for response {}", id);
                        let payload = match outcome {
                            Ok(value) => value,
                            Err(_) => serde_json::json!({ "error": raw_error }),
                        };
                        self.dispatch(DeviceEvent::UnmatchedResponse { id, payload });
                    }
                }
                Routing::Event
            }
            Ok(InboundFrame::Event(event)) => {
                self.dispatch(DeviceEvent::Notification(event));
                Routing::Event
            }
            Err(reason) => {
                tracing::error!("Protocol error: {} (frame: {})", reason, frame);
                self.diagnostics.notify(&MalformedFrame {
                    frame: frame.to_string(),
                    reason,
                });
                Routing::Malformed
            }
        }
    }

    fn dispatch(&self, event: DeviceEvent) {
        self.events.notify(&event);
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Observe every inbound frame verbatim
    pub fn add_raw_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.raw.add(observer)
    }

    pub fn remove_raw_observer(&self, id: ObserverId) -> bool {
        self.raw.remove(id)
    }

    /// Observe unsolicited events
    pub fn add_event_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.events.add(observer)
    }

    pub fn remove_event_observer(&self, id: ObserverId) -> bool {
        self.events.remove(id)
    }

    /// Observe frames that failed to parse
    pub fn add_diagnostic_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&MalformedFrame) + Send + Sync + 'static,
    {
        self.diagnostics.add(observer)
    }

    pub fn remove_diagnostic_observer(&self, id: ObserverId) -> bool {
        self.diagnostics.remove(id)
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.event_tx.subscribe())
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::CallFrame;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recorder<T>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static)
    where
        T: Clone + Send + Sync + 'static,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |item: &T| sink.lock().unwrap().push(item.clone()))
    }

    #[test]
    fn event_frames_reach_observers_and_subscribers() {
        let router = EventRouter::new();
        let engine = CorrelationEngine::new();
        let (events, observer) = recorder::<DeviceEvent>();
        router.add_event_observer(observer);
        let mut receiver = router.subscribe();

        let routing = router.route(r#"{"event":"ms.remote.touchEnable","data":{"x":1}}"#, &engine);

        assert_eq!(routing, Routing::Event);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), Some("ms.remote.touchEnable"));
        assert_eq!(receiver.try_recv().unwrap(), Some(events[0].clone()));
    }

    #[test]
    fn unmatched_response_becomes_event() {
        let router = EventRouter::new();
        let engine = CorrelationEngine::new();
        let (events, observer) = recorder::<DeviceEvent>();
        router.add_event_observer(observer);

        let routing = router.route(r#"{"id":"99","result":{"late":true}}"#, &engine);

        assert_eq!(routing, Routing::Event);
        assert_eq!(
            events.lock().unwrap()[0],
            DeviceEvent::UnmatchedResponse {
                id: "99".into(),
                payload: json!({ "late": true })
            }
        );
    }

    #[test]
    fn unmatched_error_keeps_device_error_object() {
        let router = EventRouter::new();
        let engine = CorrelationEngine::new();
        let (events, observer) = recorder::<DeviceEvent>();
        router.add_event_observer(observer);

        router.route(
            r#"{"id":"42","error":{"code":-32601,"message":"no such method","detail":"art.nope"}}"#,
            &engine,
        );

        assert_eq!(
            events.lock().unwrap()[0],
            DeviceEvent::UnmatchedResponse {
                id: "42".into(),
                payload: json!({
                    "error": { "code": -32601, "message": "no such method", "detail": "art.nope" }
                })
            }
        );
    }

    #[test]
    fn malformed_frames_go_to_diagnostics_only() {
        let router = EventRouter::new();
        let engine = CorrelationEngine::new();
        let (events, event_observer) = recorder::<DeviceEvent>();
        let (bad, diag_observer) = recorder::<MalformedFrame>();
        let raw_frames = Arc::new(Mutex::new(Vec::<String>::new()));
        let raw_sink = raw_frames.clone();
        router.add_event_observer(event_observer);
        router.add_diagnostic_observer(diag_observer);
        router.add_raw_observer(move |frame| raw_sink.lock().unwrap().push(frame.to_string()));

        assert_eq!(router.route("{oops", &engine), Routing::Malformed);

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(bad.lock().unwrap()[0].frame, "{oops");
        assert_eq!(*raw_frames.lock().unwrap(), vec!["{oops".to_string()]);
    }

    #[tokio::test]
    async fn responses_resolve_calls_and_skip_event_observers() {
        let router = Arc::new(EventRouter::new());
        let engine = Arc::new(CorrelationEngine::new());
        let (events, observer) = recorder::<DeviceEvent>();
        router.add_event_observer(observer);
        let raw_frames = Arc::new(Mutex::new(Vec::<String>::new()));
        let raw_sink = raw_frames.clone();
        router.add_raw_observer(move |frame| raw_sink.lock().unwrap().push(frame.to_string()));

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let call = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .call("GetDeviceInfo", Value::Null, Duration::from_secs(5), move |frame| async move {
                        tx.send(frame).map_err(|_| TransportError::Closed)
                    })
                    .await
            })
        };

        let sent: CallFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let response = json!({ "id": sent.id, "result": { "model": "LS03" } }).to_string();
        assert_eq!(router.route(&response, &engine), Routing::Response);

        assert_eq!(call.await.unwrap().unwrap(), json!({ "model": "LS03" }));
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(*raw_frames.lock().unwrap(), vec![response]);
    }
}
