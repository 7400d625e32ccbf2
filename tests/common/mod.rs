#![allow(dead_code)]

use frametv_remote::{Device, DiscoveryMethod, ReconnectPolicy, SecurityMode, SessionConfig, SessionState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// How the fake television answers a new control channel
#[derive(Debug, Clone)]
pub enum Greeting {
    /// Accept, optionally issuing a token
    Connect(Option<String>),
    Unauthorized,
    /// Never answer the pairing exchange
    Silent,
}

/// Maps an inbound call frame to the reply frame, if any
pub type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// In-process television speaking the control-channel protocol
pub struct MockTv {
    pub port: u16,
    greeting: Arc<Mutex<Greeting>>,
    uris: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    inject_tx: broadcast::Sender<String>,
    kill_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

#[derive(Clone)]
struct Shared {
    greeting: Arc<Mutex<Greeting>>,
    responder: Responder,
    uris: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<Value>>>,
}

impl MockTv {
    pub async fn start(greeting: Greeting, responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let shared = Shared {
            greeting: Arc::new(Mutex::new(greeting)),
            responder,
            uris: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        };
        let connections = Arc::new(AtomicUsize::new(0));
        let (inject_tx, _) = broadcast::channel(16);
        let (kill_tx, _) = broadcast::channel(4);

        let accept_task = {
            let shared = shared.clone();
            let connections = connections.clone();
            let inject_tx = inject_tx.clone();
            let kill_tx = kill_tx.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        shared.clone(),
                        inject_tx.subscribe(),
                        kill_tx.subscribe(),
                    ));
                }
            })
        };

        Self {
            port,
            greeting: shared.greeting,
            uris: shared.uris,
            sent: shared.sent,
            received: shared.received,
            connections,
            inject_tx,
            kill_tx,
            accept_task,
        }
    }

    /// Greeting for connections accepted from now on
    pub fn set_greeting(&self, greeting: Greeting) {
        *self.greeting.lock().unwrap() = greeting;
    }

    /// Request URIs of every upgrade, in order
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    /// Every frame sent to clients, verbatim
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Every call frame received from clients
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a frame to every open connection
    pub fn inject(&self, frame: &str) {
        let _ = self.inject_tx.send(frame.to_string());
    }

    /// Drop open connections without a close frame
    pub fn kill(&self) {
        let _ = self.kill_tx.send(());
    }

    /// Stop accepting and drop open connections
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.kill();
    }
}

impl Drop for MockTv {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(
    stream: TcpStream,
    shared: Shared,
    mut inject_rx: broadcast::Receiver<String>,
    mut kill_rx: broadcast::Receiver<()>,
) {
    let uris = shared.uris.clone();
    let record_uri = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uris.lock().unwrap().push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record_uri).await else {
        return;
    };

    let greeting = shared.greeting.lock().unwrap().clone();
    let greeting = match greeting {
        Greeting::Connect(token) => {
            let data = match token {
                Some(token) => json!({ "token": token, "id": "mock-client" }),
                None => json!({ "id": "mock-client" }),
            };
            Some(json!({ "event": "ms.channel.connect", "data": data }))
        }
        Greeting::Unauthorized => Some(json!({ "event": "ms.channel.unauthorized" })),
        Greeting::Silent => None,
    };
    if let Some(greeting) = greeting {
        let text = greeting.to_string();
        shared.sent.lock().unwrap().push(text.clone());
        if ws.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = kill_rx.recv() => return,
            frame = inject_rx.recv() => {
                if let Ok(frame) = frame {
                    shared.sent.lock().unwrap().push(frame.clone());
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(call) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    shared.received.lock().unwrap().push(call.clone());
                    if let Some(reply) = (shared.responder)(&call) {
                        let text = reply.to_string();
                        shared.sent.lock().unwrap().push(text.clone());
                        if ws.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Answers `GetDeviceInfo` and key presses; everything else goes unanswered
pub fn television() -> Responder {
    Arc::new(|call: &Value| {
        let id = call.get("id")?.clone();
        match call.get("method")?.as_str()? {
            "GetDeviceInfo" => Some(json!({
                "id": id,
                "result": {
                    "id": "uuid:frame-55",
                    "name": "[TV] Living Room",
                    "version": "2.0.25",
                    "device": { "modelName": "QE55LS03B", "FrameTVSupport": "true" }
                }
            })),
            "ms.remote.control" => Some(json!({ "id": id, "result": {} })),
            _ => None,
        }
    })
}

pub fn device() -> Device {
    Device::new(
        Some("frame-55".into()),
        "Living Room",
        Some(IpAddr::from([127, 0, 0, 1])),
        DiscoveryMethod::Manual,
    )
}

pub fn config(port: u16) -> SessionConfig {
    SessionConfig::default()
        .with_security(SecurityMode::Plain)
        .with_port(port)
        .with_client_name("integration")
        .with_handshake_timeout(Duration::from_secs(2))
        .with_call_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
        })
}

/// Wait until the watched state equals `state`
pub async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", state))
        .unwrap();
}
