use crate::auth::{AuthStore, AuthenticationToken, Scope, TokenStore};
use crate::config::SessionConfig;
use crate::correlation::CorrelationEngine;
use crate::error::{AuthenticationError, Result, TransportError, TvError};
use crate::observer::ObserverId;
use crate::protocol::{events, InboundFrame};
use crate::router::EventRouter;
use crate::subscription::{DeviceEvent, EventReceiver, MalformedFrame};
use crate::transport::{CloseReason, Endpoint, FrameReceiver, FrameSender, FrameTransport};
use crate::types::{Device, SessionState};
use base64::Engine as _;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// Authenticated control channel to one device
///
/// Owns the transport, the pending-call table and the observer registries.
/// Observers stay registered across reconnects; pending calls do not survive
/// a disconnect.
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    device: Device,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    auth: Mutex<AuthStore>,
    token_store: Option<Arc<dyn TokenStore>>,
    engine: CorrelationEngine,
    router: EventRouter,
    /// Serializes writes to the wire
    sender: AsyncMutex<Option<FrameSender>>,
    shutdown_tx: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect/disconnect
    lifecycle: AsyncMutex<()>,
}

impl ConnectionSession {
    /// Create a disconnected session. A token found in `token_store` is
    /// used when it belongs to `device`.
    pub fn new(device: Device, config: SessionConfig, token_store: Option<Arc<dyn TokenStore>>) -> Self {
        let mut auth = AuthStore::new(device.id());
        if let Some(store) = &token_store {
            if let Some(token) = store.load() {
                if let Err(e) = auth.replace(token) {
                    tracing::warn!("Ignoring stored token: {}", e);
                }
            }
        }

        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                device,
                config,
                state_tx,
                auth: Mutex::new(auth),
                token_store,
                engine: CorrelationEngine::new(),
                router: EventRouter::new(),
                sender: AsyncMutex::new(None),
                shutdown_tx,
                pump: Mutex::new(None),
                lifecycle: AsyncMutex::new(()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Currently held token
    pub fn token(&self) -> Option<AuthenticationToken> {
        self.inner.lock_auth().token().cloned()
    }

    /// Check the held credentials before issuing an operation in `scope`
    pub fn authorize(&self, scope: Scope) -> Result<()> {
        self.inner.lock_auth().authorize(scope)?;
        Ok(())
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.engine.pending_count()
    }

    /// Open the channel and authenticate
    ///
    /// Returns once the session is Ready. Failures leave the session Closed;
    /// calling `connect` again starts over on a fresh transport.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Disconnected | SessionState::Closed => {}
            busy => return Err(TvError::SessionBusy(busy)),
        }

        if let Some(stale) = self.inner.take_pump() {
            stale.abort();
        }
        self.inner.shutdown_tx.send_replace(false);
        self.inner.set_state(SessionState::Connecting);

        let receiver = match self.inner.establish().await {
            Ok(receiver) => receiver,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", self.inner.device.name(), e);
                self.inner.close().await;
                return Err(e);
            }
        };

        self.inner.set_state(SessionState::Ready);
        let handle = tokio::spawn(pump(self.inner.clone(), receiver));
        *self.inner.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Close the session. Pending calls fail with `CallError::Cancelled`.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.state() == SessionState::Disconnected {
            return;
        }

        tracing::info!("Disconnecting from {}", self.inner.device.name());
        self.inner.shutdown_tx.send_replace(true);
        self.inner.close().await;

        if let Some(mut handle) = self.inner.take_pump() {
            // Give it a moment to stop gracefully
            if timeout(Duration::from_millis(500), &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    /// Issue a call with the configured default timeout
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.inner.config.call_timeout)
            .await
    }

    /// Issue a call and wait at most `timeout` for its response
    pub async fn call_with_timeout(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(TvError::NotReady(state));
        }

        let inner = &self.inner;
        let value = self
            .inner
            .engine
            .call(method, params, timeout, move |frame| async move {
                let mut sender = inner.sender.lock().await;
                // Not Ready: the pump may already have run cancel_all
                if inner.state() != SessionState::Ready {
                    return Err(TransportError::Closed);
                }
                match sender.as_mut() {
                    Some(sender) => sender.send(&frame).await,
                    None => Err(TransportError::Closed),
                }
            })
            .await?;

        Ok(value)
    }

    /// Observe every inbound frame verbatim
    pub fn add_raw_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.router.add_raw_observer(observer)
    }

    pub fn remove_raw_observer(&self, id: ObserverId) -> bool {
        self.inner.router.remove_raw_observer(id)
    }

    /// Observe unsolicited events
    pub fn add_event_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.inner.router.add_event_observer(observer)
    }

    pub fn remove_event_observer(&self, id: ObserverId) -> bool {
        self.inner.router.remove_event_observer(id)
    }

    /// Observe frames that failed to parse
    pub fn add_diagnostic_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&MalformedFrame) + Send + Sync + 'static,
    {
        self.inner.router.add_diagnostic_observer(observer)
    }

    pub fn remove_diagnostic_observer(&self, id: ObserverId) -> bool {
        self.inner.router.remove_diagnostic_observer(id)
    }

    /// Receive unsolicited events through a channel
    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.router.subscribe()
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner.engine.cancel_all();
        if let Some(handle) = self.inner.take_pump() {
            handle.abort();
        }
    }
}

impl SessionInner {
    fn lock_auth(&self) -> MutexGuard<'_, AuthStore> {
        self.auth.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Only `connect()` may leave Closed, by moving to Connecting
    fn set_state(&self, next: SessionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next || (*state == SessionState::Closed && next != SessionState::Connecting) {
                return false;
            }
            tracing::info!("Session {} for {}: {} -> {}", self.id, self.device.name(), state, next);
            *state = next;
            true
        });
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let address = self.device.address().ok_or_else(|| {
            TvError::InvalidDevice(format!("{} has no network address", self.device.name()))
        })?;

        let name = base64::engine::general_purpose::STANDARD.encode(self.config.client_name.as_bytes());
        let mut endpoint = Endpoint::new(address.to_string(), self.config.effective_port(), self.config.security)
            .with_path(self.config.channel_path.clone())
            .with_query("name", name);

        if let Some(token) = self.lock_auth().valid_token() {
            endpoint = endpoint.with_query("token", token.value.clone());
        }
        Ok(endpoint)
    }

    /// Transport handshake followed by the pairing exchange, each bounded
    /// by the handshake timeout
    async fn establish(&self) -> Result<FrameReceiver> {
        let endpoint = self.endpoint()?;
        let limit = self.config.handshake_timeout;

        let transport = match timeout(limit, FrameTransport::connect(&endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!("Handshake with {} timed out after {:?}", endpoint, limit);
                return Err(TransportError::Timeout.into());
            }
        };

        let (sender, mut receiver) = transport.split();
        *self.sender.lock().await = Some(sender);
        self.set_state(SessionState::Authenticating);

        match timeout(limit, self.authenticate(&mut receiver)).await {
            Ok(Ok(())) => Ok(receiver),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!("No pairing response from {} within {:?}", endpoint, limit);
                Err(TransportError::Timeout.into())
            }
        }
    }

    /// Read frames until the device accepts or refuses the channel
    async fn authenticate(&self, receiver: &mut FrameReceiver) -> Result<()> {
        let presented = self.lock_auth().valid_token().is_some();

        while let Some(frame) = receiver.next_frame().await {
            self.router.route(&frame, &self.engine);

            let Ok(InboundFrame::Event(event)) = InboundFrame::parse(&frame) else {
                continue;
            };

            match event.event.as_str() {
                events::CHANNEL_CONNECT => {
                    self.accept(event.token());
                    return Ok(());
                }
                events::CHANNEL_UNAUTHORIZED | events::CHANNEL_TIMEOUT => {
                    if presented {
                        tracing::warn!("{} no longer accepts the stored token", self.device.name());
                    }
                    self.lock_auth().invalidate();
                    return Err(AuthenticationError::Rejected(event.event.clone()).into());
                }
                _ => {}
            }
        }

        Err(TransportError::Disconnected("channel closed during pairing".to_string()).into())
    }

    fn accept(&self, issued: Option<&str>) {
        let mut auth = self.lock_auth();
        let current = auth.valid_token().map(|t| t.value.clone());

        match issued {
            Some(value) if current.as_deref() != Some(value) => {
                let mut token = AuthenticationToken::new(value, self.device.id())
                    .with_scopes(self.config.scopes.iter().copied());
                if let Some(lifetime) = self.config.token_lifetime.and_then(|l| chrono::Duration::from_std(l).ok()) {
                    let expires_at = token.issued_at + lifetime;
                    token = token.with_expiry(expires_at);
                }

                if let Err(e) = auth.replace(token.clone()) {
                    tracing::warn!("Discarding issued token: {}", e);
                    return;
                }
                drop(auth);

                tracing::info!("{} issued a new token", self.device.name());
                if let Some(store) = &self.token_store {
                    if let Err(e) = store.save(&token) {
                        tracing::warn!("Failed to persist token: {}", e);
                    }
                }
            }
            Some(_) => {}
            None if current.is_none() => auth.grant_tokenless(),
            None => {}
        }
    }

    async fn close_channel(&self) {
        if let Some(mut sender) = self.sender.lock().await.take() {
            sender.close().await;
        }
    }

    /// Enter Closed: fail pending calls and release the transport
    async fn close(&self) {
        self.set_state(SessionState::Closed);
        let cancelled = self.engine.cancel_all();
        if cancelled > 0 {
            tracing::debug!("Cancelled {} pending call(s)", cancelled);
        }
        self.close_channel().await;
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Drives inbound frames through the router, and reconnects when the
/// channel drops
async fn pump(inner: Arc<SessionInner>, mut receiver: FrameReceiver) {
    let mut shutdown = inner.shutdown_tx.subscribe();

    loop {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return,
                frame = receiver.next_frame() => match frame {
                    Some(frame) => {
                        inner.router.route(&frame, &inner.engine);
                    }
                    None => break,
                },
            }
        }

        if *shutdown.borrow() {
            return;
        }

        match receiver.take_close_reason() {
            Some(CloseReason::Failed(e)) => {
                tracing::warn!("Control channel to {} lost: {}", inner.device.name(), e)
            }
            _ => tracing::warn!("Control channel to {} closed by device", inner.device.name()),
        }

        inner.set_state(SessionState::Degraded);
        let cancelled = inner.engine.cancel_all();
        if cancelled > 0 {
            tracing::warn!("Cancelled {} pending call(s) after disconnect", cancelled);
        }
        inner.close_channel().await;

        match reconnect(&inner, &mut shutdown).await {
            Some(next) => receiver = next,
            None => return,
        }
    }
}

async fn reconnect(inner: &Arc<SessionInner>, shutdown: &mut watch::Receiver<bool>) -> Option<FrameReceiver> {
    let policy = inner.config.reconnect.clone();

    for attempt in 1..=policy.max_retries {
        let delay = policy.backoff(attempt);
        tracing::info!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            inner.device.name(),
            delay,
            attempt,
            policy.max_retries
        );

        tokio::select! {
            _ = wait_for_shutdown(shutdown) => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        inner.set_state(SessionState::Authenticating);
        if inner.state() != SessionState::Authenticating {
            return None;
        }

        let result = tokio::select! {
            _ = wait_for_shutdown(shutdown) => None,
            result = inner.establish() => Some(result),
        };

        match result {
            None => {
                inner.close_channel().await;
                return None;
            }
            Some(Ok(receiver)) => {
                if *shutdown.borrow() {
                    inner.close_channel().await;
                    return None;
                }
                inner.set_state(SessionState::Ready);
                tracing::info!("Reconnected to {}", inner.device.name());
                return Some(receiver);
            }
            Some(Err(TvError::Authentication(e))) => {
                tracing::error!("{} rejected the session on reconnect: {}", inner.device.name(), e);
                inner.close().await;
                return None;
            }
            Some(Err(e)) => {
                tracing::warn!("Reconnect attempt {} to {} failed: {}", attempt, inner.device.name(), e);
                inner.close_channel().await;
                inner.set_state(SessionState::Degraded);
            }
        }
    }

    tracing::error!(
        "Giving up on {} after {} reconnect attempt(s)",
        inner.device.name(),
        policy.max_retries
    );
    inner.close().await;
    None
}
