use crate::error::{CallError, TransportError};
use crate::protocol::CallFrame;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

type Outcome = std::result::Result<Value, CallError>;

/// A call waiting for its response
struct PendingCall {
    method: String,
    submitted_at: Instant,
    deadline: Instant,
    resolver: oneshot::Sender<Outcome>,
}

/// Matches response frames to the calls that caused them
///
/// Ids come from a counter that lives as long as the engine, so they are
/// unique for the session's lifetime, reconnects included.
pub struct CorrelationEngine {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingCall>>,
}

/// Removes the table entry when the caller stops waiting, however that happens
struct PendingGuard<'a> {
    engine: &'a CorrelationEngine,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.engine.lock().remove(self.id);
    }
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a call and wait for its response
    ///
    /// `send` puts the serialized frame on the wire. The call is registered
    /// before `send` runs, so a response can never outrun its entry.
    pub async fn call<F, Fut>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        send: F,
    ) -> std::result::Result<Value, CallError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<(), TransportError>>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = CallFrame::new(method, id.clone()).with_params(params);
        let json = serde_json::to_string(&frame).map_err(|e| CallError::Protocol(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                submitted_at: Instant::now(),
                deadline,
                resolver: tx,
            },
        );
        let _guard = PendingGuard { engine: self, id: &id };

        tracing::debug!("Sending: {}", json);
        if let Err(e) = send(json).await {
            tracing::warn!("Failed to send call {} ({}): {}", id, method, e);
            return Err(CallError::Cancelled);
        }

        match timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without an answer
            Ok(Err(_)) => Err(CallError::Cancelled),
            Err(_) => {
                tracing::warn!("Call {} ({}) timed out after {:?}", id, method, timeout);
                Err(CallError::Timeout(timeout))
            }
        }
    }

    /// Hand `outcome` to the call waiting on `id`
    ///
    /// Returns false when no call is waiting (already resolved, timed out,
    /// or never issued by this engine).
    pub fn resolve(&self, id: &str, outcome: Outcome) -> bool {
        self.try_resolve(id, outcome).is_ok()
    }

    /// Like [`resolve`](Self::resolve), but gives the outcome back when
    /// nothing is waiting on `id`
    pub fn try_resolve(&self, id: &str, outcome: Outcome) -> std::result::Result<(), Outcome> {
        let Some(call) = self.lock().remove(id) else {
            return Err(outcome);
        };

        tracing::debug!(
            "Call {} ({}) resolved after {:?}",
            id,
            call.method,
            call.submitted_at.elapsed()
        );
        let _ = call.resolver.send(outcome);
        Ok(())
    }

    /// Fail every pending call with [`CallError::Cancelled`]
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingCall)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            tracing::debug!("Cancelling call {} ({})", id, call.method);
            let _ = call.resolver.send(Err(CallError::Cancelled));
        }
        count
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Earliest deadline among pending calls
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().values().map(|call| call.deadline).min()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn capture() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out_and_leaves_no_entry() {
        let engine = CorrelationEngine::new();
        let timeout = Duration::from_secs(5);

        let start = Instant::now();
        let result = engine
            .call("GetDeviceInfo", json!({}), timeout, |_| async { Ok(()) })
            .await;
        let elapsed = start.elapsed();

        assert_eq!(result, Err(CallError::Timeout(timeout)));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(50));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn responses_in_reverse_order_reach_their_own_callers() {
        let engine = Arc::new(CorrelationEngine::new());
        let (tx, mut rx) = capture();
        let n = 8;

        let mut calls = Vec::new();
        for i in 0..n {
            let engine = engine.clone();
            let tx = tx.clone();
            calls.push(tokio::spawn(async move {
                let result = engine
                    .call("Echo", json!({ "i": i }), Duration::from_secs(5), move |frame| async move {
                        tx.send(frame).map_err(|_| TransportError::Closed)
                    })
                    .await;
                (i, result)
            }));
        }

        let mut frames = Vec::new();
        for _ in 0..n {
            let frame: CallFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            frames.push(frame);
        }

        let ids: std::collections::HashSet<_> = frames.iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids.len(), n);

        for frame in frames.iter().rev() {
            assert!(engine.resolve(&frame.id, Ok(json!({ "i": frame.params["i"] }))));
        }

        for call in calls {
            let (i, result) = call.await.unwrap();
            assert_eq!(result.unwrap(), json!({ "i": i }));
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_fails_every_pending_call() {
        let engine = Arc::new(CorrelationEngine::new());
        let k = 5;

        let mut calls = Vec::new();
        for _ in 0..k {
            let engine = engine.clone();
            calls.push(tokio::spawn(async move {
                engine
                    .call("Slow", Value::Null, Duration::from_secs(30), |_| async { Ok(()) })
                    .await
            }));
        }

        while engine.pending_count() < k {
            tokio::task::yield_now().await;
        }

        assert_eq!(engine.cancel_all(), k);
        for call in calls {
            assert_eq!(call.await.unwrap(), Err(CallError::Cancelled));
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_send_cancels_without_leaking() {
        let engine = CorrelationEngine::new();
        let result = engine
            .call("KeyPress", Value::Null, Duration::from_secs(5), |_| async {
                Err(TransportError::Closed)
            })
            .await;

        assert_eq!(result, Err(CallError::Cancelled));
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_call_is_removed() {
        let engine = CorrelationEngine::new();
        let mut call =
            Box::pin(engine.call("Slow", Value::Null, Duration::from_secs(30), |_| async { Ok(()) }));

        tokio::select! {
            _ = &mut call => panic!("call should still be pending"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert_eq!(engine.pending_count(), 1);
        assert!(engine.next_deadline().is_some());

        drop(call);
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_failure_and_unknown_ids() {
        let engine = Arc::new(CorrelationEngine::new());
        let (tx, mut rx) = capture();

        let caller = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .call("Reboot", Value::Null, Duration::from_secs(5), move |frame| async move {
                        tx.send(frame).map_err(|_| TransportError::Closed)
                    })
                    .await
            })
        };

        let frame: CallFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert!(engine.is_pending(&frame.id));
        assert!(!engine.resolve("no-such-id", Ok(Value::Null)));

        let failure = CallError::Remote {
            code: 403,
            message: "not allowed".into(),
        };
        assert!(engine.resolve(&frame.id, Err(failure.clone())));
        assert!(!engine.resolve(&frame.id, Ok(Value::Null)));

        assert_eq!(caller.await.unwrap(), Err(failure));
    }
}
