//! Request correlation and event dispatch

use crate::envelope::Envelope;
use crate::RpcError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Completion = oneshot::Sender<Result<Value, RpcError>>;
type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct Shared {
    /// In-flight requests: id -> completion
    pending: Mutex<HashMap<String, Completion>>,
    /// One handler per event type; later registrations replace earlier ones
    handlers: Mutex<HashMap<String, EventHandler>>,
    /// Monotonic id counter
    next_id: AtomicU64,
}

/// Request/response channel over an envelope boundary
///
/// Cloning is cheap; clones share the pending table and handlers.
#[derive(Clone)]
pub struct RpcChannel {
    prefix: Arc<str>,
    outbound: mpsc::UnboundedSender<Envelope>,
    shared: Arc<Shared>,
}

impl RpcChannel {
    /// Create a channel that transmits through `outbound`
    ///
    /// Request ids are `{prefix}-{n}` with `n` counting up from 1.
    pub fn new(prefix: impl Into<String>, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.into(),
            outbound,
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Transmit a request and return a future for its response
    ///
    /// The request leaves immediately, in call order, whether or not the
    /// returned future is polled. There is no timeout: wrap the future in
    /// `tokio::time::timeout` if one is needed.
    pub fn send<P: Serialize>(&self, kind: &str, params: P) -> PendingResponse {
        let data = match serde_json::to_value(params) {
            Ok(data) => data,
            Err(e) => return PendingResponse::failed(RpcError::Encode(e)),
        };

        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id.clone(), tx);

        trace!("rpc -> {} {}", id, kind);
        if self.outbound.send(Envelope::request(id.clone(), kind, data)).is_err() {
            self.shared.pending.lock().remove(&id);
            return PendingResponse::failed(RpcError::Disconnected);
        }

        PendingResponse {
            id: Some(id),
            state: PendingState::Waiting(rx),
        }
    }

    /// Send a request and decode the response body
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        kind: &str,
        params: P,
    ) -> Result<R, RpcError> {
        let value = self.send(kind, params).await?;
        serde_json::from_value(value).map_err(RpcError::Decode)
    }

    fn allocate_id(&self) -> String {
        let pending = self.shared.pending.lock();
        loop {
            let n = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            let id = format!("{}-{}", self.prefix, n);
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Route one inbound message
    ///
    /// Responses settle their pending request at most once; responses for
    /// unknown or already-settled ids are dropped. Messages without an id
    /// go to the handler registered for their type, or are dropped.
    pub fn receive(&self, message: Envelope) {
        let Envelope {
            id,
            kind,
            data,
            error,
        } = message;

        match id {
            Some(id) => {
                let completion = self.shared.pending.lock().remove(&id);
                let Some(completion) = completion else {
                    trace!("dropping response for unknown request {} ({})", id, kind);
                    return;
                };
                let outcome = match error {
                    Some(message) => Err(RpcError::Remote { kind, message }),
                    None => Ok(data.unwrap_or(Value::Null)),
                };
                // Caller may have dropped its future; nothing to settle then
                let _ = completion.send(outcome);
            }
            None => {
                let handler = self.shared.handlers.lock().get(&kind).cloned();
                match handler {
                    Some(handler) => handler(data.unwrap_or(Value::Null)),
                    None => trace!("no handler for event {}", kind),
                }
            }
        }
    }

    /// Parse and route a raw JSON message; malformed input is logged and dropped
    pub fn receive_raw(&self, bytes: &[u8]) {
        match serde_json::from_slice::<Envelope>(bytes) {
            Ok(message) => self.receive(message),
            Err(e) => debug!("dropping malformed message: {}", e),
        }
    }

    /// Register the handler for an event type
    ///
    /// Returns `true` when an earlier handler was replaced.
    pub fn on<F>(&self, kind: &str, handler: F) -> bool
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let replaced = self
            .shared
            .handlers
            .lock()
            .insert(kind.to_string(), Arc::new(handler))
            .is_some();
        if replaced {
            debug!("replaced handler for event {}", kind);
        }
        replaced
    }

    /// Remove the handler for an event type
    pub fn off(&self, kind: &str) -> bool {
        self.shared.handlers.lock().remove(kind).is_some()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Reject every in-flight request with [`RpcError::Disconnected`]
    pub fn close(&self) {
        let drained: Vec<Completion> = self
            .shared
            .pending
            .lock()
            .drain()
            .map(|(_, completion)| completion)
            .collect();
        if !drained.is_empty() {
            debug!("closing channel with {} requests in flight", drained.len());
        }
        for completion in drained {
            let _ = completion.send(Err(RpcError::Disconnected));
        }
    }

    /// Feed every envelope from `inbound` into [`receive`](Self::receive)
    ///
    /// When the inbound side closes, in-flight requests are rejected.
    pub fn spawn_inbound(&self, mut inbound: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                channel.receive(message);
            }
            debug!("inbound side of {} closed", channel.prefix);
            channel.close();
        })
    }
}

enum PendingState {
    Waiting(oneshot::Receiver<Result<Value, RpcError>>),
    Failed(Option<RpcError>),
}

/// Future settled by the response to one request
pub struct PendingResponse {
    id: Option<String>,
    state: PendingState,
}

impl PendingResponse {
    fn failed(error: RpcError) -> Self {
        Self {
            id: None,
            state: PendingState::Failed(Some(error)),
        }
    }

    /// The request id, if the request was transmitted
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|settled| settled.unwrap_or(Err(RpcError::Disconnected))),
            PendingState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(RpcError::Disconnected)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn channel() -> (RpcChannel, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RpcChannel::new("vfs", tx), rx)
    }

    #[tokio::test]
    async fn test_response_settles_matching_request() {
        let (rpc, mut wire) = channel();
        for _ in 0..6 {
            let _ = rpc.send("noop", json!({}));
        }

        let pending = rpc.send("stat", json!({"path": "a.txt"}));
        assert_eq!(pending.id(), Some("vfs-7"));

        let sent = wire.recv().await.unwrap();
        assert_eq!(sent.kind, "noop");

        rpc.receive(Envelope::success("vfs-7", "stat", json!({"ok": true})));
        assert_eq!(pending.await.unwrap(), json!({"ok": true}));

        // Duplicate response for a settled id is ignored
        rpc.receive(Envelope::success("vfs-7", "stat", json!({"ok": false})));
        assert_eq!(rpc.pending_count(), 6);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (rpc, _wire) = channel();
        let first = rpc.send("a", json!(1));
        let second = rpc.send("b", json!(2));

        rpc.receive(Envelope::success("vfs-999", "a", json!("stray")));
        assert_eq!(rpc.pending_count(), 2);

        rpc.receive(Envelope::success("vfs-2", "b", json!("two")));
        rpc.receive(Envelope::success("vfs-1", "a", json!("one")));
        assert_eq!(second.await.unwrap(), json!("two"));
        assert_eq!(first.await.unwrap(), json!("one"));
    }

    #[tokio::test]
    async fn test_error_response_rejects() {
        let (rpc, _wire) = channel();
        let pending = rpc.send("commit", json!({}));
        rpc.receive(Envelope::failure("vfs-1", "commit", "Bad credentials"));

        let err = pending.await.unwrap_err();
        assert_eq!(err.remote_message(), Some("Bad credentials"));
        assert_eq!(err.to_string(), "commit failed: Bad credentials");
    }

    #[tokio::test]
    async fn test_requests_carry_type_and_params() {
        let (rpc, mut wire) = channel();
        let _pending = rpc.send("rename", json!({"from": "a", "to": "b"}));
        let sent = wire.recv().await.unwrap();
        assert_eq!(
            sent,
            Envelope::request("vfs-1", "rename", json!({"from": "a", "to": "b"}))
        );
    }

    #[tokio::test]
    async fn test_events_reach_last_registered_handler() {
        let (rpc, _wire) = channel();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        assert!(!rpc.on("ready", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = second.clone();
        assert!(rpc.on("ready", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        rpc.receive(Envelope::event("ready", json!({})));
        rpc.receive(Envelope::event("unknown", json!({})));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_raw_message_is_dropped() {
        let (rpc, _wire) = channel();
        let pending = rpc.send("a", json!({}));
        rpc.receive_raw(b"{not json");
        rpc.receive_raw(br#"{"id":"vfs-1","type":"a","data":5}"#);
        assert_eq!(pending.await.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_send_on_closed_boundary_fails_fast() {
        let (rpc, wire) = channel();
        drop(wire);
        let err = rpc.send("a", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Disconnected));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_inbound_close_rejects_in_flight() {
        let (rpc, _wire) = channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pump = rpc.spawn_inbound(inbound_rx);

        let pending = rpc.send("clone", json!({}));
        drop(inbound_tx);
        pump.await.unwrap();

        assert!(matches!(pending.await, Err(RpcError::Disconnected)));
    }

    #[tokio::test]
    async fn test_call_decodes_typed_response() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Branches {
            branches: Vec<String>,
        }

        let (rpc, _wire) = channel();
        let responder = rpc.clone();
        let call = tokio::spawn(async move {
            rpc.call::<_, Branches>("list-branches", json!({})).await
        });
        tokio::task::yield_now().await;
        while responder.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        responder.receive(Envelope::success(
            "vfs-1",
            "list-branches",
            json!({"branches": ["main", "dev"]}),
        ));

        assert_eq!(
            call.await.unwrap().unwrap(),
            Branches {
                branches: vec!["main".into(), "dev".into()]
            }
        );
    }
}
