//! Adapter host: runs a remote adapter behind an envelope boundary
//!
//! The adapter lives in its own task and only ever sees envelopes. The
//! bridge side gets an [`RpcChannel`] plus a pump feeding replies and events
//! back into it. Requests are handled one at a time, in arrival order.
//!
//! Rate limits never reach the caller: the host emits `rate-limited`, sleeps
//! for the advertised interval and retries the same request. The caller's
//! future stays pending the whole time.

use crate::error::RemoteError;
use crate::protocol::{
    event, request, BranchList, CloneSuccess, CommitOutcome, CommitParams, ErrorPayload,
    FileEntry, InitParams, InitResponse, RateLimited, RemoveParams, RenameParams,
};
use async_trait::async_trait;
use rpc::{Envelope, RpcChannel};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A remote version-controlled repository
///
/// Implementations must be safe to retry: after a `RateLimited` error the
/// host repeats the same call with the same parameters.
#[async_trait]
pub trait RemoteAdapter: Send + 'static {
    fn name(&self) -> &'static str;

    /// Clone `params.branch` and return the full snapshot
    async fn init(
        &mut self,
        params: &InitParams,
        events: &EventSink,
    ) -> Result<Vec<FileEntry>, RemoteError>;

    async fn list_branches(&mut self) -> Result<Vec<String>, RemoteError>;

    async fn commit(&mut self, params: &CommitParams) -> Result<CommitOutcome, RemoteError>;

    async fn remove(&mut self, params: &RemoveParams) -> Result<CommitOutcome, RemoteError>;

    async fn rename(&mut self, params: &RenameParams) -> Result<CommitOutcome, RemoteError>;

    /// Release resources before the host exits
    async fn stop(&mut self) {}
}

/// Creates a fresh adapter for every connection
pub trait AdapterFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn RemoteAdapter>;
}

impl<F> AdapterFactory for F
where
    F: Fn() -> Box<dyn RemoteAdapter> + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn RemoteAdapter> {
        self()
    }
}

/// Outbound half of the boundary, as seen from inside the host
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Emit an out-of-band event
    pub fn emit<T: Serialize>(&self, kind: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(data) => self.send(Envelope::event(kind, data)),
            Err(e) => warn!("failed to encode {} event: {}", kind, e),
        }
    }

    fn send(&self, message: Envelope) {
        if self.tx.send(message).is_err() {
            trace!("bridge side is gone, dropping message");
        }
    }
}

/// Bridge-side handle to a running adapter host
pub struct RemoteHandle {
    rpc: RpcChannel,
    host: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl RemoteHandle {
    pub fn rpc(&self) -> &RpcChannel {
        &self.rpc
    }

    /// Whether the host task has exited
    pub fn is_finished(&self) -> bool {
        self.host.is_finished()
    }

    /// Tear the host down immediately
    ///
    /// The adapter is dropped without a `stop` round trip and every request
    /// still in flight is rejected with `Disconnected`.
    pub fn shutdown(self) {
        self.host.abort();
        self.pump.abort();
        self.rpc.close();
    }
}

/// Start `adapter` in its own task
///
/// Request ids on the returned channel are `{prefix}-{n}`.
pub fn spawn_adapter(adapter: Box<dyn RemoteAdapter>, prefix: &str) -> RemoteHandle {
    let (to_host, from_bridge) = mpsc::unbounded_channel();
    let (to_bridge, from_host) = mpsc::unbounded_channel();

    let rpc = RpcChannel::new(prefix, to_host);
    let pump = rpc.spawn_inbound(from_host);
    let host = tokio::spawn(run_host(adapter, from_bridge, EventSink::new(to_bridge)));

    RemoteHandle { rpc, host, pump }
}

async fn run_host(
    mut adapter: Box<dyn RemoteAdapter>,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    sink: EventSink,
) {
    info!("remote adapter '{}' started", adapter.name());

    while let Some(message) = inbound.recv().await {
        let Envelope { id, kind, data, .. } = message;
        let Some(id) = id else {
            trace!("host ignoring event {}", kind);
            continue;
        };

        if kind == request::STOP {
            adapter.stop().await;
            sink.send(Envelope::success(id, kind, Value::Null));
            break;
        }

        let data = data.unwrap_or(Value::Null);
        let reply = match handle_with_retry(adapter.as_mut(), &kind, &data, &sink).await {
            Ok(body) => Envelope::success(id, &kind, body),
            Err(e) => {
                let message = e.to_string();
                warn!("{} failed: {}", kind, message);
                let failure_event = if kind == request::INIT {
                    event::CLONE_FAIL
                } else {
                    event::REQUEST_ERROR
                };
                sink.emit(
                    failure_event,
                    &ErrorPayload {
                        message: message.clone(),
                        request: Some(kind.clone()),
                    },
                );
                Envelope::failure(id, &kind, message)
            }
        };
        sink.send(reply);
    }

    info!("remote adapter '{}' stopped", adapter.name());
}

async fn handle_with_retry(
    adapter: &mut dyn RemoteAdapter,
    kind: &str,
    data: &Value,
    sink: &EventSink,
) -> Result<Value, RemoteError> {
    loop {
        match handle(adapter, kind, data, sink).await {
            Err(RemoteError::RateLimited { retry_after }) => {
                warn!(
                    "{} rate limited, retrying in {}s",
                    kind,
                    retry_after.as_secs()
                );
                sink.emit(
                    event::RATE_LIMITED,
                    &RateLimited {
                        retry_after: retry_after.as_secs(),
                    },
                );
                tokio::time::sleep(retry_after).await;
            }
            other => return other,
        }
    }
}

async fn handle(
    adapter: &mut dyn RemoteAdapter,
    kind: &str,
    data: &Value,
    sink: &EventSink,
) -> Result<Value, RemoteError> {
    match kind {
        request::INIT => {
            let params: InitParams = decode(data)?;
            let files = adapter.init(&params, sink).await?;
            let count = files.len();
            debug!("cloned {}@{}: {} files", params.repo, params.branch, count);

            sink.emit(event::CLONE_SUCCESS, &CloneSuccess { files });
            sink.emit(event::READY, &Value::Null);
            match adapter.list_branches().await {
                Ok(branches) => sink.emit(event::BRANCHES, &BranchList { branches }),
                Err(e) => warn!("failed to list branches: {}", e),
            }
            encode(&InitResponse { files: count })
        }
        request::COMMIT => {
            let params: CommitParams = decode(data)?;
            encode(&adapter.commit(&params).await?)
        }
        request::REMOVE => {
            let params: RemoveParams = decode(data)?;
            encode(&adapter.remove(&params).await?)
        }
        request::RENAME => {
            let params: RenameParams = decode(data)?;
            encode(&adapter.rename(&params).await?)
        }
        request::LIST_BRANCHES => {
            let branches = adapter.list_branches().await?;
            encode(&BranchList { branches })
        }
        other => Err(RemoteError::Unsupported(other.to_string())),
    }
}

fn decode<T: DeserializeOwned>(data: &Value) -> Result<T, RemoteError> {
    Ok(T::deserialize(data)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Value, RemoteError> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Credentials;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use rpc::RpcError;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use vfs_core::ResourceKey;

    /// Adapter that rate limits the first `throttled` commits
    #[derive(Clone, Default)]
    struct Scripted {
        throttled: Arc<Mutex<u32>>,
        commits: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    #[async_trait]
    impl RemoteAdapter for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn init(
            &mut self,
            _params: &InitParams,
            _events: &EventSink,
        ) -> Result<Vec<FileEntry>, RemoteError> {
            if self.fail_init {
                return Err(RemoteError::Auth("Bad credentials".into()));
            }
            Ok(vec![FileEntry {
                path: ResourceKey::new("README.md"),
                content: Bytes::from_static(b"# hi"),
            }])
        }

        async fn list_branches(&mut self) -> Result<Vec<String>, RemoteError> {
            Ok(vec!["main".into(), "dev".into()])
        }

        async fn commit(&mut self, params: &CommitParams) -> Result<CommitOutcome, RemoteError> {
            {
                let mut throttled = self.throttled.lock();
                if *throttled > 0 {
                    *throttled -= 1;
                    return Err(RemoteError::RateLimited {
                        retry_after: Duration::from_secs(120),
                    });
                }
            }
            self.commits.lock().push(params.path.to_string());
            Ok(CommitOutcome {
                changed: true,
                revision: None,
            })
        }

        async fn remove(&mut self, _params: &RemoveParams) -> Result<CommitOutcome, RemoteError> {
            Err(RemoteError::NotFound("nothing to remove".into()))
        }

        async fn rename(&mut self, _params: &RenameParams) -> Result<CommitOutcome, RemoteError> {
            Ok(CommitOutcome::default())
        }
    }

    fn record_events(rpc: &RpcChannel, kinds: &[&'static str]) -> Arc<Mutex<Vec<(String, Value)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let seen = seen.clone();
            let name = kind.to_string();
            rpc.on(kind, move |data| seen.lock().push((name.clone(), data)));
        }
        seen
    }

    fn init_params() -> InitParams {
        InitParams {
            repo: "acme/site".into(),
            branch: "main".into(),
            credentials: Credentials::token("t"),
        }
    }

    fn commit_params(path: &str) -> CommitParams {
        CommitParams {
            path: ResourceKey::new(path),
            content: Bytes::from_static(b"x"),
            message: format!("Update {}", path),
        }
    }

    #[tokio::test]
    async fn test_init_emits_clone_ready_and_branches_before_reply() {
        let handle = spawn_adapter(Box::new(Scripted::default()), "vfs");
        let seen = record_events(
            handle.rpc(),
            &[event::CLONE_SUCCESS, event::READY, event::BRANCHES],
        );

        let reply: InitResponse = handle.rpc().call(request::INIT, init_params()).await.unwrap();
        assert_eq!(reply.files, 1);

        let seen = seen.lock();
        let kinds: Vec<&str> = seen.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(kinds, vec!["clone-success", "ready", "branches"]);
        assert_eq!(seen[2].1, json!({"branches": ["main", "dev"]}));
    }

    #[tokio::test]
    async fn test_init_failure_emits_clone_fail_and_rejects() {
        let adapter = Scripted {
            fail_init: true,
            ..Default::default()
        };
        let handle = spawn_adapter(Box::new(adapter), "vfs");
        let seen = record_events(handle.rpc(), &[event::CLONE_FAIL, event::READY]);

        let err = handle.rpc().send(request::INIT, init_params()).await.unwrap_err();
        assert!(err.remote_message().unwrap().contains("Bad credentials"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "clone-fail");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_request_is_retried_in_place() {
        let adapter = Scripted {
            throttled: Arc::new(Mutex::new(1)),
            ..Default::default()
        };
        let commits = adapter.commits.clone();
        let handle = spawn_adapter(Box::new(adapter), "vfs");
        let seen = record_events(handle.rpc(), &[event::RATE_LIMITED]);

        let first = handle.rpc().send(request::COMMIT, commit_params("a.txt"));
        let second = handle.rpc().send(request::COMMIT, commit_params("b.txt"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].1, json!({"retryAfter": 120}));
        assert!(commits.lock().is_empty());
        assert_eq!(handle.rpc().pending_count(), 2);

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*commits.lock(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_request_error_event_and_rejection() {
        let handle = spawn_adapter(Box::new(Scripted::default()), "vfs");
        let seen = record_events(handle.rpc(), &[event::REQUEST_ERROR]);

        let params = RemoveParams {
            path: ResourceKey::new("gone.txt"),
            message: "Remove gone.txt".into(),
        };
        let err = handle.rpc().send(request::REMOVE, params).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote { ref kind, .. } if kind == "remove"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["request"], json!("remove"));
    }

    #[tokio::test]
    async fn test_unknown_request_is_rejected() {
        let handle = spawn_adapter(Box::new(Scripted::default()), "vfs");
        let err = handle.rpc().send("explode", json!({})).await.unwrap_err();
        assert!(err.remote_message().unwrap().contains("explode"));
    }

    #[tokio::test]
    async fn test_stop_ends_host_and_rejects_later_requests() {
        let handle = spawn_adapter(Box::new(Scripted::default()), "vfs");
        handle.rpc().send(request::STOP, json!({})).await.unwrap();

        let err = handle
            .rpc()
            .send(request::COMMIT, commit_params("late.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_in_flight() {
        let adapter = Scripted {
            throttled: Arc::new(Mutex::new(5)),
            ..Default::default()
        };
        let handle = spawn_adapter(Box::new(adapter), "vfs");
        let rpc = handle.rpc().clone();
        let pending = rpc.send(request::COMMIT, commit_params("a.txt"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.shutdown();
        assert!(matches!(pending.await, Err(RpcError::Disconnected)));
    }
}
