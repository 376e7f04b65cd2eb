//! Sync bridge
//!
//! Every remote operation is a task on one [`TaskQueue`], so operations
//! reach the remote in the order they were scheduled and never overlap.
//! Tasks wait until the current connection reports ready. Each teardown
//! bumps a connection epoch; tasks and events from an older epoch are
//! dropped instead of touching the new connection.

use crate::config::SyncConfig;
use crate::events::SyncEvent;
use crate::settings::{ConnectionSettings, SettingsStore};
use crate::state::{rate_limit_message, RateLimitState};
use crate::SyncError;
use anyhow::Context;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use queue::{QueueSignal, TaskQueue};
use remote::{
    event, humanize_remote_error, request, spawn_adapter, AdapterFactory, BranchList,
    CloneProgress, CloneSuccess, CommitOutcome, CommitParams, Credentials, ErrorPayload,
    FileEntry, InitParams, InitResponse, RateLimited, RemoteHandle, RemoveParams, RenameParams,
};
use rpc::RpcChannel;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use vfs_core::{hash_bytes, ContentHash, LocalStore, MutationEvent, NodeKind, ResourceKey};
use watcher::{Debouncer, IgnoreRules};

/// Request ids on the remote channel are `vfs-{n}`
const REQUEST_PREFIX: &str = "vfs";

struct Connection {
    settings: ConnectionSettings,
    epoch: u64,
    handle: RemoteHandle,
}

/// A connection that has finished cloning
#[derive(Clone)]
struct Session {
    epoch: u64,
    rpc: RpcChannel,
}

struct Inner {
    config: SyncConfig,
    queue: TaskQueue,
    local: Arc<dyn LocalStore>,
    settings: Arc<dyn SettingsStore>,
    remotes: Arc<dyn AdapterFactory>,
    debouncer: Debouncer<ResourceKey>,
    ignore: RwLock<IgnoreRules>,
    /// Hash of the content last known to be on the remote, per key
    synced: DashMap<ResourceKey, ContentHash>,
    connection: Mutex<Option<Connection>>,
    /// Local rebuild from the latest clone, still running
    rebuild: Mutex<Option<JoinHandle<()>>>,
    session: watch::Sender<Option<Session>>,
    epoch: AtomicU64,
    rate_limit: Mutex<RateLimitState>,
    branches: Mutex<Vec<String>>,
    events: broadcast::Sender<SyncEvent>,
}

/// Mirrors local mutations onto a remote repository
///
/// Cloning is cheap; clones drive the same bridge.
#[derive(Clone)]
pub struct SyncBridge {
    inner: Arc<Inner>,
}

impl SyncBridge {
    /// Assemble a bridge from its collaborators
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: SyncConfig,
        queue: TaskQueue,
        local: Arc<dyn LocalStore>,
        settings: Arc<dyn SettingsStore>,
        remotes: Arc<dyn AdapterFactory>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let ignore = IgnoreRules::new(config.ignore.clone())?;
        let (events, _) = broadcast::channel(256);
        let (session, _) = watch::channel(None);

        tokio::spawn(forward_queue_signals(queue.subscribe(), events.clone()));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                queue,
                local,
                settings,
                remotes,
                debouncer: Debouncer::new(),
                ignore: RwLock::new(ignore),
                synced: DashMap::new(),
                connection: Mutex::new(None),
                rebuild: Mutex::new(None),
                session,
                epoch: AtomicU64::new(0),
                rate_limit: Mutex::new(RateLimitState::new()),
                branches: Mutex::new(Vec::new()),
                events,
            }),
        })
    }

    /// Receive bridge events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    /// Whether the current connection has finished cloning
    pub fn is_ready(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    /// Settings of the live connection, if any
    pub fn connection(&self) -> Option<ConnectionSettings> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|conn| conn.settings.clone())
    }

    /// Branches reported by the remote for the live connection
    pub fn branches(&self) -> Vec<String> {
        self.inner.branches.lock().clone()
    }

    /// Time left on the last reported rate limit
    pub fn rate_limit_remaining(&self) -> Option<Duration> {
        self.inner.rate_limit.lock().remaining(Instant::now())
    }

    /// Edits still inside their debounce window
    pub fn pending_edits(&self) -> usize {
        self.inner.debouncer.len()
    }

    /// Feed mutation notifications from `rx` into the bridge
    pub fn listen(&self, mut rx: mpsc::UnboundedReceiver<MutationEvent>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(mutation) = rx.recv().await {
                bridge.handle_mutation(mutation);
            }
            debug!("mutation stream closed");
        })
    }

    /// Route one local mutation
    ///
    /// Content edits are debounced; creates, moves and deletes are queued
    /// immediately. Ignored paths never reach the queue.
    pub fn handle_mutation(&self, mutation: MutationEvent) {
        trace!("mutation {} {}", mutation.label(), mutation.key());

        match mutation {
            MutationEvent::Created {
                key,
                kind: NodeKind::Folder,
                ..
            } => {
                // Remote trees only track files; a folder that arrives
                // populated (moved or copied in) brings its files along
                if self.is_ignored(&key, true) {
                    return;
                }
                self.commit_subtree(&key);
            }
            MutationEvent::Created { key, content, .. } => {
                if self.is_ignored(&key, false) {
                    return;
                }
                self.inner.debouncer.cancel(&key);
                self.enqueue_commit(key, content);
            }
            MutationEvent::ContentChanged { key, content } => {
                if self.is_ignored(&key, false) {
                    return;
                }
                self.schedule_commit(key, content);
            }
            MutationEvent::Moved {
                from,
                to,
                kind,
                content,
            } => {
                let is_dir = kind == NodeKind::Folder;
                let content = (kind == NodeKind::File).then_some(content);
                match (self.is_ignored(&from, is_dir), self.is_ignored(&to, is_dir)) {
                    (true, true) => {}
                    (false, true) => self.schedule_remove(from),
                    (true, false) => match content {
                        Some(content) => self.enqueue_commit(to, content),
                        None => self.commit_subtree(&to),
                    },
                    (false, false) => self.schedule_rename(from, to, content),
                }
            }
            MutationEvent::AboutToDelete { key, kind } => {
                if self.is_ignored(&key, kind == NodeKind::Folder) {
                    return;
                }
                self.schedule_remove(key);
            }
        }
    }

    /// Commit `content` at `key` once edits to `key` have been quiet for
    /// the debounce window
    ///
    /// A later call for the same key replaces this one. If the file is gone
    /// from the local store when the window closes, nothing is committed.
    pub fn schedule_commit(&self, key: impl Into<ResourceKey>, content: impl Into<Bytes>) {
        let key = key.into();
        let content = content.into();
        let target = key.clone();
        let inner = Arc::downgrade(&self.inner);

        let replaced = self
            .inner
            .debouncer
            .debounce(key, self.inner.config.debounce(), move || {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let bridge = SyncBridge { inner };
                match bridge.inner.local.read_file(&target) {
                    Ok(Some(_)) => bridge.enqueue_commit(target, content),
                    Ok(None) => debug!("{} no longer exists, dropping coalesced edit", target),
                    Err(e) => warn!("cannot read {}: {}", target, e),
                }
            });
        if replaced {
            trace!("coalesced pending edit");
        }
    }

    /// Remove `key` (and everything under it) from the remote
    ///
    /// Pending debounced edits under `key` are cancelled first.
    pub fn schedule_remove(&self, key: impl Into<ResourceKey>) {
        let key = key.into();
        let cancelled = self
            .inner
            .debouncer
            .cancel_where(|pending| pending.starts_with(&key));
        if !cancelled.is_empty() {
            debug!("cancelled {} pending edits under {}", cancelled.len(), key);
        }
        self.enqueue_remove(key);
    }

    /// Move `from` to `to` on the remote
    ///
    /// `content` is the moved file's current content (`None` for folders).
    /// Pending debounced edits under `from` and `to` are cancelled; edits to
    /// files inside a moved folder are re-issued at their new key from local
    /// content. Edits pending at `to` describe what the move replaced.
    pub fn schedule_rename(
        &self,
        from: impl Into<ResourceKey>,
        to: impl Into<ResourceKey>,
        content: Option<Bytes>,
    ) {
        let from = from.into();
        let to = to.into();
        let cancelled = self
            .inner
            .debouncer
            .cancel_where(|pending| pending.starts_with(&from) || pending.starts_with(&to));

        self.enqueue_rename(from.clone(), to.clone(), content);

        for key in cancelled {
            if key == from {
                continue;
            }
            let Some(moved) = key.rebase(&from, &to) else {
                debug!("dropping edit to {}, replaced by move", key);
                continue;
            };
            match self.inner.local.read_file(&moved) {
                Ok(Some(content)) => self.enqueue_commit(moved, content),
                Ok(None) => debug!("{} vanished after move, dropping edit", moved),
                Err(e) => warn!("cannot read {}: {}", moved, e),
            }
        }
    }

    /// Connect to `repo` at `branch` and mirror it locally
    ///
    /// An existing connection is torn down first, keeping saved settings.
    /// Resolves once the clone has been applied locally and the remote is
    /// ready; returns the number of files cloned. Settings are saved only
    /// after a successful connect.
    pub async fn connect(
        &self,
        repo: &str,
        credentials: Credentials,
        branch: &str,
    ) -> Result<usize, SyncError> {
        if self.inner.connection.lock().is_some() {
            info!("switching connection to {}@{}", repo, branch);
            self.inner.teardown();
        }

        let epoch = self.inner.current_epoch();
        let handle = spawn_adapter(self.inner.remotes.create(), REQUEST_PREFIX);
        let rpc = handle.rpc().clone();
        self.register_handlers(&rpc, epoch);

        let settings = ConnectionSettings {
            repo: repo.to_string(),
            branch: branch.to_string(),
            credentials,
        };
        let params = InitParams {
            repo: settings.repo.clone(),
            branch: settings.branch.clone(),
            credentials: settings.credentials.clone(),
        };
        *self.inner.connection.lock() = Some(Connection {
            settings: settings.clone(),
            epoch,
            handle,
        });

        info!("connecting to {}@{}", repo, branch);
        match rpc.call::<_, InitResponse>(request::INIT, &params).await {
            Ok(reply) => {
                // The reply can beat the local rebuild
                if self.inner.ready_rpc(epoch).await.is_none() {
                    return Err(SyncError::NotConnected);
                }
                self.inner.settings.save(&settings)?;
                info!("connected to {}@{} ({} files)", repo, branch, reply.files);
                Ok(reply.files)
            }
            Err(e) => {
                self.inner.drop_connection(epoch);
                let message = match e.remote_message() {
                    Some(raw) => humanize_remote_error(raw),
                    None => e.to_string(),
                };
                Err(SyncError::Connect(message))
            }
        }
    }

    /// Tear down the connection
    ///
    /// With `clear_settings` the saved connection is forgotten too, so a
    /// restart does not reconnect. Queued work for this connection is
    /// dropped.
    pub fn disconnect(&self, clear_settings: bool) -> Result<(), SyncError> {
        self.inner.teardown();
        if clear_settings {
            self.inner.settings.clear()?;
            info!("cleared saved connection settings");
        }
        Ok(())
    }

    /// Reconnect to the same repository on another branch
    pub async fn switch_branch(&self, branch: &str) -> Result<usize, SyncError> {
        let current = self.connection().ok_or(SyncError::NotConnected)?;
        self.connect(&current.repo, current.credentials, branch).await
    }

    /// Reconnect using saved settings
    pub async fn resume(&self) -> Result<usize, SyncError> {
        let saved = self
            .inner
            .settings
            .load()?
            .ok_or(SyncError::NoSavedConnection)?;
        self.connect(&saved.repo, saved.credentials, &saved.branch)
            .await
    }

    fn is_ignored(&self, key: &ResourceKey, is_dir: bool) -> bool {
        let ignored = self.inner.ignore.read().should_ignore(key, is_dir);
        if ignored {
            trace!("ignoring {}", key);
        }
        ignored
    }

    /// Commit every file currently at or below `key` in the local store
    fn commit_subtree(&self, key: &ResourceKey) {
        let files = match self.inner.local.files_under(key) {
            Ok(files) => files,
            Err(e) => {
                warn!("cannot list {}: {}", key, e);
                return;
            }
        };
        let mut scheduled = 0;
        for (file, content) in files {
            if self.is_ignored(&file, false) {
                continue;
            }
            self.inner.debouncer.cancel(&file);
            self.enqueue_commit(file, content);
            scheduled += 1;
        }
        if scheduled > 0 {
            debug!("queued {} files arriving with {}", scheduled, key);
        }
    }

    fn enqueue_commit(&self, key: ResourceKey, content: Bytes) {
        let inner = self.inner.clone();
        let epoch = inner.current_epoch();

        self.inner.queue.schedule(async move {
            let Some(rpc) = inner.ready_rpc(epoch).await else {
                debug!("dropping commit of {} from a closed connection", key);
                return Ok(());
            };

            let hash = hash_bytes(&content);
            if inner.synced.get(&key).is_some_and(|known| *known == hash) {
                trace!("{} unchanged on remote, skipping commit", key);
                return Ok(());
            }

            let params = CommitParams {
                message: inner.config.commit_message(&key),
                path: key.clone(),
                content,
            };
            let outcome: CommitOutcome = rpc
                .call(request::COMMIT, &params)
                .await
                .with_context(|| format!("Failed to commit {}", key))?;

            inner.rate_limit.lock().clear();
            if inner.is_current(epoch) {
                inner.synced.insert(key.clone(), hash);
            }
            debug!("committed {} (changed: {})", key, outcome.changed);
            Ok(())
        });
    }

    fn enqueue_remove(&self, key: ResourceKey) {
        let inner = self.inner.clone();
        let epoch = inner.current_epoch();

        self.inner.queue.schedule(async move {
            let Some(rpc) = inner.ready_rpc(epoch).await else {
                debug!("dropping removal of {} from a closed connection", key);
                return Ok(());
            };

            let params = RemoveParams {
                message: format!("Remove {}", key),
                path: key.clone(),
            };
            let _: CommitOutcome = rpc
                .call(request::REMOVE, &params)
                .await
                .with_context(|| format!("Failed to remove {}", key))?;

            inner.rate_limit.lock().clear();
            if inner.is_current(epoch) {
                inner.synced.retain(|synced, _| !synced.starts_with(&key));
            }
            debug!("removed {}", key);
            Ok(())
        });
    }

    fn enqueue_rename(&self, from: ResourceKey, to: ResourceKey, content: Option<Bytes>) {
        let inner = self.inner.clone();
        let epoch = inner.current_epoch();

        self.inner.queue.schedule(async move {
            let Some(rpc) = inner.ready_rpc(epoch).await else {
                debug!("dropping move of {} from a closed connection", from);
                return Ok(());
            };

            let written = content.as_deref().map(hash_bytes);
            let params = RenameParams {
                message: format!("Rename {} to {}", from, to),
                from: from.clone(),
                to: to.clone(),
                content,
            };
            let _: CommitOutcome = rpc
                .call(request::RENAME, &params)
                .await
                .with_context(|| format!("Failed to move {} to {}", from, to))?;

            inner.rate_limit.lock().clear();
            if inner.is_current(epoch) {
                inner.rekey_synced(&from, &to);
                if let Some(hash) = written {
                    inner.synced.insert(to.clone(), hash);
                }
            }
            debug!("moved {} to {}", from, to);
            Ok(())
        });
    }

    fn register_handlers(&self, rpc: &RpcChannel, epoch: u64) {
        let inner = Arc::downgrade(&self.inner);

        bind(rpc, &inner, epoch, event::READY, move |inner, _: IgnoredAny| {
            inner.ready_after_rebuild(epoch)
        });
        bind(rpc, &inner, epoch, event::RATE_LIMITED, |inner, p: RateLimited| {
            inner.on_rate_limited(Duration::from_secs(p.retry_after))
        });
        bind(rpc, &inner, epoch, event::CLONE_PROGRESS, |inner, p: CloneProgress| {
            inner.emit(SyncEvent::CloneProgress(p))
        });
        bind(rpc, &inner, epoch, event::CLONE_SUCCESS, |inner, p: CloneSuccess| {
            inner.apply_snapshot(p.files)
        });
        bind(rpc, &inner, epoch, event::CLONE_FAIL, |inner, p: ErrorPayload| {
            inner.report_error(&p.message)
        });
        bind(rpc, &inner, epoch, event::REQUEST_ERROR, |inner, p: ErrorPayload| {
            inner.report_error(&p.message)
        });
        bind(rpc, &inner, epoch, event::BRANCHES, |inner, p: BranchList| {
            *inner.branches.lock() = p.branches.clone();
            inner.emit(SyncEvent::BranchesAvailable(p.branches));
        });
    }
}

/// Register a typed event handler that only acts for the live connection
fn bind<T, F>(rpc: &RpcChannel, inner: &Weak<Inner>, epoch: u64, kind: &'static str, handler: F)
where
    T: DeserializeOwned,
    F: Fn(&Arc<Inner>, T) + Send + Sync + 'static,
{
    let inner = inner.clone();
    rpc.on(kind, move |data| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.is_current(epoch) {
            trace!("ignoring {} from a closed connection", kind);
            return;
        }
        match serde_json::from_value::<T>(data) {
            Ok(payload) => handler(&inner, payload),
            Err(e) => debug!("dropping malformed {} event: {}", kind, e),
        }
    });
}

async fn forward_queue_signals(
    mut signals: broadcast::Receiver<QueueSignal>,
    events: broadcast::Sender<SyncEvent>,
) {
    loop {
        let event = match signals.recv().await {
            Ok(QueueSignal::Busy) => SyncEvent::SyncingStarted,
            Ok(QueueSignal::Done) => SyncEvent::SyncingFinished,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("missed {} queue signals", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let _ = events.send(event);
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn emit(&self, event: SyncEvent) {
        trace!("bridge event {}", event.label());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Wait until the connection for `epoch` is ready
    ///
    /// Returns `None` once `epoch` has been torn down.
    async fn ready_rpc(&self, epoch: u64) -> Option<RpcChannel> {
        let mut ready = self.session.subscribe();
        let current = ready
            .wait_for(|session| {
                !self.is_current(epoch) || session.as_ref().is_some_and(|s| s.epoch == epoch)
            })
            .await
            .ok()?;
        match current.as_ref() {
            Some(session) if session.epoch == epoch && self.is_current(epoch) => {
                Some(session.rpc.clone())
            }
            _ => None,
        }
    }

    fn mark_ready(&self, epoch: u64) {
        let rpc = self
            .connection
            .lock()
            .as_ref()
            .filter(|conn| conn.epoch == epoch)
            .map(|conn| conn.handle.rpc().clone());
        let Some(rpc) = rpc else {
            return;
        };
        self.session.send_replace(Some(Session { epoch, rpc }));
        info!("remote ready");
        self.emit(SyncEvent::Ready);
    }

    fn on_rate_limited(&self, retry_after: Duration) {
        self.rate_limit.lock().begin(Instant::now(), retry_after);
        let message = rate_limit_message(retry_after);
        warn!("{}", message);
        self.emit(SyncEvent::RateLimited {
            retry_after,
            message,
        });
    }

    fn report_error(&self, raw: &str) {
        let message = humanize_remote_error(raw);
        warn!("remote error: {}", raw);
        self.emit(SyncEvent::Error { message });
    }

    /// Mark `epoch` ready once the local rebuild for it has finished
    fn ready_after_rebuild(self: &Arc<Self>, epoch: u64) {
        let Some(rebuild) = self.rebuild.lock().take() else {
            self.mark_ready(epoch);
            return;
        };
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Err(e) = rebuild.await {
                error!("local rebuild task failed: {}", e);
            }
            if let Some(inner) = inner.upgrade() {
                inner.mark_ready(epoch);
            }
        });
    }

    /// Replace local state with a clone snapshot
    ///
    /// The store is rewritten on the blocking pool; the connection is not
    /// marked ready until that finishes.
    fn apply_snapshot(self: &Arc<Self>, files: Vec<FileEntry>) {
        self.synced.clear();
        let mut gitignore = None;
        let mut rebuilt = Vec::with_capacity(files.len());

        for FileEntry { path, content } in files {
            self.synced.insert(path.clone(), hash_bytes(&content));
            if path.as_str() == ".gitignore" {
                gitignore = Some(String::from_utf8_lossy(&content).into_owned());
            }
            rebuilt.push((path, content));
        }

        if let Err(e) = self.ignore.write().set_gitignore(gitignore.as_deref()) {
            warn!("ignoring malformed .gitignore: {}", e);
        }

        let local = self.local.clone();
        let events = self.events.clone();
        let rebuild = tokio::task::spawn_blocking(move || {
            let count = rebuilt.len();
            match local.replace_all(rebuilt) {
                Ok(()) => info!("rebuilt local tree from clone ({} files)", count),
                Err(e) => {
                    error!("failed to rebuild local tree: {}", e);
                    let _ = events.send(SyncEvent::Error {
                        message: format!("Failed to rebuild local files: {}", e),
                    });
                }
            }
        });
        *self.rebuild.lock() = Some(rebuild);
    }

    /// Move synced hashes from under `from` to under `to`
    fn rekey_synced(&self, from: &ResourceKey, to: &ResourceKey) {
        let moved: Vec<(ResourceKey, ContentHash)> = self
            .synced
            .iter()
            .filter(|entry| entry.key().starts_with(from))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        for (old, hash) in moved {
            self.synced.remove(&old);
            if let Some(new) = old.rebase(from, to) {
                self.synced.insert(new, hash);
            }
        }
    }

    /// Drop the connection for `epoch` after a failed connect
    ///
    /// The epoch is kept, so work queued for it waits for the next attempt.
    fn drop_connection(&self, epoch: u64) {
        let failed = {
            let mut connection = self.connection.lock();
            if connection.as_ref().is_some_and(|conn| conn.epoch == epoch) {
                connection.take()
            } else {
                None
            }
        };
        if let Some(conn) = failed {
            conn.handle.shutdown();
        }
    }

    fn teardown(&self) {
        let previous = self.connection.lock().take();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.rebuild.lock().take();
        self.session.send_replace(None);

        let dropped = self.debouncer.cancel_all();
        self.synced.clear();
        self.rate_limit.lock().clear();
        self.branches.lock().clear();

        if let Some(conn) = previous {
            info!(
                "disconnected from {}@{}",
                conn.settings.repo, conn.settings.branch
            );
            conn.handle.shutdown();
        }
        debug!(
            "connection epoch {} ({} pending edits dropped)",
            epoch, dropped
        );
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.get_mut().take() {
            conn.handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use remote::MemoryRepos;
    use vfs_core::VirtualStore;

    fn bridge_with(local: Arc<VirtualStore>) -> SyncBridge {
        let config = SyncConfig::default();
        let queue = TaskQueue::new(config.queue_config());
        SyncBridge::new(
            config,
            queue,
            local,
            Arc::new(MemorySettings::new()),
            Arc::new(MemoryRepos::new()),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_folder_create_schedules_nothing() {
        let bridge = bridge_with(Arc::new(VirtualStore::new()));
        bridge.handle_mutation(MutationEvent::Created {
            key: ResourceKey::new("docs"),
            kind: NodeKind::Folder,
            content: Bytes::new(),
        });
        assert!(bridge.queue().is_empty());
        assert!(!bridge.queue().is_draining());
        assert_eq!(bridge.pending_edits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_paths_never_reach_queue() {
        let bridge = bridge_with(Arc::new(VirtualStore::new()));
        bridge.handle_mutation(MutationEvent::ContentChanged {
            key: ResourceKey::new("node_modules/pkg/index.js"),
            content: Bytes::from_static(b"x"),
        });
        bridge.handle_mutation(MutationEvent::Created {
            key: ResourceKey::new(".git/HEAD"),
            kind: NodeKind::File,
            content: Bytes::from_static(b"ref"),
        });
        assert_eq!(bridge.pending_edits(), 0);
        assert!(!bridge.queue().is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_changes_are_debounced_per_key() {
        let bridge = bridge_with(Arc::new(VirtualStore::new()));
        for (key, body) in [("a.txt", "1"), ("a.txt", "2"), ("b.txt", "3")] {
            bridge.handle_mutation(MutationEvent::ContentChanged {
                key: ResourceKey::new(key),
                content: Bytes::from(body),
            });
        }
        assert_eq!(bridge.pending_edits(), 2);
        assert!(!bridge.queue().is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_move_cancel_pending_edits() {
        let bridge = bridge_with(Arc::new(VirtualStore::new()));
        bridge.schedule_commit("docs/a.md", "draft");
        bridge.schedule_commit("docs/b.md", "draft");
        bridge.schedule_commit("notes.txt", "draft");
        assert_eq!(bridge.pending_edits(), 3);

        bridge.handle_mutation(MutationEvent::AboutToDelete {
            key: ResourceKey::new("docs"),
            kind: NodeKind::Folder,
        });
        assert_eq!(bridge.pending_edits(), 1);

        bridge.handle_mutation(MutationEvent::Moved {
            from: ResourceKey::new("notes.txt"),
            to: ResourceKey::new("notes.md"),
            kind: NodeKind::File,
            content: Bytes::from_static(b"draft"),
        });
        assert_eq!(bridge.pending_edits(), 0);
    }

    /// Local side whose rebuild takes real time on the blocking pool
    struct SlowStore {
        inner: VirtualStore,
        rebuilt: std::sync::atomic::AtomicBool,
    }

    impl LocalStore for SlowStore {
        fn read_file(&self, key: &ResourceKey) -> Result<Option<Bytes>, vfs_core::StoreError> {
            self.inner.read_file(key)
        }

        fn files_under(
            &self,
            key: &ResourceKey,
        ) -> Result<Vec<(ResourceKey, Bytes)>, vfs_core::StoreError> {
            self.inner.files_under(key)
        }

        fn replace_all(&self, files: Vec<(ResourceKey, Bytes)>) -> Result<(), vfs_core::StoreError> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.inner.replace_all(files)?;
            self.rebuilt.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_waits_for_local_rebuild() {
        let repos = MemoryRepos::new();
        repos.create_repo("acme/site", None);
        repos.seed("acme/site", "main", [("README.md", "# site")]);
        let local = Arc::new(SlowStore {
            inner: VirtualStore::new(),
            rebuilt: std::sync::atomic::AtomicBool::new(false),
        });

        let config = SyncConfig::default();
        let queue = TaskQueue::new(config.queue_config());
        let bridge = SyncBridge::new(
            config,
            queue,
            local.clone(),
            Arc::new(MemorySettings::new()),
            Arc::new(repos),
        )
        .unwrap();

        let files = bridge
            .connect("acme/site", Credentials::token("t"), "main")
            .await
            .unwrap();
        assert_eq!(files, 1);
        assert!(local.rebuilt.load(Ordering::SeqCst));
        assert!(bridge.is_ready());
        assert_eq!(
            local.inner.read("README.md").unwrap(),
            Bytes::from_static(b"# site")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_branch_requires_connection() {
        let bridge = bridge_with(Arc::new(VirtualStore::new()));
        assert!(matches!(
            bridge.switch_branch("dev").await,
            Err(SyncError::NotConnected)
        ));
        assert!(matches!(
            bridge.resume().await,
            Err(SyncError::NoSavedConnection)
        ));
    }
}
