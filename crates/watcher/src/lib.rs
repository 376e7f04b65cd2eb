//! Local change detection for vfsync
//!
//! This crate provides:
//! - Per-key debouncing of bursty triggers
//! - Ignore rules for paths that must never be synced
//! - A `notify`-backed directory watcher that turns file system events into
//!   the same mutation notifications the in-memory store emits

pub mod debounce;
pub mod ignore;

pub use debounce::Debouncer;
pub use ignore::{IgnoreConfig, IgnoreRules};

use anyhow::{Context, Result};
use bytes::Bytes;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vfs_core::{MutationEvent, NodeKind, ResourceKey};

/// Recursive directory watcher
///
/// Reports changes under `root` as [`MutationEvent`]s keyed relative to it.
pub struct Watcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    pump: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Create a new watcher for the given directory
    pub fn new(path: &Path) -> Result<Self> {
        let root = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve watch root {}", path.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Watch root is not a directory: {}", root.display());
        }
        Ok(Self {
            root,
            watcher: None,
            pump: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start delivering mutations to `tx`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, tx: mpsc::UnboundedSender<MutationEvent>) -> Result<()> {
        if self.is_running() {
            anyhow::bail!("Watcher already running for {}", self.root.display());
        }

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;

        let root = self.root.clone();
        let pump = tokio::spawn(async move {
            let mut renames = RenameTracker::default();
            while let Some(res) = notify_rx.recv().await {
                match res {
                    Ok(event) => {
                        for mutation in translate(&root, event, &mut renames) {
                            if tx.send(mutation).is_err() {
                                debug!("mutation receiver dropped; watcher pump exiting");
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("File watcher error: {}", e),
                }
            }
        });

        info!("Watching {}", self.root.display());
        self.watcher = Some(watcher);
        self.pump = Some(pump);
        Ok(())
    }

    /// Stop watching
    pub fn stop(&mut self) -> Result<()> {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                debug!("unwatch {} failed: {}", self.root.display(), e);
            }
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        Ok(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Pairs split rename notifications (`From` then `To`) into one move
#[derive(Default)]
struct RenameTracker {
    from: Option<PathBuf>,
    last_move: Option<(PathBuf, PathBuf)>,
}

/// Translate one notify event into mutations under `root`
fn translate(root: &Path, event: Event, renames: &mut RenameTracker) -> Vec<MutationEvent> {
    let mut out = Vec::new();

    // A stashed rename source with no destination left the tree
    let is_rename_to = matches!(event.kind, EventKind::Modify(ModifyKind::Name(RenameMode::To)));
    if !is_rename_to {
        if let Some(from) = renames.from.take() {
            if let Some(key) = key_for(root, &from) {
                out.push(MutationEvent::AboutToDelete {
                    key,
                    kind: NodeKind::File,
                });
            }
        }
    }

    match event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                let folder = matches!(kind, CreateKind::Folder) || path.is_dir();
                out.extend(created(root, path, folder));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::From, [from]) => {
                renames.from = Some(from.clone());
            }
            (RenameMode::To, [to]) => match renames.from.take() {
                Some(from) => {
                    out.extend(moved(root, &from, to));
                    renames.last_move = Some((from, to.clone()));
                }
                None => out.extend(created(root, to, to.is_dir())),
            },
            (_, [from, to]) => {
                let pair = (from.clone(), to.clone());
                if renames.last_move.as_ref() != Some(&pair) {
                    out.extend(moved(root, from, to));
                }
                renames.last_move = None;
            }
            (_, paths) => {
                for path in paths {
                    if path.exists() {
                        out.extend(created(root, path, path.is_dir()));
                    } else if let Some(key) = key_for(root, path) {
                        out.push(MutationEvent::AboutToDelete {
                            key,
                            kind: NodeKind::File,
                        });
                    }
                }
            }
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => {}
        EventKind::Modify(_) => {
            for path in &event.paths {
                if !path.is_file() {
                    continue;
                }
                let (Some(key), Some(content)) = (key_for(root, path), read(path)) else {
                    continue;
                };
                out.push(MutationEvent::ContentChanged { key, content });
            }
        }
        EventKind::Remove(kind) => {
            let kind = match kind {
                RemoveKind::Folder => NodeKind::Folder,
                _ => NodeKind::File,
            };
            for path in &event.paths {
                if let Some(key) = key_for(root, path) {
                    out.push(MutationEvent::AboutToDelete { key, kind });
                }
            }
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    out
}

fn created(root: &Path, path: &Path, folder: bool) -> Option<MutationEvent> {
    let key = key_for(root, path)?;
    if folder {
        return Some(MutationEvent::Created {
            key,
            kind: NodeKind::Folder,
            content: Bytes::new(),
        });
    }
    let content = read(path)?;
    Some(MutationEvent::Created {
        key,
        kind: NodeKind::File,
        content,
    })
}

fn moved(root: &Path, from: &Path, to: &Path) -> Option<MutationEvent> {
    let to_key = key_for(root, to)?;
    let Some(from_key) = key_for(root, from) else {
        // Moved in from outside the tree
        return created(root, to, to.is_dir());
    };
    if to.is_dir() {
        return Some(MutationEvent::Moved {
            from: from_key,
            to: to_key,
            kind: NodeKind::Folder,
            content: Bytes::new(),
        });
    }
    Some(MutationEvent::Moved {
        from: from_key,
        to: to_key,
        kind: NodeKind::File,
        content: read(to)?,
    })
}

fn key_for(root: &Path, path: &Path) -> Option<ResourceKey> {
    let relative = path.strip_prefix(root).ok()?;
    let key = ResourceKey::new(relative.to_string_lossy());
    (!key.is_root()).then_some(key)
}

fn read(path: &Path) -> Option<Bytes> {
    match std::fs::read(path) {
        Ok(content) => Some(Bytes::from(content)),
        Err(e) => {
            debug!("skipping {}: {}", path.display(), e);
            None
        }
    }
}
