//! Local store seam and the in-memory virtual store

use crate::mutation::{MutationEvent, NodeKind};
use crate::path::ResourceKey;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Errors raised by local store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(ResourceKey),

    #[error("already exists: {0}")]
    AlreadyExists(ResourceKey),

    #[error("not a file: {0}")]
    NotAFile(ResourceKey),

    #[error("not a folder: {0}")]
    NotAFolder(ResourceKey),

    #[error("operation not permitted on the store root")]
    Root,

    #[error("cannot move {from} into its own subtree {to}")]
    MoveIntoSelf { from: ResourceKey, to: ResourceKey },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the sync bridge needs from the local side
///
/// The bridge reads current content when it has to re-issue work it
/// cancelled, and rebuilds the whole tree after a successful clone.
pub trait LocalStore: Send + Sync + 'static {
    /// Current content of a file; `None` when the key is absent or a folder
    fn read_file(&self, key: &ResourceKey) -> Result<Option<Bytes>, StoreError>;

    /// Every file at or below `key` with its current content, in key order
    fn files_under(&self, key: &ResourceKey) -> Result<Vec<(ResourceKey, Bytes)>, StoreError>;

    /// Clear all local state and replace it with `files`
    ///
    /// Parent folders are created as needed. Implementations must not emit
    /// mutation notifications for the rebuild itself.
    fn replace_all(&self, files: Vec<(ResourceKey, Bytes)>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
enum Node {
    File(Bytes),
    Folder,
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Folder => NodeKind::Folder,
        }
    }
}

/// In-memory file tree with mutation notifications
///
/// Every successful mutation is announced to all subscribers, in the order
/// the mutations were applied. Deletions are announced before the node is
/// removed.
#[derive(Default)]
pub struct VirtualStore {
    nodes: RwLock<BTreeMap<ResourceKey, Node>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MutationEvent>>>,
}

impl VirtualStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every mutation applied from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MutationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: MutationEvent) {
        trace!("store mutation: {} {}", event.label(), event.key());
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Read a file's content
    pub fn read(&self, key: impl Into<ResourceKey>) -> Result<Bytes, StoreError> {
        let key = key.into();
        match self.nodes.read().get(&key) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Folder) => Err(StoreError::NotAFile(key)),
            None => Err(StoreError::NotFound(key)),
        }
    }

    pub fn exists(&self, key: impl Into<ResourceKey>) -> bool {
        let key = key.into();
        key.is_root() || self.nodes.read().contains_key(&key)
    }

    pub fn kind(&self, key: impl Into<ResourceKey>) -> Option<NodeKind> {
        let key = key.into();
        if key.is_root() {
            return Some(NodeKind::Folder);
        }
        self.nodes.read().get(&key).map(Node::kind)
    }

    /// All keys with their kinds, in key order
    pub fn list(&self) -> Vec<(ResourceKey, NodeKind)> {
        self.nodes
            .read()
            .iter()
            .map(|(k, n)| (k.clone(), n.kind()))
            .collect()
    }

    /// Number of files and folders in the store
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Create a file; missing parent folders are created first
    pub fn create_file(
        &self,
        key: impl Into<ResourceKey>,
        content: impl Into<Bytes>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let content = content.into();
        if key.is_root() {
            return Err(StoreError::Root);
        }

        let mut nodes = self.nodes.write();
        if nodes.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        self.ensure_parents(&mut nodes, &key)?;
        nodes.insert(key.clone(), Node::File(content.clone()));
        self.emit(MutationEvent::Created {
            key,
            kind: NodeKind::File,
            content,
        });
        Ok(())
    }

    /// Create a folder; missing parent folders are created first
    pub fn create_folder(&self, key: impl Into<ResourceKey>) -> Result<(), StoreError> {
        let key = key.into();
        if key.is_root() {
            return Err(StoreError::Root);
        }

        let mut nodes = self.nodes.write();
        if nodes.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        self.ensure_parents(&mut nodes, &key)?;
        nodes.insert(key.clone(), Node::Folder);
        self.emit(MutationEvent::Created {
            key,
            kind: NodeKind::Folder,
            content: Bytes::new(),
        });
        Ok(())
    }

    /// Overwrite an existing file's content
    pub fn write_file(
        &self,
        key: impl Into<ResourceKey>,
        content: impl Into<Bytes>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let content = content.into();

        let mut nodes = self.nodes.write();
        match nodes.get_mut(&key) {
            Some(Node::File(existing)) => {
                *existing = content.clone();
            }
            Some(Node::Folder) => return Err(StoreError::NotAFile(key)),
            None => return Err(StoreError::NotFound(key)),
        }
        self.emit(MutationEvent::ContentChanged { key, content });
        Ok(())
    }

    /// Delete a file, or a folder with everything under it
    pub fn delete(&self, key: impl Into<ResourceKey>) -> Result<(), StoreError> {
        let key = key.into();
        if key.is_root() {
            return Err(StoreError::Root);
        }

        let mut nodes = self.nodes.write();
        let kind = match nodes.get(&key) {
            Some(node) => node.kind(),
            None => return Err(StoreError::NotFound(key)),
        };
        self.emit(MutationEvent::AboutToDelete {
            key: key.clone(),
            kind,
        });
        nodes.retain(|k, _| !k.starts_with(&key));
        debug!("deleted {}", key);
        Ok(())
    }

    /// Move a file or folder; descendant keys move with it atomically
    pub fn rename(
        &self,
        from: impl Into<ResourceKey>,
        to: impl Into<ResourceKey>,
    ) -> Result<(), StoreError> {
        let from = from.into();
        let to = to.into();
        if from.is_root() || to.is_root() {
            return Err(StoreError::Root);
        }
        if to.is_descendant_of(&from) {
            return Err(StoreError::MoveIntoSelf { from, to });
        }

        let mut nodes = self.nodes.write();
        let (kind, content) = match nodes.get(&from) {
            Some(Node::File(content)) => (NodeKind::File, content.clone()),
            Some(Node::Folder) => (NodeKind::Folder, Bytes::new()),
            None => return Err(StoreError::NotFound(from)),
        };
        if nodes.contains_key(&to) {
            return Err(StoreError::AlreadyExists(to));
        }
        self.ensure_parents(&mut nodes, &to)?;

        let moved: Vec<ResourceKey> = nodes
            .keys()
            .filter(|k| k.starts_with(&from))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(node), Some(new)) = (nodes.remove(&old), old.rebase(&from, &to)) {
                nodes.insert(new, node);
            }
        }

        self.emit(MutationEvent::Moved {
            from,
            to,
            kind,
            content,
        });
        Ok(())
    }

    /// Create every missing ancestor of `key` as a folder
    fn ensure_parents(
        &self,
        nodes: &mut BTreeMap<ResourceKey, Node>,
        key: &ResourceKey,
    ) -> Result<(), StoreError> {
        let mut missing = Vec::new();
        for ancestor in key.ancestors() {
            match nodes.get(&ancestor) {
                Some(Node::Folder) => break,
                Some(Node::File(_)) => return Err(StoreError::NotAFolder(ancestor)),
                None => missing.push(ancestor),
            }
        }
        // Outermost first so notifications read top-down
        for folder in missing.into_iter().rev() {
            nodes.insert(folder.clone(), Node::Folder);
            self.emit(MutationEvent::Created {
                key: folder,
                kind: NodeKind::Folder,
                content: Bytes::new(),
            });
        }
        Ok(())
    }
}

impl LocalStore for VirtualStore {
    fn read_file(&self, key: &ResourceKey) -> Result<Option<Bytes>, StoreError> {
        match self.nodes.read().get(key) {
            Some(Node::File(content)) => Ok(Some(content.clone())),
            _ => Ok(None),
        }
    }

    fn files_under(&self, key: &ResourceKey) -> Result<Vec<(ResourceKey, Bytes)>, StoreError> {
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(key))
            .filter_map(|(k, node)| match node {
                Node::File(content) => Some((k.clone(), content.clone())),
                Node::Folder => None,
            })
            .collect())
    }

    fn replace_all(&self, files: Vec<(ResourceKey, Bytes)>) -> Result<(), StoreError> {
        let mut rebuilt = BTreeMap::new();
        for (key, content) in files {
            if key.is_root() {
                return Err(StoreError::Root);
            }
            for ancestor in key.ancestors() {
                rebuilt.entry(ancestor).or_insert(Node::Folder);
            }
            rebuilt.insert(key, Node::File(content));
        }
        debug!("rebuilt virtual store with {} nodes", rebuilt.len());
        *self.nodes.write() = rebuilt;
        Ok(())
    }
}
