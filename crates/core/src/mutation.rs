//! Mutation notifications emitted by a local store

use crate::path::ResourceKey;
use bytes::Bytes;

/// Type of node a mutation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file
    File,
    /// Folder (may contain files and folders)
    Folder,
}

/// Local change notification
///
/// Carries enough detail (path, new content or new path) for the sync
/// bridge to replay the change remotely without reading the store again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    /// A file or folder was created. `content` is empty for folders.
    Created {
        key: ResourceKey,
        kind: NodeKind,
        content: Bytes,
    },
    /// A file's content was rewritten
    ContentChanged { key: ResourceKey, content: Bytes },
    /// A file or folder was moved. `content` is the moved file's content,
    /// empty for folders.
    Moved {
        from: ResourceKey,
        to: ResourceKey,
        kind: NodeKind,
        content: Bytes,
    },
    /// A file or folder is about to be deleted
    AboutToDelete { key: ResourceKey, kind: NodeKind },
}

impl MutationEvent {
    /// The key the mutation leaves behind (destination for moves)
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Created { key, .. }
            | Self::ContentChanged { key, .. }
            | Self::AboutToDelete { key, .. } => key,
            Self::Moved { to, .. } => to,
        }
    }

    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::ContentChanged { .. } => "content-changed",
            Self::Moved { .. } => "moved",
            Self::AboutToDelete { .. } => "about-to-be-deleted",
        }
    }
}
