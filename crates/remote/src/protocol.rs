//! Messages exchanged with a remote adapter
//!
//! Requests travel as `{id, type, data}` envelopes and are answered with the
//! same id. Events travel without an id.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use vfs_core::ResourceKey;

/// Request types understood by the adapter host
pub mod request {
    pub const INIT: &str = "init";
    pub const COMMIT: &str = "commit";
    pub const REMOVE: &str = "remove";
    pub const RENAME: &str = "rename";
    pub const LIST_BRANCHES: &str = "list-branches";
    pub const STOP: &str = "stop";
}

/// Event types emitted by the adapter host
pub mod event {
    pub const READY: &str = "ready";
    pub const RATE_LIMITED: &str = "rate-limited";
    pub const CLONE_PROGRESS: &str = "clone-progress";
    pub const CLONE_SUCCESS: &str = "clone-success";
    pub const CLONE_FAIL: &str = "clone-fail";
    pub const REQUEST_ERROR: &str = "request-error";
    pub const BRANCHES: &str = "branches";
}

/// Access credentials for the remote
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitParams {
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitParams {
    pub path: ResourceKey,
    pub content: Bytes,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveParams {
    pub path: ResourceKey,
    pub message: String,
}

/// Move `from` (and everything under it) to `to`
///
/// `content`, when present, is written at `to` after the move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameParams {
    pub from: ResourceKey,
    pub to: ResourceKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Bytes>,
    pub message: String,
}

/// Result of a mutating request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Whether the remote tree changed
    pub changed: bool,
    /// Revision identifier after the change, if the adapter has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// One file of a cloned snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: ResourceKey,
    pub content: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSuccess {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneProgress {
    pub phase: String,
    pub loaded: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimited {
    pub retry_after: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchList {
    pub branches: Vec<String>,
}
