//! Remote repositories for vfsync
//!
//! An adapter owns one connection to a version-controlled remote and runs
//! in its own task behind an envelope boundary. Adapters:
//! - [`MemoryRemote`]: shared in-process registry, used by tests and demos
//! - [`GitRemote`]: the `git` command line against a real remote

pub mod error;
pub mod git;
pub mod host;
pub mod memory;
pub mod protocol;

// Re-exports
pub use error::{humanize_remote_error, RemoteError};
pub use git::{GitRemote, GitRemoteFactory};
pub use host::{spawn_adapter, AdapterFactory, EventSink, RemoteAdapter, RemoteHandle};
pub use memory::{CommitRecord, MemoryRemote, MemoryRepos};
pub use protocol::{
    event, request, BranchList, CloneProgress, CloneSuccess, CommitOutcome, CommitParams,
    Credentials, ErrorPayload, FileEntry, InitParams, InitResponse, RateLimited, RemoveParams,
    RenameParams,
};
