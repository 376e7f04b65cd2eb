//! Sync bridge: mirrors local mutations onto a remote repository
//!
//! Local mutation notifications become remote tasks on one serialized
//! queue. Content edits are debounced per key; creates, moves and deletes
//! are scheduled immediately. The remote adapter runs in its own task and
//! is reached only through an RPC channel.

pub mod bridge;
pub mod config;
pub mod events;
pub mod settings;
pub mod state;

pub use bridge::SyncBridge;
pub use config::{SyncConfig, CONFIG_KEYS};
pub use events::SyncEvent;
pub use settings::{ConnectionSettings, MemorySettings, SettingsStore, SledSettings};
pub use state::{format_wait, rate_limit_message, RateLimitState};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connecting failed; the message is already rewritten for display
    #[error("{0}")]
    Connect(String),

    #[error("not connected to a remote")]
    NotConnected,

    #[error("no saved connection to resume")]
    NoSavedConnection,

    #[error(transparent)]
    Rpc(#[from] rpc::RpcError),

    #[error(transparent)]
    Store(#[from] vfs_core::StoreError),

    #[error("settings database error: {0}")]
    Settings(#[from] sled::Error),

    #[error("malformed settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}
