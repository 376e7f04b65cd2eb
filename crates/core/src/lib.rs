//! Local file model for vfsync
//!
//! This crate provides:
//! - Normalized resource keys (paths into the local store)
//! - BLAKE3 content hashes used to skip redundant remote writes
//! - Mutation notifications emitted by a local store
//! - The `LocalStore` seam the sync bridge reads from and rebuilds
//! - `VirtualStore`, an in-memory store implementing it

pub mod hash;
pub mod mutation;
pub mod path;
pub mod store;

// Re-exports
pub use hash::{hash_bytes, ContentHash};
pub use mutation::{MutationEvent, NodeKind};
pub use path::ResourceKey;
pub use store::{LocalStore, StoreError, VirtualStore};
