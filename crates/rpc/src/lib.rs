//! Correlated request/response over an isolated message boundary
//!
//! The boundary only moves opaque [`Envelope`]s in both directions. This
//! crate adds:
//! - request ids and a pending table so responses settle the right caller
//! - routing of id-less messages to per-type event handlers
//! - a pump task that feeds inbound envelopes into the channel

pub mod channel;
pub mod envelope;

pub use channel::{PendingResponse, RpcChannel};
pub use envelope::Envelope;

use thiserror::Error;

/// Errors surfaced to callers of [`RpcChannel::send`]
#[derive(Debug, Error)]
pub enum RpcError {
    /// The other side answered with an error string
    #[error("{kind} failed: {message}")]
    Remote { kind: String, message: String },

    /// The boundary closed before a response arrived
    #[error("channel disconnected")]
    Disconnected,

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl RpcError {
    /// The remote error text, if this is a remote failure
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::Remote { message, .. } => Some(message),
            _ => None,
        }
    }
}
