//! Events the bridge publishes to its collaborators

use remote::CloneProgress;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The queue has been busy for a while; show a syncing indicator
    SyncingStarted,
    /// The queue drained; hide the indicator
    SyncingFinished,
    CloneProgress(CloneProgress),
    /// The remote finished its clone and accepts work
    Ready,
    /// Clone or request failure, already rewritten for display
    Error { message: String },
    BranchesAvailable(Vec<String>),
    /// The remote asked us to wait; work stays queued and is retried
    RateLimited { retry_after: Duration, message: String },
}

impl SyncEvent {
    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            SyncEvent::SyncingStarted => "syncing-started",
            SyncEvent::SyncingFinished => "syncing-finished",
            SyncEvent::CloneProgress(_) => "clone-progress",
            SyncEvent::Ready => "ready",
            SyncEvent::Error { .. } => "error",
            SyncEvent::BranchesAvailable(_) => "branches-available",
            SyncEvent::RateLimited { .. } => "rate-limited",
        }
    }
}
