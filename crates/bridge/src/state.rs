//! Rate-limit backoff state

use std::time::Duration;
use tokio::time::Instant;

/// When the remote told us to back off until
///
/// Purely a record: the adapter host does the waiting and retrying. The
/// bridge keeps this to report how long the remaining wait is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    waiting_until: Option<Instant>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate limit reported at `now`
    pub fn begin(&mut self, now: Instant, retry_after: Duration) {
        self.waiting_until = Some(now + retry_after);
    }

    pub fn clear(&mut self) {
        self.waiting_until = None;
    }

    pub fn waiting_until(&self) -> Option<Instant> {
        self.waiting_until
    }

    /// Time left at `now`, or `None` once the deadline has passed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.waiting_until
            .and_then(|deadline| deadline.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    pub fn is_waiting(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }
}

/// Human wait time: seconds under a minute, otherwise whole minutes rounded up
pub fn format_wait(wait: Duration) -> String {
    let secs = (wait.as_millis() as u64).div_ceil(1000);
    if secs < 60 {
        return match secs {
            1 => "1 second".to_string(),
            n => format!("{} seconds", n),
        };
    }
    match secs.div_ceil(60) {
        1 => "1 minute".to_string(),
        n => format!("{} minutes", n),
    }
}

/// Banner text shown while rate limited
pub fn rate_limit_message(wait: Duration) -> String {
    format!(
        "The remote is rate limiting requests. Pending changes will sync in about {}.",
        format_wait(wait)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(Duration::from_secs(120)), "2 minutes");
        assert_eq!(format_wait(Duration::from_secs(60)), "1 minute");
        assert_eq!(format_wait(Duration::from_secs(61)), "2 minutes");
        assert_eq!(format_wait(Duration::from_secs(45)), "45 seconds");
        assert_eq!(format_wait(Duration::from_secs(1)), "1 second");
        assert_eq!(format_wait(Duration::from_millis(1500)), "2 seconds");
        assert_eq!(format_wait(Duration::ZERO), "0 seconds");
    }

    #[test]
    fn test_message_mentions_wait() {
        assert!(rate_limit_message(Duration::from_secs(120)).contains("2 minutes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let mut state = RateLimitState::new();
        let start = Instant::now();
        assert_eq!(state.remaining(start), None);

        state.begin(start, Duration::from_secs(120));
        assert_eq!(state.waiting_until(), Some(start + Duration::from_secs(120)));
        assert_eq!(
            state.remaining(start + Duration::from_secs(30)),
            Some(Duration::from_secs(90))
        );
        assert!(!state.is_waiting(start + Duration::from_secs(120)));
        assert!(!state.is_waiting(start + Duration::from_secs(500)));

        state.clear();
        assert!(!state.is_waiting(start));
    }
}
