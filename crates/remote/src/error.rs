//! Remote failure taxonomy and user-facing rewriting

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials missing or rejected (HTTP 401/403)
    #[error("401 Unauthorized: {0}")]
    Auth(String),

    /// Repository or branch does not exist, or is invisible to the caller
    #[error("404 Not Found: {0}")]
    NotFound(String),

    /// The remote asked us to back off
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// A mutating request arrived before a successful `init`
    #[error("remote is not initialized")]
    NotInitialized,

    /// Push refused by the remote (e.g. non-fast-forward)
    #[error("push rejected: {0}")]
    Rejected(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// Request or reply body did not match its type
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }
}

const AUTH_GUIDANCE: &str = "Authentication failed. Check that your access token is valid, \
     has not expired, and grants access to this repository.";

const NOT_FOUND_GUIDANCE: &str = "Repository not found. Check the repository name and branch; \
     private repositories also need a token that can read them.";

/// Rewrite the two common remote failures into guidance
///
/// Authentication failures and missing repositories get a clearer
/// explanation; any other message is returned unchanged.
pub fn humanize_remote_error(message: &str) -> String {
    let lowered = message.to_lowercase();

    if lowered.contains("401")
        || lowered.contains("bad credentials")
        || lowered.contains("authentication")
        || lowered.contains("unauthorized")
        || lowered.contains("could not read username")
    {
        return AUTH_GUIDANCE.to_string();
    }

    if lowered.contains("404")
        || lowered.contains("not found")
        || lowered.contains("does not appear to be a git repository")
    {
        return NOT_FOUND_GUIDANCE.to_string();
    }

    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_are_rewritten() {
        for raw in [
            "HttpError: HTTP Error: 401 Unauthorized",
            "init failed: Bad credentials",
            "fatal: Authentication failed for 'https://example.com/repo.git/'",
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled",
        ] {
            assert_eq!(humanize_remote_error(raw), AUTH_GUIDANCE, "{}", raw);
        }
    }

    #[test]
    fn test_not_found_is_rewritten() {
        for raw in [
            "HTTP Error: 404 Not Found",
            "remote: Repository not found.",
            "fatal: 'nowhere' does not appear to be a git repository",
        ] {
            assert_eq!(humanize_remote_error(raw), NOT_FOUND_GUIDANCE, "{}", raw);
        }
    }

    #[test]
    fn test_other_messages_pass_through() {
        let raw = "push rejected: non-fast-forward";
        assert_eq!(humanize_remote_error(raw), raw);
    }

    #[test]
    fn test_typed_errors_humanize_through_display() {
        let auth = RemoteError::Auth("token rejected".into()).to_string();
        assert_eq!(humanize_remote_error(&auth), AUTH_GUIDANCE);

        let missing = RemoteError::NotFound("acme/widgets".into()).to_string();
        assert_eq!(humanize_remote_error(&missing), NOT_FOUND_GUIDANCE);

        let limited = RemoteError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(limited.to_string(), "rate limited, retry after 30s");
        assert!(limited.is_rate_limited());
    }
}
