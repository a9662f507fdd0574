use std::time::Duration;

/// Core error type for the relay.
///
/// Adapter crates map their native errors into this type so the orchestrator
/// can tell a transient hiccup from a rate-limit signal or a bad rule.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("rule store error: {0}")]
    RuleStore(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty result from {0}")]
    EmptyResult(&'static str),

    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("peer {0} could not be resolved")]
    PeerUnresolved(i64),

    #[error("platform rejected request: {0}")]
    Platform(String),

    #[error("cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Errors worth another attempt inside the short inline retry loop.
    ///
    /// Rate limits are not in this set. They go straight to the job-level
    /// backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::EmptyResult(_) | Error::RuleStore(_) | Error::Io(_)
        )
    }

    /// Errors the job-level retry should re-run the whole task for.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Cancelled)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Platform-suggested wait, if this is a rate-limit signal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_not_transient_but_is_retryable() {
        let e = Error::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert!(!e.is_transient());
        assert!(e.is_retryable());
        assert_eq!(e.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn config_and_cancel_are_terminal() {
        assert!(!Error::Config("x".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(Error::PeerUnresolved(-100).is_retryable());
        assert!(!Error::PeerUnresolved(-100).is_transient());
        assert!(Error::Transport("reset".into()).is_transient());
    }
}
