use thiserror::Error;

/// What went wrong with a proxied request, as reported back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    RateLimited,
    Blocked,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failures (connect, DNS, timeout) that exhausted all attempts.
    #[error("request to {url} failed after {attempts} attempts: {message}")]
    RequestFailed { url: String, attempts: u32, message: String },
    #[error("rate limited by {url} (HTTP {status})")]
    RateLimited { url: String, status: u16 },
    #[error("blocked by {url} (HTTP {status}): {reason}")]
    Blocked { url: String, status: u16, reason: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            FetchError::RequestFailed { .. } => Some(FailureKind::Transport),
            FetchError::RateLimited { .. } => Some(FailureKind::RateLimited),
            FetchError::Blocked { .. } => Some(FailureKind::Blocked),
            FetchError::InvalidUrl(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Terminal for the source, never for the run.
    #[error("authentication failed for {source_name}: {reason}")]
    AuthenticationFailed { source_name: String, reason: String },
    #[error("could not parse {what}: {message}")]
    Parse { what: String, message: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher rejected message: {0}")]
    Rejected(String),
    #[error("publisher transport error: {0}")]
    Transport(String),
    #[error("publisher rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_kinds() {
        let e = FetchError::RateLimited { url: "u".into(), status: 429 };
        assert_eq!(e.kind(), Some(FailureKind::RateLimited));
        assert_eq!(FetchError::InvalidUrl("x".into()).kind(), None);
    }

    #[test]
    fn source_error_wraps_fetch() {
        let e: SourceError = FetchError::Blocked { url: "u".into(), status: 403, reason: "captcha".into() }.into();
        assert!(e.to_string().contains("captcha"));
    }
}
