//! Error taxonomy for page and asset retrieval.
//!
//! Transient errors are retried with backoff; permanent errors skip the
//! item immediately. Per-item errors never abort a crawl; the
//! orchestrator absorbs them into the run summary.

/// Errors that can occur while fetching a page or an image
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timeout")]
    Timeout,

    #[error("connection error: {0}")]
    Connect(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected content type: {0}")]
    ContentType(String),
}

impl FetchError {
    /// Whether a retry with backoff can plausibly succeed.
    ///
    /// Server-side throttling (429), request timeout (408) and 5xx
    /// responses are transient; other status codes are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Status(code) => *code >= 500 || *code == 429 || *code == 408,
            FetchError::Body(_) | FetchError::InvalidUrl(_) | FetchError::ContentType(_) => false,
        }
    }
}

/// Classify a reqwest error into the fetch taxonomy
impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else if e.is_body() || e.is_decode() {
            FetchError::Body(e.to_string())
        } else if e.is_builder() || e.is_request() {
            FetchError::InvalidUrl(e.to_string())
        } else {
            FetchError::Connect(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses_retryable() {
        assert!(FetchError::Status(500).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(FetchError::Status(408).is_retryable());
    }

    #[test]
    fn test_client_errors_permanent() {
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Status(403).is_retryable());
        assert!(!FetchError::Status(400).is_retryable());
    }

    #[test]
    fn test_network_failures_retryable() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Connect("connection reset".into()).is_retryable());
        assert!(!FetchError::Body("truncated".into()).is_retryable());
    }
}
