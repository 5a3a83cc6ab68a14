use thiserror::Error;

/// Centralized error type for stowage-net
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },
    #[error("server ignored range request for {url}")]
    RangeIgnored { url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Timeout")]
    Timeout,
    #[error("Request failed after {max_retries} retries: {source}")]
    RetryExhausted {
        max_retries: u32,
        source: Box<NetError>,
    },
}

impl NetError {
    /// Creates an HTTP status error
    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Creates an HTTP error from a generic string
    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    /// Checks if this error is considered retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Http(_) | NetError::Timeout => true,
            NetError::HttpStatus { status, .. } => {
                // Retry on 5xx server errors, 429 Too Many Requests and 408 Request Timeout
                *status >= 500 || *status == 429 || *status == 408
            }
            NetError::Io(_)
            | NetError::NotFound { .. }
            | NetError::RangeIgnored { .. }
            | NetError::UnsupportedScheme(_)
            | NetError::InvalidUrl(_)
            | NetError::RetryExhausted { .. } => false,
        }
    }

    /// Gets the HTTP status code if this is an HTTP status error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(error.to_string())
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(NetError::http_status(503, "http://cdn/a").is_retryable());
        assert!(NetError::http_status(429, "http://cdn/a").is_retryable());
        assert!(!NetError::http_status(404, "http://cdn/a").is_retryable());
        assert!(NetError::Timeout.is_retryable());
        assert!(!NetError::NotFound { url: "file:///x".into() }.is_retryable());
        assert!(!NetError::RangeIgnored { url: "http://cdn/a".into() }.is_retryable());
    }

    #[test]
    fn test_status_code() {
        assert_eq!(NetError::http_status(500, "u").status_code(), Some(500));
        assert_eq!(NetError::Timeout.status_code(), None);
    }
}
