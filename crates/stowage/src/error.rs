//! Error types for the engine.

use std::fmt;
use std::path::PathBuf;

use stowage_net::NetError;

use crate::loadable::LoadableKind;

/// Errors that can occur while resolving, loading or updating content.
#[derive(Debug)]
pub enum StowageError {
    /// The address is not listed by any registered manifest.
    NotFound {
        /// Kind of resource that was requested.
        kind: LoadableKind,
        /// The address as given by the caller.
        address: String,
    },

    /// Failed to read or write a local file.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Transport failure.
    Net(NetError),

    /// A catalog or manifest file could not be decoded.
    Parse {
        /// The file being parsed.
        path: PathBuf,
        /// Description of the error.
        message: String,
    },

    /// The archive host rejected an archive, asset, instance or scene.
    Host {
        /// Description of the error.
        message: String,
    },

    /// A loadable reached the failed state.
    LoadFailed {
        /// Cache key of the loadable.
        key: String,
        /// The loadable's error message.
        message: String,
    },

    /// A synchronous wait did not finish in time.
    Timeout {
        /// What was being waited on.
        key: String,
    },

    /// The request does not make sense in the current state.
    InvalidState {
        /// Description of the problem.
        message: String,
    },

    /// The work was cancelled.
    Cancelled,
}

impl StowageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StowageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        StowageError::Host {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        StowageError::InvalidState {
            message: message.into(),
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StowageError::NotFound { .. })
    }
}

impl fmt::Display for StowageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StowageError::NotFound { kind, address } => {
                write!(f, "{} not found in any manifest: {}", kind, address)
            }
            StowageError::Io { path, source } => {
                write!(f, "IO error on '{}': {}", path.display(), source)
            }
            StowageError::Net(err) => write!(f, "Transport error: {}", err),
            StowageError::Parse { path, message } => {
                write!(f, "Failed to parse '{}': {}", path.display(), message)
            }
            StowageError::Host { message } => write!(f, "Host error: {}", message),
            StowageError::LoadFailed { key, message } => {
                write!(f, "Failed to load '{}': {}", key, message)
            }
            StowageError::Timeout { key } => write!(f, "Timed out waiting for '{}'", key),
            StowageError::InvalidState { message } => write!(f, "Invalid state: {}", message),
            StowageError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for StowageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StowageError::Io { source, .. } => Some(source),
            StowageError::Net(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NetError> for StowageError {
    fn from(err: NetError) -> Self {
        StowageError::Net(err)
    }
}

impl From<std::io::Error> for StowageError {
    fn from(err: std::io::Error) -> Self {
        StowageError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Result type alias for engine operations.
pub type StowageResult<T> = Result<T, StowageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = StowageError::NotFound {
            kind: LoadableKind::Asset,
            address: "ui/icon.png".into(),
        };
        assert_eq!(err.to_string(), "asset not found in any manifest: ui/icon.png");
        assert!(err.is_not_found());

        let err = StowageError::from(NetError::Timeout);
        assert_eq!(err.to_string(), "Transport error: Timeout");
        assert!(std::error::Error::source(&err).is_some());
    }
}
