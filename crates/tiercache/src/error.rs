//! Error types for tiercache

use std::fmt;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
#[derive(Debug)]
pub enum Error {
    /// Operation on a session that is already closed
    InvalidState {
        /// Session the operation was issued on
        session: u64,
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Signature or mutation targets another namespace than the session's
    NamespaceMismatch {
        /// Namespace the session was opened on
        session: String,
        /// Namespace named by the request
        requested: String,
    },

    /// Failure reported by the persistence collaborator, unchanged
    Store(tierstore::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState { session, operation } => {
                write!(f, "Session {} is closed (rejected {})", session, operation)
            }
            Error::NamespaceMismatch { session, requested } => write!(
                f,
                "Session namespace '{}' cannot serve namespace '{}'",
                session, requested
            ),
            Error::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tierstore::Error> for Error {
    fn from(err: tierstore::Error) -> Self {
        Error::Store(err)
    }
}
