//! Error types for tierstore

use std::fmt;
use std::io;

/// Result type alias for tierstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Parse error
    Parse(String),

    /// Row too large (max 1 MB)
    ValueTooLarge(usize),

    /// Database full (max 1 GB)
    DatabaseFull(u64),

    /// No statement mapped under this name in the namespace
    UnknownStatement {
        /// Namespace the query was issued against
        namespace: String,
        /// Statement identifier
        statement: String,
    },

    /// Parameters do not fit the mapped statement
    BadParameters(String),

    /// Insert of an id that is already live
    Duplicate {
        /// Namespace of the record
        namespace: String,
        /// Conflicting id
        id: i64,
    },

    /// Record has no integer `id` field
    MissingId,

    /// Store is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::ValueTooLarge(size) => write!(f, "Row too large: {} bytes (max 1 MB)", size),
            Error::DatabaseFull(size) => write!(f, "Database full: {} bytes (max 1 GB)", size),
            Error::UnknownStatement {
                namespace,
                statement,
            } => write!(f, "Unknown statement '{}.{}'", namespace, statement),
            Error::BadParameters(msg) => write!(f, "Bad parameters: {}", msg),
            Error::Duplicate { namespace, id } => {
                write!(f, "Duplicate id {} in namespace '{}'", id, namespace)
            }
            Error::MissingId => write!(f, "Record has no integer id field"),
            Error::Closed => write!(f, "Store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
