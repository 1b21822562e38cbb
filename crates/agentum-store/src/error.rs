use std::fmt;

/// Result type for agentum-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the store layer
#[derive(Debug)]
pub enum Error {
    /// Database operation failed
    Database(rusqlite::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Event append still failing after bounded retries
    Persistence(String),

    /// Row exists but contains data the schema cannot represent
    Corrupt(String),

    /// Session does not exist or is not owned by the caller
    NotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Error::Corrupt(msg) => write!(f, "Corrupt row: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Persistence(_) | Error::Corrupt(_) | Error::NotFound(_) => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
