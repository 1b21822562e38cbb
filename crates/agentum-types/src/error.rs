use std::fmt;

/// Result type for agentum-types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the types layer
#[derive(Debug)]
pub enum Error {
    /// Session id does not match the required format
    InvalidSessionId(String),

    /// Illegal session status transition
    InvalidTransition { from: String, to: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSessionId(id) => write!(f, "Invalid session id: {}", id),
            Error::InvalidTransition { from, to } => {
                write!(f, "Invalid session transition: {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for Error {}
