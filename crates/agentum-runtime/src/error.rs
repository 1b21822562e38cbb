use std::fmt;

/// Result type for agentum-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the orchestration layer.
///
/// The HTTP surface maps these onto status codes; inside a running
/// session they become a single terminal event instead of propagating.
#[derive(Debug)]
pub enum Error {
    /// Malformed input (session id format, empty task)
    Validation(String),

    /// Session does not exist or is not owned by the caller
    NotFound(String),

    /// Illegal status transition requested
    Transition { from: String, to: String },

    /// Session exists but cannot be resumed in its current state
    NotResumable(String),

    /// Too many concurrent sessions
    Capacity(usize),

    /// Metadata store failure
    Persistence(agentum_store::Error),

    /// Session directory failure
    Filesystem(agentum_core::Error),

    /// Two-phase session create failed and was rolled back
    Create(String),

    /// Isolation binary missing while sandboxing is required
    SandboxUnavailable(String),

    /// Event published after the terminal event closed the stream
    StreamClosed,

    /// IO operation failed
    Io(std::io::Error),

    /// Invariant breakage that has no recovery path
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Transition { from, to } => {
                write!(f, "Invalid session transition: {} -> {}", from, to)
            }
            Error::NotResumable(msg) => write!(f, "Session not resumable: {}", msg),
            Error::Capacity(limit) => {
                write!(f, "Concurrent session limit reached ({})", limit)
            }
            Error::Persistence(err) => write!(f, "Persistence error: {}", err),
            Error::Filesystem(err) => write!(f, "Filesystem error: {}", err),
            Error::Create(msg) => write!(f, "Session creation failed: {}", msg),
            Error::SandboxUnavailable(msg) => write!(f, "Sandbox unavailable: {}", msg),
            Error::StreamClosed => write!(f, "Event stream is closed"),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Persistence(err) => Some(err),
            Error::Filesystem(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<agentum_store::Error> for Error {
    fn from(err: agentum_store::Error) -> Self {
        match err {
            agentum_store::Error::NotFound(msg) => Error::NotFound(msg),
            other => Error::Persistence(other),
        }
    }
}

impl From<agentum_core::Error> for Error {
    fn from(err: agentum_core::Error) -> Self {
        match err {
            agentum_core::Error::Validation(msg) => Error::Validation(msg),
            other => Error::Filesystem(other),
        }
    }
}

impl From<agentum_policy::Error> for Error {
    fn from(err: agentum_policy::Error) -> Self {
        match err {
            agentum_policy::Error::SandboxUnavailable(msg) => Error::SandboxUnavailable(msg),
            other => Error::Validation(other.to_string()),
        }
    }
}

impl From<agentum_types::Error> for Error {
    fn from(err: agentum_types::Error) -> Self {
        match err {
            agentum_types::Error::InvalidSessionId(id) => {
                Error::Validation(format!("Invalid session id: {}", id))
            }
            agentum_types::Error::InvalidTransition { from, to } => Error::Transition { from, to },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
