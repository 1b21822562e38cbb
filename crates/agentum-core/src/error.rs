use std::fmt;

/// Result type for agentum-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the filesystem layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// YAML parsing failed (output document)
    Yaml(serde_yaml::Error),

    /// JSON serialization failed (session info mirror)
    Json(serde_json::Error),

    /// Configuration error (sessions root resolution)
    Config(String),

    /// Rejected path: bad session id or escape from the sessions root
    Validation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Yaml(err) => write!(f, "YAML error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Yaml(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Config(_) | Error::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<agentum_types::Error> for Error {
    fn from(err: agentum_types::Error) -> Self {
        Error::Validation(err.to_string())
    }
}
