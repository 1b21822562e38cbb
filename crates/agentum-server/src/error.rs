use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// API-facing error with its HTTP mapping.
///
/// Once a session is running, failures travel through the event stream as
/// terminal events; these responses only cover the request/response path.
#[derive(Debug)]
pub enum ApiError {
    /// 400
    Validation(String),
    /// 401
    Auth(String),
    /// 404 (also covers unowned sessions; no distinction to prevent
    /// enumeration)
    NotFound(String),
    /// 409
    Conflict(String),
    /// 410
    Gone(String),
    /// 429
    Capacity(String),
    /// 500
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Validation(msg)
            | ApiError::Auth(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::Capacity(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self.message(), "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.message() }));
        (status, body).into_response()
    }
}

impl From<agentum_runtime::Error> for ApiError {
    fn from(err: agentum_runtime::Error) -> Self {
        use agentum_runtime::Error as E;
        match err {
            E::Validation(msg) => ApiError::Validation(msg),
            E::NotFound(msg) => ApiError::NotFound(msg),
            E::Transition { from, to } => {
                ApiError::Conflict(format!("Invalid transition: {} -> {}", from, to))
            }
            E::NotResumable(msg) => ApiError::Gone(msg),
            E::Capacity(limit) => {
                ApiError::Capacity(format!("Concurrent session limit reached ({})", limit))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<agentum_types::Error> for ApiError {
    fn from(err: agentum_types::Error) -> Self {
        ApiError::Validation(err.to_string())
    }
}
