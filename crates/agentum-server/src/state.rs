use crate::auth::AuthService;
use crate::error::ApiError;
use agentum_runtime::{Runtime, TaskRunner};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, auth: Arc<AuthService>) -> Self {
        Self { runtime, auth }
    }

    pub fn runner(&self) -> TaskRunner {
        TaskRunner::new(self.runtime.clone())
    }
}

/// Authenticated caller, extracted from `Authorization: Bearer ...` or the
/// `?token=` query parameter. The query fallback exists for SSE, where the
/// browser streaming API cannot attach headers.
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .ok_or_else(|| ApiError::Auth("Missing bearer token".to_string()))?;
        let user_id = state.auth.verify(&token)?;
        Ok(AuthUser(user_id))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn query_token(parts: &Parts) -> Option<String> {
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_string)
}
