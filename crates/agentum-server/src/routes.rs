use crate::error::{ApiError, ApiResult};
use crate::sse::{replay_only_stream, subscription_stream};
use crate::state::{AppState, AuthUser};
use agentum_runtime::RunRequest;
use agentum_types::{
    AgentEvent, EventPayload, Session, SessionConnectPayload, SessionId,
};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.runtime.config.cors.origins);

    Router::new()
        .route("/api/v1/auth/token", post(issue_token))
        .route("/api/v1/sessions", get(list_sessions))
        .route("/api/v1/sessions/run", post(run_session))
        .route("/api/v1/sessions/{id}", get(get_session))
        .route("/api/v1/sessions/{id}/task", post(continue_session))
        .route("/api/v1/sessions/{id}/cancel", post(cancel_session))
        .route("/api/v1/sessions/{id}/result", get(session_result))
        .route("/api/v1/sessions/{id}/events", get(session_events))
        .route("/api/v1/sessions/{id}/events/history", get(session_history))
        .route("/api/v1/sessions/{id}/files", get(session_file))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// --- Auth ---

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    user_id: String,
    expires_at: i64,
}

async fn issue_token(
    State(state): State<AppState>,
    body: Option<Json<TokenRequest>>,
) -> ApiResult<Json<TokenResponse>> {
    let requested = body.and_then(|Json(req)| req.user_id);
    let store = state.runtime.store.clone();
    let user = tokio::task::spawn_blocking(move || {
        let db = store.lock().expect("store mutex poisoned");
        db.get_or_create_user(requested.as_deref())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (token, expires_at) = state.auth.issue(&user.id)?;
    Ok(Json(TokenResponse {
        token,
        user_id: user.id,
        expires_at,
    }))
}

// --- Sessions ---

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

fn default_limit() -> u64 {
    50
}

#[derive(Debug, Serialize)]
struct SessionList {
    sessions: Vec<Session>,
    total: u64,
}

async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SessionList>> {
    let store = state.runtime.store.clone();
    let page = tokio::task::spawn_blocking(move || {
        let db = store.lock().expect("store mutex poisoned");
        db.list_sessions(&user_id, query.limit.min(500), query.offset)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(SessionList {
        sessions: page.sessions,
        total: page.total,
    }))
}

#[derive(Debug, Deserialize)]
struct TaskRequest {
    task: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_turns: Option<u32>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl From<TaskRequest> for RunRequest {
    fn from(req: TaskRequest) -> Self {
        RunRequest {
            task: req.task,
            model: req.model,
            max_turns: req.max_turns,
            timeout_seconds: req.timeout_seconds,
        }
    }
}

async fn run_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<TaskRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.runner().start(&user_id, request.into()).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    let id = SessionId::parse(&id)?;
    let session = state.runtime.lifecycle.get_owned(&id, &user_id).await?;
    Ok(Json(session))
}

async fn continue_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<TaskRequest>,
) -> ApiResult<Json<Session>> {
    let id = SessionId::parse(&id)?;
    let session = state.runner().resume(&id, &user_id, request.into()).await?;
    Ok(Json(session))
}

async fn cancel_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = SessionId::parse(&id)?;
    state.runner().cancel(&id, &user_id).await?;
    Ok(Json(serde_json::json!({ "status": "cancel_requested" })))
}

#[derive(Debug, Serialize)]
struct ResultResponse {
    status: String,
    output: serde_json::Value,
    num_turns: u64,
    duration_ms: u64,
    total_cost_usd: f64,
}

async fn session_result(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ResultResponse>> {
    let id = SessionId::parse(&id)?;
    let session = state.runtime.lifecycle.get_owned(&id, &user_id).await?;

    let layout = state.runtime.layout.clone();
    let output_id = id.clone();
    let output = tokio::task::spawn_blocking(move || layout.parse_output(&output_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| match e {
            agentum_core::Error::Validation(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok(Json(ResultResponse {
        status: session.status.as_str().to_string(),
        output,
        num_turns: session.num_turns,
        duration_ms: session.duration_ms,
        total_cost_usd: session.total_cost_usd,
    }))
}

// --- Events ---

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    after: u64,
}

async fn session_events(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Response> {
    let id = SessionId::parse(&id)?;
    state.runtime.lifecycle.get_owned(&id, &user_id).await?;

    let heartbeat =
        Duration::from_secs(state.runtime.config.limits.heartbeat_interval_seconds.max(1));
    let keep_alive = KeepAlive::new().interval(heartbeat).text("heartbeat");

    match state.runtime.registry.hub(&id) {
        Some(hub) => {
            // Events from earlier runs live only in the store; this run's
            // prefix and live tail come from the hub under one lock.
            let boundary = hub.start_sequence();
            let store_replay = if query.after < boundary {
                list_events_after(&state, &id, query.after)
                    .await?
                    .into_iter()
                    .filter(|e| e.sequence <= boundary)
                    .collect()
            } else {
                Vec::new()
            };

            let subscribers = hub.subscriber_count().await + 1;
            let _ = hub
                .publish(EventPayload::SessionConnect(SessionConnectPayload {
                    subscribers,
                }))
                .await;

            let subscription = hub.subscribe(query.after.max(boundary)).await;
            let stream = subscription_stream(store_replay, subscription, hub);
            Ok(Sse::new(stream).keep_alive(keep_alive).into_response())
        }
        None => {
            let events = list_events_after(&state, &id, query.after).await?;
            let stream = replay_only_stream(events);
            Ok(Sse::new(stream).keep_alive(keep_alive).into_response())
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    events: Vec<AgentEvent>,
}

async fn session_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let id = SessionId::parse(&id)?;
    state.runtime.lifecycle.get_owned(&id, &user_id).await?;

    let events = list_events_after(&state, &id, query.after).await?;
    Ok(Json(HistoryResponse { events }))
}

async fn list_events_after(
    state: &AppState,
    id: &SessionId,
    after: u64,
) -> ApiResult<Vec<AgentEvent>> {
    let store = state.runtime.store.clone();
    let id = id.clone();
    tokio::task::spawn_blocking(move || {
        let db = store.lock().expect("store mutex poisoned");
        db.list_events(&id, after)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(e.to_string()))
}

// --- Files ---

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: String,
}

async fn session_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    let id = SessionId::parse(&id)?;
    state.runtime.lifecycle.get_owned(&id, &user_id).await?;

    let layout = state.runtime.layout.clone();
    let file_id = id.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        layout.resolve_workspace_file(&file_id, &query.path)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| match e {
        agentum_core::Error::Validation(msg) => ApiError::Validation(msg),
        agentum_core::Error::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
            ApiError::NotFound("File not found".to_string())
        }
        other => ApiError::Internal(other.to_string()),
    })?;

    let file = tokio::fs::File::open(&resolved)
        .await
        .map_err(|_| ApiError::NotFound("File not found".to_string()))?;
    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok(response)
}
