use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use codelab_session::SessionService;
use codelab_store::{Execution, ExecutionStatus, Session, SessionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<SessionService>,
}

pub fn build_router(service: Arc<SessionService>) -> Router {
    Router::new()
        .route("/code-sessions", post(create_session))
        .route(
            "/code-sessions/{id}",
            axum::routing::patch(update_session).delete(close_session),
        )
        .route("/code-sessions/{id}/run", post(run_session))
        .route("/executions/{id}", get(get_execution))
        .with_state(ApiState { service })
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub language: String,
    pub source_code: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    pub language: String,
    pub source_code: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            language: session.language.to_string(),
            source_code: session.source_code,
            status: session.status,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunAcceptedResponse {
    pub execution_id: String,
    pub session_id: String,
    pub status: ExecutionStatus,
}

/// Result view for polling clients. Output fields are withheld until the
/// execution reaches a terminal state so a half-written record is never
/// mistaken for a final result.
#[derive(Debug, Serialize)]
pub struct ExecutionView {
    pub id: String,
    pub session_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Execution> for ExecutionView {
    fn from(execution: Execution) -> Self {
        let terminal = execution.status.is_terminal();
        Self {
            id: execution.id,
            session_id: execution.session_id,
            status: execution.status,
            stdout: execution.stdout.filter(|_| terminal),
            stderr: execution.stderr.filter(|_| terminal),
            exit_code: execution.exit_code.filter(|_| terminal),
            error_message: execution.error_message.filter(|_| terminal),
            execution_time_ms: execution.execution_time_ms.filter(|_| terminal),
            queued_at: execution.queued_at,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}

async fn create_session(
    State(state): State<ApiState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let session = state.service.create_session(&request.language).await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

async fn update_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .service
        .update_code(&session_id, &request.language, &request.source_code)
        .await?;

    // The write is accepted but may still be coalescing; echo the accepted
    // content rather than the last persisted snapshot.
    let mut view = SessionView::from(session);
    view.language = request.language;
    view.source_code = request.source_code;
    Ok(Json(view))
}

async fn close_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.service.close_session(&session_id).await?;
    Ok(Json(session.into()))
}

async fn run_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<RunAcceptedResponse>), ApiError> {
    let execution = state.service.run(&session_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            execution_id: execution.id,
            session_id: execution.session_id,
            status: execution.status,
        }),
    ))
}

async fn get_execution(
    State(state): State<ApiState>,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionView>, ApiError> {
    let execution = state.service.get_execution_result(&execution_id).await?;
    Ok(Json(execution.into()))
}
