//! REST API handlers using axum

use crate::application::{ProgramStatus, Supervisor, UpdateOutcome};
use crate::domain::{DomainError, ProcessState, ProgramSpec};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state
pub type AppState = Arc<Supervisor>;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(e: &DomainError) -> StatusCode {
    match e {
        _ if e.is_validation() => StatusCode::BAD_REQUEST,
        DomainError::ProgramNotFound(_) => StatusCode::NOT_FOUND,
        DomainError::DuplicateProgram(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(e: DomainError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(error = %e, "request failed");
    } else {
        debug!(error = %e, %status, "request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn parse_body(body: Result<Json<ProgramSpec>, JsonRejection>) -> Result<ProgramSpec, ApiError> {
    body.map(|Json(spec)| spec).map_err(|rejection| {
        warn!(error = %rejection, "invalid request body");
        bad_request(rejection.body_text())
    })
}

/// Result of a create or update
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub name: String,
    pub outcome: &'static str,
}

impl MutationResponse {
    fn new(name: String, outcome: UpdateOutcome) -> Self {
        let outcome = match outcome {
            UpdateOutcome::Added => "added",
            UpdateOutcome::Unchanged => "unchanged",
            UpdateOutcome::Replaced => "replaced",
        };
        Self { name, outcome }
    }
}

/// Result of a start or stop
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub name: String,
    pub state: ProcessState,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

// ===== Handlers =====

/// GET /api/programs
pub async fn list_programs(State(supervisor): State<AppState>) -> Json<Vec<ProgramStatus>> {
    let programs = supervisor.list_programs().await;
    debug!(count = programs.len(), "programs listed");
    Json(programs)
}

/// GET /api/programs/:name
pub async fn get_program(
    State(supervisor): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProgramStatus>, ApiError> {
    supervisor
        .program_status(&name)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/programs
pub async fn create_program(
    State(supervisor): State<AppState>,
    body: Result<Json<ProgramSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<MutationResponse>), ApiError> {
    let spec = parse_body(body)?;
    let name = spec.name.clone();
    info!(program = %name, command = %spec.command, "REST create request");

    let outcome = supervisor.create_program(spec).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(MutationResponse::new(name, outcome))))
}

/// PUT /api/programs/:name
pub async fn update_program(
    State(supervisor): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<ProgramSpec>, JsonRejection>,
) -> Result<Json<MutationResponse>, ApiError> {
    let spec = parse_body(body)?;
    if spec.name != name {
        return Err(bad_request(format!(
            "Program name '{}' does not match path '{}'",
            spec.name, name
        )));
    }
    info!(program = %name, "REST update request");

    let outcome = supervisor.update_program(spec).await.map_err(api_error)?;
    Ok(Json(MutationResponse::new(name, outcome)))
}

/// DELETE /api/programs/:name
pub async fn delete_program(
    State(supervisor): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!(program = %name, "REST delete request");
    supervisor.remove_program(&name).await.map_err(api_error)?;
    Ok(Json(SuccessResponse {
        message: format!("Program '{name}' removed"),
    }))
}

/// POST /api/programs/:name/start
pub async fn start_program(
    State(supervisor): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    info!(program = %name, "REST start request");
    let state = supervisor.start_program(&name).await.map_err(api_error)?;
    Ok(Json(StateResponse { name, state }))
}

/// POST /api/programs/:name/stop
pub async fn stop_program(
    State(supervisor): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    info!(program = %name, "REST stop request");
    let state = supervisor.stop_program(&name).await.map_err(api_error)?;
    Ok(Json(StateResponse { name, state }))
}

/// POST /api/reload
pub async fn reload_programs(
    State(supervisor): State<AppState>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!("REST reload request");
    supervisor.reload().await.map_err(api_error)?;
    Ok(Json(SuccessResponse {
        message: format!("{} programs loaded", supervisor.program_names().len()),
    }))
}
