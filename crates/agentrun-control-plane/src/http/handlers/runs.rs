//! HTTP handlers for runs and operator decisions.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use agentrun_core::{Decision, RunId};

use crate::http::responses::{
    ApiError, DecisionRequest, DecisionResponse, RunListResponse, StartRunRequest,
    StartRunResponse,
};
use crate::service::{RunService, StartRun};
use crate::state::AppState;

/// Start a run.
///
/// POST /v1/runs
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    json_result: Result<Json<StartRunRequest>, JsonRejection>,
) -> Response {
    let req = match json_result {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return ApiError::InvalidJson {
                message: rejection.body_text(),
            }
            .into_response();
        }
    };

    if let Err(e) = validate_start(&req) {
        return e.into_response();
    }

    let service = RunService::new(state);
    match service
        .start_run(StartRun {
            goal: req.goal,
            max_steps: req.max_steps,
            mode: req.mode,
            model: req.model,
        })
        .await
    {
        Ok(run_id) => {
            info!(run_id = %run_id, "Run accepted");
            (StatusCode::ACCEPTED, Json(StartRunResponse { run_id })).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn validate_start(req: &StartRunRequest) -> Result<(), ApiError> {
    if req.goal.trim().is_empty() {
        return Err(ApiError::MissingField { field: "goal" });
    }
    if req.max_steps == Some(0) {
        return Err(ApiError::InvalidField {
            field: "max_steps",
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// List runs, most recent first.
///
/// GET /v1/runs
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Result<Json<RunListResponse>, ApiError> {
    let runs = RunService::new(state).list_runs().await?;
    Ok(Json(RunListResponse { runs }))
}

/// Get a run with its tasks and events.
///
/// GET /v1/runs/:run_id
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let detail = RunService::new(state).get_run(&RunId::new(run_id)).await?;
    Ok(Json(detail).into_response())
}

/// Delete a finished run.
///
/// DELETE /v1/runs/:run_id
pub async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    RunService::new(state)
        .delete_run(&RunId::new(run_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit a decision for a run awaiting confirmation.
///
/// POST /v1/runs/:run_id/decision
pub async fn submit_decision(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    json_result: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let Json(req) = json_result.map_err(|rejection| ApiError::InvalidJson {
        message: rejection.body_text(),
    })?;

    if req.action.trim().is_empty() {
        return Err(ApiError::MissingField { field: "action" });
    }
    let decision: Decision = req.action.parse().map_err(|e: agentrun_core::CoreError| {
        ApiError::InvalidField {
            field: "action",
            message: e.to_string(),
        }
    })?;

    let run_id = RunId::new(run_id);
    RunService::new(state).submit_decision(&run_id, decision)?;

    Ok(Json(DecisionResponse {
        run_id,
        action: decision.as_str().to_string(),
    }))
}
