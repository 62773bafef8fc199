//! HTTP request and response types.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use agentrun_core::{Run, RunId, RunMode};

use crate::service::ServiceError;

// ============================================================================
// Run types
// ============================================================================

/// Request body for POST /v1/runs.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    /// High-level goal for the planner.
    #[serde(default)]
    pub goal: String,

    /// Upper bound on executed tasks.
    #[serde(default)]
    pub max_steps: Option<usize>,

    /// `auto` or `confirm`.
    #[serde(default)]
    pub mode: RunMode,

    /// Planner model; the server default applies when absent.
    #[serde(default)]
    pub model: Option<String>,
}

/// Response body for POST /v1/runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: RunId,
}

/// Request body for POST /v1/runs/:run_id/decision.
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    /// One of `approve`, `edit`, `regenerate`, `cancel`.
    #[serde(default)]
    pub action: String,
}

/// Response body for POST /v1/runs/:run_id/decision.
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub run_id: RunId,
    pub action: String,
}

/// Response body for GET /v1/runs.
#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<Run>,
}

/// Query string for GET /v1/events.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Resume after this sequence number.
    pub after: Option<u64>,
}

// ============================================================================
// Error types
// ============================================================================

/// Error details inside an error response.
#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub message: String,

    #[serde(rename = "type")]
    pub error_type: String,

    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

/// Error response wrapper.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

/// API errors with their HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    // Client errors (4xx)
    /// Invalid JSON in request body.
    InvalidJson { message: String },
    /// Missing required field.
    MissingField { field: &'static str },
    /// Invalid field value.
    InvalidField {
        field: &'static str,
        message: String,
    },
    /// No run with this id.
    RunNotFound { run_id: RunId },
    /// The run is not waiting for a decision.
    NotAwaiting { run_id: RunId },
    /// The run has not reached a terminal status.
    RunActive { run_id: RunId },

    // Server errors (5xx)
    /// Internal server error.
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, code, message, param) = match self {
            ApiError::InvalidJson { message } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_json",
                message,
                None,
            ),
            ApiError::MissingField { field } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_field",
                format!("Missing required field: {}", field),
                Some(field.to_string()),
            ),
            ApiError::InvalidField { field, message } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_field",
                format!("Invalid field '{}': {}", field, message),
                Some(field.to_string()),
            ),
            ApiError::RunNotFound { run_id } => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "run_not_found",
                format!("Run '{}' not found", run_id),
                None,
            ),
            ApiError::NotAwaiting { run_id } => (
                StatusCode::CONFLICT,
                "invalid_request_error",
                "not_awaiting_confirmation",
                format!("Run '{}' is not awaiting confirmation", run_id),
                None,
            ),
            ApiError::RunActive { run_id } => (
                StatusCode::CONFLICT,
                "invalid_request_error",
                "run_active",
                format!("Run '{}' has not finished", run_id),
                None,
            ),
            ApiError::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
                message,
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorObject {
                message,
                error_type: error_type.to_string(),
                code: code.to_string(),
                param,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidRequest(message) => ApiError::InvalidField {
                field: "goal",
                message,
            },
            ServiceError::NotFound(run_id) => ApiError::RunNotFound { run_id },
            ServiceError::StillActive(run_id) => ApiError::RunActive { run_id },
            ServiceError::NotAwaiting(crate::gate::GateError::NotAwaiting(run_id)) => {
                ApiError::NotAwaiting { run_id }
            }
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}
