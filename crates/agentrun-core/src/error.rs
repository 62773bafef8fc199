//! Core domain errors.

use thiserror::Error;

/// Core domain errors for AgentRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Run not found.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Task not found within a run.
    #[error("Task {task_id} not found in run {run_id}")]
    TaskNotFound { run_id: String, task_id: u32 },

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Unknown enum value (mode, status, decision).
    #[error("Unknown {kind}: '{value}'")]
    UnknownValue { kind: &'static str, value: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
