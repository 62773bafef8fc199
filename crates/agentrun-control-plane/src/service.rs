//! Run service: the operations exposed to clients.
//!
//! Each started run gets its own Tokio task driven by a [`RunController`].
//! A supervisor task awaits it so a panicking run is recorded as failed
//! instead of vanishing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use agentrun_core::{Decision, Event, EventKind, Run, RunId, RunMode, RunStatus, Task};

use crate::controller::RunController;
use crate::gate::GateError;
use crate::metrics::MetricsSnapshot;
use crate::state::AppState;
use crate::store::StoreError;

/// Errors surfaced to callers of the run service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("run not found: {0}")]
    NotFound(RunId),

    #[error(transparent)]
    NotAwaiting(#[from] GateError),

    #[error("run {0} has not finished")]
    StillActive(RunId),

    #[error("run could not be started: {0}")]
    StartFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parameters for a new run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRun {
    pub goal: String,

    #[serde(default)]
    pub max_steps: Option<usize>,

    #[serde(default)]
    pub mode: RunMode,

    #[serde(default)]
    pub model: Option<String>,
}

/// A run with its tasks and events.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub tasks: Vec<Task>,
    pub events: Vec<Event>,
}

#[derive(Clone)]
pub struct RunService {
    state: Arc<AppState>,
}

impl RunService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Create a run, persist and announce it, then drive it in the background.
    pub async fn start_run(&self, request: StartRun) -> Result<RunId, ServiceError> {
        let goal = request.goal.trim();
        if goal.is_empty() {
            return Err(ServiceError::InvalidRequest("goal must not be empty".into()));
        }
        let max_steps = request
            .max_steps
            .unwrap_or(self.state.config.default_max_steps);
        let model = request.model.filter(|m| !m.trim().is_empty());

        let run = Run::new(goal, model, request.mode);
        let mut controller = RunController::new(self.state.clone(), run, max_steps);
        let run_id = controller.run_id().clone();

        if let Err(e) = controller.begin().await {
            let message = e.to_string();
            controller.fail(e).await;
            return Err(ServiceError::StartFailed(message));
        }

        let handle = tokio::spawn(controller.drive());
        tokio::spawn(supervise(self.state.clone(), run_id.clone(), handle));

        Ok(run_id)
    }

    /// Deliver an operator decision to a run awaiting confirmation.
    pub fn submit_decision(&self, run_id: &RunId, decision: Decision) -> Result<(), ServiceError> {
        self.state.gate.submit_decision(run_id, decision)?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &RunId) -> Result<RunDetail, ServiceError> {
        let run = self
            .state
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(run_id.clone()))?;
        let tasks = self.state.store.get_run_tasks(run_id).await?;
        let events = self.state.store.get_run_events(run_id).await?;
        Ok(RunDetail { run, tasks, events })
    }

    /// All runs, most recent first.
    pub async fn list_runs(&self) -> Result<Vec<Run>, ServiceError> {
        Ok(self.state.store.list_runs().await?)
    }

    /// Remove a finished run from durable history.
    pub async fn delete_run(&self, run_id: &RunId) -> Result<(), ServiceError> {
        let run = self
            .state
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(run_id.clone()))?;
        if !run.is_terminal() {
            return Err(ServiceError::StillActive(run_id.clone()));
        }
        if !self.state.store.delete_run(run_id).await? {
            return Err(ServiceError::NotFound(run_id.clone()));
        }
        info!(run_id = %run_id, "Run deleted");
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics_snapshot()
    }
}

/// Await a run task and record it as failed if it panicked.
async fn supervise(state: Arc<AppState>, run_id: RunId, handle: JoinHandle<RunStatus>) {
    let join_error = match handle.await {
        Ok(status) => {
            info!(run_id = %run_id, status = %status, "Run task exited");
            return;
        }
        Err(e) => e,
    };

    let message = if join_error.is_panic() {
        "run task panicked".to_string()
    } else {
        format!("run task aborted: {join_error}")
    };
    error!(run_id = %run_id, error = %message, "Run task died");

    state.metrics.record_run_failed();
    state.metrics.record_error();

    match state.store.get_run(&run_id).await {
        Ok(Some(mut run)) if !run.is_terminal() => {
            run.finish(RunStatus::Failed, Some(message.clone()));
            if let Err(e) = state.store.update_run(&run).await {
                warn!(run_id = %run_id, error = %e, "Could not persist run failure");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(run_id = %run_id, error = %e, "Could not load run after panic"),
    }

    match state.events.publish(&run_id, EventKind::RunError { error: message }) {
        Ok(event) => {
            if let Err(e) = state.store.add_event(&event).await {
                warn!(run_id = %run_id, error = %e, "Could not persist run.error event");
            }
        }
        Err(e) => warn!(run_id = %run_id, error = %e, "Could not announce run failure"),
    }
}
