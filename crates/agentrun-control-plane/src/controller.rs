//! Run controller.
//!
//! One controller drives one run end to end:
//!
//! ```text
//! CREATED -> PLANNING -> AWAITING_CONFIRMATION -> EXECUTING -> COMPLETED
//!               |   ^            |    |   |                     \-> FAILED
//!               |   \-regenerate-/    |   \-> CANCELLED | TIMEOUT
//!               \-> EXECUTING (auto)  \-> edit (self-loop)
//! ```
//!
//! Every transition is validated against [`RunPhase::can_transition_to`],
//! announced on the event log and persisted. Per-task executor failures are
//! recorded on the task and never abort the run; anything else that escapes
//! fails the run.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use agentrun_core::{
    parse_plan, CoreError, Decision, EventKind, PlanItem, PreviewHint, Run, RunId, RunMode,
    RunPhase, RunStatus, Task, TaskOutcome,
};

use crate::agent::{ExecutorError, PlannerError};
use crate::config::TimeoutPolicy;
use crate::event_log::EventLogError;
use crate::gate::GateOutcome;
use crate::resilience::GuardedError;
use crate::state::AppState;
use crate::store::StoreError;

/// Errors that fail a run.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("event log unavailable: {0}")]
    EventLog(#[from] EventLogError),

    #[error("internal error: {0}")]
    Internal(#[from] CoreError),
}

/// Result of the confirmation phase.
enum Confirmation {
    /// Execute this plan.
    Proceed(Vec<PlanItem>),
    Cancelled,
    TimedOut,
}

/// Drives a single run through its state machine.
pub struct RunController {
    state: Arc<AppState>,
    run: Run,
    phase: RunPhase,
    max_steps: usize,
}

impl RunController {
    pub fn new(state: Arc<AppState>, run: Run, max_steps: usize) -> Self {
        Self {
            state,
            run,
            phase: RunPhase::Created,
            max_steps,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run.id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// `CREATED -> PLANNING`: persist the run and announce it.
    pub async fn begin(&mut self) -> Result<(), ControllerError> {
        self.state.metrics.record_run_started();
        if let Err(e) = self.state.store.create_run(&self.run).await {
            self.store_failed("create_run", e);
        }

        self.transition(RunPhase::Planning)?;
        info!(
            run_id = %self.run.id,
            mode = %self.run.mode,
            max_steps = self.max_steps,
            "Run started"
        );

        self.publish(EventKind::RunStart {
            goal: self.run.goal.clone(),
            mode: self.run.mode,
            model: self.run.model.clone(),
        })
        .await
    }

    /// Drive the run to a terminal status.
    pub async fn drive(mut self) -> RunStatus {
        match self.orchestrate().await {
            Ok(status) => status,
            Err(e) => self.fail(e).await,
        }
    }

    async fn orchestrate(&mut self) -> Result<RunStatus, ControllerError> {
        if self.phase == RunPhase::Created {
            self.begin().await?;
        }

        let goal = self.run.goal.clone();
        let mut plan = self.plan(&goal, false).await?;

        if self.run.mode == RunMode::Confirm && !plan.is_empty() {
            match self.confirm(plan).await? {
                Confirmation::Proceed(confirmed) => plan = confirmed,
                Confirmation::Cancelled => return self.finish(RunPhase::Cancelled).await,
                Confirmation::TimedOut => return self.finish(RunPhase::Timeout).await,
            }
        }

        self.transition(RunPhase::Executing)?;
        self.execute(&plan).await?;
        self.finish(RunPhase::Completed).await
    }

    /// Ask the planner (through the resilience layer) for a plan.
    async fn plan(
        &mut self,
        request: &str,
        regenerated: bool,
    ) -> Result<Vec<PlanItem>, ControllerError> {
        let model = self
            .run
            .model
            .clone()
            .unwrap_or_else(|| self.state.config.default_model.clone());
        let planner = &self.state.planner;
        let model_ref = model.as_str();
        let limit = self.state.config.planner_timeout();

        // Unparsable output counts as a planner failure and is never cached.
        let compute = move || async move {
            let text = tokio::time::timeout(limit, planner.plan(model_ref, request))
                .await
                .map_err(|_| PlannerError::Timeout(limit))??;
            parse_plan(&text)?;
            Ok::<_, PlannerError>(text)
        };
        // A regenerate asks for a new plan, so the cache is bypassed.
        let resilience = &self.state.resilience;
        let guarded = if regenerated {
            resilience.guarded_call_fresh(model_ref, request, compute).await
        } else {
            resilience.guarded_call(model_ref, request, compute).await
        };
        let text = guarded
            .map_err(|e| match e {
                GuardedError::CircuitOpen => PlannerError::CircuitOpen,
                GuardedError::Failed(e) => e,
            })?;
        let plan = parse_plan(&text).map_err(PlannerError::from)?;

        info!(
            run_id = %self.run.id,
            model = %model,
            tasks = plan.len(),
            regenerated,
            "Plan ready"
        );
        self.publish(EventKind::Plan {
            plan: plan.clone(),
            regenerated,
        })
        .await?;

        Ok(plan)
    }

    /// Park the run until an operator decides on `plan`.
    async fn confirm(&mut self, mut plan: Vec<PlanItem>) -> Result<Confirmation, ControllerError> {
        let budget = self.state.config.confirm_timeout();
        self.transition(RunPhase::AwaitingConfirmation)?;

        let mut deadline = Instant::now() + budget;
        let mut pending = self.state.gate.arm(&self.run.id);
        self.publish(EventKind::PlanConfirm { plan: plan.clone() })
            .await?;
        info!(
            run_id = %self.run.id,
            timeout_secs = budget.as_secs(),
            "Awaiting plan confirmation"
        );

        loop {
            let outcome = pending.wait_until(deadline).await;
            debug!(run_id = %self.run.id, outcome = ?outcome, "Confirmation wait ended");

            match outcome {
                GateOutcome::Decided(Decision::Approve) => {
                    self.publish(EventKind::PlanApproved).await?;
                    return Ok(Confirmation::Proceed(plan));
                }
                GateOutcome::Decided(Decision::Cancel) => {
                    return Ok(Confirmation::Cancelled);
                }
                GateOutcome::Decided(Decision::Edit) => {
                    // Same deadline; the plan itself is left as is.
                    pending = self.state.gate.arm(&self.run.id);
                    self.publish(EventKind::PlanEdit).await?;
                }
                GateOutcome::Decided(Decision::Regenerate) => {
                    self.publish(EventKind::PlanRegenerate).await?;
                    self.transition(RunPhase::Planning)?;

                    let request = format!("{} (regenerated)", self.run.goal);
                    plan = self.plan(&request, true).await?;
                    if plan.is_empty() {
                        return Ok(Confirmation::Proceed(plan));
                    }

                    self.transition(RunPhase::AwaitingConfirmation)?;
                    deadline = Instant::now() + budget;
                    pending = self.state.gate.arm(&self.run.id);
                    self.publish(EventKind::PlanConfirm { plan: plan.clone() })
                        .await?;
                }
                GateOutcome::TimedOut => match self.state.config.timeout_policy {
                    TimeoutPolicy::Expire => {
                        warn!(run_id = %self.run.id, "No decision before the confirmation deadline");
                        return Ok(Confirmation::TimedOut);
                    }
                    TimeoutPolicy::Approve => {
                        info!(run_id = %self.run.id, "Confirmation deadline passed, approving plan");
                        self.publish(EventKind::PlanApproved).await?;
                        return Ok(Confirmation::Proceed(plan));
                    }
                },
            }
        }
    }

    /// Run the first `max_steps` plan items in order.
    async fn execute(&mut self, plan: &[PlanItem]) -> Result<(), ControllerError> {
        let scheduled: Vec<Task> = plan
            .iter()
            .take(self.max_steps)
            .map(|item| Task::scheduled(self.run.id.clone(), item))
            .collect();
        for task in &scheduled {
            if let Err(e) = self.state.store.add_task(task).await {
                self.store_failed("add_task", e);
            }
        }

        let total = scheduled.len();
        info!(run_id = %self.run.id, scheduled = total, planned = plan.len(), "Executing plan");

        for (index, mut task) in scheduled.into_iter().enumerate() {
            self.publish(EventKind::Progress {
                progress: (index * 100 / total) as u8,
                index: index + 1,
                total,
                current_task: task.title.clone(),
            })
            .await?;

            task.start()?;
            self.save_task(&task).await;
            let item = task.plan_item();
            self.publish(EventKind::TaskStart { task: item.clone() })
                .await?;

            let outcome = self.run_task(&item).await;
            task.finish(&outcome)?;
            self.save_task(&task).await;
            info!(
                run_id = %self.run.id,
                task_id = %task.id,
                status = %task.status,
                "Task finished"
            );

            self.publish(EventKind::TaskResult {
                task_id: task.id,
                status: task.status,
                result: task.result.clone(),
                reflection: task.reflection.clone(),
            })
            .await?;

            let hint = PreviewHint::classify(task.result.as_deref().unwrap_or_default());
            self.publish(EventKind::Preview {
                task_id: task.id,
                hint,
            })
            .await?;
        }

        Ok(())
    }

    /// Call the executor with failure accounting and the per-task time limit.
    /// Executor errors become a failed outcome.
    async fn run_task(&self, item: &PlanItem) -> TaskOutcome {
        let executor = &self.state.executor;
        let limit = self.state.config.task_timeout();

        let result = self
            .state
            .resilience
            .accounted_call(move || async move {
                match tokio::time::timeout(limit, executor.run(item)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutorError::Timeout(limit)),
                }
            })
            .await;

        match result {
            Ok(outcome) if outcome.status.is_terminal() => {
                self.state.metrics.record_task_executed();
                TaskOutcome {
                    id: item.id,
                    ..outcome
                }
            }
            Ok(outcome) => {
                let message = format!("executor returned non-terminal status {}", outcome.status);
                warn!(run_id = %self.run.id, task_id = %item.id, "{message}");
                self.state.metrics.record_error();
                TaskOutcome::failed(item.id, message.clone(), message)
            }
            Err(e) => {
                warn!(run_id = %self.run.id, task_id = %item.id, error = %e, "Task execution errored");
                self.state.metrics.record_error();
                TaskOutcome::failed(item.id, e.to_string(), e.to_string())
            }
        }
    }

    async fn finish(&mut self, phase: RunPhase) -> Result<RunStatus, ControllerError> {
        self.transition(phase)?;
        let status = phase.status();
        self.run.finish(status, None);
        self.save_run().await;

        match status {
            RunStatus::Completed => self.state.metrics.record_run_completed(),
            RunStatus::Cancelled => self.state.metrics.record_run_cancelled(),
            RunStatus::Timeout => self.state.metrics.record_run_timed_out(),
            _ => {}
        }
        info!(run_id = %self.run.id, status = %status, "Run finished");

        if let Err(e) = self.publish(EventKind::RunComplete { status }).await {
            warn!(run_id = %self.run.id, error = %e, "Could not announce run completion");
        }
        Ok(status)
    }

    /// Record a run-level failure. Never fails itself.
    pub(crate) async fn fail(&mut self, cause: ControllerError) -> RunStatus {
        let message = cause.to_string();
        error!(run_id = %self.run.id, phase = ?self.phase, error = %message, "Run failed");

        if self.phase.is_terminal() {
            return self.phase.status();
        }
        self.phase = RunPhase::Failed;
        self.run.finish(RunStatus::Failed, Some(message.clone()));
        self.save_run().await;

        self.state.metrics.record_run_failed();
        self.state.metrics.record_error();

        if let Err(e) = self.publish(EventKind::RunError { error: message }).await {
            warn!(run_id = %self.run.id, error = %e, "Could not announce run failure");
        }
        RunStatus::Failed
    }

    fn transition(&mut self, next: RunPhase) -> Result<(), ControllerError> {
        let from = self.phase;
        self.phase = from.transition(next)?;
        debug!(run_id = %self.run.id, from = ?from, to = ?next, "Phase transition");
        Ok(())
    }

    /// Append to the event log, then to durable history.
    async fn publish(&self, kind: EventKind) -> Result<(), ControllerError> {
        let event = self.state.events.publish(&self.run.id, kind)?;
        if let Err(e) = self.state.store.add_event(&event).await {
            self.store_failed("add_event", e);
        }
        Ok(())
    }

    async fn save_run(&self) {
        if let Err(e) = self.state.store.update_run(&self.run).await {
            self.store_failed("update_run", e);
        }
    }

    async fn save_task(&self, task: &Task) {
        if let Err(e) = self.state.store.update_task(task).await {
            self.store_failed("update_task", e);
        }
    }

    fn store_failed(&self, operation: &'static str, e: StoreError) {
        warn!(run_id = %self.run.id, operation, error = %e, "Run store write failed");
    }
}
