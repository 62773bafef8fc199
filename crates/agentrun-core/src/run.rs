//! Run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, RunMode, RunStatus};

/// One end-to-end execution of a goal through planning and task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub id: RunId,

    /// High-level goal the plan is derived from.
    pub goal: String,

    /// Model requested for planning, if any.
    pub model: Option<String>,

    /// Auto or confirm.
    pub mode: RunMode,

    /// Current status.
    pub status: RunStatus,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Run-level failure detail.
    pub error: Option<String>,
}

impl Run {
    /// Create a new running Run.
    pub fn new(goal: impl Into<String>, model: Option<String>, mode: RunMode) -> Self {
        Self {
            id: RunId::generate(),
            goal: goal.into(),
            model,
            mode,
            status: RunStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: RunId) -> Self {
        self.id = id;
        self
    }

    /// Move the run to a terminal status. `completed_at` is set iff the
    /// status is terminal.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.completed_at = status.is_terminal().then(Utc::now);
        if error.is_some() {
            self.error = error;
        }
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_running() {
        let run = Run::new("Build X", None, RunMode::Auto);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());
        assert!(!run.is_terminal());
    }

    #[test]
    fn test_finish_sets_completed_at() {
        let mut run = Run::new("Build X", Some("gpt-4o".into()), RunMode::Confirm);
        run.finish(RunStatus::Failed, Some("planner exploded".into()));
        assert!(run.completed_at.is_some());
        assert_eq!(run.error.as_deref(), Some("planner exploded"));
    }
}
