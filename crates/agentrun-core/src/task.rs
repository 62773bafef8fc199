//! Task record and executor outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, PlanItem, RunId, TaskId, TaskStatus};

/// One unit of work within a Run's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Owning run.
    pub run_id: RunId,

    /// Task identifier, unique within the run.
    pub id: TaskId,

    pub title: String,

    pub description: String,

    /// Current task status.
    pub status: TaskStatus,

    /// Executor output, or the error text when execution errored.
    pub result: Option<String>,

    /// Executor reflection on the outcome.
    pub reflection: Option<String>,

    /// When the task was scheduled.
    pub created_at: DateTime<Utc>,

    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Schedule a plan item for a run.
    pub fn scheduled(run_id: RunId, item: &PlanItem) -> Self {
        Self {
            run_id,
            id: item.id,
            title: item.title.clone(),
            description: item.description.clone(),
            status: TaskStatus::Pending,
            result: None,
            reflection: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark the task as handed to the executor.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.advance(TaskStatus::InProgress)
    }

    /// Record the executor's outcome.
    pub fn finish(&mut self, outcome: &TaskOutcome) -> Result<(), CoreError> {
        self.advance(outcome.status)?;
        self.result = outcome.result.clone();
        self.reflection = outcome.reflection.clone();
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn advance(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// The plan item this task was scheduled from.
    pub fn plan_item(&self) -> PlanItem {
        PlanItem {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}

/// What the executor reports for a task: `{id, status, reflection, result}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: TaskId,

    /// Always terminal: `completed` or `failed`.
    pub status: TaskStatus,

    pub reflection: Option<String>,

    pub result: Option<String>,
}

impl TaskOutcome {
    pub fn completed(id: TaskId, result: impl Into<String>, reflection: impl Into<String>) -> Self {
        Self {
            id,
            status: TaskStatus::Completed,
            reflection: Some(reflection.into()),
            result: Some(result.into()),
        }
    }

    pub fn failed(id: TaskId, result: impl Into<String>, reflection: impl Into<String>) -> Self {
        Self {
            id,
            status: TaskStatus::Failed,
            reflection: Some(reflection.into()),
            result: Some(result.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> PlanItem {
        PlanItem::new(1, "Write docs", "Document the API")
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::scheduled(RunId::new("r"), &item());
        assert_eq!(task.status, TaskStatus::Pending);

        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);

        task.finish(&TaskOutcome::completed(task.id, "done", "went fine"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_terminal_task_never_reopens() {
        let mut task = Task::scheduled(RunId::new("r"), &item());
        task.start().unwrap();
        task.finish(&TaskOutcome::failed(task.id, "boom", "it broke"))
            .unwrap();

        assert!(task.start().is_err());
        assert!(task
            .finish(&TaskOutcome::completed(task.id, "ok", "retry"))
            .is_err());
        assert_eq!(task.status, TaskStatus::Failed);
    }
}
