//! Status enums for Runs and Tasks, and the run state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a run proceeds once a plan exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute the plan immediately.
    #[default]
    Auto,
    /// Pause for an operator decision before executing.
    Confirm,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Confirm => "confirm",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "confirm" => Ok(Self::Confirm),
            other => Err(CoreError::UnknownValue {
                kind: "run mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Persisted status of a Run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Planning, awaiting confirmation or executing.
    #[default]
    Running,
    /// Every scheduled task was processed.
    Completed,
    /// Planning failed or an unrecovered error escaped the execution loop.
    Failed,
    /// Cancelled by an operator decision.
    Cancelled,
    /// No confirmation decision arrived within the wait budget.
    Timeout,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            other => Err(CoreError::UnknownValue {
                kind: "run status",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a Task within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Scheduled but not started.
    #[default]
    Pending,
    /// Handed to the executor.
    InProgress,
    /// Executor reported success.
    Completed,
    /// Executor reported failure or errored.
    Failed,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Task statuses only move forward; nothing reopens once terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownValue {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Phase of the run controller's state machine.
///
/// Phases are finer-grained than [`RunStatus`]: every non-terminal phase is
/// persisted as `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Created,
    Planning,
    AwaitingConfirmation,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl RunPhase {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Created, Planning)
                | (Created, Failed)
                | (Planning, AwaitingConfirmation)
                | (Planning, Executing)
                | (Planning, Failed)
                | (AwaitingConfirmation, Executing)
                | (AwaitingConfirmation, Planning)
                | (AwaitingConfirmation, Cancelled)
                | (AwaitingConfirmation, Timeout)
                | (AwaitingConfirmation, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    /// Validate and return the next phase.
    pub fn transition(self, next: RunPhase) -> Result<RunPhase, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            })
        }
    }

    /// The persisted status corresponding to this phase.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Created | Self::Planning | Self::AwaitingConfirmation | Self::Executing => {
                RunStatus::Running
            }
            Self::Completed => RunStatus::Completed,
            Self::Failed => RunStatus::Failed,
            Self::Cancelled => RunStatus::Cancelled,
            Self::Timeout => RunStatus::Timeout,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Timeout,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert_eq!(
            "in-progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_task_status_is_monotonic() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_awaiting_confirmation_only_after_planning() {
        assert!(RunPhase::Planning.can_transition_to(RunPhase::AwaitingConfirmation));
        assert!(!RunPhase::Created.can_transition_to(RunPhase::AwaitingConfirmation));
        assert!(!RunPhase::Executing.can_transition_to(RunPhase::AwaitingConfirmation));
    }

    #[test]
    fn test_no_cancellation_once_executing() {
        assert!(RunPhase::Executing
            .transition(RunPhase::Cancelled)
            .is_err());
        assert!(RunPhase::AwaitingConfirmation
            .transition(RunPhase::Cancelled)
            .is_ok());
    }

    #[test]
    fn test_phase_status_mapping() {
        assert_eq!(RunPhase::AwaitingConfirmation.status(), RunStatus::Running);
        assert_eq!(RunPhase::Timeout.status(), RunStatus::Timeout);
        assert!(RunPhase::Cancelled.is_terminal());
        assert!(!RunPhase::Executing.is_terminal());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(serde_json::to_string(&RunMode::Confirm).unwrap(), "\"confirm\"");
        assert_eq!(serde_json::to_string(&RunStatus::Timeout).unwrap(), "\"timeout\"");
    }
}
