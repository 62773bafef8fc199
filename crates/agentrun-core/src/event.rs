//! Run lifecycle and task events.
//!
//! Every event is an immutable envelope around a typed [`EventKind`]. On the
//! wire the kind is flattened into the envelope so observers receive
//! `{"type": "task.result", "text": "...", "seq": 12, ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PlanItem, RunId, RunMode, RunStatus, TaskId, TaskStatus};

/// An appended event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the process-wide log, starting at 1.
    pub seq: u64,

    /// Run this event belongs to.
    pub run_id: RunId,

    /// Human-readable summary.
    pub text: String,

    /// When the event was appended.
    pub created_at: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Build the envelope for a kind at a given position.
    pub fn new(seq: u64, run_id: RunId, kind: EventKind) -> Self {
        Self {
            seq,
            run_id,
            text: kind.text(),
            created_at: Utc::now(),
            kind,
        }
    }

    /// The wire type tag (`run.start`, `task.result`, ...).
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// Typed payload of an event, tagged by its wire type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "run.start")]
    RunStart {
        goal: String,
        mode: RunMode,
        model: Option<String>,
    },

    #[serde(rename = "plan")]
    Plan {
        plan: Vec<PlanItem>,
        regenerated: bool,
    },

    #[serde(rename = "plan.confirm")]
    PlanConfirm { plan: Vec<PlanItem> },

    #[serde(rename = "plan.approved")]
    PlanApproved,

    #[serde(rename = "plan.edit")]
    PlanEdit,

    #[serde(rename = "plan.regenerate")]
    PlanRegenerate,

    #[serde(rename = "progress")]
    Progress {
        /// Percentage of scheduled tasks already processed.
        progress: u8,
        /// 1-based position of the task about to run.
        index: usize,
        total: usize,
        current_task: String,
    },

    #[serde(rename = "task.start")]
    TaskStart { task: PlanItem },

    #[serde(rename = "task.result")]
    TaskResult {
        task_id: TaskId,
        status: TaskStatus,
        result: Option<String>,
        reflection: Option<String>,
    },

    #[serde(rename = "preview")]
    Preview { task_id: TaskId, hint: PreviewHint },

    #[serde(rename = "run.complete")]
    RunComplete { status: RunStatus },

    #[serde(rename = "run.error")]
    RunError { error: String },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run.start",
            Self::Plan { .. } => "plan",
            Self::PlanConfirm { .. } => "plan.confirm",
            Self::PlanApproved => "plan.approved",
            Self::PlanEdit => "plan.edit",
            Self::PlanRegenerate => "plan.regenerate",
            Self::Progress { .. } => "progress",
            Self::TaskStart { .. } => "task.start",
            Self::TaskResult { .. } => "task.result",
            Self::Preview { .. } => "preview",
            Self::RunComplete { .. } => "run.complete",
            Self::RunError { .. } => "run.error",
        }
    }

    /// Human-readable summary carried in the envelope's `text` field.
    pub fn text(&self) -> String {
        match self {
            Self::RunStart { goal, .. } => format!("Starting run for goal: {goal}"),
            Self::Plan { plan, regenerated } => {
                if *regenerated {
                    format!("New plan generated with {} tasks.", plan.len())
                } else {
                    format!("Planner produced a plan with {} tasks.", plan.len())
                }
            }
            Self::PlanConfirm { .. } => {
                "Please review the plan and choose: approve, edit, regenerate, or cancel."
                    .to_string()
            }
            Self::PlanApproved => "Plan approved. Starting execution.".to_string(),
            Self::PlanEdit => "Edit received; the plan is unchanged.".to_string(),
            Self::PlanRegenerate => "Regenerating plan...".to_string(),
            Self::Progress { index, total, .. } => {
                format!("Processing task {index} of {total}")
            }
            Self::TaskStart { task } => format!("Selected task #{}: {}", task.id, task.title),
            Self::TaskResult {
                task_id, status, ..
            } => format!("Task {task_id} {status}"),
            Self::Preview { hint, .. } => format!("Preview ready ({hint})"),
            Self::RunComplete { status } => match status {
                RunStatus::Completed => "Run complete.".to_string(),
                RunStatus::Cancelled => "Run cancelled by user.".to_string(),
                RunStatus::Timeout => "Run timed out waiting for confirmation.".to_string(),
                other => format!("Run finished: {other}"),
            },
            Self::RunError { error } => error.clone(),
        }
    }

    /// Whether this event is emitted by the per-task execution loop.
    pub fn is_task_event(&self) -> bool {
        matches!(
            self,
            Self::Progress { .. }
                | Self::TaskStart { .. }
                | Self::TaskResult { .. }
                | Self::Preview { .. }
        )
    }
}

/// Presentation hint for a task result. Purely a classification of the
/// result's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewHint {
    Html,
    Code,
    Text,
}

const CODE_PREFIXES: &[&str] = &[
    "import ", "def ", "fn ", "pub fn ", "pub struct ", "#include", "package ", "#!/",
    "<?php",
];

impl PreviewHint {
    /// Classify a result by its content shape.
    pub fn classify(result: &str) -> Self {
        let trimmed = result.trim_start();
        let lower = trimmed.to_ascii_lowercase();

        if lower.starts_with("```html")
            || lower.starts_with("<!doctype html")
            || lower.contains("<html")
            || (lower.starts_with('<') && lower.contains("</"))
        {
            return Self::Html;
        }

        if lower.starts_with("```") {
            return Self::Code;
        }

        let first_line = lower.lines().next().unwrap_or_default();
        if CODE_PREFIXES.iter().any(|p| first_line.starts_with(p)) {
            return Self::Code;
        }

        Self::Text
    }
}

impl std::fmt::Display for PreviewHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Html => f.write_str("html"),
            Self::Code => f.write_str("code"),
            Self::Text => f.write_str("text"),
        }
    }
}
