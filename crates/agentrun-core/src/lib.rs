//! AgentRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! All types here represent the core business domain of AgentRun: runs,
//! the tasks a plan expands into, the events a run emits and the decisions
//! an operator can take while a plan awaits confirmation.

pub mod decision;
pub mod error;
pub mod event;
pub mod ids;
pub mod plan;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use decision::Decision;
pub use error::CoreError;
pub use event::{Event, EventKind, PreviewHint};
pub use ids::{RunId, TaskId};
pub use plan::{parse_plan, PlanItem, PlanParseError};
pub use run::Run;
pub use status::{RunMode, RunPhase, RunStatus, TaskStatus};
pub use task::{Task, TaskOutcome};
