//! External collaborators: planners, executors and the model client they share.

mod executor;
mod llm;
mod planner;

pub use executor::{Executor, ExecutorError, SimulatedExecutor};
pub use llm::{LlmClient, LlmError};
pub use planner::{planning_prompt, LlmPlanner, OfflinePlanner, Planner, PlannerError};
