//! Planners turn a goal into raw plan text.
//!
//! A planner only produces text; turning it into tasks is done by
//! [`agentrun_core::parse_plan`] on the orchestrator side.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use agentrun_core::PlanParseError;

use super::llm::{LlmClient, LlmError};

/// Errors obtaining a usable plan. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The planner could not be reached or refused the request.
    #[error("planner call failed: {0}")]
    Call(String),

    /// The planner answered with something that is not a plan.
    #[error(transparent)]
    Parse(#[from] PlanParseError),

    /// The planner did not answer in time.
    #[error("planner call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The circuit breaker rejected the call.
    #[error("planner unavailable: circuit breaker is open")]
    CircuitOpen,
}

impl From<LlmError> for PlannerError {
    fn from(e: LlmError) -> Self {
        PlannerError::Call(e.to_string())
    }
}

/// Produces a plan for a goal.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Return raw text holding a JSON array of `{id, title, description}`.
    async fn plan(&self, model: &str, goal: &str) -> Result<String, PlannerError>;
}

/// Prompt asking a chat model for a JSON TODO list.
pub fn planning_prompt(goal: &str) -> String {
    format!(
        "You are an assistant that converts a high-level project goal into a concise, structured \
         TODO list. Respond with a JSON array of objects with keys: id (int), title (string), \
         description (string). Do not include any extra text. Goal: {goal}"
    )
}

/// Planner backed by an OpenAI-compatible chat endpoint.
pub struct LlmPlanner {
    client: LlmClient,
}

impl LlmPlanner {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, model: &str, goal: &str) -> Result<String, PlannerError> {
        debug!(model, "Requesting plan from model");
        Ok(self.client.complete(model, &planning_prompt(goal)).await?)
    }
}

/// Deterministic five-step planner for running without a model endpoint.
#[derive(Debug, Default)]
pub struct OfflinePlanner;

const OFFLINE_STEPS: [(&str, &str); 5] = [
    ("Clarify requirements", "Pin down scope and acceptance criteria for"),
    ("Design the approach", "Sketch components and interfaces needed for"),
    ("Implement the core", "Build the main functionality of"),
    ("Test and validate", "Verify behaviour and edge cases of"),
    ("Document and deliver", "Write up usage notes and hand over"),
];

#[async_trait]
impl Planner for OfflinePlanner {
    async fn plan(&self, _model: &str, goal: &str) -> Result<String, PlannerError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Ok("[]".to_string());
        }

        let items: Vec<_> = OFFLINE_STEPS
            .iter()
            .enumerate()
            .map(|(i, (title, lead))| {
                json!({
                    "id": i + 1,
                    "title": title,
                    "description": format!("{lead}: {goal}"),
                })
            })
            .collect();

        serde_json::to_string(&items).map_err(|e| PlannerError::Call(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::{parse_plan, TaskId};

    #[tokio::test]
    async fn test_offline_plan_is_parsable_and_ordered() {
        let text = OfflinePlanner
            .plan("gpt-4o", "Build a small CLI with confirm and auto modes")
            .await
            .unwrap();
        let plan = parse_plan(&text).unwrap();

        assert_eq!(plan.len(), 5);
        let ids: Vec<TaskId> = plan.iter().map(|p| p.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(plan[0].description.contains("Build a small CLI"));
    }

    #[tokio::test]
    async fn test_offline_plan_for_blank_goal_is_empty() {
        let text = OfflinePlanner.plan("gpt-4o", "   ").await.unwrap();
        assert!(parse_plan(&text).unwrap().is_empty());
    }

    #[test]
    fn test_prompt_embeds_goal() {
        let prompt = planning_prompt("Ship v2");
        assert!(prompt.ends_with("Goal: Ship v2"));
        assert!(prompt.contains("JSON array"));
    }
}
