//! Task executors.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use agentrun_core::{PlanItem, TaskOutcome};

use super::llm::LlmClient;

/// Errors executing a single task. Recorded on the task; the run continues.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor failed: {0}")]
    Failed(String),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs one task to a terminal outcome.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, task: &PlanItem) -> Result<TaskOutcome, ExecutorError>;
}

/// Simulated executor: titles mentioning "fail" fail, everything else
/// succeeds after a short delay. A model endpoint, when configured, writes
/// the reflection.
pub struct SimulatedExecutor {
    delay: Duration,
    reflector: Option<(LlmClient, String)>,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            reflector: None,
        }
    }

    /// Ask `model` on `client` for each task's reflection.
    pub fn with_reflection(mut self, client: LlmClient, model: impl Into<String>) -> Self {
        self.reflector = Some((client, model.into()));
        self
    }

    async fn reflect(&self, task: &PlanItem, outcome: &str) -> String {
        let Some((client, model)) = &self.reflector else {
            return format!("Task completed with status: {outcome}");
        };

        let prompt = format!(
            "You are an assistant that writes a concise reflection (1-2 sentences) given a task \
             title, description, and outcome. Return only the reflection text.\n\
             Title: {}\nDescription: {}\nOutcome: {outcome}",
            task.title, task.description
        );

        match client.complete(model, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Reflection call failed, using fallback");
                format!("Task completed with status: {outcome} (LLM error: {e})")
            }
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(400))
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn run(&self, task: &PlanItem) -> Result<TaskOutcome, ExecutorError> {
        debug!(task_id = %task.id, title = %task.title, "Executing task");
        tokio::time::sleep(self.delay).await;

        let fails = task.title.to_lowercase().contains("fail");
        let outcome = if fails {
            "Simulated failure based on title."
        } else {
            "Completed successfully (simulated)."
        };
        let reflection = self.reflect(task, outcome).await;

        Ok(if fails {
            TaskOutcome::failed(task.id, reflection.clone(), reflection)
        } else {
            TaskOutcome::completed(task.id, reflection.clone(), reflection)
        })
    }
}
