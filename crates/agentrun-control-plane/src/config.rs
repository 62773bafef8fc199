//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

/// What happens when nobody decides on a plan in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TimeoutPolicy {
    /// The run ends with status `timeout`.
    #[default]
    Expire,
    /// The plan is executed as if approved.
    Approve,
}

/// Where plans come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerBackend {
    /// Deterministic built-in plan; no network access.
    Offline,
    /// OpenAI-compatible chat completion endpoint.
    OpenAi { base_url: String, api_key: String },
}

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_bind_addr: String,

    /// SQLite database holding run history.
    pub db_path: PathBuf,

    /// Tasks executed per run when the request does not say.
    pub default_max_steps: usize,

    /// Model used when the request does not name one.
    pub default_model: String,

    /// How long a plan waits for a decision (seconds).
    pub confirm_timeout_secs: u64,

    pub timeout_policy: TimeoutPolicy,

    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,

    /// Time after the last failure before a trial call is admitted (seconds).
    pub breaker_cooldown_secs: u64,

    /// Planner cache entry lifetime (seconds). `None` keeps entries forever.
    pub cache_ttl_secs: Option<u64>,

    /// Upper bound on a single planner call (seconds).
    pub planner_timeout_secs: u64,

    /// Upper bound on a single executor call (seconds).
    pub task_timeout_secs: u64,

    /// Simulated work per task (milliseconds).
    pub executor_delay_ms: u64,

    pub planner: PlannerBackend,
}

impl Config {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn executor_delay(&self) -> Duration {
        Duration::from_millis(self.executor_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "127.0.0.1:8000".to_string(),
            db_path: PathBuf::from("agent_runs.db"),
            default_max_steps: 6,
            default_model: "gpt-4o".to_string(),
            confirm_timeout_secs: 300,
            timeout_policy: TimeoutPolicy::Expire,
            breaker_threshold: 5,
            breaker_cooldown_secs: 300,
            cache_ttl_secs: None,
            planner_timeout_secs: 60,
            task_timeout_secs: 120,
            executor_delay_ms: 400,
            planner: PlannerBackend::Offline,
        }
    }
}
