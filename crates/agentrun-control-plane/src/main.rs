//! AgentRun Control Plane Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentrun_control_plane::agent::{
    Executor, LlmClient, LlmPlanner, OfflinePlanner, Planner, SimulatedExecutor,
};
use agentrun_control_plane::config::{PlannerBackend, TimeoutPolicy};
use agentrun_control_plane::{http, AppState, Config, RunStore};

/// AgentRun control plane server.
#[derive(Parser, Debug)]
#[command(name = "agentrun-control-plane", about = "AgentRun control plane server")]
struct Args {
    /// HTTP server address
    #[arg(long, env = "AGENTRUN_HTTP_ADDR", default_value = "127.0.0.1:8000")]
    http_addr: String,

    /// SQLite database holding run history
    #[arg(long, env = "AGENTRUN_DB_PATH", default_value = "agent_runs.db")]
    db_path: PathBuf,

    /// Tasks executed per run unless the request says otherwise
    #[arg(long, env = "AGENTRUN_MAX_STEPS", default_value = "6")]
    max_steps: usize,

    /// Planner model unless the request names one
    #[arg(long, env = "AGENTRUN_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Seconds a plan waits for a decision
    #[arg(long, env = "AGENTRUN_CONFIRM_TIMEOUT", default_value = "300")]
    confirm_timeout_secs: u64,

    /// What an unanswered plan does when the wait runs out
    #[arg(long, value_enum, env = "AGENTRUN_TIMEOUT_POLICY", default_value = "expire")]
    timeout_policy: TimeoutPolicy,

    /// Consecutive planner failures before the breaker opens
    #[arg(long, env = "AGENTRUN_BREAKER_THRESHOLD", default_value = "5")]
    breaker_threshold: u32,

    /// Seconds after the last failure before a trial call is admitted
    #[arg(long, env = "AGENTRUN_BREAKER_COOLDOWN", default_value = "300")]
    breaker_cooldown_secs: u64,

    /// Planner cache entry lifetime in seconds (entries never expire if unset)
    #[arg(long, env = "AGENTRUN_CACHE_TTL")]
    cache_ttl_secs: Option<u64>,

    /// Upper bound on a single planner call, in seconds
    #[arg(long, env = "AGENTRUN_PLANNER_TIMEOUT", default_value = "60")]
    planner_timeout_secs: u64,

    /// Upper bound on a single task execution, in seconds
    #[arg(long, env = "AGENTRUN_TASK_TIMEOUT", default_value = "120")]
    task_timeout_secs: u64,

    /// Simulated work per task, in milliseconds
    #[arg(long, env = "AGENTRUN_EXECUTOR_DELAY_MS", default_value = "400")]
    executor_delay_ms: u64,

    /// OpenAI-compatible endpoint for planning and reflections
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// API key for the endpoint; the offline planner is used without one
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Use the offline planner even when an API key is set
    #[arg(long)]
    offline: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let planner = match self.openai_api_key {
            Some(api_key) if !self.offline && !api_key.trim().is_empty() => {
                PlannerBackend::OpenAi {
                    base_url: self.openai_base_url,
                    api_key,
                }
            }
            _ => PlannerBackend::Offline,
        };

        Config {
            http_bind_addr: self.http_addr,
            db_path: self.db_path,
            default_max_steps: self.max_steps,
            default_model: self.model,
            confirm_timeout_secs: self.confirm_timeout_secs,
            timeout_policy: self.timeout_policy,
            breaker_threshold: self.breaker_threshold,
            breaker_cooldown_secs: self.breaker_cooldown_secs,
            cache_ttl_secs: self.cache_ttl_secs,
            planner_timeout_secs: self.planner_timeout_secs,
            task_timeout_secs: self.task_timeout_secs,
            executor_delay_ms: self.executor_delay_ms,
            planner,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("agentrun=info".parse()?))
        .with_target(true)
        .init();

    let config = args.into_config();
    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    let (planner, executor): (Arc<dyn Planner>, Arc<dyn Executor>) = match &config.planner {
        PlannerBackend::OpenAi { base_url, api_key } => {
            let client = LlmClient::new(base_url, api_key.clone());
            info!(base_url = %base_url, model = %config.default_model, "Using model-backed planner");
            (
                Arc::new(LlmPlanner::new(client.clone())),
                Arc::new(
                    SimulatedExecutor::new(config.executor_delay())
                        .with_reflection(client, config.default_model.clone()),
                ),
            )
        }
        PlannerBackend::Offline => {
            warn!("No API key configured, using the offline planner");
            (
                Arc::new(OfflinePlanner),
                Arc::new(SimulatedExecutor::new(config.executor_delay())),
            )
        }
    };

    let store = RunStore::open(&config.db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", config.db_path.display(), e))?;
    info!(db_path = %config.db_path.display(), "Run store opened");

    let state = AppState::new(config, store, planner, executor);
    let router = http::create_router(state);

    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("AgentRun control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
