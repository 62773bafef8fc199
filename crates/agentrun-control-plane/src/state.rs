//! Shared application state.

use std::sync::Arc;

use crate::agent::{Executor, Planner};
use crate::config::Config;
use crate::event_log::EventLog;
use crate::gate::ConfirmationGate;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::resilience::ResilienceLayer;
use crate::store::RunStore;

/// Everything a run controller and the HTTP handlers share.
pub struct AppState {
    pub config: Config,

    /// Process-wide event stream.
    pub events: EventLog,

    /// Pending operator decisions, keyed by run.
    pub gate: ConfirmationGate,

    /// Cache and breaker in front of the planner.
    pub resilience: ResilienceLayer,

    /// Durable run history.
    pub store: RunStore,

    pub metrics: Arc<Metrics>,

    pub planner: Arc<dyn Planner>,

    pub executor: Arc<dyn Executor>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    ///
    /// Spawns the event log dispatcher, so it must run inside a Tokio runtime.
    pub fn new(
        config: Config,
        store: RunStore,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        let metrics = Arc::new(Metrics::new());
        let resilience = ResilienceLayer::new(
            config.breaker_threshold,
            config.breaker_cooldown(),
            config.cache_ttl(),
            metrics.clone(),
        );

        Arc::new(Self {
            config,
            events: EventLog::new(),
            gate: ConfirmationGate::new(),
            resilience,
            store,
            metrics,
            planner,
            executor,
        })
    }

    /// Current counters plus the breaker flag.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.resilience.breaker().is_open())
    }
}
