//! Process counters and their JSON / Prometheus renderings.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic process-wide counters.
#[derive(Debug, Default)]
pub struct Metrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    runs_timed_out: AtomicU64,
    tasks_executed: AtomicU64,
    llm_calls: AtomicU64,
    cache_hits: AtomicU64,
    errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_timed_out(&self) {
        self.runs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of every counter.
    pub fn snapshot(&self, circuit_breaker_open: bool) -> MetricsSnapshot {
        let started = self.runs_started.load(Ordering::Relaxed);
        let completed = self.runs_completed.load(Ordering::Relaxed);
        let calls = self.llm_calls.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);

        MetricsSnapshot {
            runs: RunMetrics {
                started,
                completed,
                failed: self.runs_failed.load(Ordering::Relaxed),
                cancelled: self.runs_cancelled.load(Ordering::Relaxed),
                timed_out: self.runs_timed_out.load(Ordering::Relaxed),
                success_rate: percentage(completed, started),
            },
            tasks: TaskMetrics {
                executed: self.tasks_executed.load(Ordering::Relaxed),
            },
            llm: LlmMetrics {
                calls,
                cache_hits: hits,
                cache_hit_rate: percentage(hits, hits + calls),
            },
            system: SystemMetrics {
                errors: self.errors.load(Ordering::Relaxed),
                circuit_breaker_open,
            },
        }
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs: RunMetrics,
    pub tasks: TaskMetrics,
    pub llm: LlmMetrics,
    pub system: SystemMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    /// Completed runs as a percentage of started runs.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub executed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMetrics {
    pub calls: u64,
    pub cache_hits: u64,
    /// Cache hits as a percentage of all planner lookups.
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub errors: u64,
    pub circuit_breaker_open: bool,
}

/// Format a snapshot as Prometheus text.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();

    writeln!(output, "# HELP agentrun_runs_total Runs by outcome").ok();
    writeln!(output, "# TYPE agentrun_runs_total counter").ok();
    let runs = &snapshot.runs;
    for (outcome, value) in [
        ("started", runs.started),
        ("completed", runs.completed),
        ("failed", runs.failed),
        ("cancelled", runs.cancelled),
        ("timeout", runs.timed_out),
    ] {
        writeln!(output, "agentrun_runs_total{{outcome=\"{outcome}\"}} {value}").ok();
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP agentrun_tasks_executed_total Tasks handed to the executor"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_tasks_executed_total counter").ok();
    writeln!(
        output,
        "agentrun_tasks_executed_total {}",
        snapshot.tasks.executed
    )
    .ok();

    writeln!(output).ok();
    writeln!(output, "# HELP agentrun_llm_calls_total Planner calls made").ok();
    writeln!(output, "# TYPE agentrun_llm_calls_total counter").ok();
    writeln!(output, "agentrun_llm_calls_total {}", snapshot.llm.calls).ok();
    writeln!(
        output,
        "# HELP agentrun_cache_hits_total Planner calls served from cache"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_cache_hits_total counter").ok();
    writeln!(output, "agentrun_cache_hits_total {}", snapshot.llm.cache_hits).ok();

    writeln!(output).ok();
    writeln!(output, "# HELP agentrun_errors_total Errors recorded").ok();
    writeln!(output, "# TYPE agentrun_errors_total counter").ok();
    writeln!(output, "agentrun_errors_total {}", snapshot.system.errors).ok();
    writeln!(
        output,
        "# HELP agentrun_circuit_breaker_open Whether the planner breaker is open"
    )
    .ok();
    writeln!(output, "# TYPE agentrun_circuit_breaker_open gauge").ok();
    writeln!(
        output,
        "agentrun_circuit_breaker_open {}",
        u8::from(snapshot.system.circuit_breaker_open)
    )
    .ok();

    output
}
