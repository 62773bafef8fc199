//! HTTP request handlers.

mod events;
mod health;
mod runs;

pub use events::stream_events;
pub use health::{get_metrics, health_check, metrics_handler};
pub use runs::{delete_run, get_run, list_runs, start_run, submit_decision};
