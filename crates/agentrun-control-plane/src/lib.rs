//! AgentRun Control Plane Library
//!
//! Plans a goal into tasks, optionally pauses for an operator decision,
//! executes the tasks in order and streams every step as an event. Run
//! history lives in SQLite; planner calls sit behind a cache and a circuit
//! breaker.

pub mod agent;
pub mod config;
pub mod controller;
pub mod event_log;
pub mod gate;
pub mod http;
pub mod metrics;
pub mod resilience;
pub mod service;
pub mod state;
pub mod store;

pub use config::Config;
pub use event_log::{EventLog, Subscription};
pub use gate::ConfirmationGate;
pub use service::{RunService, ServiceError};
pub use state::AppState;
pub use store::RunStore;
