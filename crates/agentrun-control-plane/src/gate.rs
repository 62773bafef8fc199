//! Confirmation gate.
//!
//! A rendezvous between a run parked in `AWAITING_CONFIRMATION` and whoever
//! submits the operator's decision. Each waiting run owns one slot holding a
//! oneshot sender; submitting a decision takes the slot and fires it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use agentrun_core::{Decision, RunId};

/// Gate errors.
#[derive(Debug, Error)]
pub enum GateError {
    /// No run is waiting for a decision under this id.
    #[error("run {0} is not awaiting confirmation")]
    NotAwaiting(RunId),
}

/// How a confirmation wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Decided(Decision),
    TimedOut,
}

type Slots = Arc<Mutex<HashMap<RunId, (u64, oneshot::Sender<Decision>)>>>;

/// Per-run confirmation rendezvous. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConfirmationGate {
    slots: Slots,
    generation: Arc<Mutex<u64>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for `run_id` so decisions can be submitted.
    ///
    /// Arming replaces any slot still open for the same run. The returned
    /// handle closes the slot when dropped.
    pub fn arm(&self, run_id: &RunId) -> PendingDecision {
        let generation = {
            let mut g = self.generation.lock();
            *g += 1;
            *g
        };
        let (tx, rx) = oneshot::channel();
        if self
            .slots
            .lock()
            .insert(run_id.clone(), (generation, tx))
            .is_some()
        {
            warn!(run_id = %run_id, "Replaced an open confirmation slot");
        }
        debug!(run_id = %run_id, "Confirmation gate armed");

        PendingDecision {
            run_id: run_id.clone(),
            generation,
            rx,
            slots: self.slots.clone(),
        }
    }

    /// Deliver a decision to the run waiting under `run_id`.
    pub fn submit_decision(&self, run_id: &RunId, decision: Decision) -> Result<(), GateError> {
        let slot = self.slots.lock().remove(run_id);
        let Some((_, tx)) = slot else {
            return Err(GateError::NotAwaiting(run_id.clone()));
        };

        // The waiter may have timed out between our lookup and now.
        tx.send(decision)
            .map_err(|_| GateError::NotAwaiting(run_id.clone()))?;

        info!(run_id = %run_id, decision = %decision, "Decision submitted");
        Ok(())
    }

    /// Whether a run is currently waiting for a decision.
    pub fn is_awaiting(&self, run_id: &RunId) -> bool {
        self.slots.lock().contains_key(run_id)
    }

    /// Arm the gate and wait for one decision.
    pub async fn await_decision(&self, run_id: &RunId, max_wait: Duration) -> GateOutcome {
        self.arm(run_id).wait(max_wait).await
    }
}

/// An armed slot waiting for exactly one decision.
pub struct PendingDecision {
    run_id: RunId,
    generation: u64,
    rx: oneshot::Receiver<Decision>,
    slots: Slots,
}

impl PendingDecision {
    /// Wait up to `max_wait` for the decision.
    pub async fn wait(self, max_wait: Duration) -> GateOutcome {
        self.wait_until(Instant::now() + max_wait).await
    }

    /// Wait until `deadline` for the decision.
    pub async fn wait_until(mut self, deadline: Instant) -> GateOutcome {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(decision)) => GateOutcome::Decided(decision),
            // Sender dropped without a decision: the slot was replaced.
            Ok(Err(_)) => GateOutcome::TimedOut,
            Err(_) => {
                // Close the slot first so late submitters get NotAwaiting;
                // a decision that was already sent still wins.
                self.release();
                self.rx.close();
                if let Ok(decision) = self.rx.try_recv() {
                    return GateOutcome::Decided(decision);
                }
                debug!(run_id = %self.run_id, "Confirmation wait expired");
                GateOutcome::TimedOut
            }
        }
    }

    fn release(&self) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(&self.run_id), Some((g, _)) if *g == self.generation) {
            slots.remove(&self.run_id);
        }
    }
}

impl Drop for PendingDecision {
    fn drop(&mut self) {
        self.release();
    }
}
