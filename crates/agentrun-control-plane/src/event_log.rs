//! Append-only, multi-subscriber event log.
//!
//! Publishing appends to an in-memory log and bumps a watch channel while
//! holding the log lock, so sequence numbers and notifications can never
//! interleave. A single dispatcher task reads the log from its own cursor and
//! fans each new event out to one unbounded channel per live subscriber.
//! Publishers never wait on readers; a slow reader only grows its own queue.
//!
//! Events are retained for the lifetime of the process so a subscriber can
//! join late (or reconnect) and replay from any cursor.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use agentrun_core::{Event, EventKind, RunId};

/// Event log errors.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The dispatcher task is gone; nothing can be delivered anymore.
    #[error("event log dispatcher has shut down")]
    Closed,
}

type Log = Arc<Mutex<Vec<Arc<Event>>>>;

struct Registration {
    after: u64,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

struct Subscriber {
    after: u64,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

/// Handle to the process-wide event log. Cheap to clone.
#[derive(Clone)]
pub struct EventLog {
    log: Log,
    head: Arc<watch::Sender<u64>>,
    registrations: mpsc::UnboundedSender<Registration>,
}

impl EventLog {
    /// Create the log and spawn its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let (head_tx, head_rx) = watch::channel(0u64);
        let (reg_tx, reg_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(log.clone(), head_rx, reg_rx));

        Self {
            log,
            head: Arc::new(head_tx),
            registrations: reg_tx,
        }
    }

    /// Append an event for a run and wake the dispatcher.
    pub fn publish(&self, run_id: &RunId, kind: EventKind) -> Result<Arc<Event>, EventLogError> {
        if self.head.is_closed() {
            return Err(EventLogError::Closed);
        }

        let event = {
            let mut log = self.log.lock();
            let seq = log.len() as u64 + 1;
            let event = Arc::new(Event::new(seq, run_id.clone(), kind));
            log.push(event.clone());
            self.head.send_replace(seq);
            event
        };

        debug!(
            run_id = %run_id,
            seq = event.seq,
            event_type = event.event_type(),
            "Event published"
        );

        Ok(event)
    }

    /// Subscribe to every event with `seq > after`.
    ///
    /// `None` starts at the current head, i.e. only events published after
    /// this call are observed.
    pub fn subscribe(&self, after: Option<u64>) -> Result<Subscription, EventLogError> {
        let after = after.unwrap_or_else(|| self.head());
        let (tx, rx) = mpsc::unbounded_channel();

        self.registrations
            .send(Registration { after, tx })
            .map_err(|_| EventLogError::Closed)?;

        Ok(Subscription { rx, cursor: after })
    }

    /// Sequence number of the most recently published event (0 when empty).
    pub fn head(&self) -> u64 {
        self.log.lock().len() as u64
    }

    /// Retained events belonging to one run, in publish order.
    pub fn events_for_run(&self, run_id: &RunId) -> Vec<Arc<Event>> {
        self.log
            .lock()
            .iter()
            .filter(|e| &e.run_id == run_id)
            .cloned()
            .collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// A reader's position in the log.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Arc<Event>>,
    cursor: u64,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the log shuts down.
    pub async fn next(&mut self) -> Option<Arc<Event>> {
        let event = self.rx.recv().await?;
        self.cursor = event.seq;
        Some(event)
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<Arc<Event>> {
        let event = self.rx.try_recv().ok()?;
        self.cursor = event.seq;
        Some(event)
    }

    /// Sequence number of the last event observed (or the starting cursor).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Convert into a `Stream` for server-push transports.
    pub fn into_stream(self) -> UnboundedReceiverStream<Arc<Event>> {
        UnboundedReceiverStream::new(self.rx)
    }
}

async fn dispatch(
    log: Log,
    mut head: watch::Receiver<u64>,
    mut registrations: mpsc::UnboundedReceiver<Registration>,
) {
    let mut dispatched: usize = 0;
    let mut subscribers: Vec<Subscriber> = Vec::new();

    loop {
        tokio::select! {
            biased;

            registration = registrations.recv() => {
                let Some(Registration { after, tx }) = registration else {
                    break;
                };

                // Replay what has already been fanned out; anything newer
                // arrives through the regular fan-out below.
                let backlog: Vec<Arc<Event>> = {
                    let log = log.lock();
                    let start = (after as usize).min(dispatched);
                    log[start..dispatched].to_vec()
                };

                let alive = backlog.into_iter().all(|event| tx.send(event).is_ok());
                if alive {
                    debug!(after, replayed = dispatched.saturating_sub(after as usize), "Subscriber registered");
                    subscribers.push(Subscriber { after, tx });
                }
            }

            changed = head.changed() => {
                if changed.is_err() {
                    break;
                }

                let batch: Vec<Arc<Event>> = {
                    let log = log.lock();
                    log[dispatched..].to_vec()
                };
                dispatched += batch.len();

                for event in &batch {
                    subscribers.retain(|sub| {
                        if event.seq <= sub.after {
                            return !sub.tx.is_closed();
                        }
                        sub.tx.send(event.clone()).is_ok()
                    });
                }
            }
        }
    }

    info!(subscribers = subscribers.len(), "Event log dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use agentrun_core::RunStatus;

    fn complete() -> EventKind {
        EventKind::RunComplete {
            status: RunStatus::Completed,
        }
    }

    async fn collect(sub: &mut Subscription, n: usize) -> Vec<u64> {
        let mut seqs = Vec::with_capacity(n);
        for _ in 0..n {
            let event = tokio::time::timeout(Duration::from_secs(1), sub.next())
                .await
                .expect("event not delivered in time")
                .expect("log closed");
            seqs.push(event.seq);
        }
        seqs
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let log = EventLog::new();
        let run = RunId::new("r1");

        let a = log.publish(&run, EventKind::PlanApproved).unwrap();
        let b = log.publish(&run, complete()).unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(log.head(), 2);
    }

    #[tokio::test]
    async fn test_live_subscriber_sees_only_new_events() {
        let log = EventLog::new();
        let run = RunId::new("r1");
        log.publish(&run, EventKind::PlanApproved).unwrap();

        let mut sub = log.subscribe(None).unwrap();
        log.publish(&run, EventKind::PlanEdit).unwrap();
        log.publish(&run, complete()).unwrap();

        assert_eq!(collect(&mut sub, 2).await, vec![2, 3]);
        assert_eq!(sub.cursor(), 3);
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_from_cursor() {
        let log = EventLog::new();
        let run = RunId::new("r1");
        for _ in 0..5 {
            log.publish(&run, EventKind::PlanEdit).unwrap();
        }
        // Let the dispatcher fan out the first batch before joining.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut sub = log.subscribe(Some(2)).unwrap();
        log.publish(&run, complete()).unwrap();

        assert_eq!(collect(&mut sub, 4).await, vec![3, 4, 5, 6]);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event_exactly_once() {
        let log = EventLog::new();
        let run = RunId::new("r1");

        let mut fast = log.subscribe(Some(0)).unwrap();
        let mut slow = log.subscribe(Some(0)).unwrap();

        let publisher = {
            let log = log.clone();
            let run = run.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    log.publish(&run, EventKind::PlanEdit).unwrap();
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        // A subscriber joining mid-stream from cursor 0 still sees all 100.
        tokio::task::yield_now().await;
        let mut late = log.subscribe(Some(0)).unwrap();

        publisher.await.unwrap();

        let expected: Vec<u64> = (1..=100).collect();
        assert_eq!(collect(&mut fast, 100).await, expected);
        assert_eq!(collect(&mut late, 100).await, expected);

        // The slow reader never read while publishing happened; nothing lost.
        assert_eq!(collect(&mut slow, 100).await, expected);
        assert!(slow.try_next().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_others() {
        let log = EventLog::new();
        let run = RunId::new("r1");

        let dropped = log.subscribe(None).unwrap();
        let mut kept = log.subscribe(None).unwrap();
        drop(dropped);

        log.publish(&run, EventKind::PlanApproved).unwrap();
        assert_eq!(collect(&mut kept, 1).await, vec![1]);
    }

    #[tokio::test]
    async fn test_events_for_run_filters_by_run() {
        let log = EventLog::new();
        log.publish(&RunId::new("a"), EventKind::PlanApproved).unwrap();
        log.publish(&RunId::new("b"), EventKind::PlanEdit).unwrap();
        log.publish(&RunId::new("a"), complete()).unwrap();

        let events = log.events_for_run(&RunId::new("a"));
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
    }
}
