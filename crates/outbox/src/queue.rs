//! Ordered outbound queue with retry and dead-lettering.

use std::collections::VecDeque;
use std::time::Duration;

use drivetrace_events::{OutboundRecord, wall_clock_ms};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::gateway::PersistenceGateway;

/// Knobs governing drain cadence, retry, and dead-letter bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    /// Pause between periodic drain passes.
    pub drain_interval_ms: u64,

    /// First retry delay after a transient failure.
    pub backoff_base_ms: u64,

    /// Ceiling on the retry delay.
    pub backoff_cap_ms: u64,

    /// Save attempts per record before it is dead-lettered.
    pub max_attempts: u32,

    /// Bound on the dead-letter list; overflow evicts the oldest entry.
    pub dead_letter_capacity: usize,

    /// Window granted to the final flush at shutdown.
    pub shutdown_flush_ms: u64,

    /// Queue depth above which enqueues log a warning.
    pub high_water: usize,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            drain_interval_ms: crate::DEFAULT_DRAIN_INTERVAL_MS,
            backoff_base_ms: crate::DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: crate::DEFAULT_BACKOFF_CAP_MS,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            dead_letter_capacity: crate::DEFAULT_DEAD_LETTER_CAPACITY,
            shutdown_flush_ms: crate::DEFAULT_SHUTDOWN_FLUSH_MS,
            high_water: crate::DEFAULT_HIGH_WATER,
        }
    }
}

impl QueuePolicy {
    /// Retry delay after `attempts` failed saves of the same record:
    /// `base * 2^(attempts-1)`, capped.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(32);
        let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    /// Pause between periodic drain passes.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Window granted to the final flush at shutdown.
    pub fn shutdown_flush_window(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_ms)
    }
}

/// A record waiting to be persisted, with retry bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    /// The outbound record itself.
    pub record: OutboundRecord,
    /// Failed save attempts so far.
    pub attempts: u32,
    /// When the record first entered the queue, epoch milliseconds.
    pub first_queued_at_ms: u64,
}

/// A record the queue gave up on, kept for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The abandoned record with its final attempt count.
    pub entry: QueuedRecord,
    /// Last gateway error before giving up.
    pub reason: String,
}

/// What one drain pass accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Records persisted this pass.
    pub saved: usize,
    /// Records moved to the dead-letter list this pass.
    pub dead_lettered: usize,
    /// Backoff to observe before the next pass, set when the pass
    /// stopped on a transient failure.
    pub retry_in: Option<Duration>,
}

/// Result of a full flush attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records persisted.
    pub succeeded: usize,
    /// Records dead-lettered.
    pub failed: usize,
    /// Records still pending when the pass stopped.
    pub still_queued: usize,
}

/// Point-in-time queue counters for the health surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Records currently pending.
    pub depth: usize,
    /// Records currently on the dead-letter list.
    pub dead_letter_count: usize,
    /// Records ever enqueued.
    pub enqueued_total: u64,
    /// Records ever persisted.
    pub saved_total: u64,
    /// Records ever dead-lettered.
    pub dead_lettered_total: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedRecord>,
    dead_letters: VecDeque<DeadLetter>,
    enqueued_total: u64,
    saved_total: u64,
    dead_lettered_total: u64,
}

/// FIFO queue between the ingestion pipeline and a [`PersistenceGateway`].
///
/// Producers call [`OutboundQueue::enqueue`] from any task; a single
/// drain task alternates between [`OutboundQueue::wait_for_records`] /
/// a periodic tick and [`OutboundQueue::drain`]. A drain pass persists
/// records strictly in order and stops at the first transient failure,
/// so storage never observes reordering within a session. The internal
/// mutex is only held for queue manipulation, never across a save.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    policy: QueuePolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OutboundQueue {
    /// Create a queue with the given policy.
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// The policy this queue runs under.
    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Accept a record. Never blocks and never fails; crossing the
    /// high-water mark is logged, not refused.
    pub fn enqueue(&self, record: OutboundRecord) {
        let depth = {
            let mut state = self.state.lock();
            state.enqueued_total += 1;
            state.pending.push_back(QueuedRecord {
                record,
                attempts: 0,
                first_queued_at_ms: wall_clock_ms(),
            });
            state.pending.len()
        };
        if depth > self.policy.high_water {
            tracing::warn!(
                depth,
                high_water = self.policy.high_water,
                "outbound queue above high-water mark"
            );
        }
        self.notify.notify_one();
    }

    /// Wait until at least one record has been enqueued since the last
    /// wait. Used by the drain task to react immediately to new work.
    pub async fn wait_for_records(&self) {
        self.notify.notified().await;
    }

    /// Persist pending records in FIFO order until the queue is empty
    /// or a transient failure stops the pass.
    ///
    /// A transiently failed record keeps its place at the head of the
    /// queue; the outcome carries the backoff delay to observe before
    /// draining again. Rejected records move to the dead-letter list
    /// without stopping the pass.
    ///
    /// The head record is not removed until its save resolves, so a
    /// pass dropped mid-save leaves the record queued with its attempt
    /// count unchanged.
    pub async fn drain(&self, gateway: &dyn PersistenceGateway) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        loop {
            let Some(entry) = self.head() else {
                break;
            };
            let collection = entry.record.collection();
            match gateway.save(collection, entry.record.to_document()).await {
                Ok(id) => {
                    self.mark_head_saved();
                    outcome.saved += 1;
                    tracing::debug!(%id, collection, "record persisted");
                }
                Err(error) if error.is_transient() => {
                    let Some(attempts) = self.bump_head_attempts() else {
                        break;
                    };
                    let delay = self.policy.backoff_delay(attempts);
                    if attempts >= self.policy.max_attempts {
                        if let Some(entry) = self.pop_front() {
                            tracing::error!(
                                collection,
                                session_id = entry.record.session_id(),
                                attempts = entry.attempts,
                                %error,
                                "record exhausted its retries; dead-lettering"
                            );
                            self.push_dead_letter(entry, error.to_string());
                            outcome.dead_lettered += 1;
                        }
                    } else {
                        tracing::warn!(
                            collection,
                            attempts,
                            retry_in = ?delay,
                            %error,
                            "storage unavailable; record stays queued"
                        );
                    }
                    outcome.retry_in = Some(delay);
                    break;
                }
                Err(error) => {
                    let Some(entry) = self.pop_front() else {
                        break;
                    };
                    tracing::error!(
                        collection,
                        session_id = entry.record.session_id(),
                        %error,
                        "record rejected by storage; dead-lettering"
                    );
                    self.push_dead_letter(entry, error.to_string());
                    outcome.dead_lettered += 1;
                }
            }
        }
        outcome
    }

    /// One ordered pass over everything pending, reporting what made it
    /// out. Used by shutdown; stops at the first transient failure like
    /// any other pass.
    pub async fn flush(&self, gateway: &dyn PersistenceGateway) -> FlushReport {
        let outcome = self.drain(gateway).await;
        FlushReport {
            succeeded: outcome.saved,
            failed: outcome.dead_lettered,
            still_queued: self.depth(),
        }
    }

    /// Records currently pending.
    pub fn depth(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Records currently on the dead-letter list.
    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().dead_letters.len()
    }

    /// Copy of the dead-letter list, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead_letters.iter().cloned().collect()
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            depth: state.pending.len(),
            dead_letter_count: state.dead_letters.len(),
            enqueued_total: state.enqueued_total,
            saved_total: state.saved_total,
            dead_lettered_total: state.dead_lettered_total,
        }
    }

    fn head(&self) -> Option<QueuedRecord> {
        self.state.lock().pending.front().cloned()
    }

    fn mark_head_saved(&self) {
        let mut state = self.state.lock();
        state.pending.pop_front();
        state.saved_total += 1;
    }

    fn bump_head_attempts(&self) -> Option<u32> {
        self.state.lock().pending.front_mut().map(|entry| {
            entry.attempts += 1;
            entry.attempts
        })
    }

    fn pop_front(&self) -> Option<QueuedRecord> {
        self.state.lock().pending.pop_front()
    }

    fn push_dead_letter(&self, entry: QueuedRecord, reason: String) {
        let mut state = self.state.lock();
        state.dead_lettered_total += 1;
        let capacity = self.policy.dead_letter_capacity.max(1);
        if state.dead_letters.len() >= capacity {
            if let Some(evicted) = state.dead_letters.pop_front() {
                tracing::error!(
                    collection = evicted.entry.record.collection(),
                    session_id = evicted.entry.record.session_id(),
                    reason = %evicted.reason,
                    "dead-letter list full; evicting oldest record"
                );
            }
        }
        state.dead_letters.push_back(DeadLetter { entry, reason });
    }
}
