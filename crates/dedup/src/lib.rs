//! Near-duplicate suppression for driving events.
//!
//! The simulator tends to re-emit the same condition several times while
//! it persists: a speeding violation fires on consecutive physics frames,
//! a collision reports once per contact point. The filter keeps a small
//! per-session window of recently seen keys and suppresses repeats that
//! land in the same one-second bucket.
//!
//! This is deliberately a recency window, not exact-duplicate
//! elimination: once a key ages out of the window (or the next time
//! bucket starts) the same condition is admitted again.

#![deny(static_mut_refs)]

use drivetrace_events::{EventKind, NormalizedEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Default width of the duplicate-detection time bucket.
pub const DEFAULT_BUCKET_MS: u64 = 1_000;
/// Default number of recent keys remembered per session.
pub const DEFAULT_PER_SESSION_CAPACITY: usize = 10;

/// Tuning knobs for the duplicate window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupPolicy {
    /// Width of the time bucket in milliseconds.
    pub bucket_ms: u64,
    /// Recent keys remembered per session before the oldest is evicted.
    pub per_session_capacity: usize,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            bucket_ms: DEFAULT_BUCKET_MS,
            per_session_capacity: DEFAULT_PER_SESSION_CAPACITY,
        }
    }
}

/// Identity of an event for duplicate detection: what happened, where,
/// and in which time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    kind: EventKind,
    subtype: String,
    place: String,
    bucket: u64,
}

impl DedupKey {
    fn for_event(event: &NormalizedEvent, bucket_ms: u64) -> Self {
        Self {
            kind: event.kind,
            subtype: event.subtype().unwrap_or("Unknown").to_owned(),
            place: event.place().unwrap_or("").to_owned(),
            bucket: event.occurred_at_ms / bucket_ms.max(1),
        }
    }
}

/// Per-session duplicate filter with FIFO key eviction.
#[derive(Debug)]
pub struct DeduplicationFilter {
    policy: DedupPolicy,
    recent: HashMap<String, VecDeque<DedupKey>>,
    admitted_count: u64,
    suppressed_count: u64,
}

impl Default for DeduplicationFilter {
    fn default() -> Self {
        Self::new(DedupPolicy::default())
    }
}

impl DeduplicationFilter {
    /// Create a filter with the given policy.
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            recent: HashMap::new(),
            admitted_count: 0,
            suppressed_count: 0,
        }
    }

    /// Decide whether an event passes the filter.
    ///
    /// Returns `false` when the same kind/subtype/place key was already
    /// seen for this session within the current time bucket. Session
    /// control events always pass; suppressing lifecycle transitions
    /// would wedge the session state machine.
    pub fn admit(&mut self, event: &NormalizedEvent) -> bool {
        if event.kind == EventKind::SessionControl {
            self.admitted_count += 1;
            return true;
        }

        let key = DedupKey::for_event(event, self.policy.bucket_ms);
        let window = self.recent.entry(event.session_id.clone()).or_default();

        if window.contains(&key) {
            self.suppressed_count += 1;
            return false;
        }

        // Oldest key evicted first once the window is full.
        if window.len() >= self.policy.per_session_capacity.max(1) {
            window.pop_front();
        }
        window.push_back(key);
        self.admitted_count += 1;
        true
    }

    /// Drop the remembered keys for an ended session.
    pub fn forget_session(&mut self, session_id: &str) {
        self.recent.remove(session_id);
    }

    /// Number of sessions with a live key window.
    pub fn tracked_sessions(&self) -> usize {
        self.recent.len()
    }

    /// Events admitted since the last stats reset.
    pub fn admitted_count(&self) -> u64 {
        self.admitted_count
    }

    /// Events suppressed since the last stats reset.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed_count
    }

    /// Share of events suppressed, in percent.
    pub fn suppression_rate_percent(&self) -> f32 {
        let total = self.admitted_count + self.suppressed_count;
        if total == 0 {
            0.0
        } else {
            (self.suppressed_count as f32 / total as f32) * 100.0
        }
    }

    /// Reset collected statistics. Key windows are unaffected.
    pub fn reset_stats(&mut self) {
        self.admitted_count = 0;
        self.suppressed_count = 0;
    }
}

/// Filter statistics for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Events admitted.
    pub admitted_count: u64,
    /// Events suppressed as duplicates.
    pub suppressed_count: u64,
    /// Share of events suppressed, in percent.
    pub suppression_rate_percent: f32,
    /// Sessions with a live key window.
    pub tracked_sessions: usize,
}

impl From<&DeduplicationFilter> for DedupStats {
    fn from(filter: &DeduplicationFilter) -> Self {
        Self {
            admitted_count: filter.admitted_count,
            suppressed_count: filter.suppressed_count,
            suppression_rate_percent: filter.suppression_rate_percent(),
            tracked_sessions: filter.tracked_sessions(),
        }
    }
}
