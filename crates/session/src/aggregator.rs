//! Event folding and snapshot triggering.
//!
//! [`SessionAggregator`] owns the live session map. Each applied event
//! updates the counters of its session and may produce a
//! [`SessionSnapshot`] when one of the triggers fires:
//!
//! | Trigger          | Condition                                          |
//! |------------------|----------------------------------------------------|
//! | Interval         | `interval_ms` elapsed since the previous snapshot  |
//! | Violation stride | violation count divisible by `violation_stride`    |
//! | Collision stride | collision count divisible by `collision_stride`    |
//! | Session end      | explicit `end` control event, or idle expiry       |
//!
//! At most one snapshot is emitted per applied event, even when several
//! triggers fire at once. Sessions are created implicitly by the first
//! event that mentions them; an explicit `start` control event only makes
//! the creation intentional in the logs.

use std::collections::HashMap;

use drivetrace_events::{
    EventKind, EventValue, NormalizedEvent, SessionSnapshot, Severity, SeverityAnnotation,
    UserAggregate, keys,
};
use serde::{Deserialize, Serialize};

use crate::stats::SessionStats;

/// Control action that closes a session.
const ACTION_END: &str = "end";

/// Control action that opens a session explicitly.
const ACTION_START: &str = "start";

/// Knobs governing when snapshots are emitted and when idle sessions
/// are expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPolicy {
    /// Minimum event-time gap between periodic snapshots of one session.
    pub interval_ms: u64,

    /// Emit a snapshot every this many violations.
    pub violation_stride: u32,

    /// Emit a snapshot every this many collisions.
    pub collision_stride: u32,

    /// Evict a session after this much inactivity.
    pub idle_timeout_ms: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            interval_ms: crate::DEFAULT_SNAPSHOT_INTERVAL_MS,
            violation_stride: crate::DEFAULT_VIOLATION_STRIDE,
            collision_stride: crate::DEFAULT_COLLISION_STRIDE,
            idle_timeout_ms: crate::DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

/// What applying one event produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationResult {
    /// Snapshot to persist, when a trigger fired.
    pub snapshot: Option<SessionSnapshot>,

    /// Whether this event closed its session.
    pub session_ended: bool,
}

/// Folds normalized events into per-session and per-user statistics.
///
/// Purely synchronous and single-owner; the orchestrator wraps it in a
/// lock when queries and the ingest path run on different tasks.
#[derive(Debug, Default)]
pub struct SessionAggregator {
    policy: SnapshotPolicy,
    sessions: HashMap<String, SessionStats>,
    users: HashMap<String, UserAggregate>,
}

impl SessionAggregator {
    /// Create an aggregator with the given snapshot policy.
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self {
            policy,
            sessions: HashMap::new(),
            users: HashMap::new(),
        }
    }

    /// The policy this aggregator runs under.
    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Fold one event into its session.
    ///
    /// Unknown sessions are created on the spot, crediting the owning
    /// user with a new session. The returned result carries at most one
    /// snapshot; `session_ended` is set only for the event that closed
    /// the session.
    pub fn apply(
        &mut self,
        event: &NormalizedEvent,
        severity: Option<&SeverityAnnotation>,
    ) -> AggregationResult {
        self.ensure_session(event);

        if let Some(annotation) = severity {
            if annotation.severity == Severity::High {
                tracing::info!(
                    session_id = %event.session_id,
                    kind = %event.kind,
                    score = annotation.score,
                    "high severity event recorded"
                );
            }
        }

        let Some(stats) = self.sessions.get_mut(&event.session_id) else {
            return AggregationResult::default();
        };
        stats.touch(event.occurred_at_ms);

        if let Some(speed) = event.speed() {
            stats.observe_speed(speed);
        }

        match event.kind {
            EventKind::Violation => {
                stats.record_violation();
                if let Some(user) = self.users.get_mut(stats.user_id()) {
                    user.total_violations += 1;
                }
            }
            EventKind::Collision => {
                stats.record_collision();
                if let Some(user) = self.users.get_mut(stats.user_id()) {
                    user.total_collisions += 1;
                }
            }
            EventKind::DrivingEvent => {
                if let Some(distance) = event.numeric(keys::DISTANCE) {
                    stats.add_distance(distance);
                }
            }
            EventKind::Progress => {
                if let Some(score) = integer_field(event, keys::SCORE) {
                    stats.set_score(score);
                }
                if let Some(delta) = integer_field(event, keys::SCORE_DELTA) {
                    stats.add_score(delta);
                }
                if let Some(level) =
                    integer_field(event, keys::LEVEL).and_then(|v| u32::try_from(v).ok())
                {
                    stats.set_level(level);
                }
            }
            EventKind::PerformanceSnapshot => {}
            EventKind::SessionControl => match event.text(keys::ACTION) {
                Some(ACTION_END) => {
                    stats.end(event.occurred_at_ms);
                    let snapshot = stats.take_snapshot(event.occurred_at_ms);
                    self.sessions.remove(&event.session_id);
                    tracing::info!(
                        session_id = %event.session_id,
                        violations = snapshot.violation_count,
                        collisions = snapshot.collision_count,
                        "session ended"
                    );
                    return AggregationResult {
                        snapshot: Some(snapshot),
                        session_ended: true,
                    };
                }
                Some(ACTION_START) => {}
                other => {
                    tracing::debug!(
                        session_id = %event.session_id,
                        action = other.unwrap_or(""),
                        "ignoring unrecognized session control action"
                    );
                }
            },
        }

        AggregationResult {
            snapshot: self.snapshot_if_due(event),
            session_ended: false,
        }
    }

    /// End and evict every session idle for at least the policy timeout,
    /// returning their closing snapshots.
    pub fn sweep_idle(&mut self, now_ms: u64) -> Vec<SessionSnapshot> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, stats)| stats.idle_for_ms(now_ms) >= self.policy.idle_timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();

        let mut snapshots = Vec::with_capacity(expired.len());
        for session_id in expired {
            if let Some(mut stats) = self.sessions.remove(&session_id) {
                let idle_ms = stats.idle_for_ms(now_ms);
                stats.end(now_ms);
                snapshots.push(stats.take_snapshot(now_ms));
                tracing::info!(session_id = %session_id, idle_ms, "session expired after inactivity");
            }
        }
        snapshots
    }

    /// End and evict every live session, returning the closing snapshots.
    /// Used at shutdown so in-flight sessions are not lost.
    pub fn drain_all(&mut self, now_ms: u64) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .drain()
            .map(|(_, mut stats)| {
                stats.end(now_ms);
                stats.take_snapshot(now_ms)
            })
            .collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    /// Read-only view of one live session, if present.
    pub fn session_stats(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).map(SessionStats::view)
    }

    /// Cross-session totals for a user; zeroed totals for users never seen.
    pub fn user_aggregate(&self, user_id: &str) -> UserAggregate {
        self.users.get(user_id).cloned().unwrap_or_else(|| UserAggregate {
            user_id: user_id.to_owned(),
            ..UserAggregate::default()
        })
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn ensure_session(&mut self, event: &NormalizedEvent) {
        if self.sessions.contains_key(&event.session_id) {
            return;
        }
        let explicit = event.kind == EventKind::SessionControl
            && event.text(keys::ACTION) == Some(ACTION_START);
        self.sessions.insert(
            event.session_id.clone(),
            SessionStats::new(&event.session_id, &event.user_id, event.occurred_at_ms),
        );
        let user = self
            .users
            .entry(event.user_id.clone())
            .or_insert_with(|| UserAggregate {
                user_id: event.user_id.clone(),
                ..UserAggregate::default()
            });
        user.total_sessions += 1;
        if explicit {
            tracing::info!(session_id = %event.session_id, user_id = %event.user_id, "session started");
        } else {
            tracing::debug!(
                session_id = %event.session_id,
                kind = %event.kind,
                "session created implicitly by first event"
            );
        }
    }

    /// Evaluate the periodic and stride triggers, emitting at most one
    /// snapshot.
    fn snapshot_if_due(&mut self, event: &NormalizedEvent) -> Option<SessionSnapshot> {
        let stats = self.sessions.get_mut(&event.session_id)?;

        let interval_due = event
            .occurred_at_ms
            .saturating_sub(stats.last_snapshot_at_ms())
            >= self.policy.interval_ms;
        let violation_due = event.kind.is_violation()
            && self.policy.violation_stride > 0
            && stats.violation_count() % self.policy.violation_stride == 0;
        let collision_due = event.kind.is_collision()
            && self.policy.collision_stride > 0
            && stats.collision_count() % self.policy.collision_stride == 0;

        (interval_due || violation_due || collision_due)
            .then(|| stats.take_snapshot(event.occurred_at_ms))
    }
}

/// Integer read tolerant of clients that send whole numbers with a
/// decimal point.
fn integer_field(event: &NormalizedEvent, key: &str) -> Option<i64> {
    match event.field(key) {
        Some(EventValue::Integer(v)) => Some(*v),
        Some(EventValue::Float(v)) if v.is_finite() => Some(*v as i64),
        _ => None,
    }
}
