//! Live per-session statistics.

use drivetrace_events::SessionSnapshot;

/// Mutable running statistics for one session.
///
/// Owned exclusively by the aggregator; everything leaving the crate is
/// a frozen [`SessionSnapshot`]. Progress updates support both score
/// semantics the clients use: [`SessionStats::set_score`] overwrites with
/// an absolute value, [`SessionStats::add_score`] applies an increment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    session_id: String,
    user_id: String,
    violation_count: u32,
    collision_count: u32,
    max_speed: f64,
    total_distance: f64,
    score: i64,
    level: u32,
    started_at_ms: u64,
    ended_at_ms: Option<u64>,
    last_event_at_ms: u64,
    last_snapshot_at_ms: u64,
    snapshot_seq: u32,
}

impl SessionStats {
    /// Create zeroed statistics for a session starting at `started_at_ms`.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        started_at_ms: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            violation_count: 0,
            collision_count: 0,
            max_speed: 0.0,
            total_distance: 0.0,
            score: 0,
            level: 0,
            started_at_ms,
            ended_at_ms: None,
            last_event_at_ms: started_at_ms,
            last_snapshot_at_ms: started_at_ms,
            snapshot_seq: 0,
        }
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Owning user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Violations counted so far.
    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    /// Collisions counted so far.
    pub fn collision_count(&self) -> u32 {
        self.collision_count
    }

    /// Highest observed speed.
    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Accumulated driving distance.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Current score.
    pub fn score(&self) -> i64 {
        self.score
    }

    /// Current level.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// When the previous snapshot was taken (session start before the
    /// first one).
    pub fn last_snapshot_at_ms(&self) -> u64 {
        self.last_snapshot_at_ms
    }

    /// Whether the session has been marked ended.
    pub fn is_ended(&self) -> bool {
        self.ended_at_ms.is_some()
    }

    /// Count one violation.
    pub fn record_violation(&mut self) {
        self.violation_count += 1;
    }

    /// Count one collision.
    pub fn record_collision(&mut self) {
        self.collision_count += 1;
    }

    /// Fold a speed observation into the running maximum.
    pub fn observe_speed(&mut self, speed: f64) {
        if speed.is_finite() {
            self.max_speed = self.max_speed.max(speed);
        }
    }

    /// Accumulate driving distance. Negative and non-finite values are
    /// ignored.
    pub fn add_distance(&mut self, distance: f64) {
        if distance.is_finite() && distance > 0.0 {
            self.total_distance += distance;
        }
    }

    /// Overwrite the score with an absolute value.
    pub fn set_score(&mut self, score: i64) {
        self.score = score;
    }

    /// Apply an incremental score change.
    pub fn add_score(&mut self, delta: i64) {
        self.score = self.score.saturating_add(delta);
    }

    /// Overwrite the level with an absolute value.
    pub fn set_level(&mut self, level: u32) {
        self.level = level;
    }

    /// Record event activity for the idle clock. Timestamps never move
    /// backwards even if events arrive out of order.
    pub fn touch(&mut self, at_ms: u64) {
        self.last_event_at_ms = self.last_event_at_ms.max(at_ms);
    }

    /// Milliseconds since the last event, as seen from `now_ms`.
    pub fn idle_for_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_event_at_ms)
    }

    /// Mark the session ended. Idempotent; the first end time wins.
    pub fn end(&mut self, at_ms: u64) {
        if self.ended_at_ms.is_none() {
            self.ended_at_ms = Some(at_ms);
        }
    }

    /// Freeze the current state into an emitted snapshot, advancing the
    /// snapshot ordinal and the last-snapshot clock.
    pub fn take_snapshot(&mut self, at_ms: u64) -> SessionSnapshot {
        self.snapshot_seq += 1;
        self.last_snapshot_at_ms = at_ms;
        self.view()
    }

    /// Read-only copy of the current state, without advancing snapshot
    /// bookkeeping. Used by the query surface.
    pub fn view(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            violation_count: self.violation_count,
            collision_count: self.collision_count,
            max_speed: self.max_speed,
            total_distance: self.total_distance,
            score: self.score,
            level: self.level,
            started_at_ms: self.started_at_ms,
            ended_at_ms: self.ended_at_ms,
            last_snapshot_at_ms: self.last_snapshot_at_ms,
            snapshot_seq: self.snapshot_seq,
        }
    }
}
