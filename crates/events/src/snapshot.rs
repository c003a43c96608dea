//! Serializable session and user summaries.
//!
//! The live, mutable per-session state belongs to the aggregator; these
//! types are the frozen copies that leave the pipeline. Field names
//! serialize in camelCase because snapshots are stored verbatim in the
//! `sessions` collection next to documents the simulator submitted.

use serde::{Deserialize, Serialize};

/// Point-in-time copy of one session's running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session this snapshot describes.
    pub session_id: String,

    /// Owning user, `"Unknown"` when the session was anonymous.
    pub user_id: String,

    /// Violations counted so far.
    #[serde(default)]
    pub violation_count: u32,

    /// Collisions counted so far.
    #[serde(default)]
    pub collision_count: u32,

    /// Highest speed observed in any event of the session.
    #[serde(default)]
    pub max_speed: f64,

    /// Total distance accumulated from driving events.
    #[serde(default)]
    pub total_distance: f64,

    /// Current score (absolute; overwritten or adjusted by progress events).
    #[serde(default)]
    pub score: i64,

    /// Current level (absolute; overwritten by progress events).
    #[serde(default)]
    pub level: u32,

    /// When the session started, epoch milliseconds.
    pub started_at_ms: u64,

    /// When the session ended; `None` while it is still live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,

    /// When the previous snapshot of this session was taken.
    #[serde(default)]
    pub last_snapshot_at_ms: u64,

    /// 1-based ordinal of this snapshot within the session.
    #[serde(default)]
    pub snapshot_seq: u32,
}

impl SessionSnapshot {
    /// Whether this is the closing snapshot of an ended session.
    pub fn is_final(&self) -> bool {
        self.ended_at_ms.is_some()
    }

    /// Session length in milliseconds, available once the session ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at_ms
            .map(|ended| ended.saturating_sub(self.started_at_ms))
    }
}

/// Cross-session totals for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    /// User these totals belong to.
    pub user_id: String,

    /// Sessions the user has started.
    #[serde(default)]
    pub total_sessions: u32,

    /// Violations across all sessions.
    #[serde(default)]
    pub total_violations: u32,

    /// Collisions across all sessions.
    #[serde(default)]
    pub total_collisions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: "session-41".to_owned(),
            user_id: "driver-7".to_owned(),
            violation_count: 5,
            collision_count: 1,
            max_speed: 92.3,
            total_distance: 1_264.5,
            score: 870,
            level: 3,
            started_at_ms: 1_700_000_000_000,
            ended_at_ms: None,
            last_snapshot_at_ms: 1_700_000_030_000,
            snapshot_seq: 2,
        }
    }

    #[test]
    fn test_snapshot_serializes_camel_case() -> TestResult {
        let json = serde_json::to_string(&sample_snapshot())?;

        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"violationCount\""));
        assert!(json.contains("\"maxSpeed\""));
        assert!(json.contains("\"totalDistance\""));
        assert!(json.contains("\"lastSnapshotAtMs\""));
        assert!(!json.contains("\"endedAtMs\""));
        Ok(())
    }

    #[test]
    fn test_snapshot_roundtrip() -> TestResult {
        let snapshot = sample_snapshot();
        let json = serde_json::to_string(&snapshot)?;
        let back: SessionSnapshot = serde_json::from_str(&json)?;
        assert_eq!(back, snapshot);
        Ok(())
    }

    #[test]
    fn test_final_snapshot_duration() -> TestResult {
        let mut snapshot = sample_snapshot();
        assert!(!snapshot.is_final());
        assert_eq!(snapshot.duration_ms(), None);

        snapshot.ended_at_ms = Some(snapshot.started_at_ms + 45_000);
        assert!(snapshot.is_final());
        assert_eq!(snapshot.duration_ms(), Some(45_000));
        Ok(())
    }

    #[test]
    fn test_user_aggregate_defaults() -> TestResult {
        let aggregate: UserAggregate = serde_json::from_str(r#"{"userId": "driver-7"}"#)?;
        assert_eq!(aggregate.user_id, "driver-7");
        assert_eq!(aggregate.total_sessions, 0);
        assert_eq!(aggregate.total_violations, 0);
        assert_eq!(aggregate.total_collisions, 0);
        Ok(())
    }
}
