//! Persistence envelope for the outbound path.
//!
//! Everything handed to a persistence gateway is an [`OutboundRecord`]: a
//! classified event or a session snapshot, paired with the storage
//! collection it belongs in. Documents are plain JSON objects with the
//! camelCase keys the rest of the analytics stack expects.

use crate::event::{EventKind, NormalizedEvent};
use crate::severity::SeverityAnnotation;
use crate::snapshot::SessionSnapshot;
use serde::{Deserialize, Serialize};

/// Storage collection names. These are a contract with the analytics
/// backend and must not be renamed.
pub mod collections {
    /// Classified traffic violations.
    pub const VIOLATIONS: &str = "violations";
    /// Classified collisions.
    pub const COLLISIONS: &str = "collisions";
    /// General driving observations.
    pub const DRIVING_EVENTS: &str = "drivingEvents";
    /// Score and level progress updates.
    pub const GAME_PROGRESS: &str = "gameProgress";
    /// Session snapshots, periodic and final.
    pub const SESSIONS: &str = "sessions";
    /// Client performance samples.
    pub const PERFORMANCE_DATA: &str = "performanceData";
}

impl EventKind {
    /// Storage collection events of this kind land in.
    ///
    /// Session control events normally never reach storage (they mutate
    /// session state instead); they map to the generic driving-events
    /// collection so the mapping stays total.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Violation => collections::VIOLATIONS,
            Self::Collision => collections::COLLISIONS,
            Self::DrivingEvent | Self::SessionControl => collections::DRIVING_EVENTS,
            Self::Progress => collections::GAME_PROGRESS,
            Self::PerformanceSnapshot => collections::PERFORMANCE_DATA,
        }
    }
}

/// A record queued for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundRecord {
    /// A normalized event, with its severity annotation when the
    /// classifier produced one.
    Event {
        /// The event to store.
        event: NormalizedEvent,
        /// Derived severity, present for violations and collisions.
        severity: Option<SeverityAnnotation>,
    },
    /// A periodic or final session snapshot.
    Snapshot(SessionSnapshot),
}

impl OutboundRecord {
    /// Storage collection this record belongs in.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Event { event, .. } => event.kind.collection(),
            Self::Snapshot(_) => collections::SESSIONS,
        }
    }

    /// Session the record belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Event { event, .. } => &event.session_id,
            Self::Snapshot(snapshot) => &snapshot.session_id,
        }
    }

    /// Render the storage document for this record.
    pub fn to_document(&self) -> serde_json::Value {
        match self {
            Self::Event { event, severity } => {
                let mut doc = serde_json::Map::new();
                doc.insert("sessionId".to_owned(), event.session_id.clone().into());
                doc.insert("userId".to_owned(), event.user_id.clone().into());
                doc.insert("occurredAtMs".to_owned(), event.occurred_at_ms.into());
                doc.insert("sequence".to_owned(), event.sequence.into());
                for (key, value) in &event.fields {
                    doc.insert(key.clone(), value.to_json());
                }
                if let Some(annotation) = severity {
                    doc.insert("severity".to_owned(), annotation.severity.as_str().into());
                    doc.insert("severityScore".to_owned(), annotation.score.into());
                }
                serde_json::Value::Object(doc)
            }
            // SessionSnapshot is plain data; serialization cannot fail.
            Self::Snapshot(snapshot) => {
                serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::keys;
    use crate::severity::Severity;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_collection_mapping_is_total() -> TestResult {
        assert_eq!(EventKind::Violation.collection(), "violations");
        assert_eq!(EventKind::Collision.collection(), "collisions");
        assert_eq!(EventKind::DrivingEvent.collection(), "drivingEvents");
        assert_eq!(EventKind::Progress.collection(), "gameProgress");
        assert_eq!(EventKind::PerformanceSnapshot.collection(), "performanceData");
        assert_eq!(EventKind::SessionControl.collection(), "drivingEvents");
        Ok(())
    }

    #[test]
    fn test_event_document_shape() -> TestResult {
        let event = NormalizedEvent::builder(EventKind::Violation)
            .session_id("session-41")
            .user_id("driver-7")
            .occurred_at_ms(1_700_000_000_000)
            .sequence(12)
            .field(keys::TYPE, "Speeding")
            .field(keys::SPEED, 75.5)
            .field(keys::VIOLATION_NUMBER, 1)
            .field(keys::LOCATION, "Highway Test")
            .build();
        let record = OutboundRecord::Event {
            event,
            severity: Some(SeverityAnnotation::new(Severity::Medium, 60)),
        };

        assert_eq!(record.collection(), "violations");
        assert_eq!(record.session_id(), "session-41");

        let doc = record.to_document();
        assert_eq!(
            doc.get("sessionId").and_then(serde_json::Value::as_str),
            Some("session-41")
        );
        assert_eq!(
            doc.get("userId").and_then(serde_json::Value::as_str),
            Some("driver-7")
        );
        assert_eq!(
            doc.get("type").and_then(serde_json::Value::as_str),
            Some("Speeding")
        );
        assert_eq!(doc.get("speed").and_then(serde_json::Value::as_f64), Some(75.5));
        assert_eq!(
            doc.get("violationNumber").and_then(serde_json::Value::as_i64),
            Some(1)
        );
        assert_eq!(
            doc.get("severity").and_then(serde_json::Value::as_str),
            Some("Medium")
        );
        assert_eq!(
            doc.get("severityScore").and_then(serde_json::Value::as_u64),
            Some(60)
        );
        assert_eq!(doc.get("sequence").and_then(serde_json::Value::as_u64), Some(12));
        Ok(())
    }

    #[test]
    fn test_unclassified_event_document_has_no_severity() -> TestResult {
        let event = NormalizedEvent::builder(EventKind::DrivingEvent)
            .session_id("session-41")
            .field(keys::TYPE, "LaneChange")
            .build();
        let record = OutboundRecord::Event {
            event,
            severity: None,
        };

        let doc = record.to_document();
        assert!(doc.get("severity").is_none());
        assert!(doc.get("severityScore").is_none());
        Ok(())
    }

    #[test]
    fn test_snapshot_document() -> TestResult {
        let record = OutboundRecord::Snapshot(SessionSnapshot {
            session_id: "session-41".to_owned(),
            user_id: "driver-7".to_owned(),
            violation_count: 5,
            collision_count: 0,
            max_speed: 81.0,
            total_distance: 350.0,
            score: 540,
            level: 2,
            started_at_ms: 1_700_000_000_000,
            ended_at_ms: None,
            last_snapshot_at_ms: 1_700_000_030_000,
            snapshot_seq: 1,
        });

        assert_eq!(record.collection(), "sessions");

        let doc = record.to_document();
        assert_eq!(
            doc.get("sessionId").and_then(serde_json::Value::as_str),
            Some("session-41")
        );
        assert_eq!(
            doc.get("violationCount").and_then(serde_json::Value::as_u64),
            Some(5)
        );
        assert_eq!(doc.get("maxSpeed").and_then(serde_json::Value::as_f64), Some(81.0));
        Ok(())
    }
}
