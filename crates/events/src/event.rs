//! Normalized driving events.
//!
//! A [`NormalizedEvent`] is the canonical record every pipeline stage
//! consumes: a kind, session/user identity, a server-assigned timestamp,
//! and a bag of typed fields keyed by the wire names the simulator sends.
//!
//! # Example
//! ```
//! use drivetrace_events::{EventKind, NormalizedEvent, keys};
//!
//! let event = NormalizedEvent::builder(EventKind::Violation)
//!     .session_id("session-41")
//!     .user_id("driver-7")
//!     .occurred_at_ms(1_700_000_000_000)
//!     .field(keys::TYPE, "Speeding")
//!     .field(keys::SPEED, 75.5)
//!     .build();
//!
//! assert_eq!(event.subtype(), Some("Speeding"));
//! assert_eq!(event.speed(), Some(75.5));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Wire-level field keys shared by the normalizer, classifier, and
/// aggregator. The simulator sends camelCase keys; they are preserved
/// end to end so stored documents match what clients submitted.
pub mod keys {
    /// Violation or collision subtype, e.g. `"Speeding"` or `"Vehicle"`.
    pub const TYPE: &str = "type";
    /// Vehicle speed at the time of the event.
    pub const SPEED: &str = "speed";
    /// Human-readable place where the event happened.
    pub const LOCATION: &str = "location";
    /// Ordinal assigned by the client to a violation.
    pub const VIOLATION_NUMBER: &str = "violationNumber";
    /// Object struck in a collision.
    pub const OBJECT_HIT: &str = "objectHit";
    /// Collision impact force.
    pub const IMPACT_FORCE: &str = "impactForce";
    /// Distance covered by a driving event.
    pub const DISTANCE: &str = "distance";
    /// Absolute score reported by a progress event.
    pub const SCORE: &str = "score";
    /// Incremental score change reported by a progress event.
    pub const SCORE_DELTA: &str = "scoreDelta";
    /// Level reached by a progress event.
    pub const LEVEL: &str = "level";
    /// Session control action, `"start"` or `"end"`.
    pub const ACTION: &str = "action";
    /// Frames per second in a performance snapshot.
    pub const FPS: &str = "fps";
    /// Memory usage in megabytes in a performance snapshot.
    pub const MEMORY_MB: &str = "memoryMb";
}

/// Category of a normalized event.
///
/// The kind is supplied by the transport, never inferred from payload
/// contents, and selects both the pipeline behavior and the storage
/// collection the event lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Traffic violation (speeding, red light, stop sign, ...).
    Violation,
    /// Collision with an object or vehicle.
    Collision,
    /// General driving observation (lane change, braking, ...).
    DrivingEvent,
    /// Game progress update carrying score and level.
    Progress,
    /// Client performance sample (fps, memory).
    PerformanceSnapshot,
    /// Session lifecycle control (`start` / `end`).
    SessionControl,
}

impl EventKind {
    /// Stable name used in logs and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Violation => "Violation",
            Self::Collision => "Collision",
            Self::DrivingEvent => "DrivingEvent",
            Self::Progress => "Progress",
            Self::PerformanceSnapshot => "PerformanceSnapshot",
            Self::SessionControl => "SessionControl",
        }
    }

    /// Whether this kind counts toward the session violation tally.
    pub fn is_violation(self) -> bool {
        self == Self::Violation
    }

    /// Whether this kind counts toward the session collision tally.
    pub fn is_collision(self) -> bool {
        self == Self::Collision
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed field value carried by a normalized event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventValue {
    /// Floating-point value.
    Float(f64),
    /// Integer value.
    Integer(i64),
    /// Boolean value.
    Boolean(bool),
    /// String value.
    String(String),
}

impl EventValue {
    /// Numeric view of the value. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert a JSON scalar into an event value.
    ///
    /// Returns `None` for `null`, arrays, and objects; nested structure is
    /// not representable in an event field.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Convert the value back into a JSON scalar for storage documents.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Boolean(v) => serde_json::Value::from(*v),
            Self::String(v) => serde_json::Value::from(v.clone()),
        }
    }
}

impl From<f64> for EventValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for EventValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for EventValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for EventValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for EventValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Canonical event produced by normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Event category, supplied by the transport.
    pub kind: EventKind,

    /// Session this event belongs to. Never empty after normalization.
    pub session_id: String,

    /// User the session belongs to, `"Unknown"` when the submission
    /// carried no identity.
    pub user_id: String,

    /// Server wall-clock time at ingestion, milliseconds since epoch.
    pub occurred_at_ms: u64,

    /// Per-session monotonic sequence assigned by the orchestrator.
    #[serde(default)]
    pub sequence: u64,

    /// Typed payload fields keyed by wire name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, EventValue>,
}

impl NormalizedEvent {
    /// Create a builder for the given kind.
    pub fn builder(kind: EventKind) -> NormalizedEventBuilder {
        NormalizedEventBuilder::new(kind)
    }

    /// Look up a field by wire name.
    pub fn field(&self, key: &str) -> Option<&EventValue> {
        self.fields.get(key)
    }

    /// Numeric field accessor; integers widen to `f64`.
    pub fn numeric(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(EventValue::as_f64)
    }

    /// Text field accessor.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(EventValue::as_str)
    }

    /// Violation/collision subtype from the `type` field.
    pub fn subtype(&self) -> Option<&str> {
        self.text(keys::TYPE)
    }

    /// Vehicle speed from the `speed` field.
    pub fn speed(&self) -> Option<f64> {
        self.numeric(keys::SPEED)
    }

    /// Where the event happened: `location` for violations and driving
    /// events, `objectHit` for collisions.
    pub fn place(&self) -> Option<&str> {
        self.text(keys::LOCATION).or_else(|| self.text(keys::OBJECT_HIT))
    }

    /// Return the event with its per-session sequence stamped.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// Builder for [`NormalizedEvent`].
#[derive(Debug)]
pub struct NormalizedEventBuilder {
    inner: NormalizedEvent,
}

impl NormalizedEventBuilder {
    /// Create a builder for the given kind with neutral defaults.
    pub fn new(kind: EventKind) -> Self {
        Self {
            inner: NormalizedEvent {
                kind,
                session_id: String::new(),
                user_id: crate::UNKNOWN_USER.to_owned(),
                occurred_at_ms: 0,
                sequence: 0,
                fields: HashMap::new(),
            },
        }
    }

    /// Set the session identifier. Empty ids are ignored.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.inner.session_id = id;
        }
        self
    }

    /// Set the user identifier. Empty ids are ignored.
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.inner.user_id = id;
        }
        self
    }

    /// Set the ingestion timestamp in epoch milliseconds.
    pub fn occurred_at_ms(mut self, at: u64) -> Self {
        self.inner.occurred_at_ms = at;
        self
    }

    /// Set the per-session sequence number.
    pub fn sequence(mut self, sequence: u64) -> Self {
        self.inner.sequence = sequence;
        self
    }

    /// Add a typed payload field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.inner.fields.insert(key.into(), value.into());
        self
    }

    /// Build the event.
    pub fn build(self) -> NormalizedEvent {
        self.inner
    }
}
