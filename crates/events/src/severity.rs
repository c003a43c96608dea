//! Severity levels and score annotations.
//!
//! Severity is always derived by the classifier; it never arrives on the
//! wire. The annotation travels next to the event through the outbound
//! path so stored documents carry both the label and the numeric score.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered severity label for violations and collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Routine occurrence.
    Low,
    /// Notable, worth surfacing.
    Medium,
    /// Serious, should page a reviewer.
    High,
}

impl Severity {
    /// Stable storage/label name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity label plus numeric score attached to a classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityAnnotation {
    /// Derived severity label.
    pub severity: Severity,
    /// Derived score in `0..=100`.
    pub score: u8,
}

impl SeverityAnnotation {
    /// Maximum representable score.
    pub const MAX_SCORE: u8 = 100;

    /// Create an annotation, clamping the score into range.
    pub fn new(severity: Severity, score: u8) -> Self {
        Self {
            severity,
            score: score.min(Self::MAX_SCORE),
        }
    }
}
