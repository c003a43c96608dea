//! Canonical event model and storage contracts for DriveTrace.
//!
//! Every raw submission entering the pipeline is converted into a
//! [`NormalizedEvent`] and flows through deduplication, severity
//! classification, and session aggregation in that shape. This crate holds
//! the shared vocabulary so the pipeline stages never depend on each other.
//!
//! ## Modules
//! - `event` - [`NormalizedEvent`], [`EventKind`], [`EventValue`], field keys
//! - `severity` - [`Severity`] levels and score annotations
//! - `snapshot` - [`SessionSnapshot`] and [`UserAggregate`] summaries
//! - `outbound` - [`OutboundRecord`] persistence envelope and collection names

#![deny(static_mut_refs)]

pub mod event;
pub mod outbound;
pub mod severity;
pub mod snapshot;

pub use event::{EventKind, EventValue, NormalizedEvent, NormalizedEventBuilder, keys};
pub use outbound::{OutboundRecord, collections};
pub use severity::{Severity, SeverityAnnotation};
pub use snapshot::{SessionSnapshot, UserAggregate};

/// Placeholder identity recorded when a submission names no user.
pub const UNKNOWN_USER: &str = "Unknown";

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Event timestamps are always assigned server-side at ingestion; client
/// payloads never carry trusted clocks.
pub fn wall_clock_ms() -> u64 {
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    u64::try_from(ms).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_wall_clock_is_past_2020() -> TestResult {
        // 2020-01-01T00:00:00Z in epoch milliseconds.
        let jan_2020_ms = 1_577_836_800_000;
        assert!(wall_clock_ms() > jan_2020_ms);
        Ok(())
    }

    #[test]
    fn test_wall_clock_does_not_go_backwards_much() -> TestResult {
        let first = wall_clock_ms();
        let second = wall_clock_ms();
        assert!(second + 1_000 >= first);
        Ok(())
    }
}
