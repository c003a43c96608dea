//! Per-session statistics aggregation.
//!
//! The aggregator owns the map of live sessions. Every admitted event
//! mutates exactly one session's running counters, and the aggregator
//! decides when a point-in-time [`SessionSnapshot`] should be emitted for
//! persistence: on a periodic interval, on bursts of violations or
//! collisions, and when a session ends (explicitly or by idle timeout).
//!
//! Triggers are evaluated reactively inside [`SessionAggregator::apply`]
//! using event timestamps; only the idle timeout needs an external clock
//! tick via [`SessionAggregator::sweep_idle`].
//!
//! ## Modules
//! - `stats` - live mutable [`SessionStats`] for one session
//! - `aggregator` - the session map, snapshot policy, and queries

#![deny(static_mut_refs)]

pub mod aggregator;
pub mod stats;

pub use aggregator::{AggregationResult, SessionAggregator, SnapshotPolicy};
pub use stats::SessionStats;

/// Default wall-clock gap between periodic snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 30_000;
/// Default violation-count stride that forces a snapshot.
pub const DEFAULT_VIOLATION_STRIDE: u32 = 5;
/// Default collision-count stride that forces a snapshot.
pub const DEFAULT_COLLISION_STRIDE: u32 = 3;
/// Default idle gap after which a session is considered abandoned.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
