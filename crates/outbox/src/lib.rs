//! Outbound persistence queue and storage gateways.
//!
//! Records leaving the ingestion pipeline pass through one ordered,
//! in-memory [`OutboundQueue`]. A single drain task pulls records in
//! FIFO order and hands them to a [`PersistenceGateway`]; failures are
//! classified, not swallowed:
//!
//! | Failure                        | Handling                              |
//! |--------------------------------|---------------------------------------|
//! | [`GatewayError::Unavailable`]  | stays at the head, exponential backoff |
//! | [`GatewayError::Rejected`]     | straight to the dead-letter list      |
//! | attempts >= `max_attempts`     | dead-letter, with a capacity-bounded list |
//!
//! Two gateways ship with the crate: [`MemoryGateway`] for tests and
//! embedding, and [`JsonFileGateway`] for best-effort local durability
//! as append-only JSON Lines files.
//!
//! # Modules
//!
//! - [`gateway`]: the [`PersistenceGateway`] trait and shipped backends
//! - [`queue`]: [`OutboundQueue`], [`QueuePolicy`], drain/flush reporting

#![deny(static_mut_refs)]

pub mod gateway;
pub mod queue;

pub use gateway::{GatewayError, JsonFileGateway, MemoryGateway, PersistenceGateway, RecordId, SavedRecord};
pub use queue::{
    DeadLetter, DrainOutcome, FlushReport, OutboundQueue, QueuePolicy, QueueStats, QueuedRecord,
};

/// Default pause between periodic drain passes.
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 5_000;

/// Default first retry delay after a transient failure.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Default ceiling on the retry delay.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;

/// Default save attempts per record before dead-lettering.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default bound on the dead-letter list.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 256;

/// Default window granted to the final flush at shutdown.
pub const DEFAULT_SHUTDOWN_FLUSH_MS: u64 = 5_000;

/// Default queue depth above which enqueues log a warning.
pub const DEFAULT_HIGH_WATER: usize = 10_000;
