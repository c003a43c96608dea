//! Embeddable ingestion service tying the DriveTrace pipeline together.
//!
//! The simulator process creates one [`IngestService`] per run and feeds
//! it [`RawSubmission`]s from gameplay code; everything downstream --
//! normalization, duplicate suppression, severity classification,
//! session aggregation, and persistence through the outbound queue --
//! happens on background tasks. The service never blocks the caller:
//! [`IngestService::submit`] is a bounded non-blocking handoff, and the
//! query surface reads live state under short locks.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use drivetrace_orchestrator::{
//!     IngestPolicy, IngestService, MemoryGateway, PersistenceGateway,
//! };
//!
//! # async fn run() -> Result<(), drivetrace_orchestrator::IngestError> {
//! let gateway: Arc<dyn PersistenceGateway> = Arc::new(MemoryGateway::new());
//! let service = IngestService::start(IngestPolicy::default(), gateway)?;
//! // gameplay code calls service.submit(...) as events happen
//! let report = service.shutdown().await;
//! assert_eq!(report.still_queued, 0);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`ingestor`]: the synchronous pipeline core
//! - [`service`]: async shell, background tasks, query surface
//! - [`error`]: the service-level error type
//! - [`logging`]: optional `tracing` subscriber setup for embedders

#![deny(static_mut_refs)]

pub mod error;
pub mod ingestor;
pub mod logging;
pub mod service;

pub use error::{ErrorCategory, IngestError};
pub use ingestor::{Ingested, IngestOutcome, Ingestor};
pub use logging::{LoggingConfig, init_logging};
pub use service::{HealthReport, IngestService};

// The embedder-facing vocabulary, re-exported so applications can
// depend on this crate alone.
pub use drivetrace_events::{
    EventKind, NormalizedEvent, OutboundRecord, SessionSnapshot, Severity, SeverityAnnotation,
    UserAggregate, collections,
};
pub use drivetrace_normalizer::RawSubmission;
pub use drivetrace_outbox::{
    FlushReport, GatewayError, JsonFileGateway, MemoryGateway, PersistenceGateway, QueueStats,
    RecordId,
};
pub use drivetrace_policy::IngestPolicy;
