//! Synchronous pipeline core.
//!
//! [`Ingestor`] runs one submission through every stage in order:
//! normalize, sequence-stamp, duplicate check, severity classification,
//! session aggregation. It performs no I/O and holds no timers, which
//! keeps the whole pipeline testable with plain function calls; the
//! async shell in [`crate::service`] owns the channels and tasks around
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use drivetrace_dedup::{DedupStats, DeduplicationFilter};
use drivetrace_events::{EventKind, OutboundRecord, SessionSnapshot, wall_clock_ms};
use drivetrace_normalizer::{NormalizeError, RawSubmission, normalize};
use drivetrace_policy::IngestPolicy;
use drivetrace_session::SessionAggregator;
use drivetrace_severity::SeverityClassifier;
use parking_lot::RwLock;

/// Monotonic per-session sequence numbers, starting at 1.
#[derive(Debug, Default)]
pub struct SequenceCounters {
    last: HashMap<String, u64>,
}

impl SequenceCounters {
    /// Hand out the next sequence number for a session.
    pub fn next_for(&mut self, session_id: &str) -> u64 {
        if let Some(counter) = self.last.get_mut(session_id) {
            *counter += 1;
            *counter
        } else {
            self.last.insert(session_id.to_owned(), 1);
            1
        }
    }

    /// Drop the counter of an ended session.
    pub fn forget(&mut self, session_id: &str) {
        self.last.remove(session_id);
    }

    /// Sessions currently tracked.
    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}

/// How the pipeline handled one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event passed every stage.
    Accepted,
    /// The event was a duplicate and went no further.
    Suppressed,
}

/// Result of running one submission through the pipeline.
#[derive(Debug)]
pub struct Ingested {
    /// What happened to the submission.
    pub outcome: IngestOutcome,
    /// Records to persist, in storage order: the event itself (when its
    /// kind is stored at all), then any snapshot it triggered.
    pub records: Vec<OutboundRecord>,
    /// Whether this submission closed its session.
    pub session_ended: bool,
}

/// The synchronous ingestion pipeline.
///
/// Owns the duplicate filter, the classifier, and the sequence
/// counters outright; the aggregator sits behind a [`RwLock`] shared
/// with the read-only query surface. Every lock taken here is released
/// before the function returns, so the type stays safe to drive from a
/// single async worker.
#[derive(Debug)]
pub struct Ingestor {
    dedup: DeduplicationFilter,
    classifier: SeverityClassifier,
    sequences: SequenceCounters,
    aggregator: Arc<RwLock<SessionAggregator>>,
}

impl Ingestor {
    /// Build a pipeline from a policy.
    pub fn new(policy: &IngestPolicy) -> Self {
        Self {
            dedup: DeduplicationFilter::new(policy.dedup.clone()),
            classifier: SeverityClassifier::new(policy.severity.clone()),
            sequences: SequenceCounters::default(),
            aggregator: Arc::new(RwLock::new(SessionAggregator::new(
                policy.snapshots.clone(),
            ))),
        }
    }

    /// Shared handle to the aggregator for read-only queries.
    pub fn aggregator(&self) -> Arc<RwLock<SessionAggregator>> {
        Arc::clone(&self.aggregator)
    }

    /// Current duplicate-filter counters.
    pub fn dedup_stats(&self) -> DedupStats {
        DedupStats::from(&self.dedup)
    }

    /// Run one submission through the pipeline, stamping it with the
    /// current wall-clock time.
    ///
    /// # Errors
    /// Fails only on normalization; every later stage is total.
    pub fn ingest(&mut self, raw: &RawSubmission) -> Result<Ingested, NormalizeError> {
        self.ingest_at(raw, wall_clock_ms())
    }

    /// Run one submission with an explicit ingestion timestamp.
    ///
    /// # Errors
    /// Fails only on normalization; every later stage is total.
    pub fn ingest_at(
        &mut self,
        raw: &RawSubmission,
        occurred_at_ms: u64,
    ) -> Result<Ingested, NormalizeError> {
        let event = normalize(raw, occurred_at_ms)?;
        let sequence = self.sequences.next_for(&event.session_id);
        let event = event.with_sequence(sequence);
        let session_id = event.session_id.clone();

        if !self.dedup.admit(&event) {
            tracing::debug!(
                session_id = %session_id,
                kind = %event.kind,
                "duplicate suppressed"
            );
            return Ok(Ingested {
                outcome: IngestOutcome::Suppressed,
                records: Vec::new(),
                session_ended: false,
            });
        }

        let severity = self.classifier.classify(&event);
        let result = self.aggregator.write().apply(&event, severity.as_ref());

        let mut records = Vec::new();
        // Control events steer the session lifecycle but are not
        // themselves stored; their effect surfaces as snapshots.
        if event.kind != EventKind::SessionControl {
            records.push(OutboundRecord::Event { event, severity });
        }
        if let Some(snapshot) = result.snapshot {
            records.push(OutboundRecord::Snapshot(snapshot));
        }

        if result.session_ended {
            self.sequences.forget(&session_id);
            self.dedup.forget_session(&session_id);
        }

        Ok(Ingested {
            outcome: IngestOutcome::Accepted,
            records,
            session_ended: result.session_ended,
        })
    }

    /// Close and collect every session idle for at least the aggregator
    /// policy timeout, releasing their pipeline state.
    pub fn sweep_idle(&mut self, now_ms: u64) -> Vec<SessionSnapshot> {
        let snapshots = self.aggregator.write().sweep_idle(now_ms);
        for snapshot in &snapshots {
            self.sequences.forget(&snapshot.session_id);
            self.dedup.forget_session(&snapshot.session_id);
        }
        snapshots
    }

    /// Close and collect every live session. Used at shutdown.
    pub fn drain_all(&mut self, now_ms: u64) -> Vec<SessionSnapshot> {
        let snapshots = self.aggregator.write().drain_all(now_ms);
        for snapshot in &snapshots {
            self.sequences.forget(&snapshot.session_id);
            self.dedup.forget_session(&snapshot.session_id);
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivetrace_events::collections;

    const AT_MS: u64 = 1_700_000_000_000;

    fn pipeline() -> Ingestor {
        Ingestor::new(&IngestPolicy::default())
    }

    fn violation(location: &str) -> RawSubmission {
        RawSubmission::new(EventKind::Violation, format!("Speeding|75.5|{location}|1"))
            .with_session("s1")
            .with_user("driver-7")
    }

    fn control(action: &str) -> RawSubmission {
        RawSubmission::new(EventKind::SessionControl, action).with_session("s1")
    }

    #[test]
    fn test_accepted_violation_yields_event_record() {
        let mut pipeline = pipeline();

        let ingested = pipeline
            .ingest_at(&violation("Highway 1"), AT_MS)
            .unwrap_or_else(|err| panic!("ingest failed: {err}"));

        assert_eq!(ingested.outcome, IngestOutcome::Accepted);
        assert!(!ingested.session_ended);
        assert_eq!(ingested.records.len(), 1);
        assert_eq!(
            ingested.records.first().map(OutboundRecord::collection),
            Some(collections::VIOLATIONS)
        );
    }

    #[test]
    fn test_missing_session_is_a_normalize_error() {
        let mut pipeline = pipeline();
        let raw = RawSubmission::new(EventKind::Violation, "Speeding|70.0|Main St|1");

        let result = pipeline.ingest_at(&raw, AT_MS);
        assert!(matches!(
            result,
            Err(NormalizeError::MissingRequiredField { field: "sessionId" })
        ));
    }

    #[test]
    fn test_duplicate_in_same_bucket_is_suppressed() {
        let mut pipeline = pipeline();

        let first = pipeline
            .ingest_at(&violation("Main St"), AT_MS)
            .unwrap_or_else(|err| panic!("ingest failed: {err}"));
        let second = pipeline
            .ingest_at(&violation("Main St"), AT_MS + 200)
            .unwrap_or_else(|err| panic!("ingest failed: {err}"));

        assert_eq!(first.outcome, IngestOutcome::Accepted);
        assert_eq!(second.outcome, IngestOutcome::Suppressed);
        assert!(second.records.is_empty());
        assert_eq!(pipeline.dedup_stats().suppressed_count, 1);

        // The suppressed duplicate never reached the aggregator.
        let aggregator = pipeline.aggregator();
        let count = aggregator
            .read()
            .session_stats("s1")
            .map(|s| s.violation_count);
        assert_eq!(count, Some(1));
    }

    #[test]
    fn test_sequences_are_per_session_and_monotonic() {
        let mut pipeline = pipeline();

        let a1 = RawSubmission::new(EventKind::Violation, "Speeding|70.0|First Ave|1")
            .with_session("a");
        let b1 = RawSubmission::new(EventKind::Violation, "Speeding|70.0|First Ave|1")
            .with_session("b");
        let a2 = RawSubmission::new(EventKind::Violation, "Speeding|70.0|Second Ave|2")
            .with_session("a");

        let sequence_of = |ingested: &Ingested| match ingested.records.first() {
            Some(OutboundRecord::Event { event, .. }) => event.sequence,
            _ => 0,
        };

        let first_a = pipeline.ingest_at(&a1, AT_MS).unwrap_or_else(|err| panic!("{err}"));
        let first_b = pipeline.ingest_at(&b1, AT_MS).unwrap_or_else(|err| panic!("{err}"));
        let second_a = pipeline
            .ingest_at(&a2, AT_MS + 2_000)
            .unwrap_or_else(|err| panic!("{err}"));

        assert_eq!(sequence_of(&first_a), 1);
        assert_eq!(sequence_of(&first_b), 1);
        assert_eq!(sequence_of(&second_a), 2);
    }

    #[test]
    fn test_session_end_emits_only_the_snapshot() {
        let mut pipeline = pipeline();

        pipeline
            .ingest_at(&violation("Highway 1"), AT_MS)
            .unwrap_or_else(|err| panic!("{err}"));
        let ended = pipeline
            .ingest_at(&control("end"), AT_MS + 1_000)
            .unwrap_or_else(|err| panic!("{err}"));

        assert!(ended.session_ended);
        assert_eq!(ended.records.len(), 1);
        match ended.records.first() {
            Some(OutboundRecord::Snapshot(snapshot)) => {
                assert!(snapshot.is_final());
                assert_eq!(snapshot.violation_count, 1);
            }
            other => panic!("expected a snapshot record, got {other:?}"),
        }
    }

    #[test]
    fn test_ended_session_restarts_fresh() {
        let mut pipeline = pipeline();

        pipeline
            .ingest_at(&violation("Highway 1"), AT_MS)
            .unwrap_or_else(|err| panic!("{err}"));
        pipeline
            .ingest_at(&control("end"), AT_MS + 1_000)
            .unwrap_or_else(|err| panic!("{err}"));

        // Same session id, new lifecycle: sequences restart and the
        // old duplicate window is gone.
        let reborn = pipeline
            .ingest_at(&violation("Highway 1"), AT_MS + 2_000)
            .unwrap_or_else(|err| panic!("{err}"));

        assert_eq!(reborn.outcome, IngestOutcome::Accepted);
        match reborn.records.first() {
            Some(OutboundRecord::Event { event, .. }) => assert_eq!(event.sequence, 1),
            other => panic!("expected an event record, got {other:?}"),
        }
    }

    #[test]
    fn test_fifth_violation_adds_snapshot_record() {
        let mut pipeline = pipeline();

        for i in 0..4u64 {
            let ingested = pipeline
                .ingest_at(&violation(&format!("Street {i}")), AT_MS + i * 100)
                .unwrap_or_else(|err| panic!("{err}"));
            assert_eq!(ingested.records.len(), 1);
        }

        let fifth = pipeline
            .ingest_at(&violation("Street 4"), AT_MS + 400)
            .unwrap_or_else(|err| panic!("{err}"));

        assert_eq!(fifth.records.len(), 2);
        assert_eq!(
            fifth.records.get(1).map(OutboundRecord::collection),
            Some(collections::SESSIONS)
        );
    }

    #[test]
    fn test_sweep_releases_pipeline_state() {
        let mut pipeline = pipeline();
        pipeline
            .ingest_at(&violation("Highway 1"), AT_MS)
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(pipeline.sequences.tracked(), 1);

        let swept = pipeline.sweep_idle(AT_MS + 600_000);

        assert_eq!(swept.len(), 1);
        assert_eq!(pipeline.sequences.tracked(), 0);
        assert_eq!(pipeline.dedup_stats().tracked_sessions, 0);
        assert_eq!(pipeline.aggregator().read().active_sessions(), 0);
    }

    #[test]
    fn test_drain_all_closes_open_sessions() {
        let mut pipeline = pipeline();
        pipeline
            .ingest_at(&violation("Highway 1"), AT_MS)
            .unwrap_or_else(|err| panic!("{err}"));

        let drained = pipeline.drain_all(AT_MS + 5_000);

        assert_eq!(drained.len(), 1);
        assert!(drained.iter().all(SessionSnapshot::is_final));
        assert_eq!(pipeline.sequences.tracked(), 0);
    }
}
