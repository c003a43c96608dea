//! Async shell around the ingestion pipeline.
//!
//! [`IngestService`] owns three background tasks on the caller's Tokio
//! runtime:
//!
//! * an ingest worker pulling submissions off a bounded channel and
//!   running them through the [`Ingestor`],
//! * a drain loop shipping queued records to the persistence gateway,
//!   with backoff between passes while the gateway is down,
//! * an idle sweeper closing sessions that stopped sending events.
//!
//! The embedding application talks to the service from any thread:
//! [`IngestService::submit`] never blocks, and the query surface reads
//! live aggregation state without touching the pipeline lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use drivetrace_dedup::DedupStats;
use drivetrace_events::{OutboundRecord, SessionSnapshot, UserAggregate, wall_clock_ms};
use drivetrace_normalizer::RawSubmission;
use drivetrace_outbox::{FlushReport, OutboundQueue, PersistenceGateway, QueueStats};
use drivetrace_policy::IngestPolicy;
use drivetrace_session::SessionAggregator;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::ingestor::Ingestor;

/// Point-in-time view of service internals for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Records waiting to be persisted.
    pub queue_depth: usize,
    /// Records parked after exhausting retries.
    pub dead_letter_count: usize,
    /// Sessions currently open.
    pub active_sessions: usize,
    /// Submissions refused because the intake buffer was full or the
    /// service had stopped.
    pub submissions_dropped: u64,
    /// Duplicate-filter counters.
    pub dedup: DedupStats,
}

/// Running ingestion service.
///
/// Created with [`IngestService::start`], torn down with
/// [`IngestService::shutdown`]. Dropping the handle without calling
/// `shutdown` aborts nothing but loses the final flush, so embedders
/// should treat `shutdown` as mandatory on the happy path.
pub struct IngestService {
    submit_tx: mpsc::Sender<RawSubmission>,
    shutdown_tx: watch::Sender<bool>,
    ingestor: Arc<Mutex<Ingestor>>,
    aggregator: Arc<RwLock<SessionAggregator>>,
    queue: Arc<OutboundQueue>,
    gateway: Arc<dyn PersistenceGateway>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<()>,
    drainer: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl IngestService {
    /// Validate the policy and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime; the worker, drain,
    /// and sweep tasks are spawned onto it.
    ///
    /// # Errors
    /// Returns [`IngestError::Policy`] when the policy fails
    /// validation. Nothing is spawned in that case.
    pub fn start(
        policy: IngestPolicy,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, IngestError> {
        policy.validate()?;

        let ingestor = Ingestor::new(&policy);
        let aggregator = ingestor.aggregator();
        let ingestor = Arc::new(Mutex::new(ingestor));
        let queue = Arc::new(OutboundQueue::new(policy.queue.clone()));
        let dropped = Arc::new(AtomicU64::new(0));

        let (submit_tx, submit_rx) = mpsc::channel(policy.submit_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = {
            let ingestor = Arc::clone(&ingestor);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                Self::worker_loop(submit_rx, ingestor, queue).await;
            })
        };

        let drainer = {
            let queue = Arc::clone(&queue);
            let gateway = Arc::clone(&gateway);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                Self::drain_loop(queue, gateway, shutdown_rx).await;
            })
        };

        let sweeper = {
            let ingestor = Arc::clone(&ingestor);
            let queue = Arc::clone(&queue);
            let sweep_interval = Duration::from_millis(policy.idle_sweep_interval_ms);
            tokio::spawn(async move {
                Self::sweep_loop(ingestor, queue, sweep_interval, shutdown_rx).await;
            })
        };

        info!(
            submit_capacity = policy.submit_capacity,
            drain_interval_ms = policy.queue.drain_interval_ms,
            idle_sweep_interval_ms = policy.idle_sweep_interval_ms,
            "ingest service started"
        );

        Ok(Self {
            submit_tx,
            shutdown_tx,
            ingestor,
            aggregator,
            queue,
            gateway,
            dropped,
            worker,
            drainer,
            sweeper,
        })
    }

    /// Hand a submission to the pipeline without waiting.
    ///
    /// When the intake buffer is full the submission is dropped and
    /// counted; producers are never blocked by a slow gateway.
    pub fn submit(&self, raw: RawSubmission) {
        if let Err(err) = self.submit_tx.try_send(raw) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match err {
                TrySendError::Full(_) => warn!("submission dropped: intake buffer full"),
                TrySendError::Closed(_) => warn!("submission dropped: service stopped"),
            }
        }
    }

    /// Live statistics for one session, if it is open.
    pub fn session_stats(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.aggregator.read().session_stats(session_id)
    }

    /// Cross-session totals for a user. Unseen users report zeroes.
    pub fn user_aggregate(&self, user_id: &str) -> UserAggregate {
        self.aggregator.read().user_aggregate(user_id)
    }

    /// Number of sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.aggregator.read().active_sessions()
    }

    /// Current queue counters.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Snapshot of service internals. Locks are taken one at a time,
    /// so the report may straddle concurrent updates.
    pub fn health(&self) -> HealthReport {
        let dedup = self.ingestor.lock().dedup_stats();
        let active_sessions = self.aggregator.read().active_sessions();
        HealthReport {
            queue_depth: self.queue.depth(),
            dead_letter_count: self.queue.dead_letter_count(),
            active_sessions,
            submissions_dropped: self.dropped.load(Ordering::Relaxed),
            dedup,
        }
    }

    /// Stop intake, finalize every open session, and flush the queue.
    ///
    /// Submissions already in the intake buffer are processed before
    /// the pipeline stops. A drain pass still inside a gateway call is
    /// granted the policy's shutdown window and then aborted; the
    /// final flush runs at most the same window again. Anything still
    /// queued after that is reported in the returned [`FlushReport`]
    /// rather than waited on.
    pub async fn shutdown(mut self) -> FlushReport {
        info!("ingest service shutting down");

        // Closing the channel lets the worker drain the backlog and
        // exit on its own.
        drop(self.submit_tx);
        if let Err(err) = self.worker.await {
            warn!(error = %err, "ingest worker ended abnormally");
        }

        if self.shutdown_tx.send(true).is_err() {
            debug!("background loops already stopped");
        }
        // A pass already inside a gateway call cannot see the stop
        // signal; grant it the flush window, then abort it. An aborted
        // pass leaves its in-flight record at the head of the queue.
        let window = self.queue.policy().shutdown_flush_window();
        match timeout(window, &mut self.drainer).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "drain loop ended abnormally"),
            Err(_) => {
                warn!("drain pass still running at shutdown; aborting it");
                self.drainer.abort();
                if let Err(err) = (&mut self.drainer).await {
                    if !err.is_cancelled() {
                        warn!(error = %err, "drain loop ended abnormally");
                    }
                }
            }
        }
        if let Err(err) = self.sweeper.await {
            warn!(error = %err, "idle sweeper ended abnormally");
        }

        let snapshots = self.ingestor.lock().drain_all(wall_clock_ms());
        for snapshot in snapshots {
            self.queue.enqueue(OutboundRecord::Snapshot(snapshot));
        }

        let before = self.queue.stats();
        match timeout(window, self.queue.flush(self.gateway.as_ref())).await {
            Ok(report) => {
                info!(
                    saved = report.succeeded,
                    dead_lettered = report.failed,
                    still_queued = report.still_queued,
                    "final flush complete"
                );
                report
            }
            Err(_) => {
                let after = self.queue.stats();
                let report = FlushReport {
                    succeeded: usize::try_from(after.saved_total.saturating_sub(before.saved_total))
                        .unwrap_or(usize::MAX),
                    failed: usize::try_from(
                        after.dead_lettered_total.saturating_sub(before.dead_lettered_total),
                    )
                    .unwrap_or(usize::MAX),
                    still_queued: after.depth,
                };
                warn!(
                    still_queued = report.still_queued,
                    "shutdown flush window elapsed with records unshipped"
                );
                report
            }
        }
    }

    async fn worker_loop(
        mut submit_rx: mpsc::Receiver<RawSubmission>,
        ingestor: Arc<Mutex<Ingestor>>,
        queue: Arc<OutboundQueue>,
    ) {
        while let Some(raw) = submit_rx.recv().await {
            let outcome = ingestor.lock().ingest(&raw);
            match outcome {
                Ok(ingested) => {
                    for record in ingested.records {
                        queue.enqueue(record);
                    }
                }
                Err(err) => {
                    let error = IngestError::from(err);
                    warn!(
                        category = %error.category(),
                        error = %error,
                        "submission rejected"
                    );
                }
            }
        }
        debug!("ingest worker stopped");
    }

    async fn drain_loop(
        queue: Arc<OutboundQueue>,
        gateway: Arc<dyn PersistenceGateway>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(queue.policy().drain_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = queue.wait_for_records() => {}
                _ = shutdown_rx.changed() => break,
            }

            let outcome = queue.drain(gateway.as_ref()).await;
            if let Some(delay) = outcome.retry_in {
                // Hold off until the backoff elapses; enqueues during
                // the pause are picked up by the next pass.
                tokio::select! {
                    () = sleep(delay) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
        debug!("drain loop stopped");
    }

    async fn sweep_loop(
        ingestor: Arc<Mutex<Ingestor>>,
        queue: Arc<OutboundQueue>,
        sweep_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            let snapshots = ingestor.lock().sweep_idle(wall_clock_ms());
            for snapshot in snapshots {
                queue.enqueue(OutboundRecord::Snapshot(snapshot));
            }
        }
        debug!("idle sweeper stopped");
    }
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("queue_depth", &self.queue.depth())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
