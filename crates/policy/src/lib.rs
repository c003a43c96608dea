//! Aggregated ingestion policy.
//!
//! One [`IngestPolicy`] document carries every tuning knob of the
//! pipeline: severity thresholds, the duplicate window, snapshot
//! triggers, queue/retry behavior, and the orchestrator's own limits.
//! Defaults ship embedded as YAML ([`DEFAULT_POLICY_YAML`]) so the
//! shipped file and the compiled-in [`Default`] can never drift apart
//! unnoticed.
//!
//! There is no file discovery and no environment lookup here: embedders
//! load or construct a policy and hand it to the service explicitly.
//!
//! # Example
//! ```
//! use drivetrace_policy::load_default_policy;
//!
//! let policy = load_default_policy()?;
//! policy.validate()?;
//! assert_eq!(policy.snapshots.violation_stride, 5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(static_mut_refs)]

use drivetrace_dedup::DedupPolicy;
use drivetrace_outbox::QueuePolicy;
use drivetrace_session::SnapshotPolicy;
use drivetrace_severity::SeverityThresholds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default capacity of the bounded submit channel.
pub const DEFAULT_SUBMIT_CAPACITY: usize = 1_024;

/// Default cadence of the idle-session sweeper.
pub const DEFAULT_IDLE_SWEEP_INTERVAL_MS: u64 = 60_000;

/// The canonical defaults, embedded as YAML.
pub const DEFAULT_POLICY_YAML: &str = include_str!("default_policy.yaml");

/// Everything the ingestion pipeline can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestPolicy {
    /// Severity classification thresholds.
    pub severity: SeverityThresholds,

    /// Duplicate suppression window.
    pub dedup: DedupPolicy,

    /// Snapshot triggers and idle expiry.
    pub snapshots: SnapshotPolicy,

    /// Outbound queue, retry, and dead-letter behavior.
    pub queue: QueuePolicy,

    /// Capacity of the bounded submit channel; overflow drops the
    /// submission rather than blocking the caller.
    pub submit_capacity: usize,

    /// How often the idle-session sweeper runs.
    pub idle_sweep_interval_ms: u64,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            severity: SeverityThresholds::default(),
            dedup: DedupPolicy::default(),
            snapshots: SnapshotPolicy::default(),
            queue: QueuePolicy::default(),
            submit_capacity: DEFAULT_SUBMIT_CAPACITY,
            idle_sweep_interval_ms: DEFAULT_IDLE_SWEEP_INTERVAL_MS,
        }
    }
}

impl IngestPolicy {
    /// Parse a policy from YAML. Omitted fields take their defaults.
    ///
    /// # Errors
    /// Returns the underlying parse error for malformed YAML or
    /// mistyped fields.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// # Errors
    /// Returns the first nonsensical value found: a zero where the
    /// pipeline divides or times, or a backoff cap below its base.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let zero_checks: [(&'static str, bool); 11] = [
            ("dedup.bucket_ms", self.dedup.bucket_ms == 0),
            (
                "dedup.per_session_capacity",
                self.dedup.per_session_capacity == 0,
            ),
            ("snapshots.interval_ms", self.snapshots.interval_ms == 0),
            (
                "snapshots.violation_stride",
                self.snapshots.violation_stride == 0,
            ),
            (
                "snapshots.collision_stride",
                self.snapshots.collision_stride == 0,
            ),
            (
                "snapshots.idle_timeout_ms",
                self.snapshots.idle_timeout_ms == 0,
            ),
            ("queue.drain_interval_ms", self.queue.drain_interval_ms == 0),
            ("queue.backoff_base_ms", self.queue.backoff_base_ms == 0),
            ("queue.max_attempts", self.queue.max_attempts == 0),
            ("submit_capacity", self.submit_capacity == 0),
            ("idle_sweep_interval_ms", self.idle_sweep_interval_ms == 0),
        ];
        for (field, is_zero) in zero_checks {
            if is_zero {
                return Err(PolicyError::ZeroValue { field });
            }
        }

        if self.queue.backoff_cap_ms < self.queue.backoff_base_ms {
            return Err(PolicyError::BackoffCapBelowBase {
                base_ms: self.queue.backoff_base_ms,
                cap_ms: self.queue.backoff_cap_ms,
            });
        }
        Ok(())
    }
}

/// Load the canonical default policy from the embedded YAML.
///
/// # Errors
/// Fails only if the embedded document is malformed, which the test
/// suite rules out.
pub fn load_default_policy() -> Result<IngestPolicy, serde_yaml::Error> {
    IngestPolicy::from_yaml(DEFAULT_POLICY_YAML)
}

/// A policy value the pipeline cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A knob the pipeline divides or times with is zero.
    #[error("{field} must be greater than zero")]
    ZeroValue {
        /// Dotted path of the offending field.
        field: &'static str,
    },

    /// Retry delays would shrink instead of grow.
    #[error("queue.backoff_cap_ms ({cap_ms}) must be at least queue.backoff_base_ms ({base_ms})")]
    BackoffCapBelowBase {
        /// Configured base delay.
        base_ms: u64,
        /// Configured cap.
        cap_ms: u64,
    },
}
