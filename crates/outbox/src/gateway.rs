//! Storage gateway trait and the shipped backends.
//!
//! The gateway is the only seam between the pipeline and durable
//! storage. Implementations must classify every failure as either
//! transient ([`GatewayError::Unavailable`], worth retrying) or
//! permanent ([`GatewayError::Rejected`], not worth retrying); the
//! queue's retry and dead-letter behavior is driven entirely by that
//! distinction.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Identifier assigned by a gateway to a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Why a save did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The backend could not be reached or is temporarily refusing
    /// work. The record is intact; the queue will retry it.
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Backend-supplied context.
        reason: String,
    },

    /// The backend rejected this record and always will. Retrying is
    /// pointless; the queue dead-letters it.
    #[error("record rejected: {reason}")]
    Rejected {
        /// Backend-supplied context.
        reason: String,
    },
}

impl GatewayError {
    /// Transient failure worth retrying.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Permanent failure; the record will never be accepted.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same record may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Durable storage abstraction for outbound records.
///
/// One logical write per call: `record` lands in `collection` or an
/// error explains why not. Implementations must be safe to share across
/// tasks; the queue calls `save` from a single drain task but health
/// probes may run concurrently.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Store one record in the named collection.
    async fn save(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<RecordId, GatewayError>;
}

/// Record captured by [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct SavedRecord {
    /// Collection the record was saved to.
    pub collection: String,
    /// The stored document.
    pub document: serde_json::Value,
}

#[derive(Debug, Default)]
struct MemoryState {
    saved: Vec<SavedRecord>,
    script: VecDeque<GatewayError>,
    next_id: u64,
}

/// In-memory gateway for tests and embedded use.
///
/// Failures can be scripted: each queued error is consumed by exactly
/// one `save` call, in order, before any record is stored.
///
/// # Example
/// ```
/// use drivetrace_outbox::{GatewayError, MemoryGateway};
///
/// let gateway = MemoryGateway::new();
/// gateway.push_failure(GatewayError::unavailable("backend down"));
/// // The next save fails; the one after succeeds.
/// ```
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next unscripted `save` call to fail with `error`.
    pub fn push_failure(&self, error: GatewayError) {
        self.state.lock().script.push_back(error);
    }

    /// Everything stored so far, in save order.
    pub fn saved(&self) -> Vec<SavedRecord> {
        self.state.lock().saved.clone()
    }

    /// Documents stored in one collection, in save order.
    pub fn saved_in(&self, collection: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .saved
            .iter()
            .filter(|record| record.collection == collection)
            .map(|record| record.document.clone())
            .collect()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.state.lock().saved.len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn save(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<RecordId, GatewayError> {
        let mut state = self.state.lock();
        if let Some(error) = state.script.pop_front() {
            return Err(error);
        }
        state.next_id += 1;
        let id = RecordId(format!("mem-{}", state.next_id));
        state.saved.push(SavedRecord {
            collection: collection.to_owned(),
            document: record,
        });
        Ok(id)
    }
}

/// Append-only JSON Lines gateway.
///
/// Each collection becomes one `<collection>.jsonl` file under the base
/// directory, one document per line. Intended as best-effort local
/// durability; I/O errors surface as transient so the queue keeps the
/// records and retries.
#[derive(Debug)]
pub struct JsonFileGateway {
    base_dir: PathBuf,
    sequence: AtomicU64,
}

impl JsonFileGateway {
    /// Create a gateway writing under `base_dir`. The directory is
    /// created lazily on first save.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Directory the collection files live under.
    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileGateway {
    async fn save(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<RecordId, GatewayError> {
        // A record that cannot serialize will never be storable.
        let mut line = serde_json::to_string(&record)
            .map_err(|err| GatewayError::rejected(err.to_string()))?;
        line.push('\n');

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        let path = self.base_dir.join(format!("{collection}.jsonl"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(RecordId(format!("{collection}-{seq}")))
    }
}
