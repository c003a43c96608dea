//! Top-level error type for the ingestion service.
//!
//! Component crates keep their own focused error enums; this one wraps
//! them for the service seam, with classification that tells the
//! operator loop whether an error is worth retrying.

use core::fmt;

use drivetrace_normalizer::NormalizeError;
use drivetrace_outbox::GatewayError;
use drivetrace_policy::PolicyError;

/// Unified error for everything the ingestion service can fail with.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A submission could not be turned into a normalized event.
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    /// The supplied policy is unusable.
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),

    /// The storage gateway failed.
    #[error("storage failed: {0}")]
    Gateway(#[from] GatewayError),

    /// A service-level fault with context.
    #[error("{0}")]
    Service(String),
}

impl IngestError {
    /// Create a service-level error with a message.
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Which part of the pipeline produced this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Normalize(_) => ErrorCategory::Normalization,
            Self::Policy(_) => ErrorCategory::Policy,
            Self::Gateway(_) => ErrorCategory::Storage,
            Self::Service(_) => ErrorCategory::Service,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Malformed submissions and bad policies never become valid by
    /// waiting; only a transient storage outage does.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Normalize(_) | Self::Policy(_) | Self::Service(_) => false,
            Self::Gateway(error) => error.is_transient(),
        }
    }
}

/// Pipeline stage an error belongs to, for logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Wire-format and payload parsing.
    Normalization,
    /// Configuration validation.
    Policy,
    /// Durable storage.
    Storage,
    /// The service shell itself.
    Service,
}

impl ErrorCategory {
    /// Stable lowercase name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normalization => "normalization",
            Self::Policy => "policy",
            Self::Storage => "storage",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
