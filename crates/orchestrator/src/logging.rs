//! Structured logging setup for embedding applications.
//!
//! The service itself only emits `tracing` events; installing a
//! subscriber is the embedder's choice. [`init_logging`] wires up the
//! usual one: an env-filter honoring `RUST_LOG`, with either human or
//! JSON line output.

use anyhow::Result;
use tracing::info;

/// Structured logging configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is unset.
    pub level: tracing::Level,
    /// Emit JSON lines instead of human-readable output.
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            json_format: false,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Errors
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    use tracing_subscriber::{
        EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let fmt_layer = if config.json_format {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    info!(
        level = %config.level,
        json = config.json_format,
        "logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_human_readable_info() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, tracing::Level::INFO);
        assert!(!config.json_format);
    }
}
