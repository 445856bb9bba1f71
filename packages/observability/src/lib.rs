//! # Observability
//!
//! Centralized logging layer for the household webhook pipeline.
//!
//! Services call `observability::init()` once at startup and use standard
//! `tracing` macros everywhere else. They never decide where log lines go.
//!
//! ## Dev Mode
//!
//! With the `dev` feature enabled, every service appends structured JSONL to
//! one central file (`~/.household-webhooks/logs/dev.jsonl` by default):
//!
//! - `tail -f ~/.household-webhooks/logs/dev.jsonl | jq` for pretty JSON
//! - `lnav ~/.household-webhooks/logs/dev.jsonl` for interactive exploration
//!
//! Without the feature, logs go to stderr in compact form.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "webhooks".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("service started");
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;

use std::path::PathBuf;

pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "webhooks", "sweeper").
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path (dev mode only).
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr when the JSONL sink is active.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Calling this more than once is harmless: the first subscriber wins and
/// later calls are ignored (useful in tests).
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(&config.default_level))
            .with_target(true)
            .compact()
            .finish()
            .try_init();
    }
}

/// Build an env filter from `RUST_LOG`, falling back to the given level.
pub(crate) fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
