//! Core types, configuration, and utilities for the webhook pipeline.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_BIG_SPEND_THRESHOLD, DEFAULT_BUDGET_THRESHOLD_PCT, DEFAULT_LISTEN_ADDR,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_ATTEMPTS, DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service};
pub use paths::Paths;
