//! # Event Producer
//!
//! Decides which household writes become webhook events and enqueues them in
//! the same SQLite transaction as the write itself.
//!
//! - [`rules`]: pure predicates (BigSpend, BudgetThreshold, NewMember)
//! - [`DomainWriter`]: transactional writes over `&mut rusqlite::Connection`
//!
//! ```ignore
//! let mut writer = DomainWriter::new(db.connection_mut(), ProducerConfig::from(&config));
//! let outcome = writer.record_transaction(&new_tx)?;
//! for event in &outcome.events {
//!     tracing::info!(event_id = %event.id, "queued");
//! }
//! ```

mod error;
pub mod rules;
mod writer;

pub use error::{ProducerError, ProducerResult};
pub use writer::DomainWriter;

use webhook_config_and_utils::{Config, DEFAULT_BIG_SPEND_THRESHOLD, DEFAULT_BUDGET_THRESHOLD_PCT};
use webhook_database::WebhookEvent;

/// Thresholds the producer rules compare against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProducerConfig {
    /// Outflows at or above this amount produce BigSpend.
    pub big_spend_threshold: f64,
    /// Fraction of a category budget that produces BudgetThreshold.
    pub budget_threshold_pct: f64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            big_spend_threshold: DEFAULT_BIG_SPEND_THRESHOLD,
            budget_threshold_pct: DEFAULT_BUDGET_THRESHOLD_PCT,
        }
    }
}

impl From<&Config> for ProducerConfig {
    fn from(config: &Config) -> Self {
        Self {
            big_spend_threshold: config.big_spend_threshold,
            budget_threshold_pct: config.budget_threshold_pct,
        }
    }
}

/// A committed domain row and the outbox events written with it.
#[derive(Debug, Clone)]
pub struct ProducerOutcome<T> {
    pub record: T,
    pub events: Vec<WebhookEvent>,
}
