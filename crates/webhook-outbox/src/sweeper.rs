//! Outbox sweeper.
//!
//! Periodically reads the outbox and delivers what is owed: every Pending
//! row, and Failed rows that are under the attempt ceiling and past their
//! backoff. Pushes are the fast path; the sweeper covers pushes that never
//! arrived and deliveries that failed.
//!
//! # Backoff
//!
//! Retry delay is `base * 2^(attempts - 1)`, capped at `backoff_max`. With
//! the defaults (base 2s, max 300s): 2s, 4s, 8s, ... then 300s.

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::OutboxResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use webhook_config_and_utils::Config;
use webhook_database::{queries, AsyncDatabase, WebhookEvent};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Maximum rows read per status per sweep.
    pub batch_size: usize,
    /// Failed rows with this many attempts are left alone.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 50,
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for SweeperConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sweep_interval(),
            max_attempts: config.max_attempts,
            ..Self::default()
        }
    }
}

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failed rows still inside their backoff window.
    pub deferred: usize,
}

pub struct OutboxSweeper {
    dispatcher: Arc<Dispatcher>,
    db: AsyncDatabase,
    config: SweeperConfig,
}

impl OutboxSweeper {
    pub fn new(dispatcher: Arc<Dispatcher>, db: AsyncDatabase, config: SweeperConfig) -> Self {
        Self {
            dispatcher,
            db,
            config,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Run one pass over the outbox.
    pub async fn sweep_once(&self) -> OutboxResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> OutboxResult<SweepReport> {
        let batch_size = self.config.batch_size;
        let max_attempts = self.config.max_attempts;

        let pending = self
            .db
            .call(move |conn| queries::peek_pending_events(conn, batch_size))
            .await?;
        let retryable = self
            .db
            .call(move |conn| queries::list_retryable_failed_events(conn, max_attempts, batch_size))
            .await?;

        let mut report = SweepReport::default();
        let mut due: Vec<WebhookEvent> = pending;
        for event in retryable {
            if is_due(event.last_attempt_at, event.attempts, now, &self.config) {
                due.push(event);
            } else {
                report.deferred += 1;
            }
        }

        for event in &due {
            report.attempted += 1;
            match self.dispatcher.deliver_event(event).await {
                DispatchOutcome::Delivered | DispatchOutcome::NoSubscriber => report.delivered += 1,
                DispatchOutcome::AlreadySent => {}
                other => {
                    debug!(event_id = %event.id, outcome = ?other, "Sweep delivery did not succeed");
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                deferred = report.deferred,
                "Outbox sweep finished"
            );
        }
        Ok(report)
    }

    /// Spawn the sweep loop. It exits when `shutdown` flips to `true` or its
    /// sender is dropped.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.config.interval.as_secs(), "Outbox sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(error = %e, "Outbox sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Outbox sweeper stopped");
        })
    }
}

/// Whether a failed row is past its backoff window.
pub fn is_due(
    last_attempt_at: Option<DateTime<Utc>>,
    attempts: i64,
    now: DateTime<Utc>,
    config: &SweeperConfig,
) -> bool {
    let Some(last_attempt) = last_attempt_at else {
        return true;
    };

    now >= last_attempt + compute_backoff(attempts, config)
}

/// Delay owed after `attempts` failures. Zero for no failures.
pub fn compute_backoff(attempts: i64, config: &SweeperConfig) -> chrono::Duration {
    if attempts <= 0 {
        return chrono::Duration::zero();
    }

    let base_ms = config.backoff_base.as_millis() as u64;
    let max_ms = config.backoff_max.as_millis() as u64;
    let shift = u32::try_from(attempts - 1).unwrap_or(u32::MAX);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    chrono::Duration::milliseconds(delay_ms as i64)
}
