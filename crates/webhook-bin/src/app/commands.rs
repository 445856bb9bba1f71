//! One-shot operator commands.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use event_producer::{DomainWriter, ProducerConfig};
use webhook_config_and_utils::{Config, Paths};
use webhook_database::{
    period_of, queries, Direction, NewBudget, NewMember, NewTransaction, WebhookEvent,
};
use webhook_listener::AppState;
use webhook_outbox::{OutboxSweeper, SweeperConfig};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Subcommand, Debug, Clone)]
pub enum SimulateEvent {
    /// Record an outflow transaction
    BigSpend {
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "demo-household")]
        household: String,
        #[arg(long, default_value = "$")]
        currency: String,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Set a category budget, then spend against it
    Budget {
        #[arg(long)]
        category: String,
        /// Budget for the period
        #[arg(long)]
        budget: f64,
        /// Amount spent in one transaction
        #[arg(long)]
        spent: f64,
        #[arg(long, default_value = "demo-household")]
        household: String,
    },
    /// Add a household member
    Member {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "member")]
        role: String,
        #[arg(long, default_value = "demo-household")]
        household: String,
    },
}

/// Print outbox counts and recent events.
pub async fn show_status(config: &Config, paths: &Paths, limit: usize) -> CommandResult {
    let db = super::open_database(paths).await?;
    let counts = db.call(queries::count_events_by_status).await?;
    let recent = db
        .call(move |conn| queries::list_recent_events(conn, limit))
        .await?;

    println!("Database: {}", db.path());
    println!(
        "Destinations: big_spend={} budget_threshold={} new_member={}",
        presence(&config.big_spend_url),
        presence(&config.budget_threshold_url),
        presence(&config.new_member_url),
    );
    println!(
        "Outbox: {} pending, {} sent, {} failed",
        counts.pending, counts.sent, counts.failed
    );

    if recent.is_empty() {
        println!("No events yet");
        return Ok(());
    }

    println!();
    for event in &recent {
        println!("{}", describe(event));
    }
    Ok(())
}

/// Run one sweep pass.
pub async fn sweep(config: Config, paths: &Paths) -> CommandResult {
    let db = super::open_database(paths).await?;
    let sweeper_config = SweeperConfig::from(&config);
    let state = AppState::new(config, db.clone())?;

    let sweeper = OutboxSweeper::new(state.dispatcher.clone(), db, sweeper_config);
    let report = sweeper.sweep_once().await?;
    println!(
        "Attempted {}, delivered {}, failed {}, deferred {}",
        report.attempted, report.delivered, report.failed, report.deferred
    );
    Ok(())
}

/// Requeue a failed event and deliver it immediately.
pub async fn retry(config: Config, paths: &Paths, id: &str) -> CommandResult {
    let db = super::open_database(paths).await?;
    let owned = id.to_string();
    let event = db
        .call(move |conn| queries::requeue_failed_event(conn, &owned))
        .await?;

    let state = AppState::new(config, db)?;
    let outcome = state.dispatcher.deliver_event(&event).await;
    println!("{}: {:?}", event.id, outcome);
    Ok(())
}

/// Write a domain row and print the events it produced.
pub async fn simulate(config: &Config, paths: &Paths, event: SimulateEvent) -> CommandResult {
    let db = super::open_database(paths).await?;
    let producer = ProducerConfig::from(config);
    let now = Utc::now();

    let events = db
        .call_mut(move |conn| {
            let mut writer = DomainWriter::new(conn, producer);
            Ok(simulate_write(&mut writer, event, now))
        })
        .await??;

    if events.is_empty() {
        println!("No event produced");
    }
    for event in &events {
        println!("Enqueued {}", describe(event));
    }
    Ok(())
}

fn simulate_write(
    writer: &mut DomainWriter<'_>,
    event: SimulateEvent,
    now: DateTime<Utc>,
) -> event_producer::ProducerResult<Vec<WebhookEvent>> {
    match event {
        SimulateEvent::BigSpend {
            amount,
            household,
            currency,
            merchant,
            category,
        } => {
            let outcome = writer.record_transaction(&NewTransaction {
                household_id: household,
                amount,
                currency,
                direction: Direction::Outflow,
                merchant,
                category_id: category,
                created_by: None,
                occurred_at: now,
            })?;
            Ok(outcome.events)
        }
        SimulateEvent::Budget {
            category,
            budget,
            spent,
            household,
        } => {
            writer.set_budget(&NewBudget {
                household_id: household.clone(),
                category_id: category.clone(),
                period: period_of(&now),
                amount: budget,
            })?;
            let outcome = writer.record_transaction(&NewTransaction {
                household_id: household,
                amount: spent,
                currency: "$".into(),
                direction: Direction::Outflow,
                merchant: None,
                category_id: Some(category),
                created_by: None,
                occurred_at: now,
            })?;
            Ok(outcome.events)
        }
        SimulateEvent::Member {
            user,
            role,
            household,
        } => {
            let outcome = writer.add_member(&NewMember {
                household_id: household,
                user_id: user,
                role,
            })?;
            Ok(outcome.events)
        }
    }
}

fn presence(url: &Option<String>) -> &'static str {
    if url.is_some() {
        "configured"
    } else {
        "not set"
    }
}

fn describe(event: &WebhookEvent) -> String {
    let mut line = format!(
        "{}  {:<16} {:<7} attempts={} created={}",
        event.id,
        event.event_kind.as_str(),
        event.status.as_str(),
        event.attempts,
        event.created_at.to_rfc3339(),
    );
    if let Some(error) = &event.last_error {
        line.push_str(&format!(" last_error={error}"));
    }
    line
}
