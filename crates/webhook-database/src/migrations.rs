//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_webhook_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_household_domain(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: webhook outbox.
fn migrate_v1_webhook_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: webhook outbox");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_kind TEXT NOT NULL
                CHECK (event_kind IN ('big_spend', 'budget_threshold', 'new_member')),
            payload TEXT NOT NULL,
            schema_version INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'sent', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            last_attempt_at TEXT,
            sent_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_webhook_events_status_created
            ON webhook_events(status, created_at);
        ",
    )?;

    record_migration(conn, 1, "webhook_outbox")?;
    Ok(())
}

/// V2: household domain tables written by the event producer.
fn migrate_v2_household_domain(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: household domain");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            currency TEXT NOT NULL,
            direction TEXT NOT NULL CHECK (direction IN ('inflow', 'outflow')),
            merchant TEXT,
            category_id TEXT,
            created_by TEXT,
            occurred_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_category_occurred
            ON transactions(household_id, category_id, occurred_at);

        CREATE TABLE IF NOT EXISTS budgets (
            household_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            period TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (category_id, period)
        );

        CREATE TABLE IF NOT EXISTS budget_threshold_alerts (
            category_id TEXT NOT NULL,
            period TEXT NOT NULL,
            fraction REAL NOT NULL,
            alerted_at TEXT NOT NULL,
            PRIMARY KEY (category_id, period)
        );

        CREATE TABLE IF NOT EXISTS household_members (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            joined_at TEXT NOT NULL,
            UNIQUE (household_id, user_id)
        );
        ",
    )?;

    record_migration(conn, 2, "household_domain")?;
    Ok(())
}
