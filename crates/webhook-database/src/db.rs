//! Synchronous database handle.

use crate::{
    migrations, queries, Budget, DatabaseResult, EventKind, EventPayload, HouseholdMember,
    NewBudget, NewMember, NewTransaction, OutboxCounts, Transaction, WebhookEvent,
};
use rusqlite::Connection;
use std::path::Path;

/// Database wrapper with query methods.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // WAL does not apply to in-memory databases
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference, needed to open a transaction.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    // ==========================================
    // Webhook outbox
    // ==========================================

    pub fn enqueue_event(
        &self,
        kind: EventKind,
        payload: &EventPayload,
    ) -> DatabaseResult<WebhookEvent> {
        queries::enqueue_event(&self.conn, kind, payload)
    }

    pub fn get_event(&self, id: &str) -> DatabaseResult<Option<WebhookEvent>> {
        queries::get_event(&self.conn, id)
    }

    pub fn mark_event_sent(&self, id: &str) -> DatabaseResult<WebhookEvent> {
        queries::mark_event_sent(&self.conn, id)
    }

    pub fn mark_event_failed(&self, id: &str, error: &str) -> DatabaseResult<WebhookEvent> {
        queries::mark_event_failed(&self.conn, id, error)
    }

    pub fn peek_pending_events(&self, limit: usize) -> DatabaseResult<Vec<WebhookEvent>> {
        queries::peek_pending_events(&self.conn, limit)
    }

    pub fn list_retryable_failed_events(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> DatabaseResult<Vec<WebhookEvent>> {
        queries::list_retryable_failed_events(&self.conn, max_attempts, limit)
    }

    pub fn requeue_failed_event(&self, id: &str) -> DatabaseResult<WebhookEvent> {
        queries::requeue_failed_event(&self.conn, id)
    }

    pub fn count_events_by_status(&self) -> DatabaseResult<OutboxCounts> {
        queries::count_events_by_status(&self.conn)
    }

    pub fn list_recent_events(&self, limit: usize) -> DatabaseResult<Vec<WebhookEvent>> {
        queries::list_recent_events(&self.conn, limit)
    }

    // ==========================================
    // Household domain
    // ==========================================

    pub fn get_transaction(&self, id: &str) -> DatabaseResult<Option<Transaction>> {
        queries::get_transaction(&self.conn, id)
    }

    pub fn insert_transaction(&self, tx: &NewTransaction) -> DatabaseResult<Transaction> {
        queries::insert_transaction(&self.conn, tx)
    }

    pub fn upsert_budget(&self, budget: &NewBudget) -> DatabaseResult<Budget> {
        queries::upsert_budget(&self.conn, budget)
    }

    pub fn insert_member(&self, member: &NewMember) -> DatabaseResult<HouseholdMember> {
        queries::insert_member(&self.conn, member)
    }
}
