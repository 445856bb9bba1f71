//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter, so it can run
//! inside an open transaction, behind `Database`, or inside
//! `AsyncDatabase::call`.

use crate::{
    Budget, DatabaseError, DatabaseResult, Direction, EventKind, EventPayload, HouseholdMember,
    NewBudget, NewMember, NewTransaction, OutboxCounts, Transaction, WebhookEvent, WebhookStatus,
    PAYLOAD_SCHEMA_VERSION,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

const EVENT_COLUMNS: &str = "id, event_kind, payload, schema_version, status, attempts, \
     last_error, created_at, last_attempt_at, sent_at";

// ==========================================
// Webhook outbox
// ==========================================

/// Insert a new outbox event with status `pending` and zero attempts.
pub fn enqueue_event(
    conn: &Connection,
    kind: EventKind,
    payload: &EventPayload,
) -> DatabaseResult<WebhookEvent> {
    if payload.kind() != kind {
        return Err(DatabaseError::InvalidData(format!(
            "payload for {} cannot be enqueued as {}",
            payload.kind(),
            kind
        )));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let payload_json = serde_json::to_string(payload)?;
    let now = now_rfc3339();

    conn.execute(
        "INSERT INTO webhook_events (id, event_kind, payload, schema_version, status, attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)",
        params![id, kind.as_str(), payload_json, PAYLOAD_SCHEMA_VERSION, now],
    )?;
    debug!(event_id = %id, kind = %kind, "Webhook event enqueued");

    get_event(conn, &id)?
        .ok_or_else(|| DatabaseError::NotFound("Webhook event not found after insert".to_string()))
}

/// Get an outbox event by ID.
pub fn get_event(conn: &Connection, id: &str) -> DatabaseResult<Option<WebhookEvent>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = ?1");
    let mut stmt = conn.prepare_cached(&sql)?;

    match stmt.query_row(params![id], event_from_row) {
        Ok(event) => Ok(Some(event)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Mark an event as delivered.
///
/// Pending or Failed rows become Sent with `sent_at` set and one more
/// attempt counted. A row that is already Sent is returned unchanged.
pub fn mark_event_sent(conn: &Connection, id: &str) -> DatabaseResult<WebhookEvent> {
    let now = now_rfc3339();
    let changed = conn.execute(
        "UPDATE webhook_events
         SET status = 'sent', sent_at = ?1, last_attempt_at = ?1, attempts = attempts + 1
         WHERE id = ?2 AND status <> 'sent'",
        params![now, id],
    )?;

    let event = require_event(conn, id)?;
    if changed > 0 {
        debug!(event_id = %id, attempts = event.attempts, "Webhook event marked sent");
    }
    Ok(event)
}

/// Record a failed delivery attempt.
///
/// Pending or Failed rows become Failed with the reason and attempt time
/// recorded. A Sent row is never touched.
pub fn mark_event_failed(conn: &Connection, id: &str, error: &str) -> DatabaseResult<WebhookEvent> {
    let now = now_rfc3339();
    let changed = conn.execute(
        "UPDATE webhook_events
         SET status = 'failed', attempts = attempts + 1, last_error = ?1, last_attempt_at = ?2
         WHERE id = ?3 AND status <> 'sent'",
        params![error, now, id],
    )?;

    let event = require_event(conn, id)?;
    if changed > 0 {
        debug!(event_id = %id, attempts = event.attempts, "Webhook event marked failed");
    }
    Ok(event)
}

/// Get pending events, oldest first.
pub fn peek_pending_events(conn: &Connection, limit: usize) -> DatabaseResult<Vec<WebhookEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM webhook_events
         WHERE status = 'pending'
         ORDER BY created_at ASC, rowid ASC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let events = stmt
        .query_map(params![limit as i64], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Get failed events still under the attempt ceiling, least recently tried first.
pub fn list_retryable_failed_events(
    conn: &Connection,
    max_attempts: u32,
    limit: usize,
) -> DatabaseResult<Vec<WebhookEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM webhook_events
         WHERE status = 'failed' AND attempts < ?1
         ORDER BY last_attempt_at ASC, rowid ASC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let events = stmt
        .query_map(params![max_attempts, limit as i64], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

/// Move a Failed event back to Pending so the next dispatch picks it up.
///
/// Pending rows are returned unchanged. Sent rows are rejected.
pub fn requeue_failed_event(conn: &Connection, id: &str) -> DatabaseResult<WebhookEvent> {
    conn.execute(
        "UPDATE webhook_events SET status = 'pending' WHERE id = ?1 AND status = 'failed'",
        params![id],
    )?;

    let event = require_event(conn, id)?;
    if event.status == WebhookStatus::Sent {
        return Err(DatabaseError::InvalidTransition(format!(
            "webhook event {id} was already sent"
        )));
    }
    Ok(event)
}

/// Count outbox rows per status.
pub fn count_events_by_status(conn: &Connection) -> DatabaseResult<OutboxCounts> {
    let mut stmt =
        conn.prepare_cached("SELECT status, COUNT(*) FROM webhook_events GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = OutboxCounts::default();
    for (status, count) in rows {
        match WebhookStatus::parse(&status) {
            Some(WebhookStatus::Pending) => counts.pending = count,
            Some(WebhookStatus::Sent) => counts.sent = count,
            Some(WebhookStatus::Failed) => counts.failed = count,
            None => {}
        }
    }
    Ok(counts)
}

/// List the most recently created events.
pub fn list_recent_events(conn: &Connection, limit: usize) -> DatabaseResult<Vec<WebhookEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM webhook_events
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let events = stmt
        .query_map(params![limit as i64], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

fn require_event(conn: &Connection, id: &str) -> DatabaseResult<WebhookEvent> {
    get_event(conn, id)?
        .ok_or_else(|| DatabaseError::NotFound(format!("webhook event {id}")))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let kind_raw: String = row.get(1)?;
    let event_kind = EventKind::parse(&kind_raw)
        .ok_or_else(|| invalid_column(1, format!("unknown event kind: {kind_raw}")))?;

    let payload_raw: String = row.get(2)?;
    let payload = EventPayload::decode_str(event_kind, &payload_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    let status_raw: String = row.get(4)?;
    let status = WebhookStatus::parse(&status_raw)
        .ok_or_else(|| invalid_column(4, format!("unknown status: {status_raw}")))?;

    Ok(WebhookEvent {
        id: row.get(0)?,
        event_kind,
        payload,
        schema_version: row.get(3)?,
        status,
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
        last_attempt_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
        sent_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
    })
}

fn invalid_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(DatabaseError::InvalidData(message)),
    )
}

// ==========================================
// Transactions
// ==========================================

/// Insert a new transaction.
pub fn insert_transaction(conn: &Connection, tx: &NewTransaction) -> DatabaseResult<Transaction> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO transactions (id, household_id, amount, currency, direction, merchant, category_id, created_by, occurred_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            tx.household_id,
            tx.amount,
            tx.currency,
            tx.direction.as_str(),
            tx.merchant,
            tx.category_id,
            tx.created_by,
            format_datetime(&tx.occurred_at),
            now_rfc3339(),
        ],
    )?;
    get_transaction(conn, &id)?
        .ok_or_else(|| DatabaseError::NotFound("Transaction not found after insert".to_string()))
}

/// Get a transaction by ID.
pub fn get_transaction(conn: &Connection, id: &str) -> DatabaseResult<Option<Transaction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, household_id, amount, currency, direction, merchant, category_id, created_by, occurred_at, created_at
         FROM transactions WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        let direction_raw: String = row.get(4)?;
        let direction = Direction::parse(&direction_raw)
            .ok_or_else(|| invalid_column(4, format!("unknown direction: {direction_raw}")))?;
        Ok(Transaction {
            id: row.get(0)?,
            household_id: row.get(1)?,
            amount: row.get(2)?,
            currency: row.get(3)?,
            direction,
            merchant: row.get(5)?,
            category_id: row.get(6)?,
            created_by: row.get(7)?,
            occurred_at: parse_datetime(row.get::<_, String>(8)?),
            created_at: parse_datetime(row.get::<_, String>(9)?),
        })
    });

    match result {
        Ok(tx) => Ok(Some(tx)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Total outflow for a category in a `YYYY-MM` period.
pub fn category_period_spend(
    conn: &Connection,
    household_id: &str,
    category_id: &str,
    period: &str,
) -> DatabaseResult<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0.0) FROM transactions
         WHERE household_id = ?1 AND category_id = ?2 AND direction = 'outflow'
           AND substr(occurred_at, 1, 7) = ?3",
        params![household_id, category_id, period],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ==========================================
// Budgets
// ==========================================

/// Create or replace the budget for a category and period.
pub fn upsert_budget(conn: &Connection, budget: &NewBudget) -> DatabaseResult<Budget> {
    conn.execute(
        "INSERT INTO budgets (household_id, category_id, period, amount, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(category_id, period) DO UPDATE SET
             household_id = excluded.household_id,
             amount = excluded.amount,
             updated_at = excluded.updated_at",
        params![
            budget.household_id,
            budget.category_id,
            budget.period,
            budget.amount,
            now_rfc3339(),
        ],
    )?;
    get_budget(conn, &budget.category_id, &budget.period)?
        .ok_or_else(|| DatabaseError::NotFound("Budget not found after upsert".to_string()))
}

/// Get the budget for a category and period.
pub fn get_budget(
    conn: &Connection,
    category_id: &str,
    period: &str,
) -> DatabaseResult<Option<Budget>> {
    let mut stmt = conn.prepare_cached(
        "SELECT household_id, category_id, period, amount, updated_at
         FROM budgets WHERE category_id = ?1 AND period = ?2",
    )?;

    let result = stmt.query_row(params![category_id, period], |row| {
        Ok(Budget {
            household_id: row.get(0)?,
            category_id: row.get(1)?,
            period: row.get(2)?,
            amount: row.get(3)?,
            updated_at: parse_datetime(row.get::<_, String>(4)?),
        })
    });

    match result {
        Ok(budget) => Ok(Some(budget)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether a threshold alert was already emitted for a category and period.
pub fn budget_alert_recorded(
    conn: &Connection,
    category_id: &str,
    period: &str,
) -> DatabaseResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM budget_threshold_alerts WHERE category_id = ?1 AND period = ?2",
        params![category_id, period],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Remember that a category crossed its threshold in a period.
pub fn record_budget_alert(
    conn: &Connection,
    category_id: &str,
    period: &str,
    fraction: f64,
) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO budget_threshold_alerts (category_id, period, fraction, alerted_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![category_id, period, fraction, now_rfc3339()],
    )?;
    Ok(())
}

// ==========================================
// Household members
// ==========================================

/// Insert a new household member.
pub fn insert_member(conn: &Connection, member: &NewMember) -> DatabaseResult<HouseholdMember> {
    let id = uuid::Uuid::new_v4().to_string();
    let joined_at = now_rfc3339();
    conn.execute(
        "INSERT INTO household_members (id, household_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, member.household_id, member.user_id, member.role, joined_at],
    )?;

    Ok(HouseholdMember {
        id,
        household_id: member.household_id.clone(),
        user_id: member.user_id.clone(),
        role: member.role.clone(),
        joined_at: parse_datetime(joined_at),
    })
}

// ==========================================
// Helpers
// ==========================================

/// Format a timestamp the way every column stores it (fixed-width RFC 3339, UTC).
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_rfc3339() -> String {
    format_datetime(&Utc::now())
}

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(&s) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            warn!(value = %s, error = %e, "Unparseable stored timestamp, using current time");
            Utc::now()
        }
    }
}
