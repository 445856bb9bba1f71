//! Domain writes that enqueue their webhook events atomically.

use crate::{rules, ProducerConfig, ProducerError, ProducerOutcome, ProducerResult};
use rusqlite::Connection;
use tracing::{debug, info};
use webhook_database::{
    queries, Budget, Direction, EventKind, EventPayload, HouseholdMember, NewBudget, NewMember,
    NewTransaction, Transaction, WebhookEvent,
};

/// Writes household rows and their outbox events in one SQLite transaction.
///
/// If any outbox insert fails, the domain row is rolled back with it and the
/// error is returned. No network I/O happens here.
pub struct DomainWriter<'a> {
    conn: &'a mut Connection,
    config: ProducerConfig,
}

impl<'a> DomainWriter<'a> {
    pub fn new(conn: &'a mut Connection, config: ProducerConfig) -> Self {
        Self { conn, config }
    }

    /// Insert a transaction, then evaluate BigSpend and BudgetThreshold.
    pub fn record_transaction(
        &mut self,
        new_tx: &NewTransaction,
    ) -> ProducerResult<ProducerOutcome<Transaction>> {
        validate_transaction(new_tx)?;

        let db_tx = self.conn.transaction()?;
        let transaction = queries::insert_transaction(&db_tx, new_tx)?;
        let mut events = Vec::new();

        if let Some(payload) = rules::big_spend(&transaction, self.config.big_spend_threshold) {
            events.push(enqueue(&db_tx, EventPayload::BigSpend(payload))?);
        }

        if let Some(payload) =
            budget_crossing(&db_tx, &transaction, self.config.budget_threshold_pct)?
        {
            queries::record_budget_alert(
                &db_tx,
                &payload.category_id,
                &payload.period,
                payload.threshold_pct,
            )?;
            events.push(enqueue(&db_tx, EventPayload::BudgetThreshold(payload))?);
        }

        db_tx.commit()?;

        info!(
            transaction_id = %transaction.id,
            household_id = %transaction.household_id,
            events = events.len(),
            "Transaction recorded"
        );
        Ok(ProducerOutcome {
            record: transaction,
            events,
        })
    }

    /// Create or replace a category budget. Emits no event.
    pub fn set_budget(&mut self, budget: &NewBudget) -> ProducerResult<Budget> {
        if !budget.amount.is_finite() || budget.amount < 0.0 {
            return Err(ProducerError::InvalidInput(format!(
                "budget amount must be a non-negative number, got {}",
                budget.amount
            )));
        }
        if budget.period.len() != 7 || budget.period.as_bytes()[4] != b'-' {
            return Err(ProducerError::InvalidInput(format!(
                "budget period must be YYYY-MM, got {}",
                budget.period
            )));
        }

        let stored = queries::upsert_budget(self.conn, budget)?;
        debug!(category_id = %stored.category_id, period = %stored.period, "Budget set");
        Ok(stored)
    }

    /// Add a household member and announce it.
    pub fn add_member(
        &mut self,
        member: &NewMember,
    ) -> ProducerResult<ProducerOutcome<HouseholdMember>> {
        if member.role.trim().is_empty() {
            return Err(ProducerError::InvalidInput("member role is empty".into()));
        }

        let db_tx = self.conn.transaction()?;
        let stored = queries::insert_member(&db_tx, member)?;
        let event = enqueue(
            &db_tx,
            EventPayload::NewMember(rules::new_member(&stored)),
        )?;
        db_tx.commit()?;

        info!(
            household_id = %stored.household_id,
            user_id = %stored.user_id,
            "Member added"
        );
        Ok(ProducerOutcome {
            record: stored,
            events: vec![event],
        })
    }
}

fn enqueue(conn: &Connection, payload: EventPayload) -> ProducerResult<WebhookEvent> {
    let kind: EventKind = payload.kind();
    let event = queries::enqueue_event(conn, kind, &payload)?;
    debug!(event_id = %event.id, kind = %kind, "Outbox event produced");
    Ok(event)
}

/// Evaluate the budget rule for an outflow that just landed, once per
/// category and period.
fn budget_crossing(
    conn: &Connection,
    tx: &Transaction,
    fraction: f64,
) -> ProducerResult<Option<webhook_database::BudgetThresholdPayload>> {
    if tx.direction != Direction::Outflow {
        return Ok(None);
    }
    let Some(category_id) = tx.category_id.as_deref() else {
        return Ok(None);
    };

    let period = tx.period();
    let Some(budget) = queries::get_budget(conn, category_id, &period)? else {
        return Ok(None);
    };
    if budget.household_id != tx.household_id
        || queries::budget_alert_recorded(conn, category_id, &period)?
    {
        return Ok(None);
    }

    let spent_after = queries::category_period_spend(conn, &tx.household_id, category_id, &period)?;
    let window = rules::BudgetWindow {
        household_id: &tx.household_id,
        category_id,
        period: &period,
        spent_before: spent_after - tx.amount,
        spent_after,
        budget: budget.amount,
    };
    Ok(rules::budget_threshold(&window, fraction))
}

fn validate_transaction(tx: &NewTransaction) -> ProducerResult<()> {
    if !tx.amount.is_finite() || tx.amount < 0.0 {
        return Err(ProducerError::InvalidInput(format!(
            "transaction amount must be a non-negative number, got {}",
            tx.amount
        )));
    }
    if tx.currency.trim().is_empty() {
        return Err(ProducerError::InvalidInput("transaction currency is empty".into()));
    }
    if tx.household_id.trim().is_empty() {
        return Err(ProducerError::InvalidInput("household id is empty".into()));
    }
    Ok(())
}
