//! Predicates deciding which domain writes produce webhook events.
//!
//! Pure functions only; the caller supplies every number they look at.

use webhook_database::{
    BigSpendPayload, BudgetThresholdPayload, Direction, HouseholdMember, NewMemberPayload,
    Transaction,
};

/// Large outflow: fires when `direction == Outflow && amount >= threshold`.
pub fn big_spend(tx: &Transaction, threshold: f64) -> Option<BigSpendPayload> {
    if tx.direction != Direction::Outflow || tx.amount < threshold {
        return None;
    }

    Some(BigSpendPayload {
        household_id: tx.household_id.clone(),
        transaction_id: tx.id.clone(),
        amount: tx.amount,
        currency: tx.currency.clone(),
        merchant: tx.merchant.clone(),
        category_id: tx.category_id.clone(),
        threshold,
        created_by: tx.created_by.clone(),
        occurred_at: tx.occurred_at,
    })
}

/// Category spend before and after one write, against its budget.
#[derive(Debug, Clone)]
pub struct BudgetWindow<'a> {
    pub household_id: &'a str,
    pub category_id: &'a str,
    pub period: &'a str,
    pub spent_before: f64,
    pub spent_after: f64,
    pub budget: f64,
}

/// Budget crossing: fires when the write takes spend from below `fraction`
/// of the budget to at or above it. A zero budget never fires.
pub fn budget_threshold(window: &BudgetWindow<'_>, fraction: f64) -> Option<BudgetThresholdPayload> {
    if window.budget <= 0.0 {
        return None;
    }

    let before = window.spent_before / window.budget;
    let after = window.spent_after / window.budget;
    if before >= fraction || after < fraction {
        return None;
    }

    Some(BudgetThresholdPayload {
        household_id: window.household_id.to_string(),
        category_id: window.category_id.to_string(),
        period: window.period.to_string(),
        spent: window.spent_after,
        budget: window.budget,
        pct: after,
        threshold_pct: fraction,
    })
}

/// Every membership insert is announced.
pub fn new_member(member: &HouseholdMember) -> NewMemberPayload {
    NewMemberPayload {
        household_id: member.household_id.clone(),
        user_id: member.user_id.clone(),
        role: member.role.clone(),
        joined_at: member.joined_at,
    }
}
