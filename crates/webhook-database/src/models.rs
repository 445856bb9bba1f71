//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the payload layout written by this build.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

// ==========================================
// Outbox
// ==========================================

/// Kind of business event carried by an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BigSpend,
    BudgetThreshold,
    NewMember,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [Self::BigSpend, Self::BudgetThreshold, Self::NewMember];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigSpend => "big_spend",
            Self::BudgetThreshold => "budget_threshold",
            Self::NewMember => "new_member",
        }
    }

    /// Parse a stored or inbound kind. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "big_spend" => Some(Self::BigSpend),
            "budget_threshold" => Some(Self::BudgetThreshold),
            "new_member" => Some(Self::NewMember),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Sent,
    Failed,
}

impl Default for WebhookStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Payload for a large outflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigSpendPayload {
    pub household_id: String,
    pub transaction_id: String,
    pub amount: f64,
    pub currency: String,
    pub merchant: Option<String>,
    pub category_id: Option<String>,
    pub threshold: f64,
    pub created_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Payload for a category crossing its budget fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetThresholdPayload {
    pub household_id: String,
    pub category_id: String,
    /// Budget period, `YYYY-MM`.
    pub period: String,
    pub spent: f64,
    pub budget: f64,
    /// `spent / budget`.
    pub pct: f64,
    pub threshold_pct: f64,
}

/// Payload for a member joining a household.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemberPayload {
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

/// Typed event payload, one variant per [`EventKind`].
///
/// Serialized untagged: the JSON is the variant's fields only, and the kind
/// travels next to it (the `event_kind` column, or `event` in a direct call).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    BigSpend(BigSpendPayload),
    BudgetThreshold(BudgetThresholdPayload),
    NewMember(NewMemberPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BigSpend(_) => EventKind::BigSpend,
            Self::BudgetThreshold(_) => EventKind::BudgetThreshold,
            Self::NewMember(_) => EventKind::NewMember,
        }
    }

    /// Decode a payload for a known kind.
    pub fn decode(kind: EventKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::BigSpend => Self::BigSpend(serde_json::from_value(value)?),
            EventKind::BudgetThreshold => Self::BudgetThreshold(serde_json::from_value(value)?),
            EventKind::NewMember => Self::NewMember(serde_json::from_value(value)?),
        })
    }

    pub fn decode_str(kind: EventKind, text: &str) -> Result<Self, serde_json::Error> {
        Self::decode(kind, serde_json::from_str(text)?)
    }
}

/// Outbox row - one pending or attempted webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_kind: EventKind,
    pub payload: EventPayload,
    pub schema_version: u32,
    pub status: WebhookStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Number of outbox rows in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
}

impl OutboxCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.failed
    }
}

// ==========================================
// Household domain
// ==========================================

/// Money movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inflow,
    Outflow,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inflow" => Some(Self::Inflow),
            "outflow" => Some(Self::Outflow),
            _ => None,
        }
    }
}

/// Transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub household_id: String,
    pub amount: f64,
    pub currency: String,
    pub direction: Direction,
    pub merchant: Option<String>,
    pub category_id: Option<String>,
    pub created_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Budget period the transaction falls in, `YYYY-MM`.
    pub fn period(&self) -> String {
        period_of(&self.occurred_at)
    }
}

/// Monthly budget period for a timestamp, `YYYY-MM`.
pub fn period_of(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Budget for one category in one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub household_id: String,
    pub category_id: String,
    pub period: String,
    pub amount: f64,
    pub updated_at: DateTime<Utc>,
}

/// Household membership record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdMember {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

// ==========================================
// Insert types
// ==========================================

/// Input for inserting a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub household_id: String,
    pub amount: f64,
    pub currency: String,
    pub direction: Direction,
    pub merchant: Option<String>,
    pub category_id: Option<String>,
    pub created_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Input for creating or replacing a budget.
#[derive(Debug, Clone)]
pub struct NewBudget {
    pub household_id: String,
    pub category_id: String,
    pub period: String,
    pub amount: f64,
}

/// Input for adding a household member.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub household_id: String,
    pub user_id: String,
    pub role: String,
}
