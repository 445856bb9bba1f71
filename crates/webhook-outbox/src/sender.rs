//! Outbound webhook sender.

use crate::{OutboxError, OutboxResult};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use webhook_config_and_utils::{Config, DEFAULT_TIMEOUT_SECS};
use webhook_database::{EventKind, EventPayload, PAYLOAD_SCHEMA_VERSION};

/// Header carrying the shared secret, inbound and outbound.
pub const SECRET_HEADER: &str = "X-Webhook-Secret";

/// Header carrying the outbox event id so destinations can deduplicate.
pub const EVENT_ID_HEADER: &str = "X-Webhook-Event-Id";

/// `source` field of every envelope.
pub const SOURCE: &str = "expense_tracker";

/// Longest response body excerpt kept in a failure reason.
const ERROR_BODY_LIMIT: usize = 200;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub big_spend_url: Option<String>,
    pub budget_threshold_url: Option<String>,
    pub new_member_url: Option<String>,
    /// Sent as `X-Webhook-Secret` when present.
    pub shared_secret: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            big_spend_url: None,
            budget_threshold_url: None,
            new_member_url: None,
            shared_secret: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl From<&Config> for SenderConfig {
    fn from(config: &Config) -> Self {
        Self {
            big_spend_url: config.big_spend_url.clone(),
            budget_threshold_url: config.budget_threshold_url.clone(),
            new_member_url: config.new_member_url.clone(),
            shared_secret: config.shared_secret.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

impl SenderConfig {
    /// Destination for a kind, if one is configured.
    pub fn url_for(&self, kind: EventKind) -> Option<&str> {
        match kind {
            EventKind::BigSpend => self.big_spend_url.as_deref(),
            EventKind::BudgetThreshold => self.budget_threshold_url.as_deref(),
            EventKind::NewMember => self.new_member_url.as_deref(),
        }
    }
}

/// Everything needed to deliver one event.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Outbox id, or a fresh id for direct calls that have none.
    pub event_id: String,
    pub payload: EventPayload,
    pub schema_version: u32,
}

impl WebhookDelivery {
    pub fn new(event_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: event_id.into(),
            payload,
            schema_version: PAYLOAD_SCHEMA_VERSION,
        }
    }
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The destination answered 2xx.
    Delivered { status: u16 },
    /// No URL configured for this kind; nothing was sent.
    NoSubscriber,
}

/// Posts one webhook per call. Never retries; retries belong to the sweeper.
pub struct WebhookSender {
    config: SenderConfig,
    client: Client,
}

impl WebhookSender {
    /// Create a new sender.
    pub fn new(config: SenderConfig) -> OutboxResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("ExpenseTracker-Webhooks/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { config, client })
    }

    /// Send a single event to the destination configured for its kind.
    pub async fn send(&self, delivery: &WebhookDelivery) -> OutboxResult<SendOutcome> {
        let kind = delivery.payload.kind();
        let Some(url) = self.config.url_for(kind) else {
            debug!(event_id = %delivery.event_id, kind = %kind, "No destination configured");
            return Ok(SendOutcome::NoSubscriber);
        };

        let envelope = build_envelope(delivery, Utc::now().timestamp_millis());

        debug!(event_id = %delivery.event_id, kind = %kind, url = %url, "Sending webhook");

        let mut request = self
            .client
            .post(url)
            .header(EVENT_ID_HEADER, &delivery.event_id)
            .json(&envelope);
        if let Some(secret) = &self.config.shared_secret {
            request = request.header(SECRET_HEADER, secret);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(OutboxError::Send(format!("HTTP {}: {}", status.as_u16(), excerpt)));
        }

        info!(
            event_id = %delivery.event_id,
            kind = %kind,
            status = status.as_u16(),
            "Webhook delivered"
        );
        Ok(SendOutcome::Delivered {
            status: status.as_u16(),
        })
    }
}

/// `data.type` for each kind.
pub fn wire_type(kind: EventKind) -> &'static str {
    match kind {
        EventKind::BigSpend => "big_spend_alert",
        EventKind::BudgetThreshold => "budget_threshold_alert",
        EventKind::NewMember => "new_member_joined",
    }
}

/// Human-readable summary placed in `data.message`.
pub fn message_for(payload: &EventPayload) -> String {
    match payload {
        EventPayload::BigSpend(p) => format!(
            "Large expense of {}{:.2} at {}",
            p.currency,
            p.amount,
            p.merchant.as_deref().unwrap_or("Unknown merchant")
        ),
        EventPayload::BudgetThreshold(p) => {
            format!("Budget {}% used for {}", (p.pct * 100.0).round() as i64, p.period)
        }
        EventPayload::NewMember(p) => format!("New {} joined the household", p.role),
    }
}

/// Build the JSON body posted to a destination.
pub fn build_envelope(delivery: &WebhookDelivery, timestamp_ms: i64) -> Value {
    let payload = &delivery.payload;
    let message = message_for(payload);

    let data = match payload {
        EventPayload::BigSpend(p) => json!({
            "type": wire_type(EventKind::BigSpend),
            "message": message,
            "amount": p.amount,
            "currency": p.currency,
            "merchant": p.merchant,
            "household_id": p.household_id,
            "transaction_id": p.transaction_id,
            "category_id": p.category_id,
            "created_by": p.created_by,
            "occurred_at": p.occurred_at,
        }),
        EventPayload::BudgetThreshold(p) => json!({
            "type": wire_type(EventKind::BudgetThreshold),
            "message": message,
            "category_id": p.category_id,
            "period": p.period,
            "spent": p.spent,
            "budget": p.budget,
            "percentage": p.pct,
            "threshold_pct": p.threshold_pct,
            "household_id": p.household_id,
        }),
        EventPayload::NewMember(p) => json!({
            "type": wire_type(EventKind::NewMember),
            "message": message,
            "user_id": p.user_id,
            "role": p.role,
            "household_id": p.household_id,
            "joined_at": p.joined_at,
        }),
    };

    json!({
        "timestamp": timestamp_ms,
        "source": SOURCE,
        "event_id": delivery.event_id,
        "schema_version": delivery.schema_version,
        "data": data,
    })
}
