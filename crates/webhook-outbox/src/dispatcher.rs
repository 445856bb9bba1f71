//! Notification dispatcher.
//!
//! Takes a notification (a push from the outbox or a direct call), checks
//! the shared secret, routes it by kind to the sender, and records the
//! outcome on the outbox row when there is one.

use crate::sender::{SendOutcome, WebhookDelivery, WebhookSender};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use webhook_database::{
    queries, AsyncDatabase, EventKind, EventPayload, WebhookEvent, WebhookStatus,
};

/// Table name a push notification must reference to be accepted.
pub const OUTBOX_TABLE: &str = "webhook_events";

/// Rejection before any parsing or mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("missing or invalid webhook secret")]
    Unauthorized,
}

/// A notification reduced to what routing needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub kind: String,
    pub payload: Value,
    /// Present for outbox pushes; direct calls have none.
    pub outbox_id: Option<String>,
}

impl DispatchRequest {
    /// Normalize either accepted notification shape.
    ///
    /// Push: `{type, table, record: {id, event_kind|event, payload}}`, accepted
    /// only for `INSERT` into the outbox table. The payload may be an object
    /// or a JSON-encoded string.
    ///
    /// Direct: `{event|event_kind, payload}`.
    ///
    /// Anything else yields `None`.
    pub fn from_notification(body: &Value) -> Option<Self> {
        let obj = body.as_object()?;

        if let Some(record) = obj.get("record") {
            let is_outbox_insert = obj.get("type").and_then(Value::as_str) == Some("INSERT")
                && obj.get("table").and_then(Value::as_str) == Some(OUTBOX_TABLE);
            if !is_outbox_insert {
                return None;
            }
            return Self::from_push_record(record);
        }

        let kind = kind_field(body)?;
        Some(Self {
            kind,
            payload: obj.get("payload").cloned().unwrap_or(Value::Null),
            outbox_id: None,
        })
    }

    fn from_push_record(record: &Value) -> Option<Self> {
        let outbox_id = record.get("id").and_then(Value::as_str).map(str::to_string);
        let mut payload = match record.get("payload") {
            Some(Value::String(text)) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Null,
        };

        let kind = match kind_field(record) {
            Some(kind) => kind,
            // Older producers wrapped `{event, payload}` inside the payload column.
            None => {
                let kind = kind_field(&payload)?;
                payload = payload.get("payload").cloned().unwrap_or(Value::Null);
                kind
            }
        };

        Some(Self {
            kind,
            payload,
            outbox_id,
        })
    }
}

fn kind_field(value: &Value) -> Option<String> {
    value
        .get("event_kind")
        .or_else(|| value.get("event"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Destination answered 2xx.
    Delivered,
    /// No destination configured for the kind; counted as success.
    NoSubscriber,
    /// Send failed; the row (if any) is now Failed.
    Failed { error: String },
    /// Kind not recognized; nothing sent or recorded.
    UnknownKind(String),
    /// Body not in an accepted shape; nothing sent or recorded.
    Ignored,
    /// Direct call whose payload does not decode for its kind.
    InvalidPayload { error: String },
    /// Push naming an outbox row that does not exist; nothing sent.
    UnknownRow(String),
    /// The outbox row was already Sent; not delivered again.
    AlreadySent,
}

/// Routes notifications to the sender and records outcomes in the outbox.
pub struct Dispatcher {
    db: AsyncDatabase,
    sender: Arc<WebhookSender>,
    shared_secret: Option<String>,
}

impl Dispatcher {
    pub fn new(db: AsyncDatabase, sender: Arc<WebhookSender>, shared_secret: Option<String>) -> Self {
        Self {
            db,
            sender,
            shared_secret,
        }
    }

    /// Check the presented secret. Always passes when no secret is configured.
    pub fn authenticate(&self, presented: Option<&str>) -> Result<(), DispatchError> {
        let Some(expected) = self.shared_secret.as_deref() else {
            return Ok(());
        };
        match presented {
            Some(given) if constant_time_eq(expected.as_bytes(), given.as_bytes()) => Ok(()),
            _ => Err(DispatchError::Unauthorized),
        }
    }

    /// Entry point for inbound pushes: authenticate, parse, dispatch.
    pub async fn handle_notification(
        &self,
        presented_secret: Option<&str>,
        body: &[u8],
    ) -> Result<DispatchOutcome, DispatchError> {
        self.authenticate(presented_secret)?;

        let parsed: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Notification body is not JSON, ignoring");
                return Ok(DispatchOutcome::Ignored);
            }
        };

        let Some(request) = DispatchRequest::from_notification(&parsed) else {
            info!("Notification in an unrecognized shape, ignoring");
            return Ok(DispatchOutcome::Ignored);
        };

        Ok(self.dispatch(request).await)
    }

    /// Route a normalized request.
    ///
    /// A request with an outbox id only names the row to deliver; the stored
    /// row's kind and payload are what get sent. Requests without one are
    /// direct calls and deliver the payload they carry.
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let Some(kind) = EventKind::parse(&request.kind) else {
            warn!(kind = %request.kind, outbox_id = ?request.outbox_id, "Unknown event kind");
            return DispatchOutcome::UnknownKind(request.kind);
        };

        match request.outbox_id {
            Some(id) => self.dispatch_stored(kind, id).await,
            None => self.dispatch_direct(kind, request.payload).await,
        }
    }

    async fn dispatch_stored(&self, pushed_kind: EventKind, id: String) -> DispatchOutcome {
        let lookup_id = id.clone();
        let row = match self
            .db
            .call(move |conn| queries::get_event(conn, &lookup_id))
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!(event_id = %id, "Notification references unknown outbox row, ignoring");
                return DispatchOutcome::UnknownRow(id);
            }
            Err(e) => {
                // Left as is; the sweeper picks the row up once it is readable.
                let error = e.to_string();
                warn!(event_id = %id, error = %error, "Outbox lookup failed, not delivering");
                return DispatchOutcome::Failed { error };
            }
        };

        if row.event_kind != pushed_kind {
            warn!(
                event_id = %row.id,
                pushed = %pushed_kind,
                stored = %row.event_kind,
                "Notification kind differs from outbox row, delivering stored event"
            );
        }
        if row.status == WebhookStatus::Sent {
            debug!(event_id = %row.id, "Duplicate notification for sent event");
            return DispatchOutcome::AlreadySent;
        }
        self.deliver_event(&row).await
    }

    async fn dispatch_direct(&self, kind: EventKind, payload: Value) -> DispatchOutcome {
        let payload = match EventPayload::decode(kind, payload) {
            Ok(payload) => payload,
            Err(e) => {
                let error = format!("invalid {kind} payload: {e}");
                warn!(kind = %kind, error = %error, "Payload rejected");
                return DispatchOutcome::InvalidPayload { error };
            }
        };

        let delivery = WebhookDelivery::new(uuid::Uuid::new_v4().to_string(), payload);
        self.deliver(None, &delivery).await
    }

    /// Deliver a row read from the outbox (poll and retry paths).
    pub async fn deliver_event(&self, event: &WebhookEvent) -> DispatchOutcome {
        if event.status == WebhookStatus::Sent {
            return DispatchOutcome::AlreadySent;
        }
        let delivery = WebhookDelivery {
            event_id: event.id.clone(),
            payload: event.payload.clone(),
            schema_version: event.schema_version,
        };
        self.deliver(Some(&event.id), &delivery).await
    }

    async fn deliver(&self, outbox_id: Option<&str>, delivery: &WebhookDelivery) -> DispatchOutcome {
        match self.sender.send(delivery).await {
            Ok(outcome) => {
                if let Some(id) = outbox_id {
                    self.record_sent(id).await;
                }
                match outcome {
                    SendOutcome::Delivered { .. } => DispatchOutcome::Delivered,
                    SendOutcome::NoSubscriber => DispatchOutcome::NoSubscriber,
                }
            }
            Err(e) => {
                let error = e.to_string();
                warn!(event_id = %delivery.event_id, error = %error, "Webhook delivery failed");
                if let Some(id) = outbox_id {
                    self.record_failure(id, &error).await;
                }
                DispatchOutcome::Failed { error }
            }
        }
    }

    async fn record_sent(&self, id: &str) {
        let owned = id.to_string();
        if let Err(e) = self
            .db
            .call(move |conn| queries::mark_event_sent(conn, &owned))
            .await
        {
            warn!(event_id = %id, error = %e, "Failed to mark webhook event sent");
        }
    }

    async fn record_failure(&self, id: &str, error: &str) {
        let owned = id.to_string();
        let reason = error.to_string();
        if let Err(e) = self
            .db
            .call(move |conn| queries::mark_event_failed(conn, &owned, &reason))
            .await
        {
            warn!(event_id = %id, error = %e, "Failed to mark webhook event failed");
        }
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SenderConfig;
    use crate::test_support::{closed_port_url, start_destination, Destination};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use webhook_database::BigSpendPayload;

    fn big_spend_payload() -> EventPayload {
        EventPayload::BigSpend(BigSpendPayload {
            household_id: "house-1".into(),
            transaction_id: "tx-1".into(),
            amount: 200.0,
            currency: "$".into(),
            merchant: None,
            category_id: None,
            threshold: 150.0,
            created_by: Some("user-1".into()),
            occurred_at: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        })
    }

    async fn dispatcher_with(url: Option<String>, secret: Option<&str>) -> (Dispatcher, AsyncDatabase) {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let sender = WebhookSender::new(SenderConfig {
            big_spend_url: url.clone(),
            budget_threshold_url: url.clone(),
            new_member_url: url,
            shared_secret: secret.map(str::to_string),
            timeout_secs: 2,
        })
        .unwrap();
        let dispatcher = Dispatcher::new(db.clone(), Arc::new(sender), secret.map(str::to_string));
        (dispatcher, db)
    }

    async fn enqueue(db: &AsyncDatabase) -> WebhookEvent {
        db.call(|conn| queries::enqueue_event(conn, EventKind::BigSpend, &big_spend_payload()))
            .await
            .unwrap()
    }

    async fn reload(db: &AsyncDatabase, id: &str) -> WebhookEvent {
        let id = id.to_string();
        db.call(move |conn| queries::get_event(conn, &id))
            .await
            .unwrap()
            .unwrap()
    }

    fn push_for(event: &WebhookEvent) -> Value {
        json!({
            "type": "INSERT",
            "table": OUTBOX_TABLE,
            "record": {
                "id": event.id,
                "event_kind": event.event_kind.as_str(),
                "payload": serde_json::to_string(&event.payload).unwrap(),
            }
        })
    }

    async fn delivering() -> (Dispatcher, AsyncDatabase, Destination) {
        let destination = start_destination(200).await;
        let (dispatcher, db) = dispatcher_with(Some(destination.url()), None).await;
        (dispatcher, db, destination)
    }

    #[test]
    fn test_push_shape_normalizes() {
        let body = json!({
            "type": "INSERT",
            "table": "webhook_events",
            "record": { "id": "evt-1", "event_kind": "new_member", "payload": "{\"role\":\"member\"}" }
        });
        let request = DispatchRequest::from_notification(&body).unwrap();
        assert_eq!(request.kind, "new_member");
        assert_eq!(request.outbox_id.as_deref(), Some("evt-1"));
        assert_eq!(request.payload, json!({ "role": "member" }));
    }

    #[test]
    fn test_push_with_wrapped_payload_normalizes() {
        let body = json!({
            "type": "INSERT",
            "table": "webhook_events",
            "record": {
                "id": "evt-2",
                "payload": { "event": "big_spend", "payload": { "amount": 10 } }
            }
        });
        let request = DispatchRequest::from_notification(&body).unwrap();
        assert_eq!(request.kind, "big_spend");
        assert_eq!(request.payload, json!({ "amount": 10 }));
    }

    #[test]
    fn test_direct_shape_normalizes() {
        let body = json!({ "event": "budget_threshold", "payload": { "pct": 0.9 } });
        let request = DispatchRequest::from_notification(&body).unwrap();
        assert_eq!(request.kind, "budget_threshold");
        assert!(request.outbox_id.is_none());
    }

    #[test]
    fn test_other_shapes_are_rejected() {
        let update = json!({ "type": "UPDATE", "table": "webhook_events", "record": { "id": "x", "event_kind": "big_spend" } });
        let other_table = json!({ "type": "INSERT", "table": "transactions", "record": { "id": "x" } });
        assert!(DispatchRequest::from_notification(&update).is_none());
        assert!(DispatchRequest::from_notification(&other_table).is_none());
        assert!(DispatchRequest::from_notification(&json!({ "hello": "world" })).is_none());
        assert!(DispatchRequest::from_notification(&json!([1, 2, 3])).is_none());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected_without_mutation() {
        let destination = start_destination(200).await;
        let (dispatcher, db) = dispatcher_with(Some(destination.url()), Some("s3cret")).await;
        let event = enqueue(&db).await;
        let body = serde_json::to_vec(&push_for(&event)).unwrap();

        for presented in [None, Some("wrong")] {
            let result = dispatcher.handle_notification(presented, &body).await;
            assert_eq!(result, Err(DispatchError::Unauthorized));
        }

        let stored = reload(&db, &event.id).await;
        assert_eq!(stored.status, WebhookStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert!(destination.requests().is_empty());

        let ok = dispatcher
            .handle_notification(Some("s3cret"), &body)
            .await
            .unwrap();
        assert_eq!(ok, DispatchOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_push_delivers_and_marks_sent() {
        let (dispatcher, db, destination) = delivering().await;
        let event = enqueue(&db).await;

        let body = serde_json::to_vec(&push_for(&event)).unwrap();
        let outcome = dispatcher.handle_notification(None, &body).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);

        let stored = reload(&db, &event.id).await;
        assert_eq!(stored.status, WebhookStatus::Sent);
        assert_eq!(stored.attempts, 1);

        let requests = destination.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body["event_id"], event.id.as_str());
    }

    #[tokio::test]
    async fn test_duplicate_push_is_not_resent() {
        let (dispatcher, db, destination) = delivering().await;
        let event = enqueue(&db).await;
        let body = serde_json::to_vec(&push_for(&event)).unwrap();

        dispatcher.handle_notification(None, &body).await.unwrap();
        let second = dispatcher.handle_notification(None, &body).await.unwrap();

        assert_eq!(second, DispatchOutcome::AlreadySent);
        assert_eq!(destination.requests().len(), 1);
        assert_eq!(reload(&db, &event.id).await.attempts, 1);
    }

    #[tokio::test]
    async fn test_destination_failure_marks_failed() {
        let (dispatcher, db, destination) = delivering().await;
        destination.set_status(500);
        let event = enqueue(&db).await;

        let outcome = dispatcher.deliver_event(&event).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));

        let stored = reload(&db, &event.id).await;
        assert_eq!(stored.status, WebhookStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_unreachable_destination_marks_failed() {
        let (dispatcher, db) = dispatcher_with(Some(closed_port_url()), None).await;
        let event = enqueue(&db).await;

        let outcome = dispatcher.deliver_event(&event).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(reload(&db, &event.id).await.status, WebhookStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_subscriber_marks_sent() {
        let (dispatcher, db) = dispatcher_with(None, None).await;
        let event = enqueue(&db).await;

        let outcome = dispatcher.deliver_event(&event).await;
        assert_eq!(outcome, DispatchOutcome::NoSubscriber);
        assert_eq!(reload(&db, &event.id).await.status, WebhookStatus::Sent);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_acknowledged_without_effects() {
        let (dispatcher, db, destination) = delivering().await;
        let event = enqueue(&db).await;
        let body = json!({
            "type": "INSERT",
            "table": OUTBOX_TABLE,
            "record": { "id": event.id, "event_kind": "mystery", "payload": {} }
        });

        let outcome = dispatcher
            .handle_notification(None, body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::UnknownKind("mystery".into()));
        assert!(destination.requests().is_empty());
        assert_eq!(reload(&db, &event.id).await.status, WebhookStatus::Pending);
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_ignored() {
        let (dispatcher, _db, destination) = delivering().await;

        for body in [&b"not json"[..], &b"{\"hello\":\"world\"}"[..]] {
            let outcome = dispatcher.handle_notification(None, body).await.unwrap();
            assert_eq!(outcome, DispatchOutcome::Ignored);
        }
        assert!(destination.requests().is_empty());
    }

    #[tokio::test]
    async fn test_direct_call_with_invalid_payload_is_rejected() {
        let (dispatcher, db, destination) = delivering().await;
        let body = json!({ "event": "big_spend", "payload": { "amount": "lots" } });

        let outcome = dispatcher
            .handle_notification(None, body.to_string().as_bytes())
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::InvalidPayload { error } => {
                assert!(error.starts_with("invalid big_spend payload"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(destination.requests().is_empty());

        let counts = db.call(queries::count_events_by_status).await.unwrap();
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn test_push_delivers_stored_row_not_pushed_contents() {
        let (dispatcher, db, destination) = delivering().await;
        let event = enqueue(&db).await;
        let body = json!({
            "type": "INSERT",
            "table": OUTBOX_TABLE,
            "record": {
                "id": event.id,
                "event_kind": "new_member",
                "payload": {
                    "household_id": "house-9",
                    "user_id": "intruder",
                    "role": "owner",
                    "joined_at": "2025-06-01T09:00:00Z"
                }
            }
        });

        let outcome = dispatcher
            .handle_notification(None, body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);

        let requests = destination.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body["event_id"], event.id.as_str());
        assert_eq!(requests[0].body["data"]["type"], "big_spend_alert");
        assert_eq!(requests[0].body["data"]["household_id"], "house-1");

        let stored = reload(&db, &event.id).await;
        assert_eq!(stored.status, WebhookStatus::Sent);
        assert_eq!(stored.event_kind, EventKind::BigSpend);
    }

    #[tokio::test]
    async fn test_push_for_unknown_row_sends_nothing() {
        let (dispatcher, db, destination) = delivering().await;
        let body = json!({
            "type": "INSERT",
            "table": OUTBOX_TABLE,
            "record": {
                "id": "missing-id",
                "event_kind": "big_spend",
                "payload": serde_json::to_value(big_spend_payload()).unwrap(),
            }
        });

        let outcome = dispatcher
            .handle_notification(None, body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::UnknownRow("missing-id".into()));
        assert!(destination.requests().is_empty());

        let counts = db.call(queries::count_events_by_status).await.unwrap();
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn test_direct_call_delivers_without_recording() {
        let (dispatcher, db, destination) = delivering().await;
        let body = json!({
            "event": "big_spend",
            "payload": serde_json::to_value(big_spend_payload()).unwrap(),
        });

        let outcome = dispatcher
            .handle_notification(None, body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(destination.requests().len(), 1);

        let counts = db.call(queries::count_events_by_status).await.unwrap();
        assert_eq!(counts.total(), 0);
    }
}
