mod common;

use chrono::{TimeZone, Utc};
use common::{closed_port_url, push_body, single_event, start_destination, Harness};
use serde_json::{json, Value};
use webhook_config_and_utils::Config;
use webhook_database::{
    Direction, EventKind, EventPayload, NewBudget, NewMember, NewTransaction, WebhookStatus,
};

fn outflow(amount: f64, category: &str) -> NewTransaction {
    NewTransaction {
        household_id: "house-1".into(),
        amount,
        currency: "$".into(),
        direction: Direction::Outflow,
        merchant: Some("Corner Bistro".into()),
        category_id: Some(category.into()),
        created_by: Some("user-1".into()),
        occurred_at: Utc.with_ymd_and_hms(2025, 3, 15, 19, 30, 0).unwrap(),
    }
}

#[tokio::test]
async fn big_spend_is_enqueued_and_delivered() {
    let destination = start_destination(200).await;
    let harness = Harness::start(Config {
        big_spend_url: Some(destination.url()),
        ..Config::default()
    })
    .await;

    let outcome = harness
        .write(|w| w.record_transaction(&outflow(200.0, "dining")))
        .await
        .unwrap();
    let event = single_event(&outcome);
    assert_eq!(event.event_kind, EventKind::BigSpend);
    assert_eq!(event.status, WebhookStatus::Pending);
    assert_eq!(event.attempts, 0);
    match &event.payload {
        EventPayload::BigSpend(p) => assert_eq!(p.amount, 200.0),
        other => panic!("unexpected payload {other:?}"),
    }

    let response = harness.post(None, &push_body(&event)).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");

    let stored = harness.event(&event.id).await;
    assert_eq!(stored.status, WebhookStatus::Sent);
    assert_eq!(stored.attempts, 1);
    assert!(stored.sent_at.is_some());

    let requests = destination.requests();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert_eq!(requests[0].headers["x-webhook-event-id"], event.id.as_str());
    assert_eq!(body["source"], "expense_tracker");
    assert_eq!(body["data"]["type"], "big_spend_alert");
    assert_eq!(body["data"]["amount"], 200.0);
    assert_eq!(body["data"]["message"], "Large expense of $200.00 at Corner Bistro");
    harness.stop();
}

#[tokio::test]
async fn budget_crossing_without_destination_is_marked_sent() {
    let destination = start_destination(200).await;
    let harness = Harness::start(Config {
        big_spend_url: Some(destination.url()),
        ..Config::default()
    })
    .await;

    harness
        .write(|w| {
            w.set_budget(&NewBudget {
                household_id: "house-1".into(),
                category_id: "groceries".into(),
                period: "2025-03".into(),
                amount: 400.0,
            })
        })
        .await
        .unwrap();

    for amount in [120.0, 120.0] {
        let outcome = harness
            .write(move |w| w.record_transaction(&outflow(amount, "groceries")))
            .await
            .unwrap();
        assert!(outcome.events.is_empty());
    }

    let outcome = harness
        .write(|w| w.record_transaction(&outflow(100.0, "groceries")))
        .await
        .unwrap();
    let event = single_event(&outcome);
    assert_eq!(event.event_kind, EventKind::BudgetThreshold);
    match &event.payload {
        EventPayload::BudgetThreshold(p) => {
            assert!((p.pct - 0.85).abs() < 1e-9);
            assert_eq!(p.budget, 400.0);
            assert_eq!(p.period, "2025-03");
        }
        other => panic!("unexpected payload {other:?}"),
    }

    let response = harness.post(None, &push_body(&event)).await;
    assert_eq!(response.status(), 200);

    let stored = harness.event(&event.id).await;
    assert_eq!(stored.status, WebhookStatus::Sent);
    assert!(destination.requests().is_empty());
    harness.stop();
}

#[tokio::test]
async fn unreachable_destination_marks_failed_once() {
    let harness = Harness::start(Config {
        new_member_url: Some(closed_port_url()),
        timeout_secs: 2,
        ..Config::default()
    })
    .await;

    let outcome = harness
        .write(|w| {
            w.add_member(&NewMember {
                household_id: "house-1".into(),
                user_id: "user-9".into(),
                role: "owner".into(),
            })
        })
        .await
        .unwrap();
    let event = single_event(&outcome);
    assert_eq!(event.event_kind, EventKind::NewMember);

    let response = harness.post(None, &push_body(&event)).await;
    assert_eq!(response.status(), 200);

    let stored = harness.event(&event.id).await;
    assert_eq!(stored.status, WebhookStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert!(stored.last_error.is_some());
    harness.stop();
}

#[tokio::test]
async fn wrong_secret_is_rejected_before_any_mutation() {
    let destination = start_destination(200).await;
    let harness = Harness::start(Config {
        big_spend_url: Some(destination.url()),
        shared_secret: Some("right".into()),
        ..Config::default()
    })
    .await;

    let outcome = harness
        .write(|w| w.record_transaction(&outflow(500.0, "travel")))
        .await
        .unwrap();
    let event = single_event(&outcome);

    for secret in [Some("wrong"), None] {
        let response = harness.post(secret, &push_body(&event)).await;
        assert_eq!(response.status(), 401);
    }

    let stored = harness.event(&event.id).await;
    assert_eq!(stored.status, WebhookStatus::Pending);
    assert_eq!(stored.attempts, 0);
    assert!(destination.requests().is_empty());

    let response = harness.post(Some("right"), &push_body(&event)).await;
    assert_eq!(response.status(), 200);
    assert_eq!(harness.event(&event.id).await.status, WebhookStatus::Sent);

    assert_eq!(destination.requests()[0].headers["x-webhook-secret"], "right");
    harness.stop();
}

#[tokio::test]
async fn unknown_kind_is_acknowledged_without_mutation() {
    let harness = Harness::start(Config::default()).await;

    let outcome = harness
        .write(|w| w.record_transaction(&outflow(300.0, "dining")))
        .await
        .unwrap();
    let event = single_event(&outcome);

    let mut body = push_body(&event);
    body["record"]["event_kind"] = json!("unsupported_future_kind");
    let response = harness.post(None, &body).await;
    assert_eq!(response.status(), 200);

    let direct = json!({ "event": "unsupported_future_kind", "payload": {} });
    assert_eq!(harness.post(None, &direct).await.status(), 200);

    let events = harness.all_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, WebhookStatus::Pending);
    assert_eq!(events[0].attempts, 0);
    harness.stop();
}

#[tokio::test]
async fn writes_matching_no_rule_enqueue_nothing() {
    let harness = Harness::start(Config::default()).await;

    let small = harness
        .write(|w| w.record_transaction(&outflow(149.99, "dining")))
        .await
        .unwrap();
    assert!(small.events.is_empty());

    let mut refund = outflow(900.0, "dining");
    refund.direction = Direction::Inflow;
    let inflow = harness
        .write(move |w| w.record_transaction(&refund))
        .await
        .unwrap();
    assert!(inflow.events.is_empty());

    assert!(harness.all_events().await.is_empty());
    harness.stop();
}

#[tokio::test]
async fn malformed_notifications_are_acknowledged() {
    let harness = Harness::start(Config::default()).await;

    let response = harness
        .client
        .post(format!("{}/", harness.base))
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let update = json!({ "type": "UPDATE", "table": "webhook_events", "record": {} });
    assert_eq!(harness.post(None, &update).await.status(), 200);
    harness.stop();
}

#[tokio::test]
async fn status_page_and_health() {
    let harness = Harness::start(Config {
        shared_secret: Some("do-not-show".into()),
        ..Config::default()
    })
    .await;
    harness
        .write(|w| w.record_transaction(&outflow(250.0, "dining")))
        .await
        .unwrap();

    let page = harness
        .client
        .get(format!("{}/", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(page.status(), 200);
    assert!(page.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = page.text().await.unwrap();
    assert!(html.contains("Expense Tracker Webhook Listener"));
    assert!(html.contains("Shared Secret: &#9989; Set"));
    assert!(html.contains("<li>Pending: 1</li>"));
    assert!(!html.contains("do-not-show"));

    let health: Value = harness
        .client
        .get(format!("{}/health", harness.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["ok"], true);
    assert_eq!(health["outbox"]["pending"], 1);
    assert_eq!(health["outbox"]["sent"], 0);

    let put = harness
        .client
        .put(format!("{}/", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 405);
    harness.stop();
}
