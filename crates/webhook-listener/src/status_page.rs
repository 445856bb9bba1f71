use std::fmt::Write;
use webhook_config_and_utils::Config;
use webhook_database::{EventKind, OutboxCounts};

fn event_description(kind: EventKind) -> &'static str {
    match kind {
        EventKind::BigSpend => "Triggered when expenses exceed threshold",
        EventKind::BudgetThreshold => "Triggered when budget usage exceeds percentage",
        EventKind::NewMember => "Triggered when someone joins a household",
    }
}

fn configured(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "&#9989; Configured"
    } else {
        "&#10060; Not set"
    }
}

/// `0.8` renders as `80`, `0.855` as `85.5`.
fn percent(fraction: f64) -> String {
    format!("{}", (fraction * 1000.0).round() / 10.0)
}

/// Render the status page. Shows configuration presence only, never values.
pub fn render_status_page(config: &Config, counts: Option<&OutboxCounts>, now_ms: i64) -> String {
    let mut html = String::with_capacity(4096);

    html.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Expense Tracker Webhook Listener</title>
  <style>
    body { font-family: Arial, sans-serif; margin: 40px; }
    .status { color: green; font-weight: bold; }
    .config { background: #f5f5f5; padding: 15px; margin: 20px 0; border-radius: 5px; }
    pre { background: #f0f0f0; padding: 10px; overflow-x: auto; }
  </style>
</head>
<body>
  <h1>Expense Tracker Webhook Listener</h1>
  <p class="status">&#9989; Service is running</p>
"#,
    );

    let secret = if config.shared_secret.is_some() {
        "&#9989; Set"
    } else {
        "&#10060; Not set"
    };
    let _ = write!(
        html,
        r#"
  <div class="config">
    <h3>Configuration:</h3>
    <ul>
      <li>Big Spend URL: {}</li>
      <li>Budget Threshold URL: {}</li>
      <li>New Member URL: {}</li>
      <li>Shared Secret: {}</li>
      <li>Big Spend Threshold: ${:.2}</li>
      <li>Budget Threshold: {}%</li>
    </ul>
  </div>
"#,
        configured(&config.big_spend_url),
        configured(&config.budget_threshold_url),
        configured(&config.new_member_url),
        secret,
        config.big_spend_threshold,
        percent(config.budget_threshold_pct),
    );

    html.push_str("\n  <h3>Outbox:</h3>\n");
    match counts {
        Some(counts) => {
            let _ = write!(
                html,
                "  <ul>\n    <li>Pending: {}</li>\n    <li>Sent: {}</li>\n    <li>Failed: {}</li>\n  </ul>\n",
                counts.pending, counts.sent, counts.failed
            );
        }
        None => html.push_str("  <p>Outbox counts unavailable.</p>\n"),
    }

    html.push_str("\n  <h3>Supported Events:</h3>\n  <ul>\n");
    for kind in EventKind::ALL {
        let _ = writeln!(
            html,
            "    <li><code>{}</code> - {}</li>",
            kind.as_str(),
            event_description(kind)
        );
    }
    html.push_str("  </ul>\n");

    let _ = write!(
        html,
        r#"
  <h3>Usage:</h3>
  <p>POST webhook events to this endpoint to trigger external integrations.</p>

  <h3>Example Payload:</h3>
  <pre>{{
  "event": "big_spend",
  "timestamp": {now_ms},
  "payload": {{
    "household_id": "uuid",
    "transaction_id": "uuid",
    "amount": 175.50,
    "currency": "USD",
    "merchant": "Expensive Restaurant",
    "category_id": "uuid",
    "created_by": "uuid"
  }}
}}</pre>
</body>
</html>
"#
    );

    html
}
