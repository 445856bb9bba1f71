#![allow(dead_code)]

use event_producer::{DomainWriter, ProducerConfig, ProducerOutcome, ProducerResult};
use serde_json::{json, Value};
use tokio::sync::watch;
use webhook_config_and_utils::Config;
use webhook_database::{queries, AsyncDatabase, WebhookEvent};
use webhook_listener::AppState;

pub use webhook_outbox::test_support::{closed_port_url, start_destination, Destination};

/// A running listener over an in-memory outbox.
pub struct Harness {
    pub base: String,
    pub db: AsyncDatabase,
    pub config: Config,
    pub client: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    pub async fn start(config: Config) -> Self {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let state = AppState::new(config.clone(), db.clone()).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = watch::channel(false);
        tokio::spawn(webhook_listener::serve(listener, state, rx));

        Self {
            base: format!("http://{addr}"),
            db,
            config,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig::from(&self.config)
    }

    /// Run a domain write against the harness database.
    pub async fn write<T, F>(&self, f: F) -> ProducerResult<T>
    where
        F: FnOnce(&mut DomainWriter<'_>) -> ProducerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.producer_config();
        self.db
            .call_mut(move |conn| {
                let mut writer = DomainWriter::new(conn, config);
                Ok(f(&mut writer))
            })
            .await
            .unwrap()
    }

    pub async fn event(&self, id: &str) -> WebhookEvent {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::get_event(conn, &id))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn all_events(&self) -> Vec<WebhookEvent> {
        self.db
            .call(|conn| queries::list_recent_events(conn, 100))
            .await
            .unwrap()
    }

    pub async fn post(&self, secret: Option<&str>, body: &Value) -> reqwest::Response {
        let mut request = self.client.post(format!("{}/", self.base)).json(body);
        if let Some(secret) = secret {
            request = request.header("X-Webhook-Secret", secret);
        }
        request.send().await.unwrap()
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The push body the outbox integration posts for a freshly inserted row.
pub fn push_body(event: &WebhookEvent) -> Value {
    json!({
        "type": "INSERT",
        "table": "webhook_events",
        "record": {
            "id": event.id,
            "event_kind": event.event_kind.as_str(),
            "payload": serde_json::to_string(&event.payload).unwrap(),
            "status": event.status.as_str(),
        }
    })
}

pub fn single_event<T>(outcome: &ProducerOutcome<T>) -> WebhookEvent {
    assert_eq!(outcome.events.len(), 1, "expected exactly one event");
    outcome.events[0].clone()
}
