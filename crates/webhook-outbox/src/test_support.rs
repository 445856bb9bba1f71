//! Local HTTP destination for sender and dispatcher tests.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One request as the destination saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct DestinationState {
    requests: Arc<Mutex<Vec<Recorded>>>,
    status: Arc<AtomicU16>,
}

/// A webhook receiver bound to 127.0.0.1 on a random port.
#[derive(Clone)]
pub struct Destination {
    pub base: String,
    state: DestinationState,
}

impl Destination {
    /// URL that answers with the configured status.
    pub fn url(&self) -> String {
        format!("{}/hook", self.base)
    }

    /// URL that answers only after a few seconds.
    pub fn slow_url(&self) -> String {
        format!("{}/slow", self.base)
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

pub async fn start_destination(status: u16) -> Destination {
    let state = DestinationState {
        requests: Arc::new(Mutex::new(Vec::new())),
        status: Arc::new(AtomicU16::new(status)),
    };

    let app = Router::new()
        .route("/hook", post(record))
        .route("/slow", post(slow))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Destination {
        base: format!("http://{addr}"),
        state,
    }
}

/// A URL on a port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}

async fn record(
    State(state): State<DestinationState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state.requests.lock().unwrap().push(Recorded { headers, body });
    StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}
