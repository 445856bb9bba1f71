//! Inbound HTTP surface for the webhook pipeline.
//!
//! - `POST /` accepts outbox push notifications and direct event calls and
//!   hands them to the [`Dispatcher`].
//! - `GET /` renders the HTML status page.
//! - `GET /health` reports outbox counts as JSON.

mod handlers;
mod status_page;

pub use status_page::render_status_page;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use webhook_config_and_utils::Config;
use webhook_database::AsyncDatabase;
use webhook_outbox::{Dispatcher, OutboxResult, SenderConfig, WebhookSender};

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub db: AsyncDatabase,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the sender and dispatcher from `config`.
    pub fn new(config: Config, db: AsyncDatabase) -> OutboxResult<Self> {
        let sender = WebhookSender::new(SenderConfig::from(&config))?;
        let dispatcher = Dispatcher::new(db.clone(), Arc::new(sender), config.shared_secret.clone());
        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            db,
            config: Arc::new(config),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(handlers::status_page).post(handlers::receive_notification),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serve until `shutdown` flips to `true` or its sender is dropped.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Webhook listener accepting connections");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Webhook listener stopped");
    Ok(())
}
