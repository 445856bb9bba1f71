//! Long-running service: listener plus sweeper.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use webhook_config_and_utils::{Config, Paths};
use webhook_listener::AppState;
use webhook_outbox::{OutboxSweeper, SweeperConfig};

/// Run until Ctrl-C.
pub async fn run_service(
    config: Config,
    paths: Paths,
    sweep: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_database(&paths).await?;
    let addr = config.listen_addr()?;

    info!(
        database = %db.path(),
        %addr,
        secret_configured = config.shared_secret.is_some(),
        "Starting household webhooks service"
    );

    let state = AppState::new(config.clone(), db.clone())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = if sweep {
        let sweeper = Arc::new(OutboxSweeper::new(
            state.dispatcher.clone(),
            db.clone(),
            SweeperConfig::from(&config),
        ));
        Some(sweeper.start(shutdown_rx.clone()))
    } else {
        info!("Sweeper disabled; relying on push notifications only");
        None
    };

    let listener = TcpListener::bind(addr).await?;
    let server = tokio::spawn(webhook_listener::serve(listener, state, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    server.await??;
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }

    db.close().await?;
    info!("Household webhooks service stopped");
    Ok(())
}
