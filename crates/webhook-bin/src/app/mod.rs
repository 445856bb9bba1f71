//! Command implementations.

mod commands;
mod service;

pub use commands::{retry, show_status, simulate, sweep, SimulateEvent};
pub use service::run_service;

use webhook_config_and_utils::Paths;
use webhook_database::AsyncDatabase;

/// Open the outbox database, creating the base directory if needed.
async fn open_database(paths: &Paths) -> Result<AsyncDatabase, Box<dyn std::error::Error>> {
    paths.ensure_dirs()?;
    let db = AsyncDatabase::open(&paths.database_file()).await?;
    Ok(db)
}
