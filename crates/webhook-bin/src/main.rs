//! Household Webhooks - outbox listener, retry sweeper, and operator commands.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use webhook_config_and_utils::{init_logging, Config, Paths};

/// Household webhooks command-line interface.
#[derive(Parser)]
#[command(name = "household-webhooks")]
#[command(about = "Deliver household expense events to external webhooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.household-webhooks
    #[arg(long, env = "WEBHOOK_BASE_DIR", global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the listener and the retry sweeper
    Serve {
        /// Bind address, e.g. 0.0.0.0:8787
        #[arg(long)]
        listen: Option<String>,
        /// Accept pushes only; leave Pending and Failed rows alone
        #[arg(long)]
        no_sweep: bool,
    },
    /// Run one sweep pass over the outbox and exit
    Sweep,
    /// Show outbox counts and the most recent events
    Status {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Move a failed event back to pending and deliver it now
    Retry { id: String },
    /// Write a domain row that triggers an event
    Simulate {
        #[command(subcommand)]
        event: app::SimulateEvent,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging(&config.log_level);

    match cli.command {
        Some(Commands::Serve { listen, no_sweep }) => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
                config.validate()?;
            }
            app::run_service(config, paths, !no_sweep).await?;
        }
        None => {
            app::run_service(config, paths, true).await?;
        }
        Some(Commands::Sweep) => {
            app::sweep(config, &paths).await?;
        }
        Some(Commands::Status { limit }) => {
            app::show_status(&config, &paths, limit).await?;
        }
        Some(Commands::Retry { id }) => {
            app::retry(config, &paths, &id).await?;
        }
        Some(Commands::Simulate { event }) => {
            app::simulate(&config, &paths, event).await?;
        }
    }

    Ok(())
}
