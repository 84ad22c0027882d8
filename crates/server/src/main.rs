use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use relay_server::config::RelayConfig;
use relay_server::{app, shutdown, store_factory, telemetry};

/// Relay worker: drains the request queue into the downstream service.
#[derive(Parser, Debug)]
#[command(name = "relay-server", about = "Queue-backed request relay worker")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Run the worker until SIGINT or SIGTERM (the default).
    Run,
    /// Create or upgrade the queue schema, then exit.
    Migrate,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = RelayConfig::load(&cli.config)?;
    telemetry::init(&config.telemetry);

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            info!(
                backend = %config.store.backend,
                base_url = %config.dispatch.base_url,
                "configuration is valid"
            );
            Ok(())
        }
        Commands::Migrate => run_migrate(&config).await,
        Commands::Run => run(&config).await,
    }
}

async fn run_migrate(config: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(backend = %config.store.backend, "running queue store migrations...");
    let store = store_factory::create_store(&config.store).await?;
    store.close().await;
    info!("migrations complete");
    Ok(())
}

async fn run(config: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = app::build_service(config).await?;
    let token = shutdown::install_signal_handler();
    let snapshot = service.run(token).await?;

    info!(
        processed = snapshot.processed,
        completed = snapshot.completed,
        failed = snapshot.failed,
        timed_out = snapshot.timed_out,
        "relay-server shut down"
    );
    Ok(())
}
