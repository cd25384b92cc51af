use clap::{Parser, Subcommand};
use tracing::{error, info};

use repodoc::config::AppConfig;
use repodoc::logging;
use repodoc::services::ServiceContainer;

/// repodoc - generate documentation bundles for source repositories
#[derive(Parser, Debug)]
#[command(name = "repodoc")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Serve the HTTP API only
    Api,
    /// Process queued jobs only
    Worker,
    /// Serve the API and process jobs in one process
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Commands::All);

    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;

    info!(
        "repodoc {} starting ({:?}, storage: {})",
        env!("CARGO_PKG_VERSION"),
        command,
        config.storage.name()
    );

    let container = ServiceContainer::new(config).await?;

    if matches!(command, Commands::Worker | Commands::All) {
        container.start_workers().await?;
    }

    let api_handle = if matches!(command, Commands::Api | Commands::All) {
        let server = container.api_server();
        let shutdown_token = container.cancellation_token();
        Some(tokio::spawn(async move {
            let result = server.run().await;
            // A server that cannot serve takes the process down with it.
            if result.is_err() {
                shutdown_token.cancel();
            }
            result
        }))
    } else {
        None
    };

    let shutdown_token = container.cancellation_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
        _ = shutdown_token.cancelled() => {}
    }

    container.shutdown().await?;

    if let Some(handle) = api_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("API server error: {}", e),
            Err(e) => error!("API server task failed: {}", e),
        }
    }

    info!("repodoc stopped");
    Ok(())
}
