//! vigil-agent main entry point
//!
//! This binary serves as the command channel host for the agent. It
//! handles CLI parsing, logging setup, and the server lifecycle; plugins
//! register their commands against the dispatcher through the library
//! API, so the binary itself ships no command implementations.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vigil_agent::{
    command::CommandDispatcher, config::TransportConfig, server::CommandServer, APP_NAME, VERSION,
};

/// Local command channel for the Vigil JVM monitoring agent
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Transport properties file path
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/vigil-agent/transport.properties"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the command server
    Start,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Start => {
            info!("Starting {} v{}", APP_NAME, VERSION);

            let config = TransportConfig::load(&cli.config)
                .with_context(|| format!("loading transport configuration from {}", cli.config))?;
            info!(
                "Using {} transport with endpoint '{}'",
                config.kind, config.endpoint_name
            );

            let server = CommandServer::new(Arc::new(CommandDispatcher::new()));
            server
                .start_listening(&config)
                .await
                .context("starting command server")?;

            signal::ctrl_c().await.context("waiting for shutdown signal")?;
            info!("Shutdown signal received");
            server.stop_listening().await;
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
        }
    }
    Ok(())
}
