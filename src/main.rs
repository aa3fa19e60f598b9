//! Handoff Broker - SAML to site-platform identity handoff
//!
//! Opaque token exchange, license resolution, and xAPI telemetry relay.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use handoff_broker::{cli::Cli, config::Config, server::Broker, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        telemetry = config.telemetry.is_configured(),
        "Starting handoff broker"
    );

    // Assemble and run with graceful shutdown
    let broker = match Broker::new(config) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create broker: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = broker.run().await {
        error!("Broker error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Broker shutdown complete");
    ExitCode::SUCCESS
}
