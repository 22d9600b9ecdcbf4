//! Portico server - Entry Point
//!
//! Serves one of the bundled protocols, chosen in `config.toml`.

use log::{info, warn};
use std::process::ExitCode;

use portico::error::handlers::handle_error;
use portico::utils::logging::setup_logging;
use portico::{Server, ServerConfig, ServerError, protocol};

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    info!("Launching portico server...");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            handle_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), ServerError> {
    let config = ServerConfig::load()?;
    let protocol = protocol::by_name(&config.protocol).ok_or_else(|| {
        ServerError::UnknownProtocol(format!(
            "{} (expected one of: {})",
            config.protocol,
            protocol::BUNDLED.join(", ")
        ))
    })?;

    let server = Server::builder(config).protocol(protocol).build()?;

    let stopper = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                stopper.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.serve().await
}
