//! Echo server driven by a TOML settings file or `STAGEWIRE_*` environment variables.
//!
//! ```text
//! cargo run --example echo_server -- stagewire.toml
//! STAGEWIRE_FRAMING=end_marker cargo run --example echo_server
//! ```

use stagewire::config::{Framing, NetworkConfig};
use stagewire::core::EndMarkerCodec;
use stagewire::utils::logging::init_logging;
use stagewire::{start_server, Pipeline};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let settings = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path),
        None => NetworkConfig::from_env(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    init_logging(&settings.logging);

    let config = match settings.server_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid framing configuration");
            std::process::exit(2);
        }
    };

    // End-marker frames arrive with their marker; strip it so the reply carries only one
    let marker = match config.framing() {
        Framing::EndMarker { marker } => Some(EndMarkerCodec::new(marker.clone())),
        Framing::Tlv { .. } => None,
    };
    let pipeline = Pipeline::standard(&config, settings.compression.enabled, move |ctx, message| {
        info!(peer = ?ctx.peer, bytes = message.len(), "Echoing message");
        Ok(match &marker {
            Some(codec) => codec.strip_marker(message).to_vec(),
            None => message.to_vec(),
        })
    });

    if let Err(e) = start_server(&settings, pipeline).await {
        error!(error = %e, "Server stopped");
        std::process::exit(1);
    }
}
