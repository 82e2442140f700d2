//! Relay binary entry point
//!
//! Serves presence, room membership and negotiation forwarding for one room.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080)
//! cargo run --bin voicemesh_relay
//!
//! # Custom address and a tighter per-IP connection limit
//! cargo run --bin voicemesh_relay -- \
//!   --addr 127.0.0.1:9000 \
//!   --rate-window-secs 10 \
//!   --rate-max 5
//! ```

use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voicemesh_webrtc::{RelayConfig, RelayServer};

/// VoiceMesh relay
///
/// Assigns identities to participants and forwards offers, answers and ICE
/// candidates between them. Media never passes through the relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "VOICEMESH_RELAY_ADDR")]
    addr: SocketAddr,

    /// Window for the per-IP connection limit in seconds
    #[arg(long, default_value_t = 10, env = "WEBRTC_CONN_SEC")]
    rate_window_secs: u64,

    /// Connections allowed per IP within the window
    #[arg(long, default_value_t = 15, env = "WEBRTC_CONN_MAX")]
    rate_max: usize,

    /// Outbound frames buffered per client before frames are dropped
    #[arg(long, default_value_t = 16, env = "VOICEMESH_RELAY_SEND_QUEUE")]
    send_queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "VoiceMesh relay starting"
    );

    let config = RelayConfig {
        bind_addr: args.addr,
        rate_window_secs: args.rate_window_secs,
        rate_max_connections: args.rate_max,
        send_queue: args.send_queue,
    };
    config.validate()?;

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");
        if stop_tx.send(()).is_err() {
            std::process::exit(0);
        }
    })?;

    let handle = RelayServer::new(config).start().await?;
    info!("Clients connect to {}", handle.url());

    if stop_rx.recv().await.is_none() {
        error!("Signal handler dropped");
    }
    handle.shutdown().await;
    info!("Relay stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
