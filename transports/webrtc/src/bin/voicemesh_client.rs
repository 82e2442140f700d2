//! Headless participant binary
//!
//! Connects to a relay, joins the room with a silent Opus track and logs
//! mesh events until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin voicemesh_client -- \
//!   --signaling-url ws://localhost:8080/ws \
//!   --name alice
//!
//! # Observe presence without joining
//! cargo run --bin voicemesh_client -- --observe
//! ```

use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voicemesh_webrtc::config::parse_turn_servers;
use voicemesh_webrtc::{
    ConnectionStatus, MeshEvent, SilenceCapture, VoiceClient, VoiceMeshConfig,
};

/// VoiceMesh participant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay WebSocket URL
    #[arg(
        long,
        default_value = "ws://localhost:8080/ws",
        env = "VOICEMESH_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Display name (1-20 letters, digits or CJK/Hangul/kana characters)
    #[arg(long, default_value = "headless", env = "VOICEMESH_NAME")]
    name: String,

    /// Only watch presence, never join
    #[arg(long, default_value_t = false)]
    observe: bool,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "VOICEMESH_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, env = "VOICEMESH_TURN_SERVERS")]
    turn_servers: Option<String>,

    /// Maximum remote peers
    #[arg(long, default_value_t = 10, env = "VOICEMESH_MAX_PEERS")]
    max_peers: u32,

    /// Use timings tuned for a local network
    #[arg(long, default_value_t = false, conflicts_with = "unstable_network")]
    lan: bool,

    /// Use longer grace periods for lossy networks
    #[arg(long, default_value_t = false)]
    unstable_network: bool,
}

fn build_config(args: &Args) -> VoiceMeshConfig {
    let mut config = if args.lan {
        info!("Using LAN preset");
        VoiceMeshConfig::lan_preset(&args.signaling_url)
    } else if args.unstable_network {
        info!("Using unstable network preset");
        VoiceMeshConfig::unstable_network_preset(&args.signaling_url)
    } else {
        VoiceMeshConfig {
            signaling_url: args.signaling_url.clone(),
            ..Default::default()
        }
    };

    config.stun_servers = args.stun_servers.clone();
    config.max_peers = args.max_peers;
    if let Some(list) = &args.turn_servers {
        let turn_servers = parse_turn_servers(list);
        for turn in &turn_servers {
            info!("Adding TURN server: {} (user: {})", turn.url, turn.username);
        }
        config.turn_servers = turn_servers;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %args.signaling_url,
        "VoiceMesh client starting"
    );

    let config = build_config(&args);
    let (client, mut events) =
        VoiceClient::connect_websocket(config, Arc::new(SilenceCapture::new()))?;

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, leaving...");
        if stop_tx.send(()).is_err() {
            std::process::exit(0);
        }
    })?;

    let mut join_pending = !args.observe;
    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if join_pending && matches!(event, MeshEvent::Status(ConnectionStatus::Connected(_))) {
                    join_pending = false;
                    if let Err(e) = client.join(&args.name).await {
                        warn!("Cannot join: {}", e);
                    }
                }
                log_event(&event);
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn log_event(event: &MeshEvent) {
    match event {
        MeshEvent::Presence(peers) => info!(online = peers.len(), "Presence updated"),
        MeshEvent::RosterReplaced(peers) => {
            let names: Vec<&str> = peers.iter().map(|p| p.display_name.as_str()).collect();
            info!(?names, "In the room")
        }
        MeshEvent::PeerJoined(peer) => info!(peer_id = %peer.id, name = %peer.display_name, "Peer joined"),
        MeshEvent::PeerLeft { peer_id } => info!(peer_id = %peer_id, "Peer left"),
        MeshEvent::RemoteAudio { peer_id, track_id } => {
            info!(peer_id = %peer_id, track_id = %track_id, "Receiving audio")
        }
        MeshEvent::RemoteAudioRemoved { peer_id } => info!(peer_id = %peer_id, "Audio stopped"),
        MeshEvent::LinkFailed { peer_id, reason } => {
            warn!(peer_id = %peer_id, "Link failed: {}", reason)
        }
        MeshEvent::RelayError { message } => warn!("Relay error: {}", message),
        MeshEvent::Joined { user_name } => info!(name = %user_name, "Joined room"),
        MeshEvent::Left => info!("Left room"),
        MeshEvent::Status(ConnectionStatus::Unreachable { attempts }) => {
            warn!(attempts, "Relay unreachable, still retrying")
        }
        MeshEvent::Status(status) => info!(?status, "Relay status"),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
