//! Full-mesh WebRTC voice for small groups
//!
//! Participants find each other through a trusted relay and then exchange
//! audio directly, one WebRTC link per remote participant.
//!
//! # Features
//!
//! - **Resilient signaling**: WebSocket channel with exponential backoff,
//!   automatic rejoin after reconnect and an "unreachable" notice
//! - **Full mesh**: up to 10 simultaneous peer links, negotiated without
//!   offer collisions
//! - **Peer recovery**: one automatic retry per failure and a grace period
//!   for links that drop temporarily
//! - **Relay**: presence, room membership and offer/answer/candidate
//!   forwarding with a per-IP connection limit
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  VoiceClient                                         │
//! │  ├─ SignalingChannel (WebSocket, backoff, handlers)  │
//! │  │     ↓ MeshInput                                   │
//! │  └─ MeshOrchestrator (single owner of mesh state)    │
//! │      ├─ Roster                                       │
//! │      ├─ PeerManager ─ PeerConnection ─ MediaLink     │
//! │      └─ RecoveryTasks (retry / grace timers)         │
//! │            ↓ MeshEvent                               │
//! │  UI: roster view, audio playback, status             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use voicemesh_webrtc::VoiceMeshConfig;
//!
//! let config = VoiceMeshConfig {
//!     signaling_url: "ws://localhost:8080/ws".to_string(),
//!     max_peers: 4,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use voicemesh_webrtc::{SilenceCapture, VoiceClient, VoiceMeshConfig};
//!
//! # async fn example() -> voicemesh_webrtc::Result<()> {
//! let config = VoiceMeshConfig::default();
//! let (client, mut events) = VoiceClient::connect_websocket(config, Arc::new(SilenceCapture::new()))?;
//!
//! client.join("alice").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod signaling;

pub use client::VoiceClient;
pub use config::{RecoveryOptions, RelayConfig, TurnServerConfig, VoiceMeshConfig};
pub use error::{Error, Result};
pub use media::{AudioCapture, LocalAudio, MediaError, SilenceCapture};
pub use mesh::{ConnectionStatus, MeshEvent, Peer};
pub use signaling::{ChannelEvent, ChannelState, Identity, RelayHandle, RelayServer, SignalingChannel};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
