//! Per-peer connections and their recovery
//!
//! Each remote participant gets one [`PeerConnection`] driving one
//! [`MediaLink`]. Connections live in the [`PeerManager`] arena owned by the
//! mesh orchestrator.

pub mod connection;
pub mod lifecycle;
pub mod link;
pub mod manager;
pub mod webrtc_link;

pub use connection::{CandidateDisposition, NegotiationState, PeerConnection, PeerState, Role};
pub use lifecycle::{RecoveryKind, RecoveryPolicy, RecoveryTasks};
pub use link::{HealthState, LinkEvent, LinkEventSender, LinkFactory, LinkNotice, MediaLink};
pub use manager::{PeerInfo, PeerManager};
pub use webrtc_link::{WebRtcLink, WebRtcLinkFactory};
