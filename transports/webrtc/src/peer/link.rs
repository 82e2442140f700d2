//! Media link abstraction
//!
//! A [`MediaLink`] is one negotiated peer-to-peer audio link. The
//! [`PeerConnection`](super::connection::PeerConnection) state machine drives
//! it; the link reports candidates, health and remote tracks back through a
//! [`LinkEventSender`].

use crate::media::LocalAudio;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Transport health as reported by the underlying link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something a link noticed
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Local ICE candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    /// Health transition
    Health(HealthState),
    /// Remote audio track became available
    RemoteAudio { track_id: String },
}

/// Link event tagged with the connection that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct LinkNotice {
    pub peer_id: String,
    pub connection_id: String,
    pub event: LinkEvent,
}

/// Tags and forwards events for one connection
///
/// The connection id lets the receiver discard events from a link that has
/// already been replaced.
#[derive(Clone)]
pub struct LinkEventSender {
    peer_id: String,
    connection_id: String,
    deliver: Arc<dyn Fn(LinkNotice) + Send + Sync>,
}

impl LinkEventSender {
    pub fn new(
        peer_id: impl Into<String>,
        connection_id: impl Into<String>,
        deliver: Arc<dyn Fn(LinkNotice) + Send + Sync>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            connection_id: connection_id.into(),
            deliver,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn send(&self, event: LinkEvent) {
        (self.deliver)(LinkNotice {
            peer_id: self.peer_id.clone(),
            connection_id: self.connection_id.clone(),
            event,
        });
    }
}

impl std::fmt::Debug for LinkEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEventSender")
            .field("peer_id", &self.peer_id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// One negotiated audio link to a remote participant
#[async_trait]
pub trait MediaLink: Send + Sync {
    /// Bind the outgoing audio track
    async fn add_local_audio(&self, audio: &LocalAudio) -> Result<()>;

    /// Create an offer and set it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the applied remote offer and set it locally
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Release transport and media resources
    async fn close(&self) -> Result<()>;
}

/// Creates links for new connections
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn create_link(&self, events: LinkEventSender) -> Result<Arc<dyn MediaLink>>;
}
