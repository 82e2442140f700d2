//! Notifications for collaborators outside the core
//!
//! Roster views, audio players and status displays consume these; none of
//! them feed back into mesh state.

use super::roster::Peer;
use crate::signaling::channel::{ChannelEvent, Identity};
use std::time::Duration;

/// Relay connection status
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected(Identity),
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts have not succeeded for a while; still retrying
    Unreachable { attempts: u32 },
    Closed,
}

impl From<ChannelEvent> for ConnectionStatus {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Connected(identity) => ConnectionStatus::Connected(identity),
            ChannelEvent::Disconnected => ConnectionStatus::Disconnected,
            ChannelEvent::Reconnecting { attempt, delay } => {
                ConnectionStatus::Reconnecting { attempt, delay }
            }
            ChannelEvent::Unreachable { attempts } => ConnectionStatus::Unreachable { attempts },
            ChannelEvent::Closed => ConnectionStatus::Closed,
        }
    }
}

/// Something observers may want to render
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// Presence list while observing (no links)
    Presence(Vec<Peer>),
    /// Roster snapshot after joining
    RosterReplaced(Vec<Peer>),
    PeerJoined(Peer),
    PeerLeft { peer_id: String },
    /// Remote audio is flowing for a peer
    RemoteAudio { peer_id: String, track_id: String },
    /// A peer's remote audio went away with its link
    RemoteAudioRemoved { peer_id: String },
    /// The link to a peer was given up
    LinkFailed { peer_id: String, reason: String },
    /// The relay rejected something we sent
    RelayError { message: String },
    /// Joined the room
    Joined { user_name: String },
    /// Back to observing
    Left,
    Status(ConnectionStatus),
}
