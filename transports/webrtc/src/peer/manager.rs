//! Peer connection arena

use super::connection::{PeerConnection, PeerState};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Information about a managed peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub connection_id: String,
    pub state: PeerState,
    pub retries: u32,
}

/// Owns at most one [`PeerConnection`] per peer id, plus per-peer retry counters
///
/// Retry counters live here rather than on the connection so a recreated
/// connection starts without history while the incident count survives.
pub struct PeerManager {
    peers: HashMap<String, PeerConnection>,
    retries: HashMap<String, u32>,
    max_peers: usize,
}

impl PeerManager {
    /// Create a new peer manager
    ///
    /// # Arguments
    ///
    /// * `max_peers` - Maximum number of simultaneous peer connections (1-10)
    pub fn new(max_peers: u32) -> Result<Self> {
        if max_peers == 0 || max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                max_peers
            )));
        }

        Ok(Self {
            peers: HashMap::new(),
            retries: HashMap::new(),
            max_peers: max_peers as usize,
        })
    }

    /// Check whether a connection for `peer_id` may be created
    ///
    /// `Ok(false)` when one already exists (creating another is a no-op).
    ///
    /// # Errors
    ///
    /// Returns error if the peer limit is reached.
    pub fn admit(&self, peer_id: &str) -> Result<bool> {
        if self.peers.contains_key(peer_id) {
            debug!(peer_id = %peer_id, "Connection already exists");
            return Ok(false);
        }
        if self.peers.len() >= self.max_peers {
            return Err(Error::PeerConnectionError(format!(
                "Maximum peer limit reached ({})",
                self.max_peers
            )));
        }
        Ok(true)
    }

    /// Add a connection
    ///
    /// If one already exists for the same peer the existing one is kept and
    /// the new one is handed back so the caller can close it.
    pub fn insert(&mut self, connection: PeerConnection) -> Option<PeerConnection> {
        if self.peers.contains_key(connection.peer_id()) {
            warn!(
                peer_id = %connection.peer_id(),
                "Duplicate connection rejected"
            );
            return Some(connection);
        }
        info!("Adding peer to manager: {}", connection.peer_id());
        self.peers
            .insert(connection.peer_id().to_string(), connection);
        None
    }

    /// Take a connection out of the arena (the caller closes it)
    pub fn remove(&mut self, peer_id: &str) -> Option<PeerConnection> {
        let removed = self.peers.remove(peer_id);
        if removed.is_some() {
            info!("Removing peer from manager: {}", peer_id);
        }
        removed
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerConnection> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerConnection> {
        self.peers.get_mut(peer_id)
    }

    /// Look up a connection, failing with `PeerNotFound`
    pub fn require_mut(&mut self, peer_id: &str) -> Result<&mut PeerConnection> {
        self.peers
            .get_mut(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Whether an event from `connection_id` belongs to the current connection
    pub fn is_current(&self, peer_id: &str, connection_id: &str) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|c| c.connection_id() == connection_id)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove every connection, returning them for closing
    pub fn drain(&mut self) -> Vec<PeerConnection> {
        self.retries.clear();
        self.peers.drain().map(|(_, c)| c).collect()
    }

    /// Snapshot of every managed peer
    pub fn list(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self
            .peers
            .values()
            .map(|c| PeerInfo {
                peer_id: c.peer_id().to_string(),
                connection_id: c.connection_id().to_string(),
                state: c.state(),
                retries: self.retry_count(c.peer_id()),
            })
            .collect();
        infos.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        infos
    }

    pub fn retry_count(&self, peer_id: &str) -> u32 {
        self.retries.get(peer_id).copied().unwrap_or(0)
    }

    /// Count one automatic retry; returns the new total
    pub fn record_retry(&mut self, peer_id: &str) -> u32 {
        let count = self.retries.entry(peer_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_retries(&mut self, peer_id: &str) {
        self.retries.remove(peer_id);
    }
}
