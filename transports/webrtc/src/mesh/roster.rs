//! Known remote participants

use crate::signaling::protocol::UserEntry;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 20;

/// A remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub display_name: String,
}

impl From<UserEntry> for Peer {
    fn from(entry: UserEntry) -> Self {
        Self {
            id: entry.user_id,
            display_name: entry.user_name,
        }
    }
}

/// Roster of remote participants keyed by id
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: BTreeMap<String, Peer>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or rename a participant; `true` if the id was new
    pub fn insert(&mut self, peer: Peer) -> bool {
        self.peers.insert(peer.id.clone(), peer).is_none()
    }

    pub fn remove(&mut self, id: &str) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Replace every entry; returns the ids that disappeared
    pub fn replace_all(&mut self, peers: impl IntoIterator<Item = Peer>) -> Vec<String> {
        let next: BTreeMap<String, Peer> = peers.into_iter().map(|p| (p.id.clone(), p)).collect();
        let removed = self
            .peers
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        self.peers = next;
        removed
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Validate and trim a display name
///
/// Accepts 1-20 characters drawn from ASCII letters and digits, CJK
/// ideographs, Hangul syllables, Hiragana and Katakana.
pub fn validate_display_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let count = trimmed.chars().count();
    if count == 0 {
        return Err(Error::InvalidDisplayName("name is empty".to_string()));
    }
    if count > MAX_DISPLAY_NAME_CHARS {
        return Err(Error::InvalidDisplayName(format!(
            "name has {} characters, at most {} allowed",
            count, MAX_DISPLAY_NAME_CHARS
        )));
    }
    if let Some(c) = trimmed.chars().find(|c| !is_name_char(*c)) {
        return Err(Error::InvalidDisplayName(format!(
            "character {:?} not allowed",
            c
        )));
    }
    Ok(trimmed.to_string())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c as u32,
            0x3040..=0x309F       // Hiragana
            | 0x30A0..=0x30FF     // Katakana
            | 0x3400..=0x4DBF     // CJK extension A
            | 0x4E00..=0x9FFF     // CJK unified ideographs
            | 0xAC00..=0xD7AF     // Hangul syllables
            | 0x20000..=0x2A6DF   // CJK extension B
            | 0x2A700..=0x2CEAF   // CJK extensions C-E
        )
}
