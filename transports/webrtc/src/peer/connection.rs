//! Per-peer connection state machine
//!
//! ```text
//! Idle → Negotiating → Connected ⇄ Disconnected → Failed → Closed
//!        Negotiating/Connected ──────────────────────────→ Closed
//! ```
//!
//! Remote candidates that arrive before the remote description are queued
//! and replayed, in arrival order, right after it is applied.

use super::link::{HealthState, LinkEventSender, LinkFactory, MediaLink};
use crate::media::LocalAudio;
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Which side started the current negotiation round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Created, nothing exchanged yet
    Idle,
    /// Offer/answer in progress or transport still connecting
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    /// Terminal
    Closed,
}

/// Description exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

/// What happened to a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Queued,
}

/// One remote participant's link and its negotiation state
pub struct PeerConnection {
    peer_id: String,
    connection_id: String,
    role: Role,
    state: PeerState,
    negotiation: NegotiationState,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    local_audio_attached: bool,
    link: Arc<dyn MediaLink>,
    created_at: Instant,
}

impl PeerConnection {
    /// Create a connection and its underlying link
    ///
    /// # Arguments
    ///
    /// * `peer_id` - Remote participant id
    /// * `role` - Offerer when we initiate, answerer when responding to an offer
    /// * `factory` - Creates the media link
    /// * `events` - Builds the event sender for the new connection id
    #[instrument(skip(factory, events), fields(peer_id = %peer_id))]
    pub async fn open<F>(
        peer_id: String,
        role: Role,
        factory: &dyn LinkFactory,
        events: F,
    ) -> Result<Self>
    where
        F: FnOnce(&str, &str) -> LinkEventSender,
    {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let link = factory
            .create_link(events(&peer_id, &connection_id))
            .await?;

        info!(
            "Created peer connection: peer_id={}, connection_id={}, role={:?}",
            peer_id, connection_id, role
        );

        Ok(Self::with_link(peer_id, connection_id, role, link))
    }

    /// Wrap an existing link
    pub fn with_link(
        peer_id: String,
        connection_id: String,
        role: Role,
        link: Arc<dyn MediaLink>,
    ) -> Self {
        Self {
            peer_id,
            connection_id,
            role,
            state: PeerState::Idle,
            negotiation: NegotiationState::Idle,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            local_audio_attached: false,
            link,
            created_at: Instant::now(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn is_closed(&self) -> bool {
        self.state == PeerState::Closed
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Bind outgoing audio before negotiating
    ///
    /// # Errors
    ///
    /// `InvalidState` if no audio is supplied or the connection is closed.
    pub async fn attach_local_media(&mut self, audio: Option<&LocalAudio>) -> Result<()> {
        self.ensure_open("attach local media")?;
        let audio = audio.ok_or_else(|| {
            Error::InvalidState(format!("No local audio to attach for peer {}", self.peer_id))
        })?;
        if self.local_audio_attached {
            return Ok(());
        }
        self.link.add_local_audio(audio).await?;
        self.local_audio_attached = true;
        Ok(())
    }

    /// Produce the local offer for this round
    ///
    /// Valid for the offerer, once per round (`Idle` or after `Stable`).
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.ensure_open("create offer")?;
        if self.role != Role::Offerer {
            return Err(Error::InvalidState(format!(
                "Peer {} is not the offerer",
                self.peer_id
            )));
        }
        if !matches!(
            self.negotiation,
            NegotiationState::Idle | NegotiationState::Stable
        ) {
            return Err(Error::InvalidState(format!(
                "Cannot create offer for peer {} in {:?}",
                self.peer_id, self.negotiation
            )));
        }

        let offer = self.link.create_offer().await?;
        self.negotiation = NegotiationState::HaveLocalOffer;
        self.enter_negotiating();
        debug!(peer_id = %self.peer_id, "Offer created");
        Ok(offer)
    }

    /// Produce the local answer to an applied remote offer
    pub async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.ensure_open("create answer")?;
        if self.role != Role::Answerer || self.negotiation != NegotiationState::HaveRemoteOffer {
            return Err(Error::InvalidState(format!(
                "Cannot create answer for peer {} as {:?} in {:?}",
                self.peer_id, self.role, self.negotiation
            )));
        }

        let answer = self.link.create_answer().await?;
        self.negotiation = NegotiationState::Stable;
        debug!(peer_id = %self.peer_id, "Answer created");
        Ok(answer)
    }

    /// Apply the remote offer or answer, then replay queued candidates
    ///
    /// An offer on an `Idle` or `Stable` connection starts a new round with
    /// this side as answerer. Returns the number of replayed candidates.
    pub async fn apply_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<usize> {
        self.ensure_open("apply remote description")?;
        let next = match (description.kind, self.negotiation) {
            (SdpKind::Offer, NegotiationState::Idle | NegotiationState::Stable) => {
                NegotiationState::HaveRemoteOffer
            }
            (SdpKind::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
            (kind, state) => {
                return Err(Error::InvalidState(format!(
                    "Unexpected remote {:?} for peer {} in {:?}",
                    kind, self.peer_id, state
                )))
            }
        };

        self.link.set_remote_description(description).await?;
        self.negotiation = next;
        if description.kind == SdpKind::Offer {
            self.role = Role::Answerer;
        }
        self.remote_description_set = true;
        self.enter_negotiating();

        let mut replayed = 0;
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.link.add_ice_candidate(&candidate).await?;
            replayed += 1;
        }
        if replayed > 0 {
            debug!(peer_id = %self.peer_id, replayed, "Replayed queued candidates");
        }
        Ok(replayed)
    }

    /// Apply a remote candidate now, or queue it until the remote description is set
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        self.ensure_open("add remote candidate")?;
        if !self.remote_description_set {
            self.pending_candidates.push_back(candidate);
            return Ok(CandidateDisposition::Queued);
        }
        self.link.add_ice_candidate(&candidate).await?;
        Ok(CandidateDisposition::Applied)
    }

    /// Fold a link health report into the connection state
    ///
    /// Returns the new state when it changed; reports that make no sense for
    /// the current state are ignored.
    pub fn on_health(&mut self, health: HealthState) -> Option<PeerState> {
        let target = match health {
            HealthState::New => return None,
            HealthState::Connecting => PeerState::Negotiating,
            HealthState::Connected => PeerState::Connected,
            HealthState::Disconnected => PeerState::Disconnected,
            HealthState::Failed => PeerState::Failed,
            // Our own close() is what ends a connection
            HealthState::Closed => return None,
        };

        if !can_transition(self.state, target) {
            debug!(
                peer_id = %self.peer_id,
                "Ignoring health {:?} in state {:?}", health, self.state
            );
            return None;
        }

        debug!(
            "Peer {} state transition: {:?} -> {:?}",
            self.peer_id, self.state, target
        );
        self.state = target;
        Some(target)
    }

    /// Release the link; only the first call does anything
    ///
    /// Returns `true` if this call closed the connection.
    pub async fn close(&mut self) -> bool {
        if self.state == PeerState::Closed {
            return false;
        }
        self.state = PeerState::Closed;
        self.negotiation = NegotiationState::Closed;
        self.pending_candidates.clear();

        info!("Closing peer connection for peer {}", self.peer_id);
        if let Err(e) = self.link.close().await {
            warn!("Error closing link for peer {}: {}", self.peer_id, e);
        }
        true
    }

    fn enter_negotiating(&mut self) {
        if self.state == PeerState::Idle {
            self.state = PeerState::Negotiating;
        }
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state == PeerState::Closed {
            return Err(Error::InvalidState(format!(
                "Cannot {} for peer {}: connection closed",
                operation, self.peer_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer_id", &self.peer_id)
            .field("connection_id", &self.connection_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("negotiation", &self.negotiation)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

fn can_transition(from: PeerState, to: PeerState) -> bool {
    use PeerState::*;
    match (from, to) {
        (a, b) if a == b => false,
        (Closed, _) | (Failed, _) => false,
        (Idle, Negotiating) => true,
        (Idle | Negotiating, Connected | Disconnected | Failed) => true,
        (Connected, Disconnected | Failed) => true,
        (Disconnected, Connected | Failed) => true,
        _ => false,
    }
}
