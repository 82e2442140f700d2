//! Peer mesh orchestrator
//!
//! Single owner of the roster, the connection arena and the recovery tasks.
//! Every input (relay messages, channel lifecycle, link events, timer
//! firings, client commands) arrives on one queue and is handled to
//! completion before the next one is taken.
//!
//! Negotiation is only started proactively for the roster snapshot the relay
//! sends after joining: the newcomer offers to everyone already present and
//! everyone else answers. This keeps both sides from offering at once.

use super::events::{ConnectionStatus, MeshEvent};
use super::roster::{Peer, Roster};
use crate::media::LocalAudio;
use crate::peer::{
    LinkEventSender, LinkEvent, LinkFactory, LinkNotice, NegotiationState, PeerConnection,
    PeerManager, PeerState, RecoveryKind, RecoveryPolicy, RecoveryTasks, Role,
};
use crate::signaling::channel::{ChannelEvent, Identity, SignalSink};
use crate::signaling::protocol::{
    Envelope, IceCandidate, InboundMessage, OutboundMessage, SdpKind, SessionDescription,
    UserEntry,
};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Requests from the client façade
#[derive(Debug)]
pub enum MeshCommand {
    /// Enter the room with already-captured audio
    Join {
        user_name: String,
        audio: LocalAudio,
    },
    /// Leave the room and return to observing
    Leave,
    /// Tear everything down and stop the loop
    Shutdown { done: oneshot::Sender<()> },
}

/// Everything the orchestrator reacts to
#[derive(Debug)]
pub enum MeshInput {
    /// Message from the relay
    Signal(Envelope),
    /// Relay connection lifecycle
    Channel(ChannelEvent),
    /// Event from a peer link
    Link(LinkNotice),
    /// A recovery task fired
    Timer {
        peer_id: String,
        kind: RecoveryKind,
        token: u64,
    },
    Command(MeshCommand),
}

struct Session {
    user_name: String,
    audio: LocalAudio,
}

/// Drives per-peer negotiation and recovery for the whole mesh
pub struct MeshOrchestrator {
    signals: Arc<dyn SignalSink>,
    factory: Arc<dyn LinkFactory>,
    policy: RecoveryPolicy,
    inputs: mpsc::UnboundedSender<MeshInput>,
    events: mpsc::UnboundedSender<MeshEvent>,
    identity: Option<Identity>,
    session: Option<Session>,
    roster: Roster,
    peers: PeerManager,
    recovery: RecoveryTasks,
    remote_audio: HashSet<String>,
}

impl MeshOrchestrator {
    /// Create the orchestrator and its input queue
    ///
    /// # Arguments
    ///
    /// * `signals` - Where outbound signaling goes
    /// * `factory` - Creates media links for new connections
    /// * `policy` - Retry and grace-period timings
    /// * `max_peers` - Connection limit (1-10)
    /// * `events` - Receives [`MeshEvent`]s
    pub fn new(
        signals: Arc<dyn SignalSink>,
        factory: Arc<dyn LinkFactory>,
        policy: RecoveryPolicy,
        max_peers: u32,
        events: mpsc::UnboundedSender<MeshEvent>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshInput>)> {
        let (inputs, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            signals,
            factory,
            policy,
            inputs,
            events,
            identity: None,
            session: None,
            roster: Roster::new(),
            peers: PeerManager::new(max_peers)?,
            recovery: RecoveryTasks::new(),
            remote_audio: HashSet::new(),
        };
        Ok((orchestrator, rx))
    }

    /// Sender for feeding inputs from the channel and the client
    pub fn input_sender(&self) -> mpsc::UnboundedSender<MeshInput> {
        self.inputs.clone()
    }

    /// Process inputs until a shutdown command arrives
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<MeshInput>) {
        info!("Mesh orchestrator started");
        while let Some(input) = inputs.recv().await {
            if !self.handle(input).await {
                break;
            }
        }
        info!("Mesh orchestrator stopped");
    }

    /// Handle one input; `false` once the orchestrator has shut down
    pub async fn handle(&mut self, input: MeshInput) -> bool {
        match input {
            MeshInput::Signal(envelope) => match InboundMessage::from_envelope(&envelope) {
                Ok(message) => self.on_message(message).await,
                Err(e) => warn!(message_type = %envelope.kind, "Ignoring relay message: {}", e),
            },
            MeshInput::Channel(event) => self.on_channel_event(event),
            MeshInput::Link(notice) => self.on_link_event(notice).await,
            MeshInput::Timer {
                peer_id,
                kind,
                token,
            } => self.on_timer(&peer_id, kind, token).await,
            MeshInput::Command(MeshCommand::Join { user_name, audio }) => {
                self.join(user_name, audio)
            }
            MeshInput::Command(MeshCommand::Leave) => self.leave().await,
            MeshInput::Command(MeshCommand::Shutdown { done }) => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    pub fn recovery(&self) -> &RecoveryTasks {
        &self.recovery
    }

    // ----- relay messages -----

    async fn on_message(&mut self, message: InboundMessage) {
        match message {
            // Handled through the channel lifecycle event
            InboundMessage::Connected { .. } => {}
            InboundMessage::OnlineUsers(users) => self.on_online_users(users),
            InboundMessage::CurrentUsers(users) => self.on_roster_snapshot(users).await,
            InboundMessage::UserJoined(user) => self.on_user_joined(user),
            InboundMessage::UserLeft(peer_id) => self.on_user_left(&peer_id).await,
            InboundMessage::Offer {
                sender,
                description,
            } => self.on_offer(sender, description).await,
            InboundMessage::Answer {
                sender,
                description,
            } => self.on_answer(&sender, description).await,
            InboundMessage::IceCandidate { sender, candidate } => {
                self.on_candidate(&sender, candidate).await
            }
            InboundMessage::Error { message } => {
                warn!("Relay error: {}", message);
                self.emit(MeshEvent::RelayError { message });
            }
        }
    }

    fn on_online_users(&mut self, users: Vec<UserEntry>) {
        let others = self.without_self(users);
        if !self.is_joined() {
            self.roster.replace_all(others.clone());
        }
        debug!(online = others.len(), "Presence updated");
        self.emit(MeshEvent::Presence(others));
    }

    async fn on_roster_snapshot(&mut self, users: Vec<UserEntry>) {
        if !self.is_joined() {
            warn!("Ignoring roster snapshot while not joined");
            return;
        }

        let peers = self.without_self(users);
        let departed = self.roster.replace_all(peers.clone());
        for peer_id in departed {
            self.destroy_connection(&peer_id).await;
        }
        info!(peers = peers.len(), "Roster snapshot received");
        self.emit(MeshEvent::RosterReplaced(peers.clone()));

        for peer in peers {
            if !self.peers.contains(&peer.id) {
                self.start_offer(&peer.id).await;
            }
        }
    }

    fn on_user_joined(&mut self, user: UserEntry) {
        if self.is_self(&user.user_id) {
            return;
        }
        let peer = Peer::from(user);
        info!(peer_id = %peer.id, name = %peer.display_name, "Peer joined");
        self.roster.insert(peer.clone());
        // The newcomer offers to us; nothing to start here
        self.emit(MeshEvent::PeerJoined(peer));
    }

    async fn on_user_left(&mut self, peer_id: &str) {
        let known = self.roster.remove(peer_id).is_some();
        self.destroy_connection(peer_id).await;
        self.peers.reset_retries(peer_id);
        if known {
            info!(peer_id = %peer_id, "Peer left");
            self.emit(MeshEvent::PeerLeft {
                peer_id: peer_id.to_string(),
            });
        }
    }

    async fn on_offer(&mut self, sender: String, description: SessionDescription) {
        if description.kind != SdpKind::Offer {
            warn!(peer_id = %sender, kind = ?description.kind, "Dropping offer message with mismatched description");
            return;
        }
        if !self.is_joined() {
            warn!(peer_id = %sender, "Dropping offer received while not joined");
            return;
        }
        if self.is_self(&sender) {
            return;
        }

        if !self.roster.contains(&sender) {
            let peer = Peer {
                id: sender.clone(),
                display_name: sender.clone(),
            };
            self.roster.insert(peer.clone());
            self.emit(MeshEvent::PeerJoined(peer));
        }

        let glare = self
            .peers
            .get(&sender)
            .is_some_and(|c| c.negotiation_state() == NegotiationState::HaveLocalOffer);
        if glare {
            if self.yields_to(&sender) {
                info!(peer_id = %sender, "Offer collision, yielding");
                self.destroy_connection(&sender).await;
            } else {
                info!(peer_id = %sender, "Offer collision, keeping our offer");
                return;
            }
        }

        if !self.peers.contains(&sender) {
            if let Err(e) = self.create_connection(&sender, Role::Answerer).await {
                warn!(peer_id = %sender, "Cannot answer offer: {}", e);
                return;
            }
        }

        let result = self.answer(&sender, &description).await;
        if let Err(e) = result {
            self.abandon(&sender, e).await;
        }
    }

    async fn answer(&mut self, peer_id: &str, offer: &SessionDescription) -> Result<()> {
        let conn = self.peers.require_mut(peer_id)?;
        conn.apply_remote_description(offer).await?;
        let answer = conn.create_answer().await?;
        self.signals.send(OutboundMessage::Answer {
            target: peer_id.to_string(),
            description: answer,
        });
        debug!(peer_id = %peer_id, "Answer sent");
        Ok(())
    }

    async fn on_answer(&mut self, sender: &str, description: SessionDescription) {
        if description.kind != SdpKind::Answer {
            warn!(peer_id = %sender, kind = ?description.kind, "Dropping answer message with mismatched description");
            return;
        }
        let Some(conn) = self.peers.get_mut(sender) else {
            debug!(peer_id = %sender, "Dropping answer for unknown connection");
            return;
        };
        match conn.apply_remote_description(&description).await {
            Ok(_) => {}
            // Duplicate or late answer; the link itself is fine
            Err(Error::InvalidState(reason)) => {
                warn!(peer_id = %sender, "Ignoring answer: {}", reason);
            }
            Err(e) => self.abandon(sender, e).await,
        }
    }

    async fn on_candidate(&mut self, sender: &str, candidate: IceCandidate) {
        let Some(conn) = self.peers.get_mut(sender) else {
            debug!(peer_id = %sender, "Dropping candidate for unknown connection");
            return;
        };
        let result = conn.add_remote_candidate(candidate).await;
        if let Err(e) = result {
            self.abandon(sender, e).await;
        }
    }

    // ----- channel lifecycle -----

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match &event {
            ChannelEvent::Connected(identity) => {
                self.identity = Some(identity.clone());
                self.signals.send(OutboundMessage::GetOnlineUsers);
                if let Some(session) = &self.session {
                    info!("Rejoining room after reconnect");
                    self.signals.send(OutboundMessage::JoinRoom {
                        user_name: session.user_name.clone(),
                    });
                }
            }
            ChannelEvent::Disconnected | ChannelEvent::Closed => {
                // Established links are peer-to-peer and outlive the relay
                self.identity = None;
            }
            ChannelEvent::Reconnecting { .. } | ChannelEvent::Unreachable { .. } => {}
        }
        self.emit(MeshEvent::Status(ConnectionStatus::from(event)));
    }

    // ----- link events -----

    async fn on_link_event(&mut self, notice: LinkNotice) {
        if !self.peers.is_current(&notice.peer_id, &notice.connection_id) {
            debug!(
                peer_id = %notice.peer_id,
                connection_id = %notice.connection_id,
                "Ignoring event from replaced connection"
            );
            return;
        }
        let peer_id = notice.peer_id;

        match notice.event {
            LinkEvent::LocalCandidate(candidate) => {
                self.signals.send(OutboundMessage::IceCandidate {
                    target: peer_id,
                    candidate,
                });
            }
            LinkEvent::RemoteAudio { track_id } => {
                self.remote_audio.insert(peer_id.clone());
                self.emit(MeshEvent::RemoteAudio { peer_id, track_id });
            }
            LinkEvent::Health(health) => {
                let Some(state) = self
                    .peers
                    .get_mut(&peer_id)
                    .and_then(|c| c.on_health(health))
                else {
                    return;
                };
                self.on_peer_state(&peer_id, state).await;
            }
        }
    }

    async fn on_peer_state(&mut self, peer_id: &str, state: PeerState) {
        match state {
            PeerState::Connected => {
                self.recovery.cancel(peer_id, RecoveryKind::Grace);
                self.recovery.cancel(peer_id, RecoveryKind::Retry);
                self.peers.reset_retries(peer_id);
                info!(peer_id = %peer_id, "Peer link connected");
            }
            PeerState::Disconnected => {
                info!(
                    peer_id = %peer_id,
                    grace_secs = self.policy.grace_period.as_secs(),
                    "Peer link disconnected, waiting for recovery"
                );
                self.schedule(peer_id, RecoveryKind::Grace, self.policy.grace_period);
            }
            PeerState::Failed => self.on_link_failed(peer_id).await,
            PeerState::Idle | PeerState::Negotiating | PeerState::Closed => {}
        }
    }

    async fn on_link_failed(&mut self, peer_id: &str) {
        self.recovery.cancel_peer(peer_id);
        self.destroy_connection(peer_id).await;

        let attempts = self.peers.retry_count(peer_id);
        if self.policy.should_retry(attempts) {
            self.peers.record_retry(peer_id);
            warn!(
                peer_id = %peer_id,
                delay_ms = self.policy.retry_delay.as_millis() as u64,
                "Peer link failed, retrying"
            );
            self.schedule(peer_id, RecoveryKind::Retry, self.policy.retry_delay);
        } else {
            self.peers.reset_retries(peer_id);
            error!(peer_id = %peer_id, "Peer link failed again, giving up");
            self.emit(MeshEvent::LinkFailed {
                peer_id: peer_id.to_string(),
                reason: "connection failed after retry".to_string(),
            });
        }
    }

    // ----- timers -----

    fn schedule(&mut self, peer_id: &str, kind: RecoveryKind, delay: std::time::Duration) {
        let inputs = self.inputs.clone();
        let id = peer_id.to_string();
        self.recovery.schedule(peer_id, kind, delay, move |token| {
            let _ = inputs.send(MeshInput::Timer {
                peer_id: id,
                kind,
                token,
            });
        });
    }

    async fn on_timer(&mut self, peer_id: &str, kind: RecoveryKind, token: u64) {
        if !self.recovery.take_fired(peer_id, kind, token) {
            debug!(peer_id = %peer_id, ?kind, "Ignoring stale recovery task");
            return;
        }

        match kind {
            RecoveryKind::Retry => {
                if !self.is_joined() || !self.roster.contains(peer_id) {
                    debug!(peer_id = %peer_id, "Retry no longer needed");
                    return;
                }
                if self.peers.contains(peer_id) {
                    debug!(peer_id = %peer_id, "Connection already re-established");
                    return;
                }
                info!(peer_id = %peer_id, "Retrying peer link as offerer");
                self.start_offer(peer_id).await;
            }
            RecoveryKind::Grace => {
                let still_down = self
                    .peers
                    .get(peer_id)
                    .is_some_and(|c| c.state() == PeerState::Disconnected);
                if still_down {
                    warn!(peer_id = %peer_id, "Grace period expired");
                    self.on_link_failed(peer_id).await;
                }
            }
        }
    }

    // ----- commands -----

    fn join(&mut self, user_name: String, audio: LocalAudio) {
        if self.session.is_some() {
            warn!("Already joined, ignoring join");
            return;
        }
        info!(name = %user_name, "Joining room");
        self.signals.send(OutboundMessage::JoinRoom {
            user_name: user_name.clone(),
        });
        self.session = Some(Session {
            user_name: user_name.clone(),
            audio,
        });
        self.emit(MeshEvent::Joined { user_name });
    }

    async fn leave(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("Not joined, ignoring leave");
            return;
        };
        info!("Leaving room");
        self.signals.send(OutboundMessage::LeaveRoom);

        self.recovery.cancel_all();
        for mut conn in self.peers.drain() {
            let peer_id = conn.peer_id().to_string();
            conn.close().await;
            if self.remote_audio.remove(&peer_id) {
                self.emit(MeshEvent::RemoteAudioRemoved { peer_id });
            }
        }
        session.audio.release();
        self.roster.clear();

        self.emit(MeshEvent::Left);
        self.signals.send(OutboundMessage::GetOnlineUsers);
    }

    async fn shutdown(&mut self) {
        self.leave().await;
        self.recovery.cancel_all();
        self.roster.clear();
    }

    // ----- connections -----

    /// Create a connection with local audio attached; no-op if one exists
    async fn create_connection(&mut self, peer_id: &str, role: Role) -> Result<bool> {
        if !self.peers.admit(peer_id)? {
            return Ok(false);
        }

        let inputs = self.inputs.clone();
        let mut conn = PeerConnection::open(
            peer_id.to_string(),
            role,
            self.factory.as_ref(),
            move |peer_id, connection_id| {
                LinkEventSender::new(
                    peer_id,
                    connection_id,
                    Arc::new(move |notice: LinkNotice| {
                        let _ = inputs.send(MeshInput::Link(notice));
                    }),
                )
            },
        )
        .await?;

        let audio = self.session.as_ref().map(|s| &s.audio);
        if let Err(e) = conn.attach_local_media(audio).await {
            conn.close().await;
            return Err(e);
        }

        if let Some(mut duplicate) = self.peers.insert(conn) {
            duplicate.close().await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn start_offer(&mut self, peer_id: &str) {
        match self.create_connection(peer_id, Role::Offerer).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(peer_id = %peer_id, "Cannot create connection: {}", e);
                return;
            }
        }

        let result = match self.peers.require_mut(peer_id) {
            Ok(conn) => conn.create_offer().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(offer) => {
                self.signals.send(OutboundMessage::Offer {
                    target: peer_id.to_string(),
                    description: offer,
                });
                debug!(peer_id = %peer_id, "Offer sent");
            }
            Err(e) => self.abandon(peer_id, e).await,
        }
    }

    /// Close and forget a peer's connection and recovery tasks
    async fn destroy_connection(&mut self, peer_id: &str) {
        self.recovery.cancel_peer(peer_id);
        if let Some(mut conn) = self.peers.remove(peer_id) {
            conn.close().await;
        }
        if self.remote_audio.remove(peer_id) {
            self.emit(MeshEvent::RemoteAudioRemoved {
                peer_id: peer_id.to_string(),
            });
        }
    }

    /// Give up on a connection after a negotiation error
    async fn abandon(&mut self, peer_id: &str, err: Error) {
        error!(peer_id = %peer_id, "Negotiation failed, abandoning connection: {}", err);
        self.destroy_connection(peer_id).await;
        self.emit(MeshEvent::LinkFailed {
            peer_id: peer_id.to_string(),
            reason: err.to_string(),
        });
    }

    // ----- helpers -----

    fn is_self(&self, id: &str) -> bool {
        self.identity.as_ref().is_some_and(|me| me.as_str() == id)
    }

    /// The side with the lower identity gives up its offer on collision
    fn yields_to(&self, other: &str) -> bool {
        self.identity
            .as_ref()
            .map_or(true, |me| me.as_str() < other)
    }

    fn without_self(&self, users: Vec<UserEntry>) -> Vec<Peer> {
        users
            .into_iter()
            .filter(|u| !self.is_self(&u.user_id))
            .map(Peer::from)
            .collect()
    }

    fn emit(&self, event: MeshEvent) {
        if self.events.send(event).is_err() {
            debug!("No mesh event listener");
        }
    }
}

impl Drop for MeshOrchestrator {
    fn drop(&mut self) {
        self.recovery.cancel_all();
    }
}
