//! Step-by-step orchestrator driver

use super::fakes::{FakeLinkFactory, RecordingSink};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use voicemesh_webrtc::media::{opus_track, LocalAudio};
use voicemesh_webrtc::mesh::{MeshCommand, MeshInput, MeshOrchestrator};
use voicemesh_webrtc::peer::RecoveryPolicy;
use voicemesh_webrtc::signaling::{Envelope, MessageType};
use voicemesh_webrtc::{ChannelEvent, Identity, MeshEvent};

/// An orchestrator whose inputs are fed by the test
///
/// Link events and timer firings land on the orchestrator's own input queue;
/// [`pump`](Self::pump) handles what is already queued and
/// [`next_input`](Self::next_input) waits for the next one.
pub struct MeshFixture {
    pub mesh: MeshOrchestrator,
    pub sink: Arc<RecordingSink>,
    pub factory: Arc<FakeLinkFactory>,
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
    inputs: mpsc::UnboundedReceiver<MeshInput>,
}

impl MeshFixture {
    /// Orchestrator already connected to the relay as `me`
    pub async fn connected(me: &str) -> Self {
        Self::with_policy(me, RecoveryPolicy::default()).await
    }

    pub async fn with_policy(me: &str, policy: RecoveryPolicy) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let factory = Arc::new(FakeLinkFactory::default());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (mesh, inputs) =
            MeshOrchestrator::new(sink.clone(), factory.clone(), policy, 10, events_tx)
                .expect("valid orchestrator");

        let mut fixture = Self {
            mesh,
            sink,
            factory,
            events,
            inputs,
        };
        fixture
            .mesh
            .handle(MeshInput::Channel(ChannelEvent::Connected(Identity::new(me))))
            .await;
        fixture.sink.take();
        fixture.drain_events();
        fixture
    }

    /// Join with a fresh local track and forget the join-time chatter
    pub async fn join(&mut self) {
        self.mesh
            .handle(MeshInput::Command(MeshCommand::Join {
                user_name: "me".to_string(),
                audio: LocalAudio::new(opus_track("mic")),
            }))
            .await;
        self.sink.take();
        self.drain_events();
    }

    /// Feed one relay message
    pub async fn signal(&mut self, kind: MessageType, payload: Value) {
        self.mesh
            .handle(MeshInput::Signal(Envelope::new(kind, payload)))
            .await;
    }

    /// Roster snapshot for the given peer ids
    pub async fn roster(&mut self, ids: &[&str]) {
        self.signal(MessageType::CurrentUsers, users(ids)).await;
    }

    /// Offer from a remote peer
    pub async fn offer_from(&mut self, sender: &str) {
        self.signal(
            MessageType::Offer,
            json!({
                "sender": sender,
                "offer": {"type": "offer", "sdp": format!("offer-sdp-{}", sender)}
            }),
        )
        .await;
    }

    /// Answer from a remote peer
    pub async fn answer_from(&mut self, sender: &str) {
        self.signal(
            MessageType::Answer,
            json!({
                "sender": sender,
                "answer": {"type": "answer", "sdp": format!("answer-sdp-{}", sender)}
            }),
        )
        .await;
    }

    /// Remote candidate from a peer
    pub async fn candidate_from(&mut self, sender: &str, candidate: &str) {
        self.signal(
            MessageType::IceCandidate,
            json!({
                "sender": sender,
                "candidate": {"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0}
            }),
        )
        .await;
    }

    pub async fn command(&mut self, command: MeshCommand) -> bool {
        self.mesh.handle(MeshInput::Command(command)).await
    }

    pub async fn channel(&mut self, event: ChannelEvent) {
        self.mesh.handle(MeshInput::Channel(event)).await;
    }

    /// Handle every input already queued (link events, fired timers)
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.inputs.try_recv() {
            self.mesh.handle(input).await;
            handled += 1;
        }
        handled
    }

    /// Wait for the next queued input and handle it
    ///
    /// With paused time this advances the clock to the next pending timer.
    pub async fn next_input(&mut self) {
        let input = self.inputs.recv().await.expect("input queue open");
        self.mesh.handle(input).await;
    }

    /// Whether any input arrives within `within`
    pub async fn stays_quiet(&mut self, within: Duration) -> bool {
        tokio::time::timeout(within, self.inputs.recv()).await.is_err()
    }

    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// `[{userId, userName}]` payload for the given ids
pub fn users(ids: &[&str]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({"userId": id, "userName": id.to_uppercase()}))
            .collect(),
    )
}
