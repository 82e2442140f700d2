//! Test doubles for the signaling sink, media links and audio capture

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use voicemesh_webrtc::media::{AudioCapture, LocalAudio, MediaError};
use voicemesh_webrtc::peer::{HealthState, LinkEvent, LinkEventSender, LinkFactory, MediaLink};
use voicemesh_webrtc::signaling::{
    Delivery, IceCandidate, OutboundMessage, SessionDescription, SignalSink,
};
use voicemesh_webrtc::{Error, Result};

/// Records every outbound signaling message
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    /// Everything sent since the last call
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Offer targets since the last call, in send order
    pub fn take_offer_targets(&self) -> Vec<String> {
        self.take()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Offer { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }
}

impl SignalSink for RecordingSink {
    fn send(&self, message: OutboundMessage) -> Delivery {
        self.sent.lock().push(message);
        Delivery::Sent
    }
}

/// Media link that records calls and lets the test report health
pub struct FakeLink {
    events: LinkEventSender,
    calls: Mutex<Vec<String>>,
    reject_remote: bool,
}

impl FakeLink {
    pub fn peer_id(&self) -> &str {
        self.events.peer_id()
    }

    pub fn connection_id(&self) -> &str {
        self.events.connection_id()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.calls.lock().iter().any(|c| c == "close")
    }

    /// Report a transport health change, as ICE would
    pub fn report(&self, health: HealthState) {
        self.events.send(LinkEvent::Health(health));
    }

    /// Report a gathered local candidate
    pub fn gather(&self, candidate: &str) {
        self.events.send(LinkEvent::LocalCandidate(IceCandidate {
            candidate: candidate.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
    }

    /// Report the remote audio track
    pub fn remote_audio(&self) {
        self.events.send(LinkEvent::RemoteAudio {
            track_id: format!("audio-{}", self.peer_id()),
        });
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl MediaLink for FakeLink {
    async fn add_local_audio(&self, audio: &LocalAudio) -> Result<()> {
        self.record(format!("audio:{}", audio.track_id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("offer");
        Ok(SessionDescription::offer(format!("offer-from-{}", self.connection_id())))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("answer");
        Ok(SessionDescription::answer(format!("answer-from-{}", self.connection_id())))
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(Error::SdpError("malformed description".to_string()));
        }
        self.record(format!("remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

/// Creates [`FakeLink`]s and keeps them for inspection
#[derive(Default)]
pub struct FakeLinkFactory {
    links: Mutex<Vec<Arc<FakeLink>>>,
    reject_remote: Mutex<bool>,
}

impl FakeLinkFactory {
    /// Links created from now on reject remote descriptions
    pub fn reject_remote_descriptions(&self) {
        *self.reject_remote.lock() = true;
    }

    /// Every link ever created for a peer, oldest first
    pub fn links_for(&self, peer_id: &str) -> Vec<Arc<FakeLink>> {
        self.links
            .lock()
            .iter()
            .filter(|l| l.peer_id() == peer_id)
            .cloned()
            .collect()
    }

    /// Most recently created link for a peer
    pub fn latest(&self, peer_id: &str) -> Arc<FakeLink> {
        self.links_for(peer_id)
            .pop()
            .unwrap_or_else(|| panic!("no link created for {}", peer_id))
    }

    pub fn created(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl LinkFactory for FakeLinkFactory {
    async fn create_link(&self, events: LinkEventSender) -> Result<Arc<dyn MediaLink>> {
        let link = Arc::new(FakeLink {
            events,
            calls: Mutex::new(Vec::new()),
            reject_remote: *self.reject_remote.lock(),
        });
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

/// Capture that always fails with the given error
pub struct FailingCapture(pub MediaError);

#[async_trait]
impl AudioCapture for FailingCapture {
    async fn capture(&self) -> std::result::Result<LocalAudio, MediaError> {
        Err(self.0.clone())
    }
}
