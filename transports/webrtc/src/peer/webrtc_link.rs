//! [`MediaLink`] over webrtc-rs

use super::link::{HealthState, LinkEvent, LinkEventSender, LinkFactory, MediaLink};
use crate::config::VoiceMeshConfig;
use crate::media::LocalAudio;
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Creates [`WebRtcLink`]s with the configured STUN/TURN servers
#[derive(Debug, Clone)]
pub struct WebRtcLinkFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcLinkFactory {
    pub fn new(config: &VoiceMeshConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self { ice_servers }
    }
}

#[async_trait]
impl LinkFactory for WebRtcLinkFactory {
    #[instrument(skip(self, events), fields(peer_id = %events.peer_id()))]
    async fn create_link(&self, events: LinkEventSender) -> Result<Arc<dyn MediaLink>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        register_handlers(&peer_connection, &events);

        info!(
            connection_id = %events.connection_id(),
            "Created WebRTC link"
        );

        Ok(Arc::new(WebRtcLink {
            peer_id: events.peer_id().to_string(),
            peer_connection,
        }))
    }
}

fn register_handlers(peer_connection: &Arc<RTCPeerConnection>, events: &LinkEventSender) {
    let state_events = events.clone();
    peer_connection.on_peer_connection_state_change(Box::new(
        move |s: RTCPeerConnectionState| {
            let health = match s {
                RTCPeerConnectionState::New => Some(HealthState::New),
                RTCPeerConnectionState::Connecting => Some(HealthState::Connecting),
                RTCPeerConnectionState::Connected => Some(HealthState::Connected),
                RTCPeerConnectionState::Disconnected => Some(HealthState::Disconnected),
                RTCPeerConnectionState::Failed => Some(HealthState::Failed),
                RTCPeerConnectionState::Closed => Some(HealthState::Closed),
                _ => None,
            };
            if let Some(health) = health {
                state_events.send(LinkEvent::Health(health));
            }
            Box::pin(async {})
        },
    ));

    let candidate_events = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // `None` marks the end of gathering
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => candidate_events.send(LinkEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => warn!("Failed to encode local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let track_events = events.clone();
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            if track.kind() == RTPCodecType::Audio {
                let track_id = track.id().to_string();
                debug!(track_id = %track_id, "Remote audio track");
                track_events.send(LinkEvent::RemoteAudio { track_id });

                // Playback is outside this crate; keep the receiver drained
                tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });
            }
            Box::pin(async {})
        },
    ));
}

/// Audio link backed by an `RTCPeerConnection`
pub struct WebRtcLink {
    peer_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcLink {
    async fn local_description(&self, kind: SdpKind) -> Result<SessionDescription> {
        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description after setting it".to_string()))?;
        Ok(SessionDescription {
            kind,
            sdp: local.sdp,
        })
    }
}

#[async_trait]
impl MediaLink for WebRtcLink {
    async fn add_local_audio(&self, audio: &LocalAudio) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(audio.track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to add audio track: {}", e)))?;

        // RTCP must be read for interceptors (NACK, reports) to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        debug!(peer_id = %self.peer_id, track_id = %audio.track_id(), "Local audio attached");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        debug!("Created SDP offer for peer {}", self.peer_id);
        self.local_description(SdpKind::Offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        debug!("Created SDP answer for peer {}", self.peer_id);
        self.local_description(SdpKind::Answer).await
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        }
        .map_err(|e| Error::SdpError(format!("Failed to parse remote description: {}", e)))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing WebRTC link for peer {}", self.peer_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    #[test]
    fn test_factory_ice_servers_from_config() {
        let config = VoiceMeshConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "turn:turn.example.com:3478".into(),
            username: "u".into(),
            credential: "c".into(),
        }]);
        let factory = WebRtcLinkFactory::new(&config);

        assert_eq!(factory.ice_servers.len(), 3);
        assert_eq!(factory.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(factory.ice_servers[2].username, "u");
    }

    #[tokio::test]
    async fn test_offer_contains_audio_section() {
        // No ICE servers: gathering stays on host candidates
        let factory = WebRtcLinkFactory {
            ice_servers: Vec::new(),
        };
        let events = LinkEventSender::new("peer-a", "conn-1", Arc::new(|_| {}));
        let link = factory.create_link(events).await.unwrap();

        let audio = LocalAudio::new(crate::media::opus_track("audio-test"));
        link.add_local_audio(&audio).await.unwrap();

        let offer = link.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));

        link.close().await.unwrap();
    }
}
