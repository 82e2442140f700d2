//! Outgoing audio tracks

use super::{AudioCapture, MediaError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media stream id shared by every outgoing track of a session
pub const STREAM_ID: &str = "voicemesh-audio";

/// Opus frame duration used by the capture pump
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// A single Opus frame that decodes to 20 ms of silence
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Create an Opus track (48 kHz stereo) for outgoing audio
pub fn opus_track(track_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        track_id.to_owned(),
        STREAM_ID.to_owned(),
    ))
}

/// Local outgoing audio, shared by every peer link of the session
///
/// The same track is attached to each link; the capture pump (if any) is
/// stopped when the audio is released or dropped.
pub struct LocalAudio {
    track: Arc<TrackLocalStaticSample>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LocalAudio {
    /// Wrap a track that is fed elsewhere
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            pump: Mutex::new(None),
        }
    }

    /// Wrap a track fed by a background pump task
    pub fn with_pump(track: Arc<TrackLocalStaticSample>, pump: JoinHandle<()>) -> Self {
        Self {
            track,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// The underlying track
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Track id announced in negotiation
    pub fn track_id(&self) -> &str {
        self.track.id()
    }

    /// Stop feeding the track; safe to call more than once
    pub fn release(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            debug!(track_id = %self.track.id(), "Local audio released");
        }
    }

    /// Whether the capture pump is still attached
    pub fn is_active(&self) -> bool {
        self.pump.lock().is_some()
    }
}

impl Drop for LocalAudio {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LocalAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudio")
            .field("track_id", &self.track.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Capture provider that streams Opus silence
///
/// Used by the command-line participant, which has no microphone, and by
/// tests. Frames are written at real-time pace so the remote side sees a
/// live track.
#[derive(Debug, Clone, Default)]
pub struct SilenceCapture;

impl SilenceCapture {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioCapture for SilenceCapture {
    async fn capture(&self) -> std::result::Result<LocalAudio, MediaError> {
        let track_id = format!("audio-{}", uuid::Uuid::new_v4());
        let track = opus_track(&track_id);

        let pump_track = Arc::clone(&track);
        let pump = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(&OPUS_SILENCE_FRAME),
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = pump_track.write_sample(&sample).await {
                    warn!("Failed to write silence frame: {}", e);
                }
            }
        });

        debug!(track_id = %track_id, "Silence capture started");
        Ok(LocalAudio::with_pump(track, pump))
    }
}
