//! Local audio capture
//!
//! A capture provider supplies the outgoing audio track before the session
//! joins. Capture failures are reported as [`MediaError`] and abort the join
//! before anything is sent to the relay.

pub mod tracks;

pub use tracks::{opus_track, LocalAudio, SilenceCapture};

use async_trait::async_trait;

/// Capture failures, mirroring the reasons a device request can be refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The user or platform denied microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No capture device is present
    #[error("no audio input device found")]
    DeviceNotFound,

    /// Capture is not supported in this environment
    #[error("audio capture not supported")]
    NotSupported,

    /// The device exists but is held by another process
    #[error("audio device busy")]
    DeviceBusy,

    /// Capture requires a secure context
    #[error("audio capture requires a secure context")]
    Insecure,

    /// Anything else reported by the provider
    #[error("{0}")]
    Other(String),
}

/// Provider of the local outgoing audio
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire local audio, ready to be attached to peer links
    async fn capture(&self) -> std::result::Result<LocalAudio, MediaError>;
}
