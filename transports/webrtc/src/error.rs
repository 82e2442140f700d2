//! Error types for the voice mesh

use crate::media::MediaError;

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling, negotiation or session handling
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Operation is not valid in the current negotiation state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Local audio could not be captured
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    /// Display name rejected before joining
    #[error("Invalid display name: {0}")]
    InvalidDisplayName(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is recovered by reconnecting the signaling channel
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_) | Error::WebSocketError(_) | Error::IoError(_)
        )
    }

    /// Check if this error came out of an offer/answer/candidate exchange
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_) | Error::IceCandidateError(_) | Error::InvalidState(_)
        )
    }

    /// Check if this error is a local capture failure
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaAcquisition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingError("test".to_string()).is_retryable());
        assert!(Error::WebSocketError("test".to_string()).is_retryable());
        assert!(!Error::SdpError("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_negotiation_error() {
        assert!(Error::SdpError("bad sdp".to_string()).is_negotiation_error());
        assert!(Error::IceCandidateError("bad".to_string()).is_negotiation_error());
        assert!(!Error::PeerNotFound("a".to_string()).is_negotiation_error());
    }

    #[test]
    fn test_media_error_conversion() {
        let err = Error::from(MediaError::PermissionDenied);
        assert!(err.is_media_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.is_retryable());
    }
}
