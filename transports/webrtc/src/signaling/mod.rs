//! Signaling: relay wire protocol, resilient client channel and the relay
//!
//! The channel carries only negotiation metadata; media never passes
//! through the relay.

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod protocol;
pub mod websocket;

pub use backoff::BackoffPolicy;
pub use channel::{
    ChannelEvent, ChannelOptions, ChannelState, Delivery, Identity, SignalSink, SignalingChannel,
};
pub use connector::{FrameSink, FrameStream, RelayConnector, WebSocketConnector};
pub use protocol::{
    Envelope, IceCandidate, InboundMessage, MessageType, OutboundMessage, SdpKind,
    SessionDescription, UserEntry,
};
pub use websocket::{RelayHandle, RelayServer};
