//! In-memory relay connector

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::SinkExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use voicemesh_webrtc::signaling::{
    Envelope, FrameSink, FrameStream, MessageType, RelayConnector,
};
use voicemesh_webrtc::{Error, Result};

struct RelayEnd {
    to_client: mpsc::UnboundedSender<Result<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// Accepts every connection and completes the handshake with a fixed id
///
/// Frames the client sends are kept for inspection; the test can push relay
/// frames with [`deliver`](Self::deliver).
pub struct LoopbackConnector {
    identity: String,
    ends: Mutex<Vec<RelayEnd>>,
}

impl LoopbackConnector {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            ends: Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> usize {
        self.ends.lock().len()
    }

    /// Message types the client has sent on the latest connection so far
    pub fn sent_types(&self) -> Vec<String> {
        let mut ends = self.ends.lock();
        let Some(end) = ends.last_mut() else {
            return Vec::new();
        };
        let mut types = Vec::new();
        while let Ok(Some(frame)) = end.from_client.try_next() {
            if let Ok(envelope) = Envelope::from_json(&frame) {
                types.push(envelope.kind);
            }
        }
        types
    }

    /// Push a relay frame to the latest connection
    pub fn deliver(&self, kind: MessageType, payload: Value) {
        let frame = Envelope::new(kind, payload)
            .to_json()
            .expect("envelope serializes");
        if let Some(end) = self.ends.lock().last() {
            let _ = end.to_client.unbounded_send(Ok(frame));
        }
    }
}

#[async_trait]
impl RelayConnector for LoopbackConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let (to_client, client_rx) = mpsc::unbounded();
        let (client_tx, from_client) = mpsc::unbounded();

        let handshake = Envelope::new(MessageType::Connected, json!({ "id": self.identity }))
            .to_json()?;
        to_client
            .unbounded_send(Ok(handshake))
            .map_err(|e| Error::WebSocketError(e.to_string()))?;

        self.ends.lock().push(RelayEnd {
            to_client,
            from_client,
        });
        let sink = client_tx.sink_map_err(|e| Error::WebSocketError(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}
