//! Relay transport connectors
//!
//! The signaling channel only needs a text-frame sink and stream; how they
//! are obtained is behind [`RelayConnector`] so tests can script the relay.

use crate::{Error, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Outgoing text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Incoming text frames; the stream ends when the relay closes the connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens one transport to the relay per call
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)>;
}

/// WebSocket connector (ws:// or wss://)
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        debug!("Connecting to relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("WebSocket connected to {}", self.url);

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| Error::WebSocketError(format!("Send failed: {}", e)))
            .with(|text: String| futures::future::ready(Ok::<_, Error>(Message::Text(text))));

        let stream = read.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        warn!("Ignoring non UTF-8 binary frame");
                        None
                    }
                },
                // Ping/pong are answered by tungstenite; close ends the stream
                Ok(_) => None,
                Err(e) => Some(Err(Error::WebSocketError(e.to_string()))),
            }
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
