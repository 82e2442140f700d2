//! Participant façade
//!
//! Wires a [`SignalingChannel`] to a [`MeshOrchestrator`] and exposes the
//! handful of operations a user interface needs: join, leave and shut down.

use crate::config::VoiceMeshConfig;
use crate::media::AudioCapture;
use crate::mesh::{validate_display_name, MeshCommand, MeshEvent, MeshInput, MeshOrchestrator};
use crate::peer::{LinkFactory, RecoveryPolicy, WebRtcLinkFactory};
use crate::signaling::{
    ChannelOptions, ChannelState, Identity, MessageType, RelayConnector, SignalingChannel,
    WebSocketConnector,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// A running mesh participant
pub struct VoiceClient {
    channel: SignalingChannel,
    inputs: mpsc::UnboundedSender<MeshInput>,
    capture: Arc<dyn AudioCapture>,
    task: JoinHandle<()>,
}

impl VoiceClient {
    /// Start observing the relay
    ///
    /// Spawns the orchestrator and begins connecting. Presence and status
    /// arrive on the returned receiver; nothing is negotiated until
    /// [`join`](Self::join).
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn start(
        config: VoiceMeshConfig,
        connector: Arc<dyn RelayConnector>,
        factory: Arc<dyn LinkFactory>,
        capture: Arc<dyn AudioCapture>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshEvent>)> {
        config.validate()?;

        let channel = SignalingChannel::new(
            connector,
            ChannelOptions {
                backoff: config.recovery.backoff_policy(),
                unreachable_after: config.recovery.unreachable_after_attempts,
            },
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (orchestrator, inputs_rx) = MeshOrchestrator::new(
            Arc::new(channel.clone()),
            factory,
            RecoveryPolicy::from_options(&config.recovery),
            config.max_peers,
            events_tx,
        )?;
        let inputs = orchestrator.input_sender();

        for kind in MessageType::ALL {
            if matches!(
                kind,
                MessageType::GetOnlineUsers | MessageType::JoinRoom | MessageType::LeaveRoom
            ) {
                continue;
            }
            let tx = inputs.clone();
            channel.subscribe(kind, move |envelope| {
                let _ = tx.send(MeshInput::Signal(envelope));
            });
        }
        let tx = inputs.clone();
        channel.on_event(move |event| {
            let _ = tx.send(MeshInput::Channel(event));
        });

        let task = tokio::spawn(orchestrator.run(inputs_rx));
        info!(url = %config.signaling_url, "Connecting to relay");
        channel.connect();

        Ok((
            Self {
                channel,
                inputs,
                capture,
                task,
            },
            events_rx,
        ))
    }

    /// Start with the WebSocket relay connector and WebRTC links
    pub fn connect_websocket(
        config: VoiceMeshConfig,
        capture: Arc<dyn AudioCapture>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshEvent>)> {
        let connector = Arc::new(WebSocketConnector::new(config.signaling_url.clone()));
        let factory = Arc::new(WebRtcLinkFactory::new(&config));
        Self::start(config, connector, factory, capture)
    }

    /// Join the room under `user_name`
    ///
    /// The microphone is acquired first; if that fails nothing is sent to
    /// the relay.
    ///
    /// # Errors
    ///
    /// `InvalidDisplayName` for a bad name, `MediaAcquisition` when capture
    /// fails, `InvalidState` once the client has shut down.
    #[instrument(skip(self))]
    pub async fn join(&self, user_name: &str) -> Result<()> {
        let user_name = validate_display_name(user_name)?;
        let audio = self.capture.capture().await?;
        debug!(track_id = %audio.track_id(), "Local audio acquired");
        self.command(MeshCommand::Join { user_name, audio })
    }

    /// Leave the room and go back to observing
    pub fn leave(&self) -> Result<()> {
        self.command(MeshCommand::Leave)
    }

    /// Leave, close the relay channel and stop the orchestrator
    pub async fn shutdown(self) {
        let (done, finished) = oneshot::channel();
        if self.command(MeshCommand::Shutdown { done }).is_ok() {
            let _ = finished.await;
        }
        self.channel.close();
        if let Err(e) = self.task.await {
            debug!("Orchestrator task ended abnormally: {}", e);
        }
        info!("Voice client stopped");
    }

    pub fn channel(&self) -> &SignalingChannel {
        &self.channel
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Relay-assigned identity while connected
    pub fn identity(&self) -> Option<Identity> {
        self.channel.identity()
    }

    fn command(&self, command: MeshCommand) -> Result<()> {
        self.inputs
            .send(MeshInput::Command(command))
            .map_err(|_| Error::InvalidState("Mesh orchestrator has stopped".to_string()))
    }
}
