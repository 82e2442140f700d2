//! Resilient signaling channel to the relay
//!
//! Keeps a single logical connection alive across transport drops. The relay
//! assigns an [`Identity`] in its first frame on every new transport; the
//! channel is `Open` only while that identity is held.
//!
//! # State machine
//!
//! ```text
//! Disconnected → Connecting → Open → {Closing | Errored} → Reconnecting → Connecting → …
//!                                   close() from any state → ClosedByUser
//! ```
//!
//! Every transport gets an epoch number. A close and an error reported for
//! the same transport are handled once, and a pending reconnect timer is
//! always cancelled before a new one is scheduled.

use super::backoff::BackoffPolicy;
use super::connector::{FrameSink, RelayConnector};
use super::protocol::{ConnectedPayload, Envelope, MessageType, OutboundMessage};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session id assigned by the relay
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Never connected
    Disconnected,
    /// Transport being opened or waiting for the relay handshake
    Connecting,
    /// Handshake received, identity assigned
    Open,
    /// Transport closed by the relay or the network
    Closing,
    /// Transport failed
    Errored,
    /// Reconnect timer pending
    Reconnecting,
    /// Closed by [`SignalingChannel::close`]; no automatic reconnect
    ClosedByUser,
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake completed
    Connected(Identity),
    /// An open transport was lost; identity is no longer valid
    Disconnected,
    /// Reconnect scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts reached the reporting threshold (once per outage)
    Unreachable { attempts: u32 },
    /// Closed by the user
    Closed,
}

/// Outcome of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport
    Sent,
    /// Channel not open; the message was discarded
    Dropped,
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Handler for one inbound message type
pub type MessageHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Handler for lifecycle events
pub type EventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Anything outbound signaling can be written to
pub trait SignalSink: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Delivery;
}

/// Channel tuning
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    pub backoff: BackoffPolicy,

    /// Attempts after which [`ChannelEvent::Unreachable`] is emitted
    pub unreachable_after: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            unreachable_after: 6,
        }
    }
}

struct Core {
    state: ChannelState,
    identity: Option<Identity>,
    attempts: u32,
    connecting: bool,
    user_closed: bool,
    unreachable_reported: bool,
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Inner {
    connector: Arc<dyn RelayConnector>,
    options: ChannelOptions,
    core: Mutex<Core>,
    handlers: Mutex<HashMap<MessageType, MessageHandler>>,
    lifecycle: Mutex<Option<EventHandler>>,
}

/// Handle to the signaling channel; clones share the same connection
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<Inner>,
}

impl SignalingChannel {
    /// Create a channel; nothing happens until [`connect`](Self::connect)
    pub fn new(connector: Arc<dyn RelayConnector>, options: ChannelOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                core: Mutex::new(Core {
                    state: ChannelState::Disconnected,
                    identity: None,
                    attempts: 0,
                    connecting: false,
                    user_closed: false,
                    unreachable_reported: false,
                    epoch: 0,
                    outbound: None,
                    connection_task: None,
                    reconnect_timer: None,
                }),
                handlers: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// Start connecting
    ///
    /// No-op while an attempt is in flight or the channel is open. Clears
    /// a previous user close. Must be called within a tokio runtime.
    pub fn connect(&self) {
        Inner::connect(&self.inner);
    }

    /// Close the channel and stop reconnecting; idempotent
    pub fn close(&self) {
        let (task, timer) = {
            let mut core = self.inner.core.lock();
            if core.state == ChannelState::ClosedByUser {
                return;
            }
            core.user_closed = true;
            core.connecting = false;
            core.identity = None;
            // Dropping the sender lets the writer close the socket cleanly
            core.outbound = None;
            core.epoch += 1;
            core.state = ChannelState::ClosedByUser;
            (core.connection_task.take(), core.reconnect_timer.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        info!("Signaling channel closed");
        self.inner.emit(ChannelEvent::Closed);
    }

    /// Send a message; dropped with a warning unless the channel is open
    pub fn publish(&self, kind: MessageType, payload: Value) -> Delivery {
        let core = self.inner.core.lock();
        if core.state != ChannelState::Open {
            warn!(
                message_type = %kind,
                state = ?core.state,
                "Signaling channel not open, dropping message"
            );
            return Delivery::Dropped;
        }

        let text = match Envelope::new(kind, payload).to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(message_type = %kind, "Dropping message: {}", e);
                return Delivery::Dropped;
            }
        };

        match &core.outbound {
            Some(tx) if tx.send(text).is_ok() => {
                debug!(message_type = %kind, "Published");
                Delivery::Sent
            }
            _ => {
                warn!(message_type = %kind, "Relay writer gone, dropping message");
                Delivery::Dropped
            }
        }
    }

    /// Register the handler for a message type, replacing any previous one
    pub fn subscribe<F>(&self, kind: MessageType, handler: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        if self
            .inner
            .handlers
            .lock()
            .insert(kind, Arc::new(handler))
            .is_some()
        {
            debug!(message_type = %kind, "Replaced signaling handler");
        }
    }

    /// Register the lifecycle handler, replacing any previous one
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        *self.inner.lifecycle.lock() = Some(Arc::new(handler));
    }

    pub fn state(&self) -> ChannelState {
        self.inner.core.lock().state
    }

    /// Relay-assigned identity; `None` unless the channel is open
    pub fn identity(&self) -> Option<Identity> {
        self.inner.core.lock().identity.clone()
    }

    /// Current backoff counter
    pub fn attempts(&self) -> u32 {
        self.inner.core.lock().attempts
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.core.lock().connecting
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .core
            .lock()
            .reconnect_timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl SignalSink for SignalingChannel {
    fn send(&self, message: OutboundMessage) -> Delivery {
        self.publish(message.message_type(), message.payload())
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("SignalingChannel")
            .field("state", &core.state)
            .field("identity", &core.identity)
            .field("attempts", &core.attempts)
            .finish()
    }
}

impl Inner {
    fn connect(this: &Arc<Self>) {
        let mut core = this.core.lock();
        if core.connecting || core.state == ChannelState::Open {
            debug!(state = ?core.state, "Connect already in progress");
            return;
        }
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }

        core.user_closed = false;
        core.connecting = true;
        core.state = ChannelState::Connecting;
        core.epoch += 1;
        let epoch = core.epoch;

        debug!(epoch, attempts = core.attempts, "Connecting to relay");
        let inner = Arc::clone(this);
        core.connection_task = Some(tokio::spawn(async move {
            Inner::run_connection(inner, epoch).await;
        }));
    }

    async fn run_connection(this: Arc<Self>, epoch: u64) {
        let (sink, mut stream) = match this.connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Relay connect failed: {}", e);
                this.transport_down(epoch, true);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut core = this.core.lock();
            if core.epoch != epoch {
                return;
            }
            core.outbound = Some(tx);
        }

        let mut writer = tokio::spawn(sender_task(sink, rx));
        let errored = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => this.handle_frame(epoch, &text),
                    Some(Err(e)) => {
                        warn!("Relay transport error: {}", e);
                        break true;
                    }
                    None => {
                        info!("Relay closed the connection");
                        break false;
                    }
                },
                _ = &mut writer => {
                    warn!("Relay writer stopped");
                    break true;
                }
            }
        };

        writer.abort();
        drop(stream);
        this.transport_down(epoch, errored);
    }

    fn handle_frame(self: &Arc<Self>, epoch: u64, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring malformed relay frame: {}", e);
                return;
            }
        };
        let kind = envelope.message_type();

        if kind == Some(MessageType::Connected) {
            let identity = match envelope.decode::<ConnectedPayload>() {
                Ok(p) => Identity::new(p.id),
                Err(e) => {
                    warn!("Ignoring malformed handshake: {}", e);
                    return;
                }
            };
            {
                let mut core = self.core.lock();
                if core.epoch != epoch {
                    return;
                }
                core.identity = Some(identity.clone());
                core.state = ChannelState::Open;
                core.connecting = false;
                core.attempts = 0;
                core.unreachable_reported = false;
                if let Some(timer) = core.reconnect_timer.take() {
                    timer.abort();
                }
            }
            info!(identity = %identity, "Signaling channel open");
            self.emit(ChannelEvent::Connected(identity));
        } else {
            let core = self.core.lock();
            if core.epoch != epoch || core.state != ChannelState::Open {
                debug!(message_type = %envelope.kind, "Ignoring frame before handshake");
                return;
            }
        }

        let Some(kind) = kind else {
            debug!(message_type = %envelope.kind, "Unknown message type");
            return;
        };
        let handler = self.handlers.lock().get(&kind).cloned();
        match handler {
            Some(handler) => handler(envelope),
            None => debug!(message_type = %kind, "No handler registered"),
        }
    }

    fn transport_down(self: &Arc<Self>, epoch: u64, errored: bool) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                debug!(epoch, "Ignoring stale transport notification");
                return;
            }
            core.epoch += 1;
            core.connecting = false;
            core.outbound = None;
            core.connection_task = None;
            core.state = if errored {
                ChannelState::Errored
            } else {
                ChannelState::Closing
            };
            if core.identity.take().is_some() {
                events.push(ChannelEvent::Disconnected);
            }

            if core.user_closed {
                core.state = ChannelState::ClosedByUser;
            } else {
                self.schedule_reconnect(&mut core, &mut events);
            }
        }

        for event in events {
            self.emit(event);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core, events: &mut Vec<ChannelEvent>) {
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }

        let policy = self.options.backoff;
        core.attempts = policy.next_attempt(core.attempts);
        let attempt = core.attempts;
        let delay = policy.delay_for(attempt);
        core.state = ChannelState::Reconnecting;

        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling relay reconnect");

        let weak: Weak<Self> = Arc::downgrade(self);
        core.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Inner::connect(&inner);
            }
        }));

        events.push(ChannelEvent::Reconnecting { attempt, delay });
        if attempt >= self.options.unreachable_after && !core.unreachable_reported {
            core.unreachable_reported = true;
            warn!(attempts = attempt, "Relay unreachable");
            events.push(ChannelEvent::Unreachable { attempts: attempt });
        }
    }

    fn emit(&self, event: ChannelEvent) {
        let handler = self.lifecycle.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

async fn sender_task(mut sink: FrameSink, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = sink.send(text).await {
            warn!("Failed to send relay frame: {}", e);
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("Relay sink close: {}", e);
    }
    debug!("Relay writer terminated");
}
