//! Relay accept loop

use super::hub::Hub;
use super::rate_limit::RateLimiter;
use crate::config::RelayConfig;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// WebSocket relay server
pub struct RelayServer {
    config: RelayConfig,
    hub: Arc<Hub>,
    limiter: Arc<RateLimiter>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let hub = Arc::new(Hub::new(config.send_queue));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_window(),
            config.rate_max_connections,
        ));
        Self {
            config,
            hub,
            limiter,
        }
    }

    /// Client registry (for inspection)
    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Bind and start accepting connections
    ///
    /// Binding to port 0 picks a free port; see [`RelayHandle::local_addr`].
    pub async fn start(self) -> Result<RelayHandle> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Relay listening on ws://{}/ws", local_addr);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let connection_shutdown = shutdown_tx.clone();
        let hub = Arc::clone(&self.hub);
        let limiter = Arc::clone(&self.limiter);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                if !limiter.check(peer_addr.ip()) {
                                    warn!("Rate limit exceeded for {}, rejecting", peer_addr.ip());
                                    drop(stream);
                                    continue;
                                }
                                debug!("Accepted connection from {}", peer_addr);
                                let hub = Arc::clone(&hub);
                                let shutdown = connection_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, hub, shutdown).await {
                                        warn!("Relay connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Relay received shutdown signal");
                        break;
                    }
                }
            }
            info!("Relay accept loop exited");
        });

        Ok(RelayHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle for a running relay
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Client URL for this relay
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.local_addr)
    }

    /// Stop accepting and drop every client connection
    pub async fn shutdown(self) {
        info!("Shutting down relay");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Relay accept task ended abnormally: {}", e);
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::WebSocketError(format!("Handshake failed: {}", e)))?;
    let (mut write, mut read) = ws_stream.split();

    let (id, mut rx) = hub.register();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = write.send(Message::Text(text)).await {
                debug!("Relay send failed: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.handle_text(&id, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %id, "Relay read error: {}", e);
                    break;
                }
            },
            _ = shutdown.recv() => break,
        }
    }

    // Removing the client drops its queue sender, which ends the writer
    hub.unregister(&id);
    if let Err(e) = writer.await {
        debug!("Relay writer ended abnormally: {}", e);
    }
    Ok(())
}
