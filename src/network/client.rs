//! WebSocket Client Transport
//!
//! Owns the socket on a background task. The simulation side talks to it
//! through two channels: outbound [`ClientMessage`]s in, [`TransportEvent`]s
//! out. A dropped socket is retried a bounded number of times with a fixed
//! delay; after that the task reports [`TransportEvent::GaveUp`] and exits.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::network::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// What the transport reports to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket open. Anything queued before this was discarded.
    Connected,
    /// Socket dropped after being open.
    Disconnected,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Reconnect budget spent. The task has exited.
    GaveUp,
    /// Inbound message.
    Message(ServerMessage),
}

/// Client transport errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Background task is gone.
    #[error("Transport closed")]
    Closed,

    /// Outbound queue is full.
    #[error("Outbound queue full")]
    Full,

    /// Message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Reconnect policy.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay URL.
    pub url: String,
    /// Attempts after a drop (or a failed first connect).
    pub reconnect_attempts: u32,
    /// Fixed delay between attempts.
    pub reconnect_delay: Duration,
    /// Channel capacity in both directions.
    pub channel_capacity: usize,
}

impl From<&NetworkConfig> for ClientConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum ConnectionEnd {
    /// Socket failed or the relay closed it.
    Dropped,
    /// The handle was dropped; stop for good.
    Shutdown,
}

/// Handle to the background transport task. Dropping it stops the task.
pub struct RelayClient {
    outgoing: mpsc::Sender<ClientMessage>,
    task: JoinHandle<()>,
}

impl RelayClient {
    /// Start connecting in the background.
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let task = tokio::spawn(run_transport(config, outgoing_rx, events_tx));
        (Self { outgoing: outgoing_tx, task }, events_rx)
    }

    /// Queue a message without waiting.
    pub fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ClientError::Full,
            mpsc::error::TrySendError::Closed(_) => ClientError::Closed,
        })
    }

    /// Queue a message, waiting for room.
    pub async fn send_async(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.send(message).await.map_err(|_| ClientError::Closed)
    }

    /// True once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_transport(
    config: ClientConfig,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut attempt = 0;
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((socket, _)) => {
                info!("Connected to {}", config.url);
                attempt = 0;

                // Positions queued while offline are stale
                let mut stale = 0;
                while outgoing.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!("Discarded {} stale outbound messages", stale);
                }

                if events.send(TransportEvent::Connected).await.is_err() {
                    return;
                }
                match run_connection(socket, &mut outgoing, &events).await {
                    ConnectionEnd::Shutdown => return,
                    ConnectionEnd::Dropped => {
                        warn!("Connection to {} dropped", config.url);
                        if events.send(TransportEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", config.url, e);
            }
        }

        attempt += 1;
        if attempt > config.reconnect_attempts {
            error!("Giving up on {} after {} attempts", config.url, config.reconnect_attempts);
            let _ = events.send(TransportEvent::GaveUp).await;
            return;
        }
        if events.send(TransportEvent::Reconnecting { attempt }).await.is_err() {
            return;
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_connection(
    socket: Socket,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
    events: &mpsc::Sender<TransportEvent>,
) -> ConnectionEnd {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            if events.send(TransportEvent::Message(message)).await.is_err() {
                                return ConnectionEnd::Shutdown;
                            }
                        }
                        Err(e) => warn!("Failed to parse server message: {} - {}", e, text),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            return ConnectionEnd::Dropped;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Relay closed connection");
                        return ConnectionEnd::Dropped;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket read error: {}", e);
                        return ConnectionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                }
            }
            message = outgoing.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionEnd::Shutdown;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!("Failed to send message: {}", e);
                    return ConnectionEnd::Dropped;
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
