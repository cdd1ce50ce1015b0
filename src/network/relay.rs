//! WebSocket Relay Server
//!
//! Session coordinator for puck rooms. Each connection gets a fresh player
//! id, a writer task fed by a bounded channel, and a read loop that hands
//! parsed messages to the shared [`RoomManager`]. A ticker drives power-up
//! spawns and rejoin expiry.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::GameConfig;
use crate::core::unix_millis;
use crate::game::state::PlayerId;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::room::{Outbound, RoomManager};

/// Open sockets accepted at once.
pub const MAX_CONNECTIONS: usize = 1000;

/// How often rooms are ticked.
pub const ROOM_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Per-connection outbound queue.
const CONNECTION_QUEUE: usize = 256;

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind or accept.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

type Connections = Arc<RwLock<BTreeMap<PlayerId, mpsc::Sender<ServerMessage>>>>;

/// The relay. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RelayServer {
    rooms: Arc<RwLock<RoomManager>>,
    connections: Connections,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Relay with no rooms.
    pub fn new(config: Arc<GameConfig>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            rooms: Arc::new(RwLock::new(RoomManager::new(config, rand::random()))),
            connections: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind a listener.
    pub async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until [`RelayServer::shutdown`].
    pub async fn run(&self, addr: &str) -> Result<(), RelayError> {
        let listener = Self::bind(addr).await?;
        self.serve(listener).await
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let ticker = {
            let rooms = self.rooms.clone();
            let connections = self.connections.clone();
            tokio::spawn(async move {
                let mut ticks = interval(ROOM_TICK_INTERVAL);
                loop {
                    ticks.tick().await;
                    let out = rooms.write().await.tick(unix_millis());
                    dispatch(&connections, out).await;
                }
            })
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.read().await.len() >= MAX_CONNECTIONS {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        ticker.abort();
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let rooms = self.rooms.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CONNECTION_QUEUE);

            let mut player_id = PlayerId::generate();
            connections.write().await.insert(player_id.clone(), msg_tx.clone());
            info!("{} connected as {}", addr, player_id);

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.send(Message::Close(None)).await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        continue;
                                    }
                                };
                                let out = match client_msg {
                                    ClientMessage::RejoinRoom { room_code, player_id: resumed } => {
                                        rejoin(&rooms, &connections, &msg_tx, &mut player_id, resumed, &room_code).await
                                    }
                                    other => rooms.write().await.handle(&player_id, other, unix_millis()),
                                };
                                dispatch(&connections, out).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            sender_task.abort();

            // A rejoin on another socket may already own this id
            let owned = {
                let mut connections = connections.write().await;
                match connections.get(&player_id) {
                    Some(sender) if sender.same_channel(&msg_tx) => {
                        connections.remove(&player_id);
                        true
                    }
                    _ => false,
                }
            };
            if owned {
                let out = rooms.write().await.disconnect(&player_id, unix_millis());
                dispatch(&connections, out).await;
            }
            info!("Client {} ({}) cleaned up", addr, player_id);
        });
    }
}

/// Move a connection onto a held seat.
async fn rejoin(
    rooms: &RwLock<RoomManager>,
    connections: &Connections,
    sender: &mpsc::Sender<ServerMessage>,
    player_id: &mut PlayerId,
    resumed: PlayerId,
    room_code: &str,
) -> Vec<Outbound> {
    let mut rooms = rooms.write().await;
    match rooms.rejoin(&resumed, room_code, unix_millis()) {
        Ok(out) => {
            // The fresh id may have joined a room before resuming
            let mut out_left = rooms.leave(player_id);
            let mut connections = connections.write().await;
            connections.remove(player_id);
            connections.insert(resumed.clone(), sender.clone());
            info!("{} resumed as {}", player_id, resumed);
            *player_id = resumed;
            out_left.extend(out);
            out_left
        }
        Err(err) => {
            debug!("Rejoin of {} refused: {}", resumed, err);
            vec![(player_id.clone(), ServerMessage::RoomError { error: err.to_string() })]
        }
    }
}

/// Fan outbound messages out to their connections. Full queues drop.
async fn dispatch(connections: &Connections, out: Vec<Outbound>) {
    if out.is_empty() {
        return;
    }
    let connections = connections.read().await;
    for (player_id, message) in out {
        let Some(sender) = connections.get(&player_id) else {
            continue;
        };
        if let Err(e) = sender.try_send(message) {
            warn!("Dropping message for {}: {}", player_id, e);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Vec3;
    use tokio::time::timeout;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (RelayServer, SocketAddr) {
        let server = RelayServer::new(Arc::new(GameConfig::default()));
        let listener = RelayServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Socket {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws
    }

    async fn send(ws: &mut Socket, message: ClientMessage) {
        ws.send(Message::Text(message.to_json().unwrap())).await.unwrap();
    }

    /// Next message matching `pred`, skipping others.
    async fn recv_until(ws: &mut Socket, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let message = ServerMessage::from_json(&text).unwrap();
                        if pred(&message) {
                            return message;
                        }
                    }
                    Some(Ok(_)) => {}
                    other => panic!("socket ended: {:?}", other),
                }
            }
        })
        .await
        .expect("timed out")
    }

    /// Two players in a started match. Returns sockets, ids and room code.
    async fn match_started(addr: SocketAddr) -> (Socket, Socket, PlayerId, PlayerId, String) {
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;

        send(&mut a, ClientMessage::CreateRoom { player_name: "Ada".into() }).await;
        let (code, a_id) = match recv_until(&mut a, |m| matches!(m, ServerMessage::RoomJoined { .. })).await {
            ServerMessage::RoomJoined { room_code, player_id, .. } => (room_code, player_id),
            _ => unreachable!(),
        };

        send(&mut b, ClientMessage::JoinRoom { room_code: code.clone(), player_name: "Bo".into() }).await;
        let b_id = match recv_until(&mut b, |m| matches!(m, ServerMessage::RoomJoined { .. })).await {
            ServerMessage::RoomJoined { player_id, player_index, .. } => {
                assert_eq!(player_index, 1);
                player_id
            }
            _ => unreachable!(),
        };
        recv_until(&mut a, |m| matches!(m, ServerMessage::PlayerJoined { .. })).await;

        send(&mut a, ClientMessage::PlayerReady { ready: true, loadout: Vec::new() }).await;
        send(&mut b, ClientMessage::PlayerReady { ready: true, loadout: Vec::new() }).await;
        let seed_a = match recv_until(&mut a, |m| matches!(m, ServerMessage::GameStart { .. })).await {
            ServerMessage::GameStart { seed, .. } => seed,
            _ => unreachable!(),
        };
        let seed_b = match recv_until(&mut b, |m| matches!(m, ServerMessage::GameStart { .. })).await {
            ServerMessage::GameStart { seed, .. } => seed,
            _ => unreachable!(),
        };
        assert_eq!(seed_a, seed_b);
        (a, b, a_id, b_id, code)
    }

    #[tokio::test]
    async fn test_unknown_room_rejected() {
        let (server, addr) = start().await;
        let mut ws = connect(addr).await;
        send(&mut ws, ClientMessage::JoinRoom { room_code: "QQQQ".into(), player_name: "x".into() }).await;
        let reply = recv_until(&mut ws, |_| true).await;
        assert_eq!(reply, ServerMessage::RoomError { error: "Room QQQQ not found".into() });
        server.shutdown();
    }

    #[tokio::test]
    async fn test_positions_relayed_between_players() {
        let (server, addr) = start().await;
        let (mut a, mut b, a_id, _, _) = match_started(addr).await;

        send(
            &mut a,
            ClientMessage::PlayerPosition {
                position: Vec3::new(3.0, 0.5, -1.0),
                velocity: Vec3::new(1.0, 0.0, 0.0),
                rotation: Vec3::ZERO,
            },
        )
        .await;
        let moved = recv_until(&mut b, |m| matches!(m, ServerMessage::PlayerMoved { .. })).await;
        assert_eq!(
            moved,
            ServerMessage::PlayerMoved {
                player_id: a_id,
                position: Some(Vec3::new(3.0, 0.5, -1.0)),
                velocity: Some(Vec3::new(1.0, 0.0, 0.0)),
                rotation: Some(Vec3::ZERO),
            }
        );
        server.shutdown();
    }

    #[tokio::test]
    async fn test_rejoin_moves_seat_to_new_socket() {
        let (server, addr) = start().await;
        let (mut a, b, _, b_id, code) = match_started(addr).await;

        drop(b);
        recv_until(&mut a, |m| match m {
            ServerMessage::PlayerUpdate { players } => players.iter().any(|p| p.id == b_id && !p.connected),
            _ => false,
        })
        .await;

        let mut c = connect(addr).await;
        send(&mut c, ClientMessage::RejoinRoom { room_code: code.clone(), player_id: b_id.clone() }).await;
        match recv_until(&mut c, |m| matches!(m, ServerMessage::SessionResumed { .. })).await {
            ServerMessage::SessionResumed { player_id, room_code, player_index, .. } => {
                assert_eq!(player_id, b_id);
                assert_eq!(room_code, code);
                assert_eq!(player_index, 1);
            }
            _ => unreachable!(),
        }

        send(
            &mut a,
            ClientMessage::PlayerPosition { position: Vec3::ZERO, velocity: Vec3::ZERO, rotation: Vec3::ZERO },
        )
        .await;
        recv_until(&mut c, |m| matches!(m, ServerMessage::PlayerMoved { .. })).await;
        assert_eq!(server.connection_count().await, 2);
        server.shutdown();
    }
}
