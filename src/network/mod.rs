//! Network Layer
//!
//! Room protocol, client-side synchronization and the relay.
//! Client code only touches remote players; the local player belongs to
//! `game::tick`.
//!
//! - `protocol`: JSON message contract
//! - `sync`: room phase machine and remote reconciliation
//! - `client`: WebSocket transport with bounded reconnect
//! - `room`: relay-side rooms, pure
//! - `relay`: WebSocket relay server

pub mod protocol;
pub mod sync;
pub mod client;
pub mod room;
pub mod relay;

pub use protocol::{ClientMessage, GamePhase, MatchStats, ProtocolError, RoomPlayer, Scores, ServerMessage};
pub use sync::{ConnectionState, RoomPhase, RoomSession, RoomSync, SyncError, SyncEvent};
pub use client::{ClientConfig, ClientError, RelayClient, TransportEvent};
pub use room::{Delivery, Outbound, Recipient, RelayRoom, RoomError, RoomManager};
pub use relay::{RelayError, RelayServer};
