//! # Puck Arena
//!
//! Client core and relay for a multiplayer puck battle arena. Players steer
//! physics pucks on a floating platform, knock each other off, stomp from
//! above and fight over power-ups.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PUCK ARENA                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec3.rs     - 3D vector                                 │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  ├── timer.rs    - Cancellable session timers                │
//! │  └── clock.rs    - Wall clock                                │
//! │                                                              │
//! │  game/           - Local simulation                          │
//! │  ├── input.rs    - Keyboard/stick to movement intent         │
//! │  ├── state.rs    - Player and arena state, authority         │
//! │  ├── body.rs     - Physics body seam + arcade body           │
//! │  ├── combat.rs   - Knockback, stomps, collision damage       │
//! │  ├── lifecycle.rs- Active/airborne/respawning machine        │
//! │  ├── events.rs   - Simulation events                         │
//! │  ├── powerup.rs  - Catalogue and field                       │
//! │  ├── projectile.rs- Rockets and glue shots                   │
//! │  └── tick.rs     - Per-frame simulator                       │
//! │                                                              │
//! │  network/        - Rooms and transport                       │
//! │  ├── protocol.rs - JSON message contract                     │
//! │  ├── sync.rs     - Client room phase + remote reconciliation │
//! │  ├── client.rs   - Reconnecting WebSocket client             │
//! │  ├── room.rs     - Relay-side rooms                          │
//! │  └── relay.rs    - WebSocket relay server                    │
//! │                                                              │
//! │  replay/         - Knockout replays                          │
//! │  stats.rs        - Session statistics                        │
//! │  arena.rs        - Client frame loop                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Each client simulates only its own puck. Remote pucks are written from
//! relayed messages and nothing else. Anything that happens *to* the local
//! puck because of someone else (a stomp, a curse, a granted pickup) arrives
//! as an [`ExternalEffect`] and is applied on the next local tick.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod game;
pub mod replay;
pub mod network;
pub mod stats;
pub mod arena;

// Re-export commonly used types
pub use crate::core::vec3::Vec3;
pub use crate::core::rng::DeterministicRng;
pub use config::{ConfigError, GameConfig};
pub use game::state::{ArenaState, PlayerId, PlayerState};
pub use game::tick::{ExternalEffect, Simulator};
pub use game::body::{ArcadeBody, PhysicsBody};
pub use replay::{ReplayClip, ReplayPlayback, ReplayRecorder};
pub use network::{RelayClient, RelayServer, RoomSync};
pub use stats::{SessionStats, SessionSummary};
pub use arena::ArenaSession;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Frame rate the client loop is tuned for (Hz)
pub const TICK_RATE: u32 = 60;

/// Input polling interval for hosts without a frame callback (ms)
pub const INPUT_POLL_INTERVAL_MS: u64 = 16;
