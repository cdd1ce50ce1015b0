//! Game Logic Module
//!
//! Everything that decides what happens to a puck. No I/O here.
//!
//! ## Module Structure
//!
//! - `input`: Movement intent, trigger latch, key state
//! - `state`: Players, authority split, arena world
//! - `body`: Physics body seam and the headless integrator
//! - `combat`: Knockback, damage and stomp math
//! - `lifecycle`: Airborne/knockout/respawn state machine
//! - `powerup`: Power-up catalogue and the field of pickups
//! - `projectile`: Rockets and glue shots in flight
//! - `tick`: Per-tick simulation of the local player
//! - `events`: Events produced by a tick

pub mod input;
pub mod state;
pub mod body;
pub mod combat;
pub mod lifecycle;
pub mod powerup;
pub mod projectile;
pub mod tick;
pub mod events;

// Re-export key types
pub use input::{InputState, Key, MoveIntent, TickInput, TriggerLatch};
pub use state::{ArenaState, Authority, AuthorityError, DamageTier, Lifecycle, LocalView, PlayerId, PlayerState};
pub use body::{ArcadeBody, BodyTransform, PhysicsBody};
pub use combat::{BodyKind, CollisionEvent, CollisionResponse, HazardKind};
pub use powerup::{Affliction, PowerupField, PowerupId, PowerupKind};
pub use projectile::{ProjectileField, ProjectileKind};
pub use tick::{ExternalEffect, Simulator, TickResult};
pub use events::{DamageSource, GameEvent, GameEventData};
