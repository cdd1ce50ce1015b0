//! Core primitives.
//!
//! Math, seeded randomness, scoped timers and the wall clock. Nothing in here
//! knows about players or rooms.

pub mod vec3;
pub mod rng;
pub mod timer;
pub mod clock;

// Re-export core types
pub use vec3::Vec3;
pub use rng::DeterministicRng;
pub use timer::{SessionTimers, TimerId};
pub use clock::unix_millis;
