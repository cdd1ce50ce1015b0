//! Game Events
//!
//! Events produced by one simulator tick, in the order the tick phases
//! produced them. The sync layer turns the gameplay-relevant ones into
//! outbound messages; the rest feed effect hooks (audio, camera shake).

use serde::{Serialize, Deserialize};

use crate::core::Vec3;
use crate::game::powerup::{Affliction, PowerupId, PowerupKind};
use crate::game::projectile::ProjectileKind;
use crate::game::state::PlayerId;

/// Where damage came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DamageSource {
    /// Puck-vs-puck contact.
    Collision,
    /// Someone landed on us.
    Stomp,
    /// Projectile hit.
    Projectile,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// End-of-tick transform of the local player.
    PositionReport {
        /// Position.
        position: Vec3,
        /// Velocity.
        velocity: Vec3,
        /// Orientation.
        rotation: Vec3,
    },

    /// Local player fell below the knockout threshold.
    KnockedOut {
        /// Victim (always the local player).
        player_id: PlayerId,
    },

    /// Local player is back on a spawn point.
    Respawned {
        /// Player.
        player_id: PlayerId,
        /// Spawn position.
        position: Vec3,
    },

    /// Local player stomped someone.
    StompLanded {
        /// Victim.
        target_id: PlayerId,
        /// Damage dealt.
        damage: f64,
    },

    /// Local damage accumulator grew.
    DamageChanged {
        /// New total.
        total: f64,
        /// Increase.
        delta: f64,
        /// Cause.
        source: DamageSource,
    },

    /// A contact worth a sound or camera shake.
    Impact {
        /// Strength.
        speed: f64,
    },

    /// Jump impulse applied.
    Jumped,

    /// Local player claimed a power-up on the field.
    PowerupClaimed {
        /// Instance.
        powerup_id: PowerupId,
        /// Kind.
        kind: PowerupKind,
    },

    /// A power-up took effect on the local player.
    PowerupApplied {
        /// Kind.
        kind: PowerupKind,
    },

    /// Local player fired a held power-up.
    PowerupUseRequested {
        /// Instance it came from.
        powerup_id: Option<PowerupId>,
        /// Kind.
        kind: PowerupKind,
        /// Aim point.
        target_position: Vec3,
        /// Aimed-at player.
        target_id: Option<PlayerId>,
    },

    /// A timed power-up ran out.
    PowerupExpired {
        /// Kind.
        kind: PowerupKind,
    },

    /// Someone else's power-up afflicted the local player.
    AfflictionApplied {
        /// Kind.
        affliction: Affliction,
    },

    /// An affliction ran out.
    AfflictionExpired {
        /// Kind.
        affliction: Affliction,
    },

    /// A projectile struck the local player.
    ProjectileHit {
        /// Projectile id.
        projectile_id: u32,
        /// Kind.
        kind: ProjectileKind,
        /// Shooter.
        owner_id: PlayerId,
    },
}

/// A game event with its timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Simulation time (ms).
    pub at_ms: u64,

    /// Event data.
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(at_ms: u64, data: GameEventData) -> Self {
        Self { at_ms, data }
    }

    /// Create knocked out event.
    pub fn knocked_out(at_ms: u64, player_id: PlayerId) -> Self {
        Self::new(at_ms, GameEventData::KnockedOut { player_id })
    }

    /// Create damage changed event.
    pub fn damage_changed(at_ms: u64, total: f64, delta: f64, source: DamageSource) -> Self {
        Self::new(at_ms, GameEventData::DamageChanged { total, delta, source })
    }

    /// Create impact event.
    pub fn impact(at_ms: u64, speed: f64) -> Self {
        Self::new(at_ms, GameEventData::Impact { speed })
    }

    /// True for events other peers need to hear about.
    pub fn is_gameplay(&self) -> bool {
        matches!(
            self.data,
            GameEventData::PositionReport { .. }
                | GameEventData::KnockedOut { .. }
                | GameEventData::StompLanded { .. }
                | GameEventData::DamageChanged { .. }
                | GameEventData::PowerupClaimed { .. }
                | GameEventData::PowerupUseRequested { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gameplay_classification() {
        assert!(GameEvent::knocked_out(0, PlayerId::from("a")).is_gameplay());
        assert!(GameEvent::damage_changed(0, 10.0, 10.0, DamageSource::Collision).is_gameplay());
        assert!(!GameEvent::impact(0, 6.0).is_gameplay());
        assert!(!GameEvent::new(0, GameEventData::Jumped).is_gameplay());
    }
}
