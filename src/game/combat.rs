//! Combat Model
//!
//! Collision classification, damage-scaled knockback and air-stomp math.
//! Everything here is a pure function of its arguments; the only randomness
//! is the cosmetic spin, which takes its RNG explicitly.

use serde::{Serialize, Deserialize};

use crate::config::{CollisionConfig, StompConfig};
use crate::core::{DeterministicRng, Vec3};
use crate::game::powerup::Modifiers;

// =============================================================================
// COLLISION EVENTS
// =============================================================================

/// Arena features with their own response.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum HazardKind {
    /// Launches along `direction` (radians around Y).
    BoostPad {
        /// Heading in radians.
        direction: f64,
    },
    /// Launches straight up.
    Spring,
    /// Pushes away along the contact normal.
    Bumper,
}

/// What the local puck touched.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Another player.
    Puck,
    /// A hazard or launch feature.
    Hazard(HazardKind),
    /// Plain floor or walls.
    Terrain,
}

/// One physics contact, consumed once.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionEvent {
    /// Unit normal pointing from the other body towards the local puck.
    pub contact_normal: Vec3,
    /// Closing speed at contact.
    pub impact_speed: f64,
    /// Other body.
    pub other: BodyKind,
}

/// What a contact does to the local puck.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CollisionResponse {
    /// Below the noise threshold, or plain terrain.
    Ignored,
    /// Player-vs-player hit.
    Knockback {
        /// Impulse to apply.
        impulse: Vec3,
        /// Damage to add.
        damage_gain: f64,
        /// Light the hit flash.
        flash: bool,
        /// Eligible for cosmetic spin.
        heavy: bool,
    },
    /// Feature-defined launch, independent of damage.
    Launch {
        /// Impulse to apply.
        impulse: Vec3,
        /// Impact strength reported to effect hooks.
        impact: Option<f64>,
    },
}

// =============================================================================
// KNOCKBACK
// =============================================================================

/// Knockback multiplier for a victim at `damage`.
///
/// `1 + (damage / 100) * damage_multiplier`. Never below 1.
#[inline]
pub fn knockback_multiplier(damage: f64, config: &CollisionConfig) -> f64 {
    1.0 + (damage.max(0.0) / 100.0) * config.damage_multiplier
}

/// Upward bias term, growing with damage up to the configured cap.
#[inline]
pub fn upward_bias(damage: f64, config: &CollisionConfig) -> f64 {
    (damage.max(0.0) / config.upward_bias_divisor).min(config.max_upward_bias)
}

/// Knockback impulse for a victim at `damage` hit along `normal`.
///
/// Horizontal components follow the normal at full force; the vertical
/// component is the normal's vertical magnitude plus the damage bias, at half
/// force. Returns `None` for contacts below the impact noise threshold.
pub fn knockback_impulse(
    damage: f64,
    impact_speed: f64,
    normal: Vec3,
    config: &CollisionConfig,
) -> Option<Vec3> {
    if !(impact_speed > config.min_impact_speed) {
        return None;
    }
    let force = config.base_force * knockback_multiplier(damage, config);
    let bias = upward_bias(damage, config);
    Some(Vec3::new(
        normal.x * force,
        (normal.y.abs() + bias) * force * 0.5,
        normal.z * force,
    ))
}

/// Classify a contact and compute its deterministic response.
pub fn resolve_collision(
    event: &CollisionEvent,
    damage: f64,
    modifiers: &Modifiers,
    config: &CollisionConfig,
) -> CollisionResponse {
    match event.other {
        BodyKind::Puck => {
            let Some(impulse) = knockback_impulse(damage, event.impact_speed, event.contact_normal, config) else {
                return CollisionResponse::Ignored;
            };
            let resistance = modifiers.knockback_resistance.clamp(0.0, 1.0);
            CollisionResponse::Knockback {
                impulse: impulse * (1.0 - resistance),
                damage_gain: event.impact_speed
                    * knockback_multiplier(damage, config)
                    * config.damage_per_impact,
                flash: event.impact_speed > config.flash_impact_speed,
                heavy: event.impact_speed > config.heavy_impact_speed,
            }
        }
        BodyKind::Hazard(HazardKind::BoostPad { direction }) => CollisionResponse::Launch {
            impulse: Vec3::new(
                direction.sin() * config.boost_pad_force,
                config.boost_pad_lift,
                direction.cos() * config.boost_pad_force,
            ),
            impact: None,
        },
        BodyKind::Hazard(HazardKind::Spring) => CollisionResponse::Launch {
            impulse: Vec3::new(0.0, config.spring_impulse, 0.0),
            impact: Some(5.0),
        },
        BodyKind::Hazard(HazardKind::Bumper) => CollisionResponse::Launch {
            impulse: event.contact_normal.horizontal().normalize() * config.base_force,
            impact: Some(event.impact_speed),
        },
        BodyKind::Terrain => CollisionResponse::Ignored,
    }
}

/// Random spin for heavy impacts. Purely cosmetic.
pub fn cosmetic_torque(
    impact_speed: f64,
    config: &CollisionConfig,
    rng: &mut DeterministicRng,
) -> Option<Vec3> {
    if impact_speed <= config.heavy_impact_speed || !rng.next_bool(config.torque_chance) {
        return None;
    }
    let scale = impact_speed * config.torque_scale;
    Some(Vec3::new(
        (rng.next_f64() - 0.5) * scale,
        (rng.next_f64() - 0.5) * scale,
        (rng.next_f64() - 0.5) * scale,
    ))
}

// =============================================================================
// STOMP
// =============================================================================

/// Attacker is airborne and falling fast enough to stomp.
#[inline]
pub fn is_stomp_descent(airborne: bool, velocity_y: f64, config: &StompConfig) -> bool {
    airborne && velocity_y < -config.min_descent_speed
}

/// Attacker is positioned above the target within the stomp window.
pub fn stomp_geometry(attacker: Vec3, target: Vec3, config: &StompConfig) -> bool {
    let height = attacker.y - target.y;
    height >= config.min_height
        && height <= config.max_height
        && attacker.horizontal_distance(target) < config.lateral_radius
}

/// Stomp damage for a downward speed, scaled by the attacker's damage
/// multiplier.
pub fn stomp_damage(descent_speed: f64, damage_dealt: f64, config: &StompConfig) -> f64 {
    let raw = config.base_damage + descent_speed.abs() * config.speed_damage;
    raw.min(config.max_damage) * damage_dealt
}

/// Attacker velocity after a stomp: horizontal damped, vertical reflected.
pub fn stomp_bounce(velocity: Vec3, config: &StompConfig) -> Vec3 {
    Vec3::new(
        velocity.x * config.horizontal_bounce,
        velocity.y.abs() * config.vertical_bounce,
        velocity.z * config.horizontal_bounce,
    )
}

// =============================================================================
// TESTS
// =============================================================================
