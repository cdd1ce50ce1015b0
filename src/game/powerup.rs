//! Power-up Catalogue and Field
//!
//! Power-up kinds form a closed enum. Every effect parameter is resolved by an
//! exhaustive match, so adding a kind is a compile error until each property
//! is decided.
//!
//! The [`PowerupField`] tracks the instances the relay has spawned. Removal is
//! idempotent on id and a claim flag is set before a pickup is reported.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::Vec3;
use crate::game::projectile::ProjectileKind;

// =============================================================================
// IDS
// =============================================================================

/// Relay-assigned power-up identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PowerupId(pub String);

impl PowerupId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PowerupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// MODIFIERS
// =============================================================================

/// Multipliers and overrides an effect applies to the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modifiers {
    /// Movement force multiplier.
    pub acceleration: f64,
    /// Body mass multiplier.
    pub mass: f64,
    /// Body radius multiplier.
    pub radius: f64,
    /// Friction override.
    pub friction: Option<f64>,
    /// Fraction of incoming knockback ignored, in [0, 1].
    pub knockback_resistance: f64,
    /// Multiplier on damage this player deals.
    pub damage_dealt: f64,
    /// Movement intent is reversed.
    pub reverse_controls: bool,
}

impl Modifiers {
    /// No effect.
    pub const BASELINE: Self = Self {
        acceleration: 1.0,
        mass: 1.0,
        radius: 1.0,
        friction: None,
        knockback_resistance: 0.0,
        damage_dealt: 1.0,
        reverse_controls: false,
    };

    /// Stack two modifier sets.
    pub fn combine(self, other: Self) -> Self {
        Self {
            acceleration: self.acceleration * other.acceleration,
            mass: self.mass * other.mass,
            radius: self.radius * other.radius,
            friction: other.friction.or(self.friction),
            knockback_resistance: self.knockback_resistance.max(other.knockback_resistance),
            damage_dealt: self.damage_dealt * other.damage_dealt,
            reverse_controls: self.reverse_controls != other.reverse_controls,
        }
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self::BASELINE
    }
}

// =============================================================================
// POWERUP KINDS
// =============================================================================

/// How a power-up takes effect once picked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerupClass {
    /// Applies immediately for a bounded duration.
    Buff,
    /// One-shot impulse, zero duration.
    Instant,
    /// Held until fired with the use trigger.
    Usable,
}

/// Every power-up the relay can spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupKind {
    /// Faster movement.
    SpeedBoost,
    /// Double outgoing stomp damage.
    HeavyHitter,
    /// Resist knockback, heavier body.
    Shield,
    /// Instant burst along the current heading.
    SuperBoost,
    /// Smaller, lighter, nimbler.
    Shrink,
    /// Bigger, heavier, slower.
    Giant,
    /// Frictionless glide.
    Ghost,
    /// Reverse the nearest enemy's controls.
    Curse,
    /// Homing rocket.
    Rocket,
    /// Sticky shot that slows its victim.
    GlueShot,
}

impl PowerupKind {
    /// Every kind, in spawn-table order.
    pub const ALL: [PowerupKind; 10] = [
        PowerupKind::SpeedBoost,
        PowerupKind::HeavyHitter,
        PowerupKind::Shield,
        PowerupKind::SuperBoost,
        PowerupKind::Shrink,
        PowerupKind::Giant,
        PowerupKind::Ghost,
        PowerupKind::Curse,
        PowerupKind::Rocket,
        PowerupKind::GlueShot,
    ];

    /// How this kind takes effect.
    pub fn class(self) -> PowerupClass {
        match self {
            PowerupKind::SpeedBoost
            | PowerupKind::HeavyHitter
            | PowerupKind::Shield
            | PowerupKind::Shrink
            | PowerupKind::Giant
            | PowerupKind::Ghost => PowerupClass::Buff,
            PowerupKind::SuperBoost => PowerupClass::Instant,
            PowerupKind::Curse | PowerupKind::Rocket | PowerupKind::GlueShot => PowerupClass::Usable,
        }
    }

    /// Effect duration. Zero for instant and held kinds.
    pub fn duration_ms(self) -> u64 {
        match self {
            PowerupKind::SpeedBoost => 5000,
            PowerupKind::HeavyHitter => 6000,
            PowerupKind::Shield => 8000,
            PowerupKind::Shrink => 15000,
            PowerupKind::Giant => 10000,
            PowerupKind::Ghost => 5000,
            PowerupKind::SuperBoost
            | PowerupKind::Curse
            | PowerupKind::Rocket
            | PowerupKind::GlueShot => 0,
        }
    }

    /// Modifiers applied while the effect is active.
    pub fn modifiers(self) -> Modifiers {
        let base = Modifiers::BASELINE;
        match self {
            PowerupKind::SpeedBoost => Modifiers { acceleration: 1.8, ..base },
            PowerupKind::HeavyHitter => Modifiers { damage_dealt: 2.0, ..base },
            PowerupKind::Shield => Modifiers { knockback_resistance: 0.8, mass: 1.5, ..base },
            PowerupKind::Shrink => Modifiers { acceleration: 1.3, mass: 0.5, radius: 0.6, ..base },
            PowerupKind::Giant => Modifiers { acceleration: 0.7, mass: 2.5, radius: 1.8, ..base },
            PowerupKind::Ghost => Modifiers { friction: Some(0.0), ..base },
            PowerupKind::SuperBoost
            | PowerupKind::Curse
            | PowerupKind::Rocket
            | PowerupKind::GlueShot => base,
        }
    }

    /// One-shot impulse for instant kinds. `heading` is the current intent;
    /// with no heading the burst goes straight up.
    pub fn instant_impulse(self, heading: Vec3) -> Option<Vec3> {
        match self {
            PowerupKind::SuperBoost => {
                let dir = heading.horizontal().normalize();
                if dir == Vec3::ZERO {
                    Some(Vec3::UP * 35.0)
                } else {
                    Some(dir * 35.0)
                }
            }
            _ => None,
        }
    }

    /// Projectile launched when this kind is used.
    pub fn projectile(self) -> Option<ProjectileKind> {
        match self {
            PowerupKind::Rocket => Some(ProjectileKind::Rocket),
            PowerupKind::GlueShot => Some(ProjectileKind::Glue),
            _ => None,
        }
    }

    /// Affliction placed directly on the target when used.
    pub fn inflicts(self) -> Option<Affliction> {
        match self {
            PowerupKind::Curse => Some(Affliction::Cursed),
            _ => None,
        }
    }

    /// Stable snake_case name, the same string used on the wire.
    pub fn name(self) -> &'static str {
        match self {
            PowerupKind::SpeedBoost => "speed_boost",
            PowerupKind::HeavyHitter => "heavy_hitter",
            PowerupKind::Shield => "shield",
            PowerupKind::SuperBoost => "super_boost",
            PowerupKind::Shrink => "shrink",
            PowerupKind::Giant => "giant",
            PowerupKind::Ghost => "ghost",
            PowerupKind::Curse => "curse",
            PowerupKind::Rocket => "rocket",
            PowerupKind::GlueShot => "glue_shot",
        }
    }
}

impl fmt::Display for PowerupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Debuffs placed on a player by someone else's power-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affliction {
    /// Reversed controls.
    Cursed,
    /// Heavily reduced acceleration.
    Glued,
}

impl Affliction {
    /// How long the affliction lasts.
    pub fn duration_ms(self) -> u64 {
        match self {
            Affliction::Cursed => 5000,
            Affliction::Glued => 3000,
        }
    }

    /// Modifiers applied while afflicted.
    pub fn modifiers(self) -> Modifiers {
        match self {
            Affliction::Cursed => Modifiers { reverse_controls: true, ..Modifiers::BASELINE },
            Affliction::Glued => Modifiers { acceleration: 0.2, ..Modifiers::BASELINE },
        }
    }
}

// =============================================================================
// ACTIVE EFFECTS
// =============================================================================

/// The power-up a player currently holds or benefits from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivePowerup {
    /// Instance it came from, when known.
    pub powerup_id: Option<PowerupId>,
    /// Kind.
    pub kind: PowerupKind,
    /// Absolute expiry. `None` for held usables.
    pub expires_at: Option<u64>,
}

impl ActivePowerup {
    /// Start a power-up at `now_ms`. Buffs get an absolute expiry.
    pub fn start(powerup_id: Option<PowerupId>, kind: PowerupKind, now_ms: u64) -> Self {
        let expires_at = match kind.class() {
            PowerupClass::Buff => Some(now_ms + kind.duration_ms()),
            PowerupClass::Instant | PowerupClass::Usable => None,
        };
        Self { powerup_id, kind, expires_at }
    }

    /// True once `now_ms` has reached the expiry.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.map_or(false, |at| now_ms >= at)
    }

    /// Held and waiting to be fired.
    pub fn is_usable(&self) -> bool {
        self.kind.class() == PowerupClass::Usable
    }

    /// Modifiers while active. Held usables do nothing until fired.
    pub fn modifiers(&self) -> Modifiers {
        self.kind.modifiers()
    }
}

/// An affliction with its absolute expiry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveAffliction {
    /// Kind.
    pub kind: Affliction,
    /// Absolute expiry.
    pub expires_at: u64,
}

impl ActiveAffliction {
    /// Start at `now_ms`.
    pub fn start(kind: Affliction, now_ms: u64) -> Self {
        Self { kind, expires_at: now_ms + kind.duration_ms() }
    }
}

// =============================================================================
// FIELD
// =============================================================================

/// A spawned, not yet removed power-up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerupInstance {
    /// Relay id.
    pub id: PowerupId,
    /// Kind.
    pub kind: PowerupKind,
    /// World position.
    pub position: Vec3,
    /// Spawn time (ms).
    pub spawned_at: u64,
    /// Set once the local player has reported a pickup.
    pub claimed: bool,
}

/// Live power-ups plus tombstones of removed ids.
#[derive(Clone, Debug)]
pub struct PowerupField {
    max_on_field: usize,
    live: BTreeMap<PowerupId, PowerupInstance>,
    removed: BTreeMap<PowerupId, Option<PowerupKind>>,
}

impl PowerupField {
    /// Create an empty field.
    pub fn new(max_on_field: usize) -> Self {
        Self {
            max_on_field,
            live: BTreeMap::new(),
            removed: BTreeMap::new(),
        }
    }

    /// Add a spawned instance. Refuses duplicates, ids that were already
    /// removed, and spawns beyond the field limit.
    pub fn spawn(&mut self, id: PowerupId, kind: PowerupKind, position: Vec3, now_ms: u64) -> bool {
        if self.live.contains_key(&id) || self.removed.contains_key(&id) {
            debug!("Ignoring duplicate spawn of power-up {}", id);
            return false;
        }
        if self.live.len() >= self.max_on_field {
            warn!("Power-up field full ({}), dropping spawn {}", self.max_on_field, id);
            return false;
        }
        self.live.insert(
            id.clone(),
            PowerupInstance { id, kind, position, spawned_at: now_ms, claimed: false },
        );
        true
    }

    /// Remove an instance. Only the first removal of an id returns it.
    ///
    /// Removing an id that was never spawned still tombstones it, so a spawn
    /// delivered late is ignored.
    pub fn remove(&mut self, id: &PowerupId) -> Option<PowerupInstance> {
        match self.live.remove(id) {
            Some(instance) => {
                self.removed.insert(id.clone(), Some(instance.kind));
                Some(instance)
            }
            None => {
                self.removed.entry(id.clone()).or_insert(None);
                None
            }
        }
    }

    /// Kind of a live or already removed instance.
    pub fn kind_of(&self, id: &PowerupId) -> Option<PowerupKind> {
        self.live
            .get(id)
            .map(|p| p.kind)
            .or_else(|| self.removed.get(id).copied().flatten())
    }

    /// Claim the nearest unclaimed instance within `radius` of `position`.
    ///
    /// The claim flag is set here, before the caller reports the pickup, so
    /// the same instance can never be returned twice.
    pub fn claim_within(&mut self, position: Vec3, radius: f64) -> Option<PowerupInstance> {
        let nearest = self
            .live
            .values()
            .filter(|p| !p.claimed && p.position.distance(position) < radius)
            .min_by(|a, b| {
                a.position
                    .distance(position)
                    .total_cmp(&b.position.distance(position))
            })
            .map(|p| p.id.clone())?;

        let instance = self.live.get_mut(&nearest)?;
        instance.claimed = true;
        Some(instance.clone())
    }

    /// Look up a live instance.
    pub fn get(&self, id: &PowerupId) -> Option<&PowerupInstance> {
        self.live.get(id)
    }

    /// Iterate live instances in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PowerupInstance> {
        self.live.values()
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when nothing is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Drop everything, including tombstones (new game).
    pub fn clear(&mut self) {
        self.live.clear();
        self.removed.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
