//! Projectiles
//!
//! Rockets and glue shots launched by usable power-ups. Every client flies
//! every projectile, but hit tests only run against the local player: the
//! victim's own client decides whether it was hit.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::Vec3;
use crate::game::powerup::Affliction;
use crate::game::state::PlayerId;

/// Fraction of the way a homing projectile turns towards its target per step.
const HOMING_TURN: f64 = 0.1;

/// Projectile kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileKind {
    /// Homing explosive.
    Rocket,
    /// Sticky slowing shot.
    Glue,
}

impl ProjectileKind {
    /// Flight speed (units/s).
    pub fn speed(self) -> f64 {
        match self {
            ProjectileKind::Rocket => 14.0,
            ProjectileKind::Glue => 18.0,
        }
    }

    /// Time before the projectile fizzles.
    pub fn lifetime_ms(self) -> u64 {
        match self {
            ProjectileKind::Rocket | ProjectileKind::Glue => 3000,
        }
    }

    /// Hit sphere radius.
    pub fn hit_radius(self) -> f64 {
        match self {
            ProjectileKind::Rocket => 0.8,
            ProjectileKind::Glue => 0.6,
        }
    }

    /// Damage dealt on hit.
    pub fn damage(self) -> f64 {
        match self {
            ProjectileKind::Rocket => 12.0,
            ProjectileKind::Glue => 0.0,
        }
    }

    /// Whether a hit also knocks the victim back.
    pub fn knocks_back(self) -> bool {
        matches!(self, ProjectileKind::Rocket)
    }

    /// Steers towards its target.
    pub fn homing(self) -> bool {
        matches!(self, ProjectileKind::Rocket)
    }

    /// Affliction applied to the victim.
    pub fn affliction(self) -> Option<Affliction> {
        match self {
            ProjectileKind::Rocket => None,
            ProjectileKind::Glue => Some(Affliction::Glued),
        }
    }
}

/// A projectile in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    /// Local id.
    pub id: u32,
    /// Kind.
    pub kind: ProjectileKind,
    /// Player who fired it.
    pub owner: PlayerId,
    /// Homing target.
    pub target: Option<PlayerId>,
    /// Current position.
    pub position: Vec3,
    /// Current velocity.
    pub velocity: Vec3,
    /// Absolute expiry (ms).
    pub expires_at: u64,
}

/// A projectile that struck the local player.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectileHit {
    /// Projectile id.
    pub projectile_id: u32,
    /// Kind.
    pub kind: ProjectileKind,
    /// Shooter.
    pub owner: PlayerId,
    /// Unit travel direction at impact.
    pub direction: Vec3,
}

/// All projectiles in flight.
#[derive(Clone, Debug, Default)]
pub struct ProjectileField {
    next_id: u32,
    live: BTreeMap<u32, Projectile>,
}

impl ProjectileField {
    /// Create an empty field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a projectile from `origin` towards `aim`.
    pub fn spawn(
        &mut self,
        kind: ProjectileKind,
        owner: PlayerId,
        origin: Vec3,
        aim: Vec3,
        target: Option<PlayerId>,
        now_ms: u64,
    ) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let mut dir = (aim - origin).normalize();
        if dir == Vec3::ZERO {
            dir = Vec3::new(0.0, 0.0, -1.0);
        }

        debug!("Projectile {} ({:?}) fired by {}", id, kind, owner);
        self.live.insert(
            id,
            Projectile {
                id,
                kind,
                owner,
                target,
                position: origin,
                velocity: dir * kind.speed(),
                expires_at: now_ms + kind.lifetime_ms(),
            },
        );
        id
    }

    /// Move every projectile by `dt_s` seconds and drop expired ones.
    ///
    /// Returns the ids that expired.
    pub fn advance(&mut self, dt_s: f64, now_ms: u64, positions: &BTreeMap<PlayerId, Vec3>) -> Vec<u32> {
        let expired: Vec<u32> = self
            .live
            .values()
            .filter(|p| now_ms >= p.expires_at)
            .map(|p| p.id)
            .collect();
        for id in &expired {
            self.live.remove(id);
        }

        for projectile in self.live.values_mut() {
            if projectile.kind.homing() {
                let target_pos = projectile.target.as_ref().and_then(|t| positions.get(t));
                if let Some(target_pos) = target_pos {
                    let speed = projectile.kind.speed();
                    let current = projectile.velocity.normalize();
                    let wanted = (*target_pos - projectile.position).normalize();
                    let steered = current.lerp(wanted, HOMING_TURN).normalize();
                    if steered != Vec3::ZERO {
                        projectile.velocity = steered * speed;
                    }
                }
            }
            projectile.position += projectile.velocity * dt_s;
        }

        expired
    }

    /// Remove and return every projectile touching `victim` at `position`.
    ///
    /// A player is never hit by their own projectile.
    pub fn take_hits(&mut self, victim: &PlayerId, position: Vec3, body_radius: f64) -> Vec<ProjectileHit> {
        let hit_ids: Vec<u32> = self
            .live
            .values()
            .filter(|p| &p.owner != victim)
            .filter(|p| p.position.distance(position) < p.kind.hit_radius() + body_radius)
            .map(|p| p.id)
            .collect();

        hit_ids
            .into_iter()
            .filter_map(|id| self.live.remove(&id))
            .map(|p| ProjectileHit {
                projectile_id: p.id,
                kind: p.kind,
                owner: p.owner,
                direction: p.velocity.normalize(),
            })
            .collect()
    }

    /// Iterate projectiles in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Projectile> {
        self.live.values()
    }

    /// Number in flight.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.live.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
