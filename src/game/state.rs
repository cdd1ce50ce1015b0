//! Game State Definitions
//!
//! Player state, the Local/Remote authority split, and the client-side world
//! that holds every known player plus the power-up and projectile fields.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::Vec3;
use crate::game::powerup::{ActiveAffliction, ActivePowerup, Modifiers, PowerupField};
use crate::game::projectile::ProjectileField;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque, session-scoped player identifier assigned by the relay.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// AUTHORITY & LIFECYCLE
// =============================================================================

/// Which process owns a player's transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    /// Simulated by this process.
    Local,
    /// Overwritten by relayed network updates.
    Remote,
}

/// Player lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// On the platform.
    Active,
    /// Above the airborne height. Recomputed from height every tick.
    Airborne,
    /// Knocked out, waiting for the respawn deadline.
    Respawning {
        /// Absolute respawn time (ms).
        respawn_at: u64,
    },
    /// Remote player reported knocked out; cleared by their next position
    /// report.
    Eliminated,
}

/// Visual severity bands for accumulated damage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DamageTier {
    /// Below 50.
    Low,
    /// 50 to 99.
    Medium,
    /// 100 to 149.
    High,
    /// 150 and up.
    Critical,
}

impl DamageTier {
    /// Band for a damage value.
    pub fn for_damage(damage: f64) -> Self {
        if damage < 50.0 {
            DamageTier::Low
        } else if damage < 100.0 {
            DamageTier::Medium
        } else if damage < 150.0 {
            DamageTier::High
        } else {
            DamageTier::Critical
        }
    }
}

/// Authority violations and unknown ids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// Id not present in the world.
    #[error("Unknown player: {0}")]
    UnknownPlayer(PlayerId),

    /// Network data addressed at the locally simulated player.
    #[error("Player {0} is locally simulated")]
    LocalPlayer(PlayerId),
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// State of a single participant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerState {
    /// Session id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Cosmetic color reference.
    pub color: String,
    /// Slot in the room (spawn point index).
    pub player_index: usize,
    /// Position.
    pub position: Vec3,
    /// Velocity.
    pub velocity: Vec3,
    /// Orientation (Euler angles) as last reported.
    pub rotation: Vec3,
    /// Damage accumulator, never negative.
    pub damage: f64,
    /// Who writes position/velocity.
    pub authority: Authority,
    /// Lifecycle state.
    pub lifecycle: Lifecycle,
    /// Held or active power-up.
    pub active_powerup: Option<ActivePowerup>,
    /// Debuff placed by another player.
    pub affliction: Option<ActiveAffliction>,
    /// Player currently shown as stomped by this one.
    pub stomp_target: Option<PlayerId>,
    /// Hit flash is lit.
    pub flashing: bool,
    /// Recent positions, oldest first.
    pub trail: VecDeque<Vec3>,
    /// Last transform update (ms).
    pub last_update_ms: u64,
}

impl PlayerState {
    /// Create a player at its spawn point.
    pub fn new(
        id: PlayerId,
        name: impl Into<String>,
        color: impl Into<String>,
        player_index: usize,
        authority: Authority,
        spawn: Vec3,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            color: color.into(),
            player_index,
            position: spawn,
            velocity: Vec3::ZERO,
            rotation: Vec3::ZERO,
            damage: 0.0,
            authority,
            lifecycle: Lifecycle::Active,
            active_powerup: None,
            affliction: None,
            stomp_target: None,
            flashing: false,
            trail: VecDeque::new(),
            last_update_ms: 0,
        }
    }

    /// Simulated by this process.
    #[inline]
    pub fn is_local(&self) -> bool {
        self.authority == Authority::Local
    }

    /// Currently airborne.
    #[inline]
    pub fn is_airborne(&self) -> bool {
        self.lifecycle == Lifecycle::Airborne
    }

    /// Waiting to respawn.
    #[inline]
    pub fn is_respawning(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Respawning { .. })
    }

    /// Severity band of the current damage.
    pub fn damage_tier(&self) -> DamageTier {
        DamageTier::for_damage(self.damage)
    }

    /// Modifiers of the active power-up and affliction combined.
    ///
    /// Held usables contribute nothing until fired.
    pub fn modifiers(&self) -> Modifiers {
        let powerup = self
            .active_powerup
            .as_ref()
            .filter(|p| !p.is_usable())
            .map_or(Modifiers::BASELINE, |p| p.modifiers());
        let affliction = self
            .affliction
            .map_or(Modifiers::BASELINE, |a| a.kind.modifiers());
        powerup.combine(affliction)
    }

    /// Append to the trail, keeping at most `max_len` entries.
    pub fn push_trail(&mut self, position: Vec3, max_len: usize) {
        self.trail.push_back(position);
        while self.trail.len() > max_len {
            self.trail.pop_front();
        }
    }

    /// Overwrite the transform from a network report.
    ///
    /// Missing or non-finite fields are skipped. Refused for the local player.
    pub fn apply_remote_transform(
        &mut self,
        position: Option<Vec3>,
        velocity: Option<Vec3>,
        rotation: Option<Vec3>,
        now_ms: u64,
        trail_len: usize,
    ) -> Result<(), AuthorityError> {
        self.ensure_remote()?;

        if let Some(position) = position.filter(|p| p.is_finite()) {
            self.position = position;
            self.push_trail(position, trail_len);
        }
        if let Some(velocity) = velocity.filter(|v| v.is_finite()) {
            self.velocity = velocity;
        }
        if let Some(rotation) = rotation.filter(|r| r.is_finite()) {
            self.rotation = rotation;
        }
        self.last_update_ms = now_ms;
        Ok(())
    }

    /// Overwrite damage from a network report. Refused for the local player.
    pub fn apply_remote_damage(&mut self, damage: f64) -> Result<(), AuthorityError> {
        self.ensure_remote()?;
        if damage.is_finite() {
            self.damage = damage.max(0.0);
        }
        Ok(())
    }

    fn ensure_remote(&self) -> Result<(), AuthorityError> {
        match self.authority {
            Authority::Remote => Ok(()),
            Authority::Local => Err(AuthorityError::LocalPlayer(self.id.clone())),
        }
    }
}

// =============================================================================
// ARENA STATE (client world)
// =============================================================================

/// Mutable view of the local player and the fields it interacts with.
pub struct LocalView<'a> {
    /// The local player.
    pub player: &'a mut PlayerState,
    /// Positions of every other player that is on the field.
    pub others: BTreeMap<PlayerId, Vec3>,
    /// Power-up field.
    pub powerups: &'a mut PowerupField,
    /// Projectiles in flight.
    pub projectiles: &'a mut ProjectileField,
}

/// Everything one client knows about the match.
#[derive(Clone, Debug)]
pub struct ArenaState {
    local_id: Option<PlayerId>,
    players: BTreeMap<PlayerId, PlayerState>,
    /// Live power-ups.
    pub powerups: PowerupField,
    /// Projectiles in flight.
    pub projectiles: ProjectileField,
}

impl ArenaState {
    /// Create an empty world.
    pub fn new(max_powerups: usize) -> Self {
        Self {
            local_id: None,
            players: BTreeMap::new(),
            powerups: PowerupField::new(max_powerups),
            projectiles: ProjectileField::new(),
        }
    }

    /// Replace the world with a single local player (room joined).
    pub fn reset_with_local(&mut self, mut local: PlayerState) {
        local.authority = Authority::Local;
        self.players.clear();
        self.powerups.clear();
        self.projectiles.clear();
        self.local_id = Some(local.id.clone());
        self.players.insert(local.id.clone(), local);
    }

    /// Drop everything (room left).
    pub fn clear(&mut self) {
        self.local_id = None;
        self.players.clear();
        self.powerups.clear();
        self.projectiles.clear();
    }

    /// Local player id.
    pub fn local_id(&self) -> Option<&PlayerId> {
        self.local_id.as_ref()
    }

    /// True if `id` is the local player.
    pub fn is_local(&self, id: &PlayerId) -> bool {
        self.local_id.as_ref() == Some(id)
    }

    /// Local player.
    pub fn local(&self) -> Option<&PlayerState> {
        self.local_id.as_ref().and_then(|id| self.players.get(id))
    }

    /// Local player, mutable. Only the simulator writes through this.
    pub fn local_mut(&mut self) -> Option<&mut PlayerState> {
        let id = self.local_id.as_ref()?;
        self.players.get_mut(id)
    }

    /// Any player.
    pub fn get(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Add a remote player. Existing remote entries keep their state.
    pub fn upsert_remote(&mut self, player: PlayerState) -> Result<(), AuthorityError> {
        if self.is_local(&player.id) {
            return Err(AuthorityError::LocalPlayer(player.id));
        }
        self.players.entry(player.id.clone()).or_insert(PlayerState {
            authority: Authority::Remote,
            ..player
        });
        Ok(())
    }

    /// Remove a remote player.
    pub fn remove_remote(&mut self, id: &PlayerId) -> Result<PlayerState, AuthorityError> {
        if self.is_local(id) {
            return Err(AuthorityError::LocalPlayer(id.clone()));
        }
        self.players
            .remove(id)
            .ok_or_else(|| AuthorityError::UnknownPlayer(id.clone()))
    }

    /// Remote player for a network write.
    pub fn remote_mut(&mut self, id: &PlayerId) -> Result<&mut PlayerState, AuthorityError> {
        if self.is_local(id) {
            return Err(AuthorityError::LocalPlayer(id.clone()));
        }
        self.players
            .get_mut(id)
            .ok_or_else(|| AuthorityError::UnknownPlayer(id.clone()))
    }

    /// Every player in id order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    /// Number of players, local included.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Ids of remote players.
    pub fn remote_ids(&self) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| !p.is_local())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Positions of every player.
    pub fn positions(&self) -> BTreeMap<PlayerId, Vec3> {
        self.players
            .values()
            .map(|p| (p.id.clone(), p.position))
            .collect()
    }

    /// Split borrows for one simulator tick.
    pub fn local_view(&mut self) -> Option<LocalView<'_>> {
        let local_id = self.local_id.clone()?;
        let others = self
            .players
            .values()
            .filter(|p| p.id != local_id)
            .filter(|p| matches!(p.lifecycle, Lifecycle::Active | Lifecycle::Airborne))
            .map(|p| (p.id.clone(), p.position))
            .collect();
        let player = self.players.get_mut(&local_id)?;
        Some(LocalView {
            player,
            others,
            powerups: &mut self.powerups,
            projectiles: &mut self.projectiles,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
