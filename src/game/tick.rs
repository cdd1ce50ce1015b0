//! Local Simulation Tick
//!
//! Advances the locally simulated player by one tick. Phases run in a fixed
//! order so a tick never reports partial state:
//!
//! 1. fire due lifecycle timers, expire timed effects
//! 2. read the body transform once
//! 3. sync body mass/friction with active modifiers
//! 4. input: movement force, use/jump
//! 5. collisions, relayed hits, projectile hits
//! 6. air-stomp detection
//! 7. power-up pickup claims
//! 8. knockout check
//! 9. position report
//!
//! Effects that originate elsewhere (a relayed stomp, a confirmed pickup) are
//! queued with [`Simulator::queue`] and applied during the next tick, so the
//! simulator stays the only writer of the local player.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::GameConfig;
use crate::core::{DeterministicRng, Vec3};
use crate::game::body::PhysicsBody;
use crate::game::combat::{self, CollisionEvent, CollisionResponse};
use crate::game::events::{DamageSource, GameEvent, GameEventData};
use crate::game::input::TickInput;
use crate::game::lifecycle::{LifecycleMachine, LifecycleOutcome};
use crate::game::powerup::{
    ActiveAffliction, ActivePowerup, Affliction, Modifiers, PowerupClass, PowerupId, PowerupKind,
};
use crate::game::state::{Lifecycle, LocalView, PlayerId, PlayerState};

/// How far ahead a use without a target is aimed.
const DEFAULT_AIM_DISTANCE: f64 = 10.0;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in phase order
    pub events: Vec<GameEvent>,
    /// Whether the local player was knocked out this tick
    pub knocked_out: bool,
}

impl TickResult {
    fn push(&mut self, at_ms: u64, data: GameEventData) {
        self.events.push(GameEvent::new(at_ms, data));
    }
}

/// Effects from outside the local simulation, applied on the next tick.
#[derive(Clone, Debug, PartialEq)]
pub enum ExternalEffect {
    /// Another player stomped us.
    Stomped {
        /// Attacker.
        attacker: PlayerId,
        /// Damage.
        damage: f64,
    },
    /// Someone's power-up afflicted us.
    Afflicted(Affliction),
    /// The relay confirmed our pickup.
    PowerupGranted {
        /// Instance.
        powerup_id: Option<PowerupId>,
        /// Kind.
        kind: PowerupKind,
    },
    /// The relay accepted our use.
    UseConfirmed(Option<PowerupId>),
    /// The relay refused our use; the item goes back in the slot.
    UseRejected(PowerupId),
}

/// Simulator for the local player.
pub struct Simulator {
    config: Arc<GameConfig>,
    lifecycle: LifecycleMachine,
    rng: DeterministicRng,
    last_jump_ms: Option<u64>,
    pending: Vec<ExternalEffect>,
    pending_use: Option<ActivePowerup>,
    applied_mass: Option<f64>,
    applied_friction: Option<f64>,
}

impl Simulator {
    /// Create a simulator. `seed` only drives cosmetic spin.
    pub fn new(config: Arc<GameConfig>, seed: u64) -> Self {
        Self {
            config,
            lifecycle: LifecycleMachine::new(),
            rng: DeterministicRng::new(seed),
            last_jump_ms: None,
            pending: Vec::new(),
            pending_use: None,
            applied_mass: None,
            applied_friction: None,
        }
    }

    /// Queue an external effect for the next tick.
    pub fn queue(&mut self, effect: ExternalEffect) {
        self.pending.push(effect);
    }

    /// Number of queued effects.
    pub fn pending_effects(&self) -> usize {
        self.pending.len()
    }

    /// Item fired and awaiting relay confirmation.
    pub fn pending_use(&self) -> Option<&ActivePowerup> {
        self.pending_use.as_ref()
    }

    /// Put the local player on its spawn point for a new match.
    pub fn reset_for_match(&mut self, player: &mut PlayerState, body: &mut dyn PhysicsBody) {
        let spawn = self.config.spawn_point(player.player_index);
        body.set_position(spawn);
        body.set_velocity(Vec3::ZERO);
        body.set_angular_velocity(Vec3::ZERO);
        player.position = spawn;
        player.velocity = Vec3::ZERO;
        player.damage = 0.0;
        player.lifecycle = Lifecycle::Active;
        player.active_powerup = None;
        player.affliction = None;
        player.stomp_target = None;
        player.flashing = false;
        player.trail.clear();
        self.pending.clear();
        self.pending_use = None;
        self.last_jump_ms = None;
        self.lifecycle.reset();
    }

    /// Cancel every lifecycle timer and drop queued effects.
    pub fn teardown(&mut self) -> usize {
        self.pending.clear();
        self.pending_use = None;
        self.lifecycle.teardown()
    }

    /// Run one tick.
    pub fn tick(
        &mut self,
        view: LocalView<'_>,
        body: &mut dyn PhysicsBody,
        input: TickInput,
        contacts: &[CollisionEvent],
        now_ms: u64,
    ) -> TickResult {
        let mut result = TickResult::default();
        let LocalView { player, others, powerups, projectiles } = view;

        if !player.is_local() {
            warn!("Refusing to simulate remote player {}", player.id);
            return result;
        }
        let config = Arc::clone(&self.config);

        // 1. Timers and expiry
        for outcome in self.lifecycle.poll(player, body, now_ms, &config) {
            if let LifecycleOutcome::Respawned(position) = outcome {
                result.push(now_ms, GameEventData::Respawned { player_id: player.id.clone(), position });
            }
        }
        self.expire_effects(player, now_ms, &mut result);

        // 2. Sense
        let transform = body.transform();
        player.position = transform.position;
        player.velocity = transform.velocity;
        player.rotation = transform.rotation;
        player.last_update_ms = now_ms;
        let respawning = player.is_respawning();
        if !respawning {
            player.push_trail(transform.position, config.puck.trail_length);
        }
        self.lifecycle.update_airborne(player, config.puck.airborne_height);

        // 3. Body modifiers (before any impulse so mass is current)
        self.apply_queued_grants(player, body, input, now_ms, &mut result);
        let modifiers = player.modifiers();
        self.sync_body(body, &modifiers);

        if !respawning {
            // 4. Input
            self.apply_movement(player, body, input, &modifiers);
            if input.fire {
                self.fire(player, &others, body, input, now_ms, &mut result);
            }

            // 5. Collisions and hits
            for contact in contacts {
                self.resolve_contact(player, body, contact, &modifiers, now_ms, &mut result);
            }
            self.apply_queued_hits(player, body, now_ms, &mut result);
            let radius = config.puck.radius * modifiers.radius;
            for hit in projectiles.take_hits(&player.id, player.position, radius) {
                let resistance = modifiers.knockback_resistance.clamp(0.0, 1.0);
                if hit.kind.knocks_back() {
                    let normal = hit.direction.horizontal().normalize();
                    if let Some(impulse) =
                        combat::knockback_impulse(player.damage, hit.kind.speed(), normal, &config.collision)
                    {
                        body.apply_impulse(impulse * (1.0 - resistance));
                    }
                }
                if hit.kind.damage() > 0.0 {
                    add_damage(player, hit.kind.damage(), DamageSource::Projectile, now_ms, &mut result);
                }
                if let Some(affliction) = hit.kind.affliction() {
                    afflict(player, affliction, now_ms, &mut result);
                }
                result.push(
                    now_ms,
                    GameEventData::ProjectileHit {
                        projectile_id: hit.projectile_id,
                        kind: hit.kind,
                        owner_id: hit.owner,
                    },
                );
            }

            // 6. Stomp
            self.detect_stomp(player, &others, body, &modifiers, now_ms, &mut result);

            // 7. Pickups
            if let Some(instance) = powerups.claim_within(player.position, config.powerups.pickup_radius) {
                debug!("Claimed power-up {} ({})", instance.id, instance.kind);
                result.push(
                    now_ms,
                    GameEventData::PowerupClaimed { powerup_id: instance.id, kind: instance.kind },
                );
            }
        } else {
            // Relayed hits that arrive while respawning are dropped
            self.pending.retain(|e| !matches!(e, ExternalEffect::Stomped { .. } | ExternalEffect::Afflicted(_)));
        }

        // 8. Knockout
        if player.position.y < config.arena.fall_threshold
            && self.lifecycle.knock_out(player, now_ms, config.lifecycle.respawn_delay_ms)
        {
            result.knocked_out = true;
            result.events.push(GameEvent::knocked_out(now_ms, player.id.clone()));
        }

        // 9. Report
        result.push(
            now_ms,
            GameEventData::PositionReport {
                position: player.position,
                velocity: player.velocity,
                rotation: player.rotation,
            },
        );

        result
    }

    // =========================================================================
    // PHASES
    // =========================================================================

    fn expire_effects(&mut self, player: &mut PlayerState, now_ms: u64, result: &mut TickResult) {
        if let Some(active) = player.active_powerup.as_ref().filter(|p| p.is_expired(now_ms)) {
            let kind = active.kind;
            player.active_powerup = None;
            result.push(now_ms, GameEventData::PowerupExpired { kind });
        }
        if let Some(affliction) = player.affliction.filter(|a| now_ms >= a.expires_at) {
            player.affliction = None;
            result.push(now_ms, GameEventData::AfflictionExpired { affliction: affliction.kind });
        }
    }

    fn sync_body(&mut self, body: &mut dyn PhysicsBody, modifiers: &Modifiers) {
        let mass = self.config.puck.mass * modifiers.mass;
        if self.applied_mass != Some(mass) {
            body.set_mass(mass);
            self.applied_mass = Some(mass);
        }
        let friction = modifiers.friction.unwrap_or(self.config.puck.friction);
        if self.applied_friction != Some(friction) {
            body.set_friction(friction);
            self.applied_friction = Some(friction);
        }
    }

    fn apply_movement(
        &self,
        player: &PlayerState,
        body: &mut dyn PhysicsBody,
        input: TickInput,
        modifiers: &Modifiers,
    ) {
        let intent = if modifiers.reverse_controls {
            input.intent.reversed()
        } else {
            input.intent
        };
        if intent.is_idle() {
            return;
        }
        let mut acceleration = self.config.puck.acceleration * modifiers.acceleration;
        if player.is_airborne() {
            acceleration *= self.config.puck.air_control;
        }
        body.apply_force(intent.as_vec3() * acceleration);
    }

    fn fire(
        &mut self,
        player: &mut PlayerState,
        others: &BTreeMap<PlayerId, Vec3>,
        body: &mut dyn PhysicsBody,
        input: TickInput,
        now_ms: u64,
        result: &mut TickResult,
    ) {
        let held = player.active_powerup.as_ref().filter(|p| p.is_usable()).cloned();
        if let Some(held) = held {
            let nearest = others
                .iter()
                .min_by(|a, b| {
                    a.1.distance(player.position)
                        .total_cmp(&b.1.distance(player.position))
                })
                .map(|(id, pos)| (id.clone(), *pos));
            let (target_id, target_position) = match nearest {
                Some((id, pos)) => (Some(id), pos),
                None => {
                    let heading = if input.intent.is_idle() {
                        Vec3::new(0.0, 0.0, -1.0)
                    } else {
                        input.intent.as_vec3().normalize()
                    };
                    (None, player.position + heading * DEFAULT_AIM_DISTANCE)
                }
            };

            player.active_powerup = None;
            result.push(
                now_ms,
                GameEventData::PowerupUseRequested {
                    powerup_id: held.powerup_id.clone(),
                    kind: held.kind,
                    target_position,
                    target_id,
                },
            );
            self.pending_use = Some(held);
            return;
        }

        let ready = self
            .last_jump_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.config.puck.jump_cooldown_ms);
        if ready {
            body.apply_impulse(Vec3::UP * self.config.puck.jump_impulse);
            self.last_jump_ms = Some(now_ms);
            result.push(now_ms, GameEventData::Jumped);
        }
    }

    fn resolve_contact(
        &mut self,
        player: &mut PlayerState,
        body: &mut dyn PhysicsBody,
        contact: &CollisionEvent,
        modifiers: &Modifiers,
        now_ms: u64,
        result: &mut TickResult,
    ) {
        let collision = &self.config.collision;
        match combat::resolve_collision(contact, player.damage, modifiers, collision) {
            CollisionResponse::Ignored => {}
            CollisionResponse::Knockback { impulse, damage_gain, flash, heavy } => {
                body.apply_impulse(impulse);
                let flash_ms = collision.flash_ms;
                let heavy_speed = contact.impact_speed;
                add_damage(player, damage_gain, DamageSource::Collision, now_ms, result);
                if flash {
                    self.lifecycle.flash(player, now_ms, flash_ms);
                    result.events.push(GameEvent::impact(now_ms, contact.impact_speed));
                }
                if heavy {
                    if let Some(torque) = combat::cosmetic_torque(heavy_speed, &self.config.collision, &mut self.rng) {
                        body.apply_torque_impulse(torque);
                    }
                }
            }
            CollisionResponse::Launch { impulse, impact } => {
                body.apply_impulse(impulse);
                if let Some(speed) = impact {
                    result.events.push(GameEvent::impact(now_ms, speed));
                }
            }
        }
    }

    fn detect_stomp(
        &mut self,
        player: &mut PlayerState,
        others: &BTreeMap<PlayerId, Vec3>,
        body: &mut dyn PhysicsBody,
        modifiers: &Modifiers,
        now_ms: u64,
        result: &mut TickResult,
    ) {
        let stomp = &self.config.stomp;
        if !combat::is_stomp_descent(player.is_airborne(), player.velocity.y, stomp)
            || !self.lifecycle.can_stomp()
        {
            return;
        }
        let Some(target) = others
            .iter()
            .find(|(_, pos)| combat::stomp_geometry(player.position, **pos, stomp))
            .map(|(id, _)| id.clone())
        else {
            return;
        };

        let damage = combat::stomp_damage(player.velocity.y, modifiers.damage_dealt, stomp);
        let bounce = combat::stomp_bounce(player.velocity, stomp);
        let indicator_ms = stomp.indicator_ms;
        body.set_velocity(bounce);
        player.velocity = bounce;
        debug!("Stomp on {} for {:.1}", target, damage);
        self.lifecycle.register_stomp(player, target.clone(), now_ms, indicator_ms);
        result.push(now_ms, GameEventData::StompLanded { target_id: target, damage });
    }

    fn apply_queued_grants(
        &mut self,
        player: &mut PlayerState,
        body: &mut dyn PhysicsBody,
        input: TickInput,
        now_ms: u64,
        result: &mut TickResult,
    ) {
        let mut kept = Vec::with_capacity(self.pending.len());
        for effect in std::mem::take(&mut self.pending) {
            match effect {
                ExternalEffect::PowerupGranted { powerup_id, kind } => {
                    match kind.class() {
                        PowerupClass::Instant => {
                            if let Some(impulse) = kind.instant_impulse(input.intent.as_vec3()) {
                                body.apply_impulse(impulse);
                            }
                        }
                        PowerupClass::Buff | PowerupClass::Usable => {
                            player.active_powerup = Some(ActivePowerup::start(powerup_id, kind, now_ms));
                        }
                    }
                    result.push(now_ms, GameEventData::PowerupApplied { kind });
                }
                ExternalEffect::UseConfirmed(_) => {
                    self.pending_use = None;
                }
                ExternalEffect::UseRejected(id) => {
                    let matches = self
                        .pending_use
                        .as_ref()
                        .map_or(false, |p| p.powerup_id.as_ref() == Some(&id));
                    if matches {
                        let restored = self.pending_use.take();
                        if player.active_powerup.is_none() {
                            player.active_powerup = restored;
                        }
                    }
                }
                other => kept.push(other),
            }
        }
        self.pending = kept;
    }

    fn apply_queued_hits(
        &mut self,
        player: &mut PlayerState,
        body: &mut dyn PhysicsBody,
        now_ms: u64,
        result: &mut TickResult,
    ) {
        for effect in std::mem::take(&mut self.pending) {
            match effect {
                ExternalEffect::Stomped { attacker, damage } => {
                    debug!("Stomped by {} for {:.1}", attacker, damage);
                    let flash_ms = self.config.collision.flash_ms;
                    body.apply_impulse(Vec3::new(0.0, -damage * 0.2, 0.0));
                    add_damage(player, damage, DamageSource::Stomp, now_ms, result);
                    self.lifecycle.flash(player, now_ms, flash_ms);
                    result.events.push(GameEvent::impact(now_ms, damage));
                }
                ExternalEffect::Afflicted(affliction) => {
                    afflict(player, affliction, now_ms, result);
                }
                ExternalEffect::PowerupGranted { .. }
                | ExternalEffect::UseConfirmed(_)
                | ExternalEffect::UseRejected(_) => {}
            }
        }
    }
}

fn add_damage(
    player: &mut PlayerState,
    delta: f64,
    source: DamageSource,
    now_ms: u64,
    result: &mut TickResult,
) {
    if !(delta > 0.0) {
        return;
    }
    player.damage += delta;
    result
        .events
        .push(GameEvent::damage_changed(now_ms, player.damage, delta, source));
}

fn afflict(player: &mut PlayerState, affliction: Affliction, now_ms: u64, result: &mut TickResult) {
    player.affliction = Some(ActiveAffliction::start(affliction, now_ms));
    result.push(now_ms, GameEventData::AfflictionApplied { affliction });
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::body::ArcadeBody;
    use crate::game::combat::BodyKind;
    use crate::game::input::MoveIntent;
    use crate::game::state::{ArenaState, Authority};

    const DT: f64 = 1.0 / 60.0;

    struct Harness {
        sim: Simulator,
        world: ArenaState,
        body: ArcadeBody,
        config: Arc<GameConfig>,
    }

    impl Harness {
        fn new() -> Self {
            let config = Arc::new(GameConfig::default());
            let spawn = Vec3::new(0.0, 0.5, 0.0);
            let mut world = ArenaState::new(4);
            world.reset_with_local(PlayerState::new(
                PlayerId::from("me"),
                "me",
                "red",
                0,
                Authority::Local,
                spawn,
            ));
            let body = ArcadeBody::new(spawn, &config.puck, &config.arena);
            Self { sim: Simulator::new(Arc::clone(&config), 7), world, body, config }
        }

        fn add_remote(&mut self, id: &str, position: Vec3) {
            self.world
                .upsert_remote(PlayerState::new(PlayerId::from(id), id, "blue", 1, Authority::Remote, position))
                .unwrap();
        }

        fn tick(&mut self, input: TickInput, contacts: &[CollisionEvent], now_ms: u64) -> TickResult {
            let view = self.world.local_view().unwrap();
            let result = self.sim.tick(view, &mut self.body, input, contacts, now_ms);
            self.body.step(DT);
            result
        }

        fn me(&self) -> &PlayerState {
            self.world.local().unwrap()
        }

        fn count(result: &TickResult, pred: impl Fn(&GameEventData) -> bool) -> usize {
            result.events.iter().filter(|e| pred(&e.data)).count()
        }
    }

    fn fire() -> TickInput {
        TickInput { intent: MoveIntent::IDLE, fire: true }
    }

    #[test]
    fn test_movement_pushes_body() {
        let mut h = Harness::new();
        let input = TickInput { intent: MoveIntent::from_axes(1.0, 0.0), fire: false };
        for i in 0..10 {
            h.tick(input, &[], i * 16);
        }
        assert!(h.body.transform().velocity.x > 0.0);
    }

    #[test]
    fn test_jump_cooldown() {
        let mut h = Harness::new();
        let r = h.tick(fire(), &[], 0);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Jumped)), 1);

        let r = h.tick(fire(), &[], 200);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Jumped)), 0);

        let r = h.tick(fire(), &[], 500);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Jumped)), 1);
    }

    #[test]
    fn test_held_usable_fires_instead_of_jumping() {
        let mut h = Harness::new();
        h.add_remote("them", Vec3::new(4.0, 0.5, 0.0));
        h.sim.queue(ExternalEffect::PowerupGranted {
            powerup_id: Some(PowerupId::new("p1")),
            kind: PowerupKind::Rocket,
        });
        h.tick(TickInput::default(), &[], 0);
        assert!(h.me().active_powerup.is_some());

        let r = h.tick(fire(), &[], 16);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Jumped)), 0);
        let used = r.events.iter().find_map(|e| match &e.data {
            GameEventData::PowerupUseRequested { target_id, kind, .. } => Some((target_id.clone(), *kind)),
            _ => None,
        });
        assert_eq!(used, Some((Some(PlayerId::from("them")), PowerupKind::Rocket)));
        assert!(h.me().active_powerup.is_none());
        assert!(h.sim.pending_use().is_some());

        // Relay refuses: the rocket comes back
        h.sim.queue(ExternalEffect::UseRejected(PowerupId::new("p1")));
        h.tick(TickInput::default(), &[], 32);
        assert_eq!(h.me().active_powerup.as_ref().map(|p| p.kind), Some(PowerupKind::Rocket));
    }

    #[test]
    fn test_collision_adds_damage_and_knockback() {
        let mut h = Harness::new();
        let contact = CollisionEvent {
            contact_normal: Vec3::new(1.0, 0.0, 0.0),
            impact_speed: 6.0,
            other: BodyKind::Puck,
        };
        let r = h.tick(TickInput::default(), &[contact], 0);

        assert_eq!(h.me().damage, 6.0);
        assert!(h.me().flashing);
        assert!(h.body.transform().velocity.x > 10.0);
        assert_eq!(
            Harness::count(&r, |d| matches!(d, GameEventData::DamageChanged { .. })),
            1
        );

        // Flash clears after 80 ms
        h.tick(TickInput::default(), &[], 100);
        assert!(!h.me().flashing);
    }

    #[test]
    fn test_knockout_reported_once() {
        let mut h = Harness::new();
        h.body.set_position(Vec3::new(20.0, -6.0, 0.0));

        let r = h.tick(TickInput::default(), &[], 0);
        assert!(r.knocked_out);
        assert!(matches!(h.me().lifecycle, Lifecycle::Respawning { .. }));

        for t in 1..50 {
            let r = h.tick(TickInput::default(), &[], t * 16);
            assert!(!r.knocked_out);
            assert_eq!(
                Harness::count(&r, |d| matches!(d, GameEventData::KnockedOut { .. })),
                0
            );
        }

        let r = h.tick(TickInput::default(), &[], 1_500);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Respawned { .. })), 1);
        assert!(!h.me().is_respawning());
        assert_eq!(h.me().position, h.config.spawn_point(0));
    }

    #[test]
    fn test_new_match_cancels_pending_respawn() {
        let mut h = Harness::new();
        h.body.set_position(Vec3::new(20.0, -6.0, 0.0));
        let r = h.tick(TickInput::default(), &[], 0);
        assert!(r.knocked_out);
        assert!(h.sim.lifecycle.pending_timers() > 0);

        let player = h.world.local_mut().unwrap();
        h.sim.reset_for_match(player, &mut h.body);
        assert_eq!(h.sim.lifecycle.pending_timers(), 0);
        let spawn = h.config.spawn_point(0);
        assert_eq!(h.me().position, spawn);

        let r = h.tick(TickInput::default(), &[], 2_000);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Respawned { .. })), 0);
        assert!(!h.me().is_respawning());

        // Timers still work after the reset
        h.body.set_position(Vec3::new(20.0, -6.0, 0.0));
        let r = h.tick(TickInput::default(), &[], 2_016);
        assert!(r.knocked_out);
        let r = h.tick(TickInput::default(), &[], 3_600);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::Respawned { .. })), 1);
    }

    #[test]
    fn test_stomp_once_per_descent() {
        let mut h = Harness::new();
        h.add_remote("them", Vec3::new(0.0, 0.5, 0.0));
        h.body.set_position(Vec3::new(0.2, 2.0, 0.0));
        h.body.set_velocity(Vec3::new(2.0, -8.0, 0.0));

        let r = h.tick(TickInput::default(), &[], 0);
        let stomps = Harness::count(&r, |d| matches!(d, GameEventData::StompLanded { .. }));
        assert_eq!(stomps, 1);
        assert_eq!(h.me().stomp_target, Some(PlayerId::from("them")));
        // Bounced upwards
        assert!(h.me().velocity.y > 0.0);

        // Falling onto the target again without having risen: blocked
        h.body.set_position(Vec3::new(0.2, 2.0, 0.0));
        h.body.set_velocity(Vec3::new(0.0, -8.0, 0.0));
        let r = h.tick(TickInput::default(), &[], 16);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::StompLanded { .. })), 0);
    }

    #[test]
    fn test_pickup_claimed_once() {
        let mut h = Harness::new();
        h.world.powerups.spawn(PowerupId::new("p1"), PowerupKind::Shield, Vec3::new(0.5, 0.5, 0.0), 0);

        let r = h.tick(TickInput::default(), &[], 0);
        assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::PowerupClaimed { .. })), 1);
        for t in 1..10 {
            let r = h.tick(TickInput::default(), &[], t * 16);
            assert_eq!(Harness::count(&r, |d| matches!(d, GameEventData::PowerupClaimed { .. })), 0);
        }
    }

    #[test]
    fn test_buff_expires_at_absolute_time() {
        let mut h = Harness::new();
        h.sim.queue(ExternalEffect::PowerupGranted { powerup_id: None, kind: PowerupKind::Giant });
        h.tick(TickInput::default(), &[], 1_000);
        assert_eq!(h.body.mass(), 2.5);

        // One long stalled frame jumps past the expiry
        let r = h.tick(TickInput::default(), &[], 20_000);
        assert_eq!(
            Harness::count(&r, |d| matches!(d, GameEventData::PowerupExpired { kind: PowerupKind::Giant })),
            1
        );
        assert!(h.me().active_powerup.is_none());
        assert_eq!(h.body.mass(), 1.0);
    }

    #[test]
    fn test_curse_reverses_controls() {
        let mut h = Harness::new();
        h.sim.queue(ExternalEffect::Afflicted(Affliction::Cursed));
        let input = TickInput { intent: MoveIntent::from_axes(1.0, 0.0), fire: false };
        for i in 0..10 {
            h.tick(input, &[], i * 16);
        }
        assert!(h.body.transform().velocity.x < 0.0);
    }

    #[test]
    fn test_report_is_last_event() {
        let mut h = Harness::new();
        let r = h.tick(fire(), &[], 0);
        assert!(matches!(
            r.events.last().map(|e| &e.data),
            Some(GameEventData::PositionReport { .. })
        ));
    }

    #[test]
    fn test_remote_player_never_simulated() {
        let mut h = Harness::new();
        let mut remote = PlayerState::new(PlayerId::from("x"), "x", "c", 0, Authority::Remote, Vec3::ZERO);
        let mut powerups = crate::game::powerup::PowerupField::new(4);
        let mut projectiles = crate::game::projectile::ProjectileField::new();
        let view = LocalView {
            player: &mut remote,
            others: Default::default(),
            powerups: &mut powerups,
            projectiles: &mut projectiles,
        };
        let r = h.sim.tick(view, &mut h.body, fire(), &[], 0);
        assert!(r.events.is_empty());
        assert_eq!(remote.position, Vec3::ZERO);
    }
}
