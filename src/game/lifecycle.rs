//! Player Lifecycle
//!
//! Active/Airborne flag, knockout and delayed respawn, plus the two
//! short-lived cosmetic flags (stomp indicator and hit flash). Every delay is
//! a [`SessionTimers`] deadline owned by this machine and cancelled on
//! teardown.

use tracing::{debug, info};

use crate::config::GameConfig;
use crate::core::{SessionTimers, TimerId, Vec3};
use crate::game::body::PhysicsBody;
use crate::game::state::{Lifecycle, PlayerId, PlayerState};

/// Delayed lifecycle actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleTimer {
    /// Put the player back on their spawn point.
    Respawn,
    /// Turn off the stomp indicator.
    ClearStomp,
    /// Turn off the hit flash.
    ClearFlash,
}

/// Transitions that happened during [`LifecycleMachine::poll`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LifecycleOutcome {
    /// Respawned at a position.
    Respawned(Vec3),
    /// Stomp indicator cleared.
    StompCleared,
    /// Hit flash cleared.
    FlashCleared,
}

/// Lifecycle state machine for the local player.
#[derive(Debug, Default)]
pub struct LifecycleMachine {
    timers: SessionTimers<LifecycleTimer>,
    stomp_timer: Option<TimerId>,
    flash_timer: Option<TimerId>,
    stomped_this_descent: bool,
}

impl LifecycleMachine {
    /// Create with no pending timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the airborne flag from height and re-arm stomping once the
    /// player stops descending.
    pub fn update_airborne(&mut self, player: &mut PlayerState, airborne_height: f64) {
        match player.lifecycle {
            Lifecycle::Active | Lifecycle::Airborne => {
                player.lifecycle = if player.position.y > airborne_height {
                    Lifecycle::Airborne
                } else {
                    Lifecycle::Active
                };
            }
            Lifecycle::Respawning { .. } | Lifecycle::Eliminated => {}
        }
        if !player.is_airborne() || player.velocity.y >= 0.0 {
            self.stomped_this_descent = false;
        }
    }

    /// True if no stomp has landed during the current descent.
    pub fn can_stomp(&self) -> bool {
        !self.stomped_this_descent
    }

    /// Record a stomp: light the indicator and block further stomps until
    /// the descent ends.
    pub fn register_stomp(&mut self, player: &mut PlayerState, target: PlayerId, now_ms: u64, indicator_ms: u64) {
        self.stomped_this_descent = true;
        player.stomp_target = Some(target);
        if let Some(id) = self.stomp_timer.take() {
            self.timers.cancel(id);
        }
        self.stomp_timer = self.timers.schedule(now_ms + indicator_ms, LifecycleTimer::ClearStomp);
    }

    /// Light the hit flash for `flash_ms`.
    pub fn flash(&mut self, player: &mut PlayerState, now_ms: u64, flash_ms: u64) {
        player.flashing = true;
        if let Some(id) = self.flash_timer.take() {
            self.timers.cancel(id);
        }
        self.flash_timer = self.timers.schedule(now_ms + flash_ms, LifecycleTimer::ClearFlash);
    }

    /// Knock the player out. Returns false if already respawning or the
    /// session has ended.
    pub fn knock_out(&mut self, player: &mut PlayerState, now_ms: u64, respawn_delay_ms: u64) -> bool {
        if player.is_respawning() || self.timers.is_closed() {
            return false;
        }
        let respawn_at = now_ms + respawn_delay_ms;
        if self.timers.schedule(respawn_at, LifecycleTimer::Respawn).is_none() {
            return false;
        }

        info!("Player {} knocked out, respawn at {}", player.id, respawn_at);
        player.lifecycle = Lifecycle::Respawning { respawn_at };
        player.trail.clear();
        player.stomp_target = None;
        self.stomped_this_descent = false;
        true
    }

    /// Fire due timers and apply their transitions.
    pub fn poll(
        &mut self,
        player: &mut PlayerState,
        body: &mut dyn PhysicsBody,
        now_ms: u64,
        config: &GameConfig,
    ) -> Vec<LifecycleOutcome> {
        let mut outcomes = Vec::new();
        for action in self.timers.poll(now_ms) {
            match action {
                LifecycleTimer::Respawn => {
                    let spawn = config.spawn_point(player.player_index);
                    body.set_position(spawn);
                    body.set_velocity(Vec3::ZERO);
                    body.set_angular_velocity(Vec3::ZERO);

                    player.position = spawn;
                    player.velocity = Vec3::ZERO;
                    player.lifecycle = Lifecycle::Active;
                    player.trail.clear();
                    if config.lifecycle.reset_damage_on_respawn {
                        player.damage = 0.0;
                    }
                    debug!("Player {} respawned at {}", player.id, spawn);
                    outcomes.push(LifecycleOutcome::Respawned(spawn));
                }
                LifecycleTimer::ClearStomp => {
                    self.stomp_timer = None;
                    player.stomp_target = None;
                    outcomes.push(LifecycleOutcome::StompCleared);
                }
                LifecycleTimer::ClearFlash => {
                    self.flash_timer = None;
                    player.flashing = false;
                    outcomes.push(LifecycleOutcome::FlashCleared);
                }
            }
        }
        outcomes
    }

    /// Pending timer count.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drop pending timers and descent state for a new match. Unlike
    /// [`LifecycleMachine::teardown`] the machine stays usable.
    pub fn reset(&mut self) -> usize {
        self.stomp_timer = None;
        self.flash_timer = None;
        self.stomped_this_descent = false;
        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            debug!("Lifecycle reset, {} timers cancelled", cancelled);
        }
        cancelled
    }

    /// Cancel every timer. Safe to call more than once.
    pub fn teardown(&mut self) -> usize {
        self.stomp_timer = None;
        self.flash_timer = None;
        self.timers.teardown()
    }
}

// =============================================================================
// TESTS
// =============================================================================
