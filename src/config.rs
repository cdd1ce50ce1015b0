//! Game Configuration
//!
//! Every tuning constant of the arena lives here. Sections deserialize with
//! `#[serde(default)]`, so a JSON file only needs the values it overrides.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Vec3;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "PUCK_ARENA_CONFIG";

/// Environment variable overriding the relay bind address.
pub const RELAY_ADDR_ENV: &str = "PUCK_RELAY_ADDR";

// =============================================================================
// ROOT
// =============================================================================

/// Complete configuration tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Puck body and movement tuning.
    pub puck: PuckConfig,
    /// Arena geometry.
    pub arena: ArenaConfig,
    /// Collision response tuning.
    pub collision: CollisionConfig,
    /// Air-stomp tuning.
    pub stomp: StompConfig,
    /// Knockout/respawn lifecycle.
    pub lifecycle: LifecycleConfig,
    /// Power-up spawning and pickup.
    pub powerups: PowerupConfig,
    /// Replay buffer and playback.
    pub replay: ReplayConfig,
    /// Transport and relay settings.
    pub network: NetworkConfig,
}

impl GameConfig {
    /// Parse a config from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Load from `PUCK_ARENA_CONFIG` when set, defaults otherwise, then apply
    /// the `PUCK_RELAY_ADDR` override.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_json_file(path)?,
            _ => Self::default(),
        };
        if let Ok(addr) = env::var(RELAY_ADDR_ENV) {
            config.network.bind_addr = addr;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.puck.mass <= 0.0 {
            return Err(ConfigError::Invalid("puck.mass must be positive"));
        }
        if self.puck.radius <= 0.0 {
            return Err(ConfigError::Invalid("puck.radius must be positive"));
        }
        if self.arena.spawn_points.is_empty() {
            return Err(ConfigError::Invalid("arena.spawn_points must not be empty"));
        }
        if self.powerups.min_spawn_interval_ms > self.powerups.max_spawn_interval_ms {
            return Err(ConfigError::Invalid("powerups spawn interval range is inverted"));
        }
        if self.replay.sample_rate == 0 || self.replay.buffer_seconds == 0 {
            return Err(ConfigError::Invalid("replay buffer must hold at least one frame"));
        }
        if self.replay.playback_speed <= 0.0 {
            return Err(ConfigError::Invalid("replay.playback_speed must be positive"));
        }
        if self.network.max_players == 0 {
            return Err(ConfigError::Invalid("network.max_players must be positive"));
        }
        Ok(())
    }

    /// Spawn point for a player index, wrapping around the configured list.
    pub fn spawn_point(&self, player_index: usize) -> Vec3 {
        let points = &self.arena.spawn_points;
        if points.is_empty() {
            return Vec3::new(0.0, 2.0, 0.0);
        }
        points[player_index % points.len()]
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Config file is not valid JSON for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Puck body and movement tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PuckConfig {
    /// Body mass.
    pub mass: f64,
    /// Body radius.
    pub radius: f64,
    /// Speed cap applied by the integrator.
    pub max_velocity: f64,
    /// Base movement force.
    pub acceleration: f64,
    /// Linear damping.
    pub linear_damping: f64,
    /// Angular damping.
    pub angular_damping: f64,
    /// Bounciness.
    pub restitution: f64,
    /// Surface friction.
    pub friction: f64,
    /// Force multiplier while airborne.
    pub air_control: f64,
    /// Height above which the puck counts as airborne.
    pub airborne_height: f64,
    /// Upward jump impulse.
    pub jump_impulse: f64,
    /// Minimum time between jumps.
    pub jump_cooldown_ms: u64,
    /// Recent positions kept for trails.
    pub trail_length: usize,
}

impl Default for PuckConfig {
    fn default() -> Self {
        Self {
            mass: 1.0,
            radius: 0.5,
            max_velocity: 18.0,
            acceleration: 22.0,
            linear_damping: 0.3,
            angular_damping: 0.5,
            restitution: 0.7,
            friction: 0.1,
            air_control: 0.7,
            airborne_height: 1.0,
            jump_impulse: 12.0,
            jump_cooldown_ms: 500,
            trail_length: 20,
        }
    }
}

/// Arena geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Gravity along Y.
    pub gravity: f64,
    /// Radius of the circular platform (headless integrator only).
    pub platform_radius: f64,
    /// Height below which a puck is knocked out.
    pub fall_threshold: f64,
    /// Spawn positions indexed by player index.
    pub spawn_points: Vec<Vec3>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            gravity: -30.0,
            platform_radius: 12.0,
            fall_threshold: -5.0,
            spawn_points: vec![
                Vec3::new(-8.0, 2.0, -6.0),
                Vec3::new(8.0, 2.0, 6.0),
                Vec3::new(-8.0, 2.0, 6.0),
                Vec3::new(8.0, 2.0, -6.0),
            ],
        }
    }
}

/// Collision response tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Knockback force at zero damage.
    pub base_force: f64,
    /// Knockback growth per 100 damage.
    pub damage_multiplier: f64,
    /// Contacts slower than this are ignored.
    pub min_impact_speed: f64,
    /// Contacts faster than this flash the puck.
    pub flash_impact_speed: f64,
    /// Contacts faster than this may add cosmetic spin.
    pub heavy_impact_speed: f64,
    /// Chance of cosmetic spin on a heavy impact.
    pub torque_chance: f64,
    /// Cosmetic spin scale.
    pub torque_scale: f64,
    /// Damage that maps to an upward bias of 1.0.
    pub upward_bias_divisor: f64,
    /// Upward bias cap.
    pub max_upward_bias: f64,
    /// Damage gained per unit of scaled impact speed.
    pub damage_per_impact: f64,
    /// Horizontal impulse of a boost pad.
    pub boost_pad_force: f64,
    /// Vertical impulse of a boost pad.
    pub boost_pad_lift: f64,
    /// Vertical impulse of a spring.
    pub spring_impulse: f64,
    /// Duration of the hit flash.
    pub flash_ms: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            base_force: 15.0,
            damage_multiplier: 0.8,
            min_impact_speed: 2.0,
            flash_impact_speed: 5.0,
            heavy_impact_speed: 8.0,
            torque_chance: 0.4,
            torque_scale: 3.0,
            upward_bias_divisor: 150.0,
            max_upward_bias: 0.6,
            damage_per_impact: 1.0,
            boost_pad_force: 20.0,
            boost_pad_lift: 5.0,
            spring_impulse: 35.0,
            flash_ms: 80,
        }
    }
}

/// Air-stomp tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StompConfig {
    /// Downward speed needed to stomp.
    pub min_descent_speed: f64,
    /// Lowest height above the target that counts.
    pub min_height: f64,
    /// Highest height above the target that counts.
    pub max_height: f64,
    /// Horizontal distance that counts.
    pub lateral_radius: f64,
    /// Flat stomp damage.
    pub base_damage: f64,
    /// Extra damage per unit of downward speed.
    pub speed_damage: f64,
    /// Stomp damage cap.
    pub max_damage: f64,
    /// Horizontal velocity kept on bounce.
    pub horizontal_bounce: f64,
    /// Fraction of downward speed reflected upwards.
    pub vertical_bounce: f64,
    /// How long the stomp indicator stays lit.
    pub indicator_ms: u64,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            min_descent_speed: 4.0,
            min_height: 0.3,
            max_height: 2.5,
            lateral_radius: 1.2,
            base_damage: 10.0,
            speed_damage: 1.5,
            max_damage: 40.0,
            horizontal_bounce: 0.3,
            vertical_bounce: 0.7,
            indicator_ms: 200,
        }
    }
}

/// Knockout/respawn lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Delay between knockout and respawn.
    pub respawn_delay_ms: u64,
    /// Zero the damage accumulator on respawn.
    pub reset_damage_on_respawn: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            respawn_delay_ms: 1500,
            reset_damage_on_respawn: false,
        }
    }
}

/// Power-up spawning and pickup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerupConfig {
    /// Shortest gap between relay spawns.
    pub min_spawn_interval_ms: u64,
    /// Longest gap between relay spawns.
    pub max_spawn_interval_ms: u64,
    /// Live instances allowed at once.
    pub max_on_field: usize,
    /// Pickup distance.
    pub pickup_radius: f64,
    /// Spawn height.
    pub spawn_height: f64,
    /// Spawn area size along X and Z, centred on the origin.
    pub spawn_extent: [f64; 2],
}

impl Default for PowerupConfig {
    fn default() -> Self {
        Self {
            min_spawn_interval_ms: 6000,
            max_spawn_interval_ms: 10000,
            max_on_field: 4,
            pickup_radius: 1.2,
            spawn_height: 1.5,
            spawn_extent: [16.0, 10.0],
        }
    }
}

/// Replay buffer and playback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Seconds of history kept.
    pub buffer_seconds: u32,
    /// Frames recorded per second.
    pub sample_rate: u32,
    /// History before a knockout included in a clip.
    pub lead_ms: u64,
    /// History after a knockout included in a clip.
    pub trail_ms: u64,
    /// Default playback rate multiplier.
    pub playback_speed: f64,
}

impl ReplayConfig {
    /// Ring buffer capacity in frames.
    pub fn capacity(&self) -> usize {
        (self.buffer_seconds as usize) * (self.sample_rate as usize)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 10,
            sample_rate: 60,
            lead_ms: 5000,
            trail_ms: 2000,
            playback_speed: 0.5,
        }
    }
}

/// Transport and relay settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Relay URL clients connect to.
    pub url: String,
    /// Automatic reconnect attempts before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Bounded channel size between the frame loop and the transport.
    pub channel_capacity: usize,
    /// Relay bind address.
    pub bind_addr: String,
    /// Players per room.
    pub max_players: usize,
    /// Knockouts needed to win.
    pub win_score: u32,
    /// How long a dropped player's slot is held for `rejoinRoom`.
    pub rejoin_grace_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3002".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            channel_capacity: 256,
            bind_addr: "0.0.0.0:3002".to_string(),
            max_players: 4,
            win_score: 5,
            rejoin_grace_ms: 30_000,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
