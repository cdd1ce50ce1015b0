//! Input Capture and Normalization
//!
//! Turns raw key or stick state into the abstract intents the simulator
//! consumes: a planar movement intent and a single-fire use/jump trigger.

use serde::{Serialize, Deserialize};

use crate::core::Vec3;

/// Stick dead zone applied to gamepad axes.
pub const STICK_DEADZONE: f64 = 0.15;

// =============================================================================
// MOVE INTENT
// =============================================================================

/// Planar movement intent, each axis in [-1, 1].
///
/// Diagonals are normalized so that moving diagonally is never faster than
/// moving along one axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveIntent {
    /// Force along X (right is positive).
    pub force_x: f64,
    /// Force along Z (towards the camera is positive).
    pub force_z: f64,
}

impl MoveIntent {
    /// No movement.
    pub const IDLE: Self = Self { force_x: 0.0, force_z: 0.0 };

    /// Build from two axes, clamping and normalizing diagonals.
    pub fn from_axes(x: f64, z: f64) -> Self {
        let x = if x.is_finite() { x.clamp(-1.0, 1.0) } else { 0.0 };
        let z = if z.is_finite() { z.clamp(-1.0, 1.0) } else { 0.0 };
        let len = (x * x + z * z).sqrt();
        if len > 1.0 {
            Self { force_x: x / len, force_z: z / len }
        } else {
            Self { force_x: x, force_z: z }
        }
    }

    /// Build from an analogue stick, dropping input inside the dead zone.
    pub fn from_stick(x: f64, y: f64, deadzone: f64) -> Self {
        let x = if x.abs() < deadzone { 0.0 } else { x };
        let y = if y.abs() < deadzone { 0.0 } else { y };
        Self::from_axes(x, y)
    }

    /// Intent pointing the other way (cursed controls).
    pub fn reversed(self) -> Self {
        Self { force_x: -self.force_x, force_z: -self.force_z }
    }

    /// True when there is no movement.
    pub fn is_idle(&self) -> bool {
        self.force_x == 0.0 && self.force_z == 0.0
    }

    /// Intent as a planar vector.
    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.force_x, 0.0, self.force_z)
    }
}

// =============================================================================
// TRIGGER LATCH
// =============================================================================

/// Edge detector for the use/jump trigger.
///
/// A press arms the latch once; holding does not re-arm it; the tick that
/// consumes the press disarms it. Releasing and pressing again arms it once
/// more.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerLatch {
    held: bool,
    pressed: bool,
}

impl TriggerLatch {
    /// Create a released latch.
    pub const fn new() -> Self {
        Self { held: false, pressed: false }
    }

    /// Key went down. Auto-repeat while held is ignored.
    pub fn press(&mut self) {
        if !self.held {
            self.held = true;
            self.pressed = true;
        }
    }

    /// Key went up.
    pub fn release(&mut self) {
        self.held = false;
    }

    /// Feed a polled level (gamepad button state).
    pub fn set_level(&mut self, down: bool) {
        if down {
            self.press();
        } else {
            self.release();
        }
    }

    /// Take the pending press, if any.
    pub fn consume(&mut self) -> bool {
        std::mem::take(&mut self.pressed)
    }

    /// True while the key is physically held.
    pub fn is_held(&self) -> bool {
        self.held
    }
}

// =============================================================================
// INPUT STATE
// =============================================================================

/// Directional keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// Forward (-Z)
    Up,
    /// Backward (+Z)
    Down,
    /// Left (-X)
    Left,
    /// Right (+X)
    Right,
    /// Use item or jump
    Use,
}

/// Abstract per-tick input handed to the simulator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickInput {
    /// Movement intent.
    pub intent: MoveIntent,
    /// Use/jump fired this tick.
    pub fire: bool,
}

/// Accumulated key state between simulator ticks.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputState {
    up: bool,
    down: bool,
    left: bool,
    right: bool,
    trigger: TriggerLatch,
}

impl InputState {
    /// Create with nothing held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key transition.
    pub fn key(&mut self, key: Key, down: bool) {
        match key {
            Key::Up => self.up = down,
            Key::Down => self.down = down,
            Key::Left => self.left = down,
            Key::Right => self.right = down,
            Key::Use => self.trigger.set_level(down),
        }
    }

    /// Produce this tick's input, consuming any pending trigger press.
    pub fn sample(&mut self) -> TickInput {
        let x = axis(self.left, self.right);
        let z = axis(self.up, self.down);
        TickInput {
            intent: MoveIntent::from_axes(x, z),
            fire: self.trigger.consume(),
        }
    }
}

fn axis(negative: bool, positive: bool) -> f64 {
    match (negative, positive) {
        (true, false) => -1.0,
        (false, true) => 1.0,
        _ => 0.0,
    }
}

// =============================================================================
// TESTS
// =============================================================================
