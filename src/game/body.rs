//! Physics Body Interface
//!
//! The rigid-body integrator belongs to the host (renderer or headless
//! runner). The simulator reads the transform once per tick through
//! [`PhysicsBody::transform`] and pushes forces and impulses back.
//!
//! [`ArcadeBody`] is a small integrator for headless runs and tests: a puck
//! on a circular platform with gravity, damping and a speed cap.

use crate::config::{ArenaConfig, PuckConfig};
use crate::core::Vec3;
use crate::game::combat::{BodyKind, CollisionEvent};

/// Transform snapshot read at the start of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyTransform {
    /// Position.
    pub position: Vec3,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Orientation as Euler angles.
    pub rotation: Vec3,
    /// Angular velocity.
    pub angular_velocity: Vec3,
}

/// Host-owned rigid body driven by the simulator.
pub trait PhysicsBody {
    /// Current transform.
    fn transform(&self) -> BodyTransform;

    /// Continuous force for the next integration step.
    fn apply_force(&mut self, force: Vec3);

    /// Instantaneous change in momentum.
    fn apply_impulse(&mut self, impulse: Vec3);

    /// Instantaneous change in angular momentum.
    fn apply_torque_impulse(&mut self, torque: Vec3);

    /// Teleport.
    fn set_position(&mut self, position: Vec3);

    /// Overwrite linear velocity.
    fn set_velocity(&mut self, velocity: Vec3);

    /// Overwrite angular velocity.
    fn set_angular_velocity(&mut self, angular_velocity: Vec3);

    /// Change the body mass (size power-ups).
    fn set_mass(&mut self, mass: f64);

    /// Change surface friction.
    fn set_friction(&mut self, friction: f64);
}

// =============================================================================
// ARCADE BODY
// =============================================================================

/// Minimal integrator for headless play.
#[derive(Clone, Debug)]
pub struct ArcadeBody {
    position: Vec3,
    velocity: Vec3,
    rotation: Vec3,
    angular_velocity: Vec3,
    pending_force: Vec3,
    mass: f64,
    friction: f64,
    radius: f64,
    max_velocity: f64,
    linear_damping: f64,
    angular_damping: f64,
    gravity: f64,
    platform_radius: f64,
}

impl ArcadeBody {
    /// Create a body at `position` using the puck and arena tuning.
    pub fn new(position: Vec3, puck: &PuckConfig, arena: &ArenaConfig) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            rotation: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            pending_force: Vec3::ZERO,
            mass: puck.mass,
            friction: puck.friction,
            radius: puck.radius,
            max_velocity: puck.max_velocity,
            linear_damping: puck.linear_damping,
            angular_damping: puck.angular_damping,
            gravity: arena.gravity,
            platform_radius: arena.platform_radius,
        }
    }

    /// Current mass.
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Current friction.
    pub fn friction(&self) -> f64 {
        self.friction
    }

    /// Advance by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let accel = self.pending_force * (1.0 / self.mass) + Vec3::new(0.0, self.gravity, 0.0);
        self.pending_force = Vec3::ZERO;
        self.velocity += accel * dt;

        let on_platform = self.position.horizontal().length() <= self.platform_radius;
        let floor = self.radius;
        let grounded = on_platform && self.position.y <= floor + 1e-6;
        if grounded {
            let drag = (1.0 - (self.linear_damping + self.friction) * dt).max(0.0);
            self.velocity = Vec3::new(self.velocity.x * drag, self.velocity.y, self.velocity.z * drag);
        } else {
            let drag = (1.0 - self.linear_damping * dt).max(0.0);
            self.velocity = Vec3::new(self.velocity.x * drag, self.velocity.y, self.velocity.z * drag);
        }

        let horizontal = self.velocity.horizontal().clamp_length(self.max_velocity);
        self.velocity = Vec3::new(horizontal.x, self.velocity.y, horizontal.z);

        let previous_y = self.position.y;
        self.position += self.velocity * dt;

        // Land on the platform top only when coming from above it
        if on_platform && previous_y >= floor - 1e-6 && self.position.y < floor {
            self.position.y = floor;
            if self.velocity.y < 0.0 {
                self.velocity.y = 0.0;
            }
        }

        self.rotation += self.angular_velocity * dt;
        self.angular_velocity = self.angular_velocity * (1.0 - self.angular_damping * dt).max(0.0);
    }
}

impl PhysicsBody for ArcadeBody {
    fn transform(&self) -> BodyTransform {
        BodyTransform {
            position: self.position,
            velocity: self.velocity,
            rotation: self.rotation,
            angular_velocity: self.angular_velocity,
        }
    }

    fn apply_force(&mut self, force: Vec3) {
        self.pending_force += force;
    }

    fn apply_impulse(&mut self, impulse: Vec3) {
        self.velocity += impulse * (1.0 / self.mass);
    }

    fn apply_torque_impulse(&mut self, torque: Vec3) {
        self.angular_velocity += torque * (1.0 / self.mass);
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    fn set_angular_velocity(&mut self, angular_velocity: Vec3) {
        self.angular_velocity = angular_velocity;
    }

    fn set_mass(&mut self, mass: f64) {
        if mass > 0.0 {
            self.mass = mass;
        }
    }

    fn set_friction(&mut self, friction: f64) {
        self.friction = friction.max(0.0);
    }
}

/// Contacts between the local body and other pucks, for hosts without a
/// collision engine.
///
/// Impact speed is the closing speed along the contact normal; separating
/// pairs produce no contact.
pub fn detect_puck_contacts(
    local: BodyTransform,
    others: impl IntoIterator<Item = (Vec3, Vec3)>,
    radius: f64,
) -> Vec<CollisionEvent> {
    let mut contacts = Vec::new();
    for (position, velocity) in others {
        let offset = local.position - position;
        if offset.length() >= radius * 2.0 {
            continue;
        }
        let normal = offset.normalize();
        if normal == Vec3::ZERO {
            continue;
        }
        let closing = (velocity - local.velocity).dot(normal);
        if closing <= 0.0 {
            continue;
        }
        contacts.push(CollisionEvent {
            contact_normal: normal,
            impact_speed: closing,
            other: BodyKind::Puck,
        });
    }
    contacts
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn body_at(position: Vec3) -> ArcadeBody {
        ArcadeBody::new(position, &PuckConfig::default(), &ArenaConfig::default())
    }

    #[test]
    fn test_body_settles_on_platform() {
        let mut body = body_at(Vec3::new(0.0, 2.0, 0.0));
        for _ in 0..120 {
            body.step(1.0 / 60.0);
        }
        let t = body.transform();
        assert!((t.position.y - 0.5).abs() < 1e-9);
        assert_eq!(t.velocity.y, 0.0);
    }

    #[test]
    fn test_body_falls_off_edge() {
        let mut body = body_at(Vec3::new(20.0, 0.5, 0.0));
        for _ in 0..120 {
            body.step(1.0 / 60.0);
        }
        assert!(body.transform().position.y < -5.0);
    }

    #[test]
    fn test_impulse_scales_with_mass() {
        let mut light = body_at(Vec3::ZERO);
        let mut heavy = body_at(Vec3::ZERO);
        heavy.set_mass(2.0);

        light.apply_impulse(Vec3::new(4.0, 0.0, 0.0));
        heavy.apply_impulse(Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(light.transform().velocity.x, 4.0);
        assert_eq!(heavy.transform().velocity.x, 2.0);
    }

    #[test]
    fn test_speed_cap() {
        let mut body = body_at(Vec3::new(0.0, 0.5, 0.0));
        body.apply_impulse(Vec3::new(100.0, 0.0, 0.0));
        body.step(1.0 / 60.0);
        assert!(body.transform().velocity.horizontal().length() <= 18.0 + 1e-9);
    }

    #[test]
    fn test_contacts_only_when_closing() {
        let local = BodyTransform {
            position: Vec3::new(0.0, 0.5, 0.0),
            ..BodyTransform::default()
        };
        let approaching = [(Vec3::new(0.8, 0.5, 0.0), Vec3::new(-6.0, 0.0, 0.0))];
        let contacts = detect_puck_contacts(local, approaching, 0.5);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].contact_normal, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(contacts[0].impact_speed, 6.0);

        let leaving = [(Vec3::new(0.8, 0.5, 0.0), Vec3::new(6.0, 0.0, 0.0))];
        assert!(detect_puck_contacts(local, leaving, 0.5).is_empty());
    }
}
