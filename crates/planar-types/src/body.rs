//! Rigid body state types.
//!
//! This module provides types for representing rigid body state in 3 degrees
//! of freedom: position, rotation, linear velocity, and angular velocity.

use nalgebra::{Point2, UnitComplex, Vector2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a rigid body in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub u64);

impl BodyId {
    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for BodyId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({})", self.0)
    }
}

/// Unique identifier for a joint in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointId(pub u64);

impl JointId {
    /// Create a new joint ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Joint({})", self.0)
    }
}

/// How a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyType {
    /// Integrated and affected by forces and constraints.
    #[default]
    Dynamic,
    /// Moves with user-driven velocity; ignores forces, infinite mass in the solver.
    Kinematic,
    /// Never moves; infinite mass in the solver.
    Static,
}

impl BodyType {
    /// Whether the solver treats this body as having finite mass.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

/// Position and rotation of a rigid body in the plane.
///
/// # Example
///
/// ```
/// use planar_types::Pose;
/// use nalgebra::Point2;
///
/// let pose = Pose::from_position(Point2::new(1.0, 2.0));
/// let world = pose.transform_point(&Point2::new(1.0, 0.0));
/// assert_eq!(world, Point2::new(2.0, 2.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Centroid position in world coordinates.
    pub position: Point2<f64>,
    /// Rotation in radians, counter-clockwise.
    pub rotation: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point2::origin(),
            rotation: 0.0,
        }
    }

    /// Create a pose from position only (no rotation).
    #[must_use]
    pub fn from_position(position: Point2<f64>) -> Self {
        Self {
            position,
            rotation: 0.0,
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn new(position: Point2<f64>, rotation: f64) -> Self {
        Self { position, rotation }
    }

    /// The rotation as a unit complex number.
    #[must_use]
    pub fn rotor(&self) -> UnitComplex<f64> {
        UnitComplex::new(self.rotation)
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point2<f64>) -> Point2<f64> {
        self.position + self.rotor() * local.coords
    }

    /// Transform a vector from local to world coordinates (rotation only).
    #[must_use]
    pub fn transform_vector(&self, local: &Vector2<f64>) -> Vector2<f64> {
        self.rotor() * local
    }

    /// Transform a point from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point2<f64>) -> Point2<f64> {
        Point2::from(self.rotor().inverse() * (world - self.position))
    }

    /// Transform a vector from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_vector(&self, world: &Vector2<f64>) -> Vector2<f64> {
        self.rotor().inverse() * world
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite()) && self.rotation.is_finite()
    }
}

/// Linear and angular velocity of a rigid body.
///
/// # Example
///
/// ```
/// use planar_types::Velocity;
/// use nalgebra::Vector2;
///
/// let vel = Velocity::linear(Vector2::new(1.0, 0.0));
/// assert_eq!(vel.linear.x, 1.0);
/// assert_eq!(vel.angular, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Velocity {
    /// Linear velocity in world coordinates (m/s).
    pub linear: Vector2<f64>,
    /// Angular velocity (rad/s), counter-clockwise positive.
    pub angular: f64,
}

impl Velocity {
    /// Create a velocity with specified linear and angular parts.
    #[must_use]
    pub const fn new(linear: Vector2<f64>, angular: f64) -> Self {
        Self { linear, angular }
    }

    /// Create a zero velocity (at rest).
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Create a velocity with the linear part only.
    #[must_use]
    pub fn linear(v: Vector2<f64>) -> Self {
        Self {
            linear: v,
            angular: 0.0,
        }
    }

    /// Create a velocity with the angular part only.
    #[must_use]
    pub fn angular(omega: f64) -> Self {
        Self {
            linear: Vector2::zeros(),
            angular: omega,
        }
    }

    /// Compute the velocity at a point offset from the centroid.
    ///
    /// `v_point = v + ω × r`, where in the plane `ω × r = ω · perp(r)`.
    #[must_use]
    pub fn velocity_at(&self, offset: &Vector2<f64>) -> Vector2<f64> {
        self.linear + self.angular * Vector2::new(-offset.y, offset.x)
    }

    /// Compute kinetic energy given mass properties.
    #[must_use]
    pub fn kinetic_energy(&self, props: &MassProperties) -> f64 {
        0.5 * props.mass * self.linear.norm_squared()
            + 0.5 * props.inertia * self.angular * self.angular
    }

    /// Compute linear momentum given mass.
    #[must_use]
    pub fn linear_momentum(&self, mass: f64) -> Vector2<f64> {
        self.linear * mass
    }

    /// Check if the velocity contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|x| x.is_finite()) && self.angular.is_finite()
    }
}

/// Mass properties of a planar rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg.
    pub mass: f64,
    /// Moment of inertia about the centroid (kg·m²).
    pub inertia: f64,
}

impl MassProperties {
    /// Create mass properties with given values.
    #[must_use]
    pub const fn new(mass: f64, inertia: f64) -> Self {
        Self { mass, inertia }
    }

    /// Get the inverse mass (0 if the mass is zero or infinite).
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        if self.mass <= 0.0 || self.mass.is_infinite() {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    /// Get the inverse inertia (0 if the inertia is zero or infinite).
    #[must_use]
    pub fn inverse_inertia(&self) -> f64 {
        if self.inertia <= 0.0 || self.inertia.is_infinite() {
            0.0
        } else {
            1.0 / self.inertia
        }
    }

    /// Validate that the mass properties are physically valid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mass < 0.0 {
            return Err(crate::SimError::invalid_specs("mass cannot be negative"));
        }
        if self.mass.is_nan() {
            return Err(crate::SimError::invalid_specs("mass must not be NaN"));
        }
        if self.inertia < 0.0 || self.inertia.is_nan() {
            return Err(crate::SimError::invalid_specs(
                "inertia must be non-negative and finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_body_id() {
        let id = BodyId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.to_string(), "Body(42)");

        let id2: BodyId = 42.into();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_pose_rotation() {
        let pose = Pose::new(Point2::origin(), std::f64::consts::FRAC_PI_2);
        let world = pose.transform_vector(&Vector2::new(1.0, 0.0));

        assert_relative_eq!(world.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(world.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_pose_inverse_transform() {
        let pose = Pose::new(Point2::new(3.0, -1.0), 0.7);
        let p = Point2::new(0.4, 2.0);
        let there_and_back = pose.inverse_transform_point(&pose.transform_point(&p));
        assert_relative_eq!(there_and_back.coords, p.coords, epsilon = 1e-12);
    }

    #[test]
    fn test_velocity_at_point() {
        // Spinning counter-clockwise at 1 rad/s
        let vel = Velocity::angular(1.0);
        let v = vel.velocity_at(&Vector2::new(1.0, 0.0));
        // ω × r for r = (1,0) points in +Y
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_kinetic_energy() {
        let vel = Velocity::linear(Vector2::new(1.0, 0.0));
        let props = MassProperties::new(2.0, 1.0);
        // KE = 0.5 * 2 * 1² = 1
        assert_relative_eq!(vel.kinetic_energy(&props), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_inverse_mass_of_static() {
        let props = MassProperties::new(f64::INFINITY, f64::INFINITY);
        assert_eq!(props.inverse_mass(), 0.0);
        assert_eq!(props.inverse_inertia(), 0.0);
    }

    #[test]
    fn test_mass_validation() {
        assert!(MassProperties::new(1.0, 0.5).validate().is_ok());
        assert!(MassProperties::new(-1.0, 0.5).validate().is_err());
        assert!(MassProperties::new(f64::NAN, 0.5).validate().is_err());
    }
}
