//! Persisted state layout.
//!
//! The canonical serialized form of a world: sections for the integrator,
//! bodies, springs, constraints (tagged by joint kind) and behaviours (by
//! name; hosts re-register the trait objects on load). Body references use
//! dense `0..N-1` indices into the bodies section.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyType, IntegrationMethod, ShapeSpec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::joints::SoftParams;

/// Integrator section.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntegratorSnapshot {
    /// Runge-Kutta tableau in use.
    pub method: IntegrationMethod,
    /// Fixed timestep.
    pub timestep: f64,
    /// Elapsed simulated time.
    pub elapsed: f64,
}

/// One entry of the bodies section.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodySnapshot {
    /// Centroid position.
    pub position: Point2<f64>,
    /// Linear velocity.
    pub velocity: Vector2<f64>,
    /// Rotation (radians).
    pub rotation: f64,
    /// Angular velocity (rad/s).
    pub angular_velocity: f64,
    /// Mass in kg.
    pub mass: f64,
    /// Electric charge.
    pub charge: f64,
    /// Body type.
    pub body_type: BodyType,
    /// Attached collider.
    pub collider: ShapeSpec,
    /// Coefficient of restitution.
    pub restitution: f64,
    /// Friction coefficient.
    pub friction: f64,
}

/// One entry of the springs section. Indices are dense body indices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpringSnapshot {
    /// Dense index of the first body.
    pub first: usize,
    /// Dense index of the second body.
    pub second: usize,
    /// Anchor on the first body, local coordinates.
    pub local_anchor1: Point2<f64>,
    /// Anchor on the second body, local coordinates.
    pub local_anchor2: Point2<f64>,
    /// Stiffness (N/m).
    pub stiffness: f64,
    /// Damping (N·s/m).
    pub damping: f64,
    /// Rest length (m).
    pub rest_length: f64,
    /// Polynomial non-linear terms.
    pub non_linear_terms: u32,
    /// Non-linear contribution weight.
    pub non_linear_contribution: f64,
}

/// One entry of the constraints section, tagged by joint kind.
/// Indices are dense body indices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintSnapshot {
    /// Distance joint.
    Distance {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Anchor on the first body, local coordinates.
        local_anchor1: Point2<f64>,
        /// Anchor on the second body, local coordinates.
        local_anchor2: Point2<f64>,
        /// Lower length bound.
        min_length: f64,
        /// Upper length bound.
        max_length: f64,
        /// Soft-constraint parameters.
        soft: Option<SoftParams>,
    },
    /// Revolute joint.
    Revolute {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Pivot on the first body, local coordinates.
        local_anchor: Point2<f64>,
    },
    /// Weld joint.
    Weld {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Weld point on the first body, local coordinates.
        local_anchor: Point2<f64>,
    },
    /// Prismatic joint.
    Prismatic {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Anchor on the first body, local coordinates.
        local_anchor: Point2<f64>,
        /// Sliding axis in the first body's frame.
        local_axis: Vector2<f64>,
        /// Whether relative rotation is locked.
        lock_rotation: bool,
    },
    /// Ball (angle-range) joint.
    Ball {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Lower angle bound (radians).
        min_angle: f64,
        /// Upper angle bound (radians).
        max_angle: f64,
    },
    /// Rotor actuator.
    Rotor {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Target relative angular velocity (rad/s).
        target_angular_velocity: f64,
        /// Torque bound (N·m).
        max_torque: f64,
    },
    /// Linear motor actuator.
    Motor {
        /// Dense index of the first body.
        first: usize,
        /// Dense index of the second body.
        second: usize,
        /// Target relative linear velocity (m/s).
        target_velocity: Vector2<f64>,
        /// Force bound (N).
        max_force: f64,
    },
}

/// The full persisted state of a world.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldSnapshot {
    /// Integrator section.
    pub integrator: IntegratorSnapshot,
    /// Bodies section, in dense order.
    pub bodies: Vec<BodySnapshot>,
    /// Springs section.
    pub springs: Vec<SpringSnapshot>,
    /// Constraints section.
    pub constraints: Vec<ConstraintSnapshot>,
    /// Names of registered behaviours; hosts re-register them on load.
    pub behaviours: Vec<String>,
}
