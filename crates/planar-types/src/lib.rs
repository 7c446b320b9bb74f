//! Core types for 2D rigid-body simulation.
//!
//! This crate provides the foundational types for building a planar physics
//! simulation:
//!
//! - [`Pose`], [`Velocity`], [`MassProperties`] - rigid body state in the plane
//! - [`BodySpec`], [`ShapeSpec`] - add-time body descriptions
//! - [`SimulationConfig`] - timestep, solver, collision and island settings
//! - [`SimError`] - the error surface of the simulation core
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They have no behavior, no physics, no
//! integration. They're the common language between:
//!
//! - The simulation core (planar-core)
//! - Host applications building and querying worlds
//! - Serialization and replay tooling
//!
//! # Coordinate System
//!
//! - X: right
//! - Y: up
//! - Rotations are counter-clockwise radians
//!
//! # Example
//!
//! ```
//! use planar_types::{BodySpec, Pose, Velocity};
//! use nalgebra::{Point2, Vector2};
//!
//! let spec = BodySpec::new()
//!     .position(Point2::new(0.0, 5.0))
//!     .velocity(Vector2::new(1.0, 0.0))
//!     .mass(2.0);
//!
//! assert!(spec.validate().is_ok());
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
// Allow certain clippy lints that are overly pedantic for type definitions
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod error;
mod specs;

pub use body::{BodyId, BodyType, JointId, MassProperties, Pose, Velocity};
pub use config::{
    CollisionConfig, DetectionMethod, IntegrationMethod, IslandConfig, QuadTreeConfig,
    SimulationConfig, SolverConfig,
};
pub use error::SimError;
pub use specs::{BodySpec, ShapeSpec};

// Re-export math types for convenience
pub use nalgebra::{Matrix2, Point2, UnitComplex, Vector2};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_and_velocity_roundtrip() {
        let pose = Pose::new(Point2::new(1.0, 2.0), std::f64::consts::FRAC_PI_2);
        let local = Point2::new(1.0, 0.0);
        let world = pose.transform_point(&local);

        // After a 90 degree rotation, local (1,0) lands at (0,1) plus the translation
        assert!((world.x - 1.0).abs() < 1e-10);
        assert!((world.y - 3.0).abs() < 1e-10);

        let back = pose.inverse_transform_point(&world);
        assert!((back.x - local.x).abs() < 1e-10);
        assert!((back.y - local.y).abs() < 1e-10);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timestep, 1e-3);
    }
}
