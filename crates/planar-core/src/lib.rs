//! 2D rigid-body physics core.
//!
//! This crate implements the per-step simulation pipeline that advances a
//! population of bodies constrained by joints and contacts under explicit
//! Runge-Kutta time integration:
//!
//! 1. A **broad phase** (quad-tree, sort-and-sweep or brute force)
//!    producing a candidate pair set.
//! 2. A **narrow phase** computing penetration and contact manifolds via
//!    GJK/EPA for arbitrary convex shapes, with an analytic circle-circle
//!    path.
//! 3. A **sequential-impulse solver** for joints, friction and persistent
//!    contacts, warm-started from the contact cache.
//! 4. A **time integrator** (Butcher-tableau RK family) that calls back
//!    into the world to evaluate the state derivative.
//!
//! # Example
//!
//! ```
//! use planar_core::World;
//! use planar_types::{BodySpec, BodyType, ShapeSpec, SimulationConfig};
//! use nalgebra::Point2;
//!
//! let mut world = World::new(SimulationConfig::default());
//!
//! // Ground plane plus a falling box
//! world.add_body(
//!     &BodySpec::new()
//!         .position(Point2::new(0.0, -1.0))
//!         .shape(ShapeSpec::rect(50.0, 1.0))
//!         .body_type(BodyType::Static),
//! ).unwrap();
//! world.add_body(
//!     &BodySpec::new()
//!         .position(Point2::new(0.0, 3.0))
//!         .shape(ShapeSpec::rect(0.5, 0.5)),
//! ).unwrap();
//!
//! for _ in 0..100 {
//!     world.step().unwrap();
//! }
//! ```
//!
//! # Modules
//!
//! - [`shape`]: collision shapes, bounding boxes, support functions
//! - [`gjk_epa`]: GJK intersection test and EPA penetration recovery
//! - [`manifold`]: contact-point generation (analytic + face clipping)
//! - [`quad_tree`]: spatial partition over body AABBs
//! - [`broad_phase`]: candidate-pair strategies and dispatch
//! - [`collision`]: narrow phase and the per-step collision set
//! - [`contact_cache`]: cross-step contact matching and warm-start feed
//! - [`joints`]: distance, revolute, weld, prismatic, ball, rotor, motor,
//!   spring
//! - [`solver`]: sequential-impulse velocity and position phases
//! - [`integrator`]: flat state vector and Runge-Kutta tableaux
//! - [`world`]: the step pipeline and the public API

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
    clippy::module_name_repetitions
)]

pub mod behaviour;
pub mod body;
pub mod broad_phase;
pub mod collision;
pub mod contact_cache;
pub mod contact_constraint;
pub mod events;
pub mod gjk_epa;
pub mod integrator;
mod linalg;
pub mod joints;
pub mod manifold;
pub mod quad_tree;
pub mod shape;
pub mod snapshot;
pub mod solver;
pub mod world;

pub use behaviour::Behaviour;
pub use body::{Body, BodyStore};
pub use broad_phase::{BroadPhase, BroadPhaseDetector};
pub use collision::{Collision, CollisionSet};
pub use contact_cache::ContactCache;
pub use contact_constraint::{ContactConstraint, ContactKey};
pub use gjk_epa::{gjk_epa_mtv, gjk_query, Mtv};
pub use integrator::{Integrator, State, Tableau};
pub use joints::{
    BallJoint, BallJointSpec, Constraint, DistanceJoint, DistanceJointSpec, JointSet, MotorJoint,
    MotorJointSpec, PrismaticJoint, PrismaticJointSpec, RevoluteJoint, RevoluteJointSpec,
    RotorJoint, RotorJointSpec, SoftParams, Spring, SpringSpec, WeldJoint, WeldJointSpec,
};
pub use manifold::{Manifold, ManifoldPoint};
pub use quad_tree::QuadTree;
pub use shape::{Aabb, Shape};
pub use snapshot::WorldSnapshot;
pub use world::{Energies, StepResult, World};

// Re-export the types crate for downstream convenience
pub use planar_types;
