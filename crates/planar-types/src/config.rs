//! Configuration types for simulation.
//!
//! This module provides configuration types that control how the simulation
//! runs: timestep, solver iterations, collision detection method, sleeping.

use nalgebra::Vector2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Main configuration for a simulation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// Fixed timestep for physics integration (seconds).
    pub timestep: f64,
    /// Gravity acceleration applied to dynamic bodies each evaluation.
    pub gravity: Vector2<f64>,
    /// Runge-Kutta tableau used by the integrator.
    pub integration: IntegrationMethod,
    /// Constraint solver configuration.
    pub solver: SolverConfig,
    /// Collision detection configuration.
    pub collision: CollisionConfig,
    /// Island and sleeping configuration.
    pub islands: IslandConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 1e-3,
            gravity: Vector2::new(0.0, -9.8),
            integration: IntegrationMethod::Rk1,
            solver: SolverConfig::default(),
            collision: CollisionConfig::default(),
            islands: IslandConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Create a configuration with the given timestep.
    #[must_use]
    pub fn with_timestep(timestep: f64) -> Self {
        Self {
            timestep,
            ..Default::default()
        }
    }

    /// Set the gravity vector.
    #[must_use]
    pub fn gravity(mut self, gravity: Vector2<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Disable gravity.
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Vector2::zeros();
        self
    }

    /// Set the integration method.
    #[must_use]
    pub fn integration(mut self, method: IntegrationMethod) -> Self {
        self.integration = method;
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub fn solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Set the collision configuration.
    #[must_use]
    pub fn collision(mut self, collision: CollisionConfig) -> Self {
        self.collision = collision;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(crate::SimError::InvalidTimestep(self.timestep));
        }
        if !self.gravity.iter().all(|x| x.is_finite()) {
            return Err(crate::SimError::invalid_config("gravity must be finite"));
        }
        self.solver.validate()?;
        self.collision.validate()?;
        Ok(())
    }
}

/// Configuration for the sequential-impulse constraint solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Number of velocity iterations per step.
    pub velocity_iterations: u32,
    /// Number of position (non-linear Gauss-Seidel) iterations per step.
    pub position_iterations: u32,
    /// Whether to warm-start constraints with the previous step's impulses.
    pub warm_start: bool,
    /// Baumgarte stabilization gain for the velocity bias.
    pub baumgarte_coef: f64,
    /// Dead zone for the Baumgarte bias: position error below this adds no bias.
    pub baumgarte_threshold: f64,
    /// Allowed penetration; the position pass reports solved below this.
    pub slop: f64,
    /// Normal approach speed below which restitution is not applied (m/s).
    pub restitution_threshold: f64,
    /// Largest position correction applied in a single position iteration (m).
    pub max_position_correction: f64,
    /// Restitution used for bodies that don't specify a material.
    pub default_restitution: f64,
    /// Friction coefficient used for bodies that don't specify a material.
    pub default_friction: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: 8,
            position_iterations: 3,
            warm_start: true,
            baumgarte_coef: 0.035,
            baumgarte_threshold: 0.1,
            slop: 0.15,
            restitution_threshold: 0.5,
            max_position_correction: 0.2,
            default_restitution: 0.0,
            default_friction: 0.5,
        }
    }
}

impl SolverConfig {
    /// Set the number of solver iterations.
    #[must_use]
    pub fn iterations(mut self, velocity: u32, position: u32) -> Self {
        self.velocity_iterations = velocity;
        self.position_iterations = position;
        self
    }

    /// Disable warm starting.
    #[must_use]
    pub fn cold_start(mut self) -> Self {
        self.warm_start = false;
        self
    }

    /// Set the default material properties.
    #[must_use]
    pub fn materials(mut self, restitution: f64, friction: f64) -> Self {
        self.default_restitution = restitution.clamp(0.0, 1.0);
        self.default_friction = friction.max(0.0);
        self
    }

    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.velocity_iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "velocity_iterations must be at least 1",
            ));
        }
        if self.slop < 0.0 {
            return Err(crate::SimError::invalid_config("slop cannot be negative"));
        }
        if !(0.0..=1.0).contains(&self.default_restitution) {
            return Err(crate::SimError::invalid_config(
                "restitution must be between 0 and 1",
            ));
        }
        if self.default_friction < 0.0 {
            return Err(crate::SimError::invalid_config(
                "friction cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Broad-phase collision detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DetectionMethod {
    /// O(n²) double loop; correctness baseline for small scenes.
    BruteForce,
    /// Sort-and-sweep over x-axis AABB intervals.
    SortAndSweep,
    /// Spatial partition over body AABBs.
    #[default]
    QuadTree,
}

/// Quad-tree partitioning parameters.
///
/// Carried per detector rather than process-wide so multiple worlds stay
/// independent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QuadTreeConfig {
    /// Split a node when its entity count exceeds this.
    pub max_entities: usize,
    /// Never split below this depth.
    pub max_depth: u32,
    /// Never split a node smaller than this side length.
    pub min_size: f64,
    /// Keep the root square when growing it to enclose all bodies.
    pub force_square_shape: bool,
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self {
            max_entities: 12,
            max_depth: 12,
            min_size: 2.0,
            force_square_shape: false,
        }
    }
}

/// Collision pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionConfig {
    /// Whether the collision pipeline runs at all.
    pub enabled: bool,
    /// Broad-phase strategy.
    pub method: DetectionMethod,
    /// Quad-tree parameters (used when `method` is `QuadTree`).
    pub quad_tree: QuadTreeConfig,
    /// Steps between full quad-tree rebuilds; only per-body AABB refreshes
    /// happen in between.
    pub rebuild_period: u32,
    /// Steps a cached contact survives without being observed.
    pub contact_lifetime: u32,
    /// EPA convergence threshold.
    pub epa_threshold: f64,
    /// Fan broad-phase leaves and cached-collision refinement across
    /// threads (requires the `parallel` feature).
    pub multithreaded: bool,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: DetectionMethod::QuadTree,
            quad_tree: QuadTreeConfig::default(),
            rebuild_period: 35,
            contact_lifetime: 2,
            epa_threshold: 1e-3,
            multithreaded: false,
        }
    }
}

impl CollisionConfig {
    /// Validate the collision configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.quad_tree.max_entities == 0 {
            return Err(crate::SimError::invalid_config(
                "quad_tree.max_entities must be at least 1",
            ));
        }
        if self.rebuild_period == 0 {
            return Err(crate::SimError::invalid_config(
                "rebuild_period must be at least 1",
            ));
        }
        if self.contact_lifetime == 0 {
            return Err(crate::SimError::invalid_config(
                "contact_lifetime must be at least 1",
            ));
        }
        if !self.epa_threshold.is_finite() || self.epa_threshold <= 0.0 {
            return Err(crate::SimError::invalid_config(
                "epa_threshold must be positive",
            ));
        }
        Ok(())
    }
}

/// Island and sleeping configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IslandConfig {
    /// Allow quiescent bodies to sleep.
    pub enable_sleep: bool,
    /// Linear speed below which a body counts as resting (m/s).
    pub sleep_linear_threshold: f64,
    /// Angular speed below which a body counts as resting (rad/s).
    pub sleep_angular_threshold: f64,
    /// Consecutive resting steps before a body is put to sleep.
    pub steps_to_sleep: u32,
}

impl Default for IslandConfig {
    fn default() -> Self {
        Self {
            enable_sleep: true,
            sleep_linear_threshold: 0.01,
            sleep_angular_threshold: 0.01,
            steps_to_sleep: 60,
        }
    }
}

/// Runge-Kutta tableau selection for the time integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntegrationMethod {
    /// Forward Euler (one stage).
    #[default]
    Rk1,
    /// Explicit midpoint (two stages).
    Rk2,
    /// Classic fourth-order Runge-Kutta.
    Rk4,
    /// Fourth-order 3/8-rule Runge-Kutta.
    Rk38,
}

impl IntegrationMethod {
    /// Order of accuracy of this tableau.
    #[must_use]
    pub const fn order(self) -> u32 {
        match self {
            Self::Rk1 => 1,
            Self::Rk2 => 2,
            Self::Rk4 | Self::Rk38 => 4,
        }
    }

    /// Number of derivative evaluations per step.
    #[must_use]
    pub const fn stages(self) -> usize {
        match self {
            Self::Rk1 => 1,
            Self::Rk2 => 2,
            Self::Rk4 | Self::Rk38 => 4,
        }
    }
}

impl std::fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rk1 => write!(f, "RK1"),
            Self::Rk2 => write!(f, "RK2"),
            Self::Rk4 => write!(f, "RK4"),
            Self::Rk38 => write!(f, "RK4 (3/8 rule)"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timestep, 1e-3);
        assert_eq!(config.solver.velocity_iterations, 8);
        assert_eq!(config.solver.position_iterations, 3);
        assert_eq!(config.collision.method, DetectionMethod::QuadTree);
        assert_eq!(config.collision.quad_tree.max_entities, 12);
        assert_eq!(config.collision.rebuild_period, 35);
        assert_eq!(config.collision.contact_lifetime, 2);
        assert!(config.islands.enable_sleep);
    }

    #[test]
    fn test_config_builder() {
        let config = SimulationConfig::with_timestep(0.01)
            .zero_gravity()
            .integration(IntegrationMethod::Rk4)
            .solver(SolverConfig::default().iterations(16, 6));

        assert_eq!(config.timestep, 0.01);
        assert_eq!(config.gravity.norm(), 0.0);
        assert_eq!(config.integration, IntegrationMethod::Rk4);
        assert_eq!(config.solver.velocity_iterations, 16);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulationConfig::default();
        assert!(config.validate().is_ok());

        config.timestep = -0.01;
        assert!(config.validate().is_err());

        config.timestep = f64::NAN;
        assert!(config.validate().is_err());

        config.timestep = 1e-3;
        config.solver.velocity_iterations = 0;
        assert!(config.validate().is_err());

        config.solver.velocity_iterations = 8;
        config.collision.epa_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_integration_method() {
        assert_eq!(IntegrationMethod::Rk1.order(), 1);
        assert_eq!(IntegrationMethod::Rk4.order(), 4);
        assert_eq!(IntegrationMethod::Rk2.stages(), 2);
        assert_eq!(IntegrationMethod::Rk38.stages(), 4);
    }
}
