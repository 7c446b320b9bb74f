//! Sequential-impulse solver driver.
//!
//! One velocity phase runs inside every derivative evaluation: startup
//! (Jacobians, effective masses, biases), an optional warm start, then N
//! velocity iterations over joints and contacts in a fixed order. The
//! position phase runs once per step after integration: up to M non-linear
//! Gauss-Seidel passes that correct penetration and joint drift directly in
//! the poses, short-circuiting as soon as every constraint reports solved.
//!
//! Constraints are solved in stored order (joint kinds in a fixed order,
//! contacts in cache order), which biases accuracy toward later rows but is
//! acceptable with enough iterations and keeps the solve deterministic.

use planar_types::SolverConfig;
use tracing::warn;

use crate::body::BodyStore;
use crate::contact_cache::ContactCache;
use crate::joints::JointSet;

/// Impulse magnitude past which a constraint is considered diverging.
const DIVERGENCE_LIMIT: f64 = 1e12;

/// Run the velocity phase of the solver.
///
/// Assumes `bodies` already carries the constraint-velocity snapshot for
/// this evaluation. `dt_ratio` rescales warm-started joint impulses after a
/// timestep change (contacts are rescaled by the cache when matched).
pub fn solve_velocity_phase(
    bodies: &mut BodyStore,
    joints: &mut JointSet,
    contacts: &mut ContactCache,
    dt: f64,
    dt_ratio: f64,
    cfg: &SolverConfig,
) {
    // Startup
    joints.startup(bodies, dt, cfg);
    for contact in contacts.matched_mut() {
        contact.startup(bodies, dt, cfg);
    }

    // Warm start
    if cfg.warm_start {
        joints.warm_start(bodies, dt, dt_ratio);
        for contact in contacts.matched_mut() {
            contact.warm_start(bodies, dt);
        }
    }

    // Velocity iterations
    for _ in 0..cfg.velocity_iterations {
        joints.solve_velocities(bodies, dt);
        for contact in contacts.matched_mut() {
            contact.solve_velocities(bodies, dt);
        }
    }

    clamp_diverged(contacts);
}

/// Clamp diverging contact impulses so the step can continue.
fn clamp_diverged(contacts: &mut ContactCache) {
    for contact in contacts.constraints_mut() {
        let n = contact.normal_impulse;
        let t = contact.tangent_impulse;
        if !n.is_finite() || !t.is_finite() || n.abs() > DIVERGENCE_LIMIT || t.abs() > DIVERGENCE_LIMIT
        {
            warn!(
                first = %contact.first(),
                second = %contact.second(),
                normal = n,
                tangent = t,
                "constraint divergence: clamping contact impulses"
            );
            contact.normal_impulse = n.clamp(0.0, DIVERGENCE_LIMIT);
            contact.tangent_impulse = if t.is_finite() {
                t.clamp(-DIVERGENCE_LIMIT, DIVERGENCE_LIMIT)
            } else {
                0.0
            };
            if !contact.normal_impulse.is_finite() {
                contact.normal_impulse = 0.0;
            }
        }
    }
}

/// Run the position phase of the solver.
///
/// Returns true when every constraint reported solved within the iteration
/// budget.
pub fn solve_position_phase(
    bodies: &mut BodyStore,
    joints: &mut JointSet,
    contacts: &mut ContactCache,
    cfg: &SolverConfig,
) -> bool {
    for _ in 0..cfg.position_iterations {
        let joints_solved = joints.solve_positions(bodies, cfg);

        let mut contacts_solved = true;
        for contact in contacts.matched_mut() {
            contacts_solved &= contact.solve_positions(bodies, cfg);
        }

        if joints_solved && contacts_solved {
            return true;
        }
    }
    false
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::collision::Collision;
    use crate::manifold::{Manifold, ManifoldPoint};
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Vector2};
    use planar_types::{BodySpec, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);
    const DT: f64 = 1e-3;

    fn head_on_world() -> (BodyStore, JointSet, ContactCache) {
        let mut bodies = BodyStore::new();
        let a = bodies
            .add(
                &BodySpec::new()
                    .position(Point2::new(-0.45, 0.0))
                    .velocity(Vector2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5))
                    .restitution(1.0)
                    .friction(0.0),
                MATERIALS,
            )
            .unwrap();
        let b = bodies
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.45, 0.0))
                    .velocity(Vector2::new(-1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5))
                    .restitution(1.0)
                    .friction(0.0),
                MATERIALS,
            )
            .unwrap();

        let collision = Collision {
            first: a,
            second: b,
            normal: Vector2::x(),
            depth: 0.1,
            manifold: Manifold::single(ManifoldPoint {
                on_first: Point2::new(0.05, 0.0),
                on_second: Point2::new(-0.05, 0.0),
                penetration: 0.1,
            }),
            valid: true,
        };
        let mut cache = ContactCache::new();
        cache.begin_step();
        cache.absorb(&[collision], &bodies, 1.0);

        (bodies, JointSet::new(), cache)
    }

    #[test]
    fn test_velocity_phase_resolves_head_on() {
        let (mut bodies, mut joints, mut contacts) = head_on_world();
        let mut cfg = SolverConfig::default();
        cfg.baumgarte_coef = 0.0;

        bodies.prepare_constraint_velocities();
        solve_velocity_phase(&mut bodies, &mut joints, &mut contacts, DT, 1.0, &cfg);

        // e = 1, head-on: velocities reverse
        assert_relative_eq!(
            bodies.by_index(0).unwrap().constraint_velocity.linear.x,
            -1.0,
            epsilon = 1e-3
        );
        assert_relative_eq!(
            bodies.by_index(1).unwrap().constraint_velocity.linear.x,
            1.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_warm_start_reapplies_cached_impulse() {
        let (mut bodies, mut joints, mut contacts) = head_on_world();
        let cfg = SolverConfig::default();

        // Seed a cached impulse; zero approach velocity so only the warm
        // start moves anything
        for body in bodies.iter_mut() {
            body.velocity.linear = Vector2::zeros();
        }
        contacts.constraints_mut()[0].normal_impulse = 0.5;

        bodies.prepare_constraint_velocities();
        let mut cold_cfg = cfg.clone();
        cold_cfg.warm_start = false;
        cold_cfg.velocity_iterations = 1;
        cold_cfg.baumgarte_coef = 0.0;

        let mut warm_cfg = cold_cfg.clone();
        warm_cfg.warm_start = true;

        solve_velocity_phase(&mut bodies, &mut joints, &mut contacts, DT, 1.0, &warm_cfg);
        let v_after_warm = bodies.by_index(1).unwrap().constraint_velocity.linear.x;
        assert!(
            v_after_warm > 0.0,
            "warm start must push the bodies apart, got {v_after_warm}"
        );
    }

    #[test]
    fn test_position_phase_short_circuits_below_slop() {
        let (mut bodies, mut joints, mut contacts) = head_on_world();
        let cfg = SolverConfig::default();

        // Penetration 0.1 < slop 0.15
        assert!(solve_position_phase(
            &mut bodies,
            &mut joints,
            &mut contacts,
            &cfg
        ));
    }

    #[test]
    fn test_diverged_impulse_is_clamped() {
        let (mut bodies, mut joints, mut contacts) = head_on_world();
        let cfg = SolverConfig::default();

        contacts.constraints_mut()[0].normal_impulse = f64::NAN;
        bodies.prepare_constraint_velocities();
        solve_velocity_phase(&mut bodies, &mut joints, &mut contacts, DT, 1.0, &cfg);

        assert!(contacts.constraints()[0].normal_impulse.is_finite());
    }
}
