//! Persistent contact constraints: normal impulse plus Coulomb friction.
//!
//! One constraint per manifold slot. Impulses accumulate across velocity
//! iterations; the normal accumulator is kept non-negative and the friction
//! accumulator clamped inside the cone `|λ_t| ≤ μ·λ_n` at every iteration.
//! Accumulated impulses survive into the next step through the contact
//! cache and are replayed as the warm start.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::{Body, BodyStore};
use crate::linalg::{cross, perp};
use crate::manifold::ManifoldPoint;

/// Position-pass correction gain (non-linear Gauss-Seidel).
const POSITION_GAIN: f64 = 0.2;

/// Key identifying a contact across steps.
///
/// The body ids are stored low/high; `feature` is the raw manifold slot the
/// point occupied (0 or 1). Because the slot follows the pair ordering the
/// narrow phase happened to use, a pair observed swapped across steps may
/// miss its match and warm-start cold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactKey {
    /// Smaller body id of the pair.
    pub low: BodyId,
    /// Larger body id of the pair.
    pub high: BodyId,
    /// Manifold slot index.
    pub feature: usize,
}

impl ContactKey {
    /// Build the canonical key for a pair and manifold slot.
    #[must_use]
    pub fn new(a: BodyId, b: BodyId, feature: usize) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self { low, high, feature }
    }
}

/// A persistent per-point contact constraint.
#[derive(Debug, Clone)]
pub struct ContactConstraint {
    key: ContactKey,
    first: BodyId,
    second: BodyId,
    first_index: usize,
    second_index: usize,

    normal: Vector2<f64>,
    tangent: Vector2<f64>,
    r1: Vector2<f64>,
    r2: Vector2<f64>,
    local_anchor1: Point2<f64>,
    local_anchor2: Point2<f64>,
    penetration: f64,

    restitution: f64,
    friction: f64,

    normal_mass: f64,
    tangent_mass: f64,
    velocity_bias: f64,

    /// Accumulated normal impulse (≥ 0).
    pub normal_impulse: f64,
    /// Accumulated tangent impulse (|λ_t| ≤ μ·λ_n).
    pub tangent_impulse: f64,

    pub(crate) unmatched_steps: u32,
    pub(crate) matched: bool,
}

/// Pairwise material combination: restitution takes the max, friction the
/// geometric mean.
fn combine_materials(a: &Body, b: &Body) -> (f64, f64) {
    (
        a.restitution.max(b.restitution),
        (a.friction * b.friction).sqrt(),
    )
}

impl ContactConstraint {
    /// Create a fresh constraint for a newly observed contact point.
    #[must_use]
    pub fn new(
        key: ContactKey,
        first: BodyId,
        second: BodyId,
        normal: Vector2<f64>,
        point: &ManifoldPoint,
        bodies: &BodyStore,
    ) -> Option<Self> {
        let first_index = bodies.index_of(first)?;
        let second_index = bodies.index_of(second)?;

        let mut constraint = Self {
            key,
            first,
            second,
            first_index,
            second_index,
            normal,
            tangent: perp(&normal),
            r1: Vector2::zeros(),
            r2: Vector2::zeros(),
            local_anchor1: Point2::origin(),
            local_anchor2: Point2::origin(),
            penetration: point.penetration,
            restitution: 0.0,
            friction: 0.0,
            normal_mass: 0.0,
            tangent_mass: 0.0,
            velocity_bias: 0.0,
            normal_impulse: 0.0,
            tangent_impulse: 0.0,
            unmatched_steps: 0,
            matched: true,
        };
        constraint.update(normal, point, bodies);
        Some(constraint)
    }

    /// The cache key.
    #[must_use]
    pub fn key(&self) -> ContactKey {
        self.key
    }

    /// First participant.
    #[must_use]
    pub fn first(&self) -> BodyId {
        self.first
    }

    /// Second participant.
    #[must_use]
    pub fn second(&self) -> BodyId {
        self.second
    }

    /// Whether this constraint was observed in the running step.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.matched
    }

    /// Refresh geometry from the current manifold point.
    pub fn update(&mut self, normal: Vector2<f64>, point: &ManifoldPoint, bodies: &BodyStore) {
        self.normal = normal;
        self.tangent = perp(&normal);
        self.penetration = point.penetration;

        let (Some(a), Some(b)) = (bodies.get(self.first), bodies.get(self.second)) else {
            return;
        };
        self.first_index = a.index();
        self.second_index = b.index();
        self.r1 = point.on_first - a.pose.position;
        self.r2 = point.on_second - b.pose.position;
        self.local_anchor1 = a.pose.inverse_transform_point(&point.on_first);
        self.local_anchor2 = b.pose.inverse_transform_point(&point.on_second);

        let (restitution, friction) = combine_materials(a, b);
        self.restitution = restitution;
        self.friction = friction;
    }

    /// Scale the cached impulses to a new timestep (warm-start carry-over).
    pub fn rescale_impulses(&mut self, dt_ratio: f64) {
        self.normal_impulse *= dt_ratio;
        self.tangent_impulse *= dt_ratio;
    }

    fn effective_mass(dir: &Vector2<f64>, r1: &Vector2<f64>, r2: &Vector2<f64>, a: &Body, b: &Body) -> f64 {
        let c1 = cross(r1, dir);
        let c2 = cross(r2, dir);
        let k = a.inverse_mass()
            + b.inverse_mass()
            + a.inverse_inertia() * c1 * c1
            + b.inverse_inertia() * c2 * c2;
        if k > 0.0 {
            1.0 / k
        } else {
            0.0
        }
    }

    /// Compute effective masses and the velocity bias.
    pub fn startup(&mut self, bodies: &BodyStore, dt: f64, cfg: &SolverConfig) {
        let (Some(a), Some(b)) = (
            bodies.by_index(self.first_index),
            bodies.by_index(self.second_index),
        ) else {
            return;
        };

        self.normal_mass = Self::effective_mass(&self.normal, &self.r1, &self.r2, a, b);
        self.tangent_mass = Self::effective_mass(&self.tangent, &self.r1, &self.r2, a, b);

        // Restitution from the pre-solve approach speed
        let rel = b.velocity_at(&self.r2) - a.velocity_at(&self.r1);
        let vn = self.normal.dot(&rel);
        let mut bias = 0.0;
        if vn < -cfg.restitution_threshold {
            bias += -self.restitution * vn;
        }

        // Baumgarte term: slop is forgiven, the correction speed is capped
        // by the threshold
        let error = (self.penetration - cfg.slop).max(0.0);
        if error > 0.0 {
            bias += (cfg.baumgarte_coef * error / dt).min(cfg.baumgarte_threshold);
        }
        self.velocity_bias = bias;
    }

    fn apply_impulse(&self, impulse: Vector2<f64>, bodies: &mut BodyStore, dt: f64) {
        let (a, b) = bodies.pair_mut(self.first_index, self.second_index);

        a.constraint_velocity.linear -= a.inverse_mass() * impulse;
        a.constraint_velocity.angular -= a.inverse_inertia() * cross(&self.r1, &impulse);
        b.constraint_velocity.linear += b.inverse_mass() * impulse;
        b.constraint_velocity.angular += b.inverse_inertia() * cross(&self.r2, &impulse);

        // Mirror the impulse as a simulation force so the integrator moves
        // the velocity state by the same amount
        a.apply_sim_force_at(-impulse / dt, &self.r1);
        b.apply_sim_force_at(impulse / dt, &self.r2);
    }

    /// Replay the accumulated impulses from the previous step.
    pub fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64) {
        let impulse = self.normal * self.normal_impulse + self.tangent * self.tangent_impulse;
        if impulse.norm_squared() > 0.0 {
            self.apply_impulse(impulse, bodies, dt);
        }
    }

    /// One velocity iteration: normal row then friction row.
    pub fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        let (vn, vt) = {
            let (Some(a), Some(b)) = (
                bodies.by_index(self.first_index),
                bodies.by_index(self.second_index),
            ) else {
                return;
            };
            let rel = b.constraint_velocity_at(&self.r2) - a.constraint_velocity_at(&self.r1);
            (self.normal.dot(&rel), self.tangent.dot(&rel))
        };

        // Normal: accumulated impulse stays non-negative
        let lambda = self.normal_mass * (-(vn - self.velocity_bias));
        let new_accum = (self.normal_impulse + lambda).max(0.0);
        let delta = new_accum - self.normal_impulse;
        self.normal_impulse = new_accum;
        if delta != 0.0 {
            self.apply_impulse(self.normal * delta, bodies, dt);
        }

        // Friction: clamp against the accumulated normal impulse
        let max_tangent = self.friction * self.normal_impulse;
        let lambda_t = self.tangent_mass * (-vt);
        let new_accum_t = (self.tangent_impulse + lambda_t).clamp(-max_tangent, max_tangent);
        let delta_t = new_accum_t - self.tangent_impulse;
        self.tangent_impulse = new_accum_t;
        if delta_t != 0.0 {
            self.apply_impulse(self.tangent * delta_t, bodies, dt);
        }
    }

    /// One position iteration; returns true when the penetration at this
    /// point is within slop.
    pub fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool {
        let (separation, r1, r2) = {
            let (Some(a), Some(b)) = (
                bodies.by_index(self.first_index),
                bodies.by_index(self.second_index),
            ) else {
                return true;
            };
            let wa1 = a.pose.transform_point(&self.local_anchor1);
            let wa2 = b.pose.transform_point(&self.local_anchor2);
            let separation = self.normal.dot(&(wa2 - wa1));
            (separation, wa1 - a.pose.position, wa2 - b.pose.position)
        };

        if separation >= -cfg.slop {
            return true;
        }

        let correction = (POSITION_GAIN * (separation + cfg.slop))
            .max(-cfg.max_position_correction);

        let (a, b) = bodies.pair_mut(self.first_index, self.second_index);
        let mass = {
            let c1 = cross(&r1, &self.normal);
            let c2 = cross(&r2, &self.normal);
            let k = a.inverse_mass()
                + b.inverse_mass()
                + a.inverse_inertia() * c1 * c1
                + b.inverse_inertia() * c2 * c2;
            if k > 0.0 {
                1.0 / k
            } else {
                return true;
            }
        };

        let impulse = self.normal * (-correction * mass);
        a.pose.position -= a.inverse_mass() * impulse;
        a.pose.rotation -= a.inverse_inertia() * cross(&r1, &impulse);
        b.pose.position += b.inverse_mass() * impulse;
        b.pose.rotation += b.inverse_inertia() * cross(&r2, &impulse);

        false
    }

    /// Contact force transmitted through this point over the last step.
    #[must_use]
    pub fn reactive_force(&self, dt: f64) -> Vector2<f64> {
        (self.normal * self.normal_impulse + self.tangent * self.tangent_impulse) / dt
    }
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
    use approx::assert_relative_eq;
    use planar_types::{BodySpec, BodyType, ShapeSpec, SolverConfig};

    const MATERIALS: (f64, f64) = (0.0, 0.5);
    const DT: f64 = 1e-3;

    /// Two unit-mass circles in head-on contact along X.
    fn head_on_store(e: f64, mu: f64) -> (BodyStore, ContactConstraint) {
        let mut store = BodyStore::new();
        let a = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(-0.45, 0.0))
                    .velocity(Vector2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5))
                    .restitution(e)
                    .friction(mu),
                MATERIALS,
            )
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.45, 0.0))
                    .velocity(Vector2::new(-1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5))
                    .restitution(e)
                    .friction(mu),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let point = ManifoldPoint {
            on_first: Point2::new(0.05, 0.0),
            on_second: Point2::new(-0.05, 0.0),
            penetration: 0.1,
        };
        let key = ContactKey::new(a, b, 0);
        let constraint =
            ContactConstraint::new(key, a, b, Vector2::x(), &point, &store).unwrap();
        (store, constraint)
    }

    #[test]
    fn test_key_is_canonical() {
        let k1 = ContactKey::new(BodyId::new(5), BodyId::new(2), 1);
        let k2 = ContactKey::new(BodyId::new(2), BodyId::new(5), 1);
        assert_eq!(k1, k2);
        assert_ne!(k1, ContactKey::new(BodyId::new(2), BodyId::new(5), 0));
    }

    #[test]
    fn test_normal_solve_stops_approach() {
        let cfg = SolverConfig::default();
        let (mut store, mut constraint) = head_on_store(0.0, 0.0);
        constraint.startup(&store, DT, &cfg);

        for _ in 0..8 {
            constraint.solve_velocities(&mut store, DT);
        }

        let a = store.by_index(0).unwrap();
        let b = store.by_index(1).unwrap();
        let vn = b.constraint_velocity.linear.x - a.constraint_velocity.linear.x;
        // e = 0: post-contact normal relative velocity within solver tolerance
        assert!(vn >= -1e-9, "bodies must stop approaching, got vn = {vn}");
        assert!(vn <= 0.2, "inelastic contact must not bounce, got vn = {vn}");
        assert!(constraint.normal_impulse > 0.0);
    }

    #[test]
    fn test_restitution_reverses_velocity() {
        let mut cfg = SolverConfig::default();
        cfg.baumgarte_coef = 0.0;
        let (mut store, mut constraint) = head_on_store(1.0, 0.0);
        constraint.startup(&store, DT, &cfg);

        for _ in 0..16 {
            constraint.solve_velocities(&mut store, DT);
        }

        let a = store.by_index(0).unwrap();
        let b = store.by_index(1).unwrap();
        assert_relative_eq!(a.constraint_velocity.linear.x, -1.0, epsilon = 1e-3);
        assert_relative_eq!(b.constraint_velocity.linear.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_friction_cone_clamp() {
        let cfg = SolverConfig::default();
        let mu = 0.3;
        let mut store = BodyStore::new();
        // A box sliding fast along a static floor
        let floor = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.0, -0.5))
                    .shape(ShapeSpec::rect(10.0, 0.5))
                    .body_type(BodyType::Static)
                    .friction(mu),
                MATERIALS,
            )
            .unwrap();
        let slider = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.0, 0.45))
                    .velocity(Vector2::new(5.0, -1.0))
                    .shape(ShapeSpec::rect(0.5, 0.5))
                    .friction(mu),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let point = ManifoldPoint {
            on_first: Point2::new(0.0, 0.0),
            on_second: Point2::new(0.0, -0.05),
            penetration: 0.05,
        };
        let key = ContactKey::new(floor, slider, 0);
        let mut constraint =
            ContactConstraint::new(key, floor, slider, Vector2::y(), &point, &store).unwrap();
        constraint.startup(&store, DT, &cfg);

        for _ in 0..8 {
            constraint.solve_velocities(&mut store, DT);
            assert!(
                constraint.tangent_impulse.abs() <= mu * constraint.normal_impulse + 1e-12,
                "friction impulse must stay inside the cone at every iteration"
            );
        }
        assert!(constraint.normal_impulse > 0.0);
        assert!(
            constraint.tangent_impulse.abs() > 0.0,
            "sliding must produce friction"
        );
    }

    #[test]
    fn test_position_solve_reports_solved_below_slop() {
        let cfg = SolverConfig::default();
        let mut store = BodyStore::new();
        let a = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(-0.5, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.5 - 0.1, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();

        // Penetration 0.1 < slop 0.15: already solved
        let point = ManifoldPoint {
            on_first: Point2::new(0.0, 0.0),
            on_second: Point2::new(-0.1, 0.0),
            penetration: 0.1,
        };
        let key = ContactKey::new(a, b, 0);
        let mut constraint =
            ContactConstraint::new(key, a, b, Vector2::x(), &point, &store).unwrap();
        assert!(constraint.solve_positions(&mut store, &cfg));
    }

    #[test]
    fn test_position_solve_reduces_deep_penetration() {
        let cfg = SolverConfig::default();
        let mut store = BodyStore::new();
        let a = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(-0.5, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();

        let point = ManifoldPoint {
            on_first: Point2::new(0.0, 0.0),
            on_second: Point2::new(-0.5, 0.0),
            penetration: 0.5,
        };
        let key = ContactKey::new(a, b, 0);
        let mut constraint =
            ContactConstraint::new(key, a, b, Vector2::x(), &point, &store).unwrap();

        let gap_before = store.by_index(1).unwrap().pose.position.x
            - store.by_index(0).unwrap().pose.position.x;
        let solved = constraint.solve_positions(&mut store, &cfg);
        let gap_after = store.by_index(1).unwrap().pose.position.x
            - store.by_index(0).unwrap().pose.position.x;

        assert!(!solved);
        assert!(gap_after > gap_before, "bodies must be pushed apart");
    }
}
