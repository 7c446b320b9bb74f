//! Revolute joint: two rows pinning the world anchors together while
//! leaving relative rotation free.

use nalgebra::{Matrix2, Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{apply_impulse_pair, Constraint, JointKind, JointKindTag, JointPair};
use crate::linalg::cross;

/// Add-time description of a revolute joint.
#[derive(Debug, Clone)]
pub struct RevoluteJointSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// World-space pivot point (the coincident anchor).
    pub world_anchor: Point2<f64>,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl RevoluteJointSpec {
    /// A revolute joint pinned at a world point.
    #[must_use]
    pub fn new(first: BodyId, second: BodyId, world_anchor: Point2<f64>) -> Self {
        Self {
            first,
            second,
            world_anchor,
            collide_connected: false,
        }
    }
}

/// A revolute joint.
#[derive(Debug, Clone)]
pub struct RevoluteJoint {
    pair: JointPair,

    r1: Vector2<f64>,
    r2: Vector2<f64>,
    inv_k: Matrix2<f64>,
    bias: Vector2<f64>,
    impulse: Vector2<f64>,
}

/// The 2×2 effective-mass matrix of a point constraint, inverted.
fn point_mass_matrix(
    im1: f64,
    ii1: f64,
    r1: &Vector2<f64>,
    im2: f64,
    ii2: f64,
    r2: &Vector2<f64>,
) -> Option<Matrix2<f64>> {
    let k = Matrix2::new(
        im1 + im2 + ii1 * r1.y * r1.y + ii2 * r2.y * r2.y,
        -ii1 * r1.x * r1.y - ii2 * r2.x * r2.y,
        -ii1 * r1.x * r1.y - ii2 * r2.x * r2.y,
        im1 + im2 + ii1 * r1.x * r1.x + ii2 * r2.x * r2.x,
    );
    k.try_inverse()
}

impl RevoluteJoint {
    pub(crate) fn anchors_startup(
        pair: &JointPair,
        bodies: &BodyStore,
    ) -> Option<(Vector2<f64>, Vector2<f64>, Vector2<f64>)> {
        let (wa1, wa2) = pair.world_anchors(bodies);
        let (i, j) = pair.indices();
        let a = bodies.by_index(i)?;
        let b = bodies.by_index(j)?;
        Some((wa1 - a.pose.position, wa2 - b.pose.position, wa2 - wa1))
    }
}

impl Constraint for RevoluteJoint {
    fn pair(&self) -> &JointPair {
        &self.pair
    }

    fn pair_mut(&mut self) -> &mut JointPair {
        &mut self.pair
    }

    fn startup(&mut self, bodies: &mut BodyStore, dt: f64, cfg: &SolverConfig) {
        let Some((r1, r2, separation)) = Self::anchors_startup(&self.pair, bodies) else {
            return;
        };
        self.r1 = r1;
        self.r2 = r2;

        let (i, j) = self.pair.indices();
        let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
            return;
        };
        self.inv_k = point_mass_matrix(
            a.inverse_mass(),
            a.inverse_inertia(),
            &self.r1,
            b.inverse_mass(),
            b.inverse_inertia(),
            &self.r2,
        )
        .unwrap_or_else(Matrix2::zeros);

        let mut bias = separation * (cfg.baumgarte_coef / dt);
        let bias_norm = bias.norm();
        if bias_norm > cfg.baumgarte_threshold {
            bias *= cfg.baumgarte_threshold / bias_norm;
        }
        self.bias = bias;
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        self.impulse *= dt_ratio;
        if self.impulse.norm_squared() > 0.0 {
            apply_impulse_pair(
                bodies,
                self.pair.indices(),
                self.impulse,
                &self.r1,
                &self.r2,
                dt,
            );
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        let (i, j) = self.pair.indices();
        let cdot = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            b.constraint_velocity_at(&self.r2) - a.constraint_velocity_at(&self.r1)
        };

        let lambda = self.inv_k * (-(cdot + self.bias));
        self.impulse += lambda;
        apply_impulse_pair(bodies, (i, j), lambda, &self.r1, &self.r2, dt);
    }

    fn solve_positions(&mut self, bodies: &mut BodyStore, _cfg: &SolverConfig) -> bool {
        let (wa1, wa2) = self.pair.world_anchors(bodies);
        let separation = wa2 - wa1;
        if separation.norm() < super::LINEAR_TOLERANCE {
            return true;
        }

        let (i, j) = self.pair.indices();
        let (a, b) = bodies.pair_mut(i, j);
        let r1 = wa1 - a.pose.position;
        let r2 = wa2 - b.pose.position;

        let Some(inv_k) = point_mass_matrix(
            a.inverse_mass(),
            a.inverse_inertia(),
            &r1,
            b.inverse_mass(),
            b.inverse_inertia(),
            &r2,
        ) else {
            return true;
        };

        let impulse = inv_k * (-separation);
        a.pose.position -= a.inverse_mass() * impulse;
        a.pose.rotation -= a.inverse_inertia() * cross(&r1, &impulse);
        b.pose.position += b.inverse_mass() * impulse;
        b.pose.rotation += b.inverse_inertia() * cross(&r2, &impulse);

        false
    }

    fn reactive_force(&self, dt: f64) -> Vector2<f64> {
        self.impulse / dt
    }

    fn reactive_torque(&self, _dt: f64) -> f64 {
        0.0
    }
}

impl JointKind for RevoluteJoint {
    type Spec = RevoluteJointSpec;
    const KIND: JointKindTag = JointKindTag::Revolute;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        let pair = JointPair::new(
            bodies,
            spec.first,
            spec.second,
            spec.world_anchor,
            spec.world_anchor,
            spec.collide_connected,
        )?;
        Ok(Self {
            pair,
            r1: Vector2::zeros(),
            r2: Vector2::zeros(),
            inv_k: Matrix2::zeros(),
            bias: Vector2::zeros(),
            impulse: Vector2::zeros(),
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.revolute
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.revolute
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_types::{BodySpec, BodyType, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);
    const DT: f64 = 1e-3;

    #[test]
    fn test_pin_cancels_relative_anchor_velocity() {
        let mut store = BodyStore::new();
        let base = store
            .add(
                &BodySpec::new()
                    .shape(ShapeSpec::circle(0.1))
                    .body_type(BodyType::Static),
                MATERIALS,
            )
            .unwrap();
        let arm = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .velocity(Vector2::new(0.0, -3.0))
                    .shape(ShapeSpec::rect(1.0, 0.1)),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        // Pin the arm's left end to the static base
        let spec = RevoluteJointSpec::new(base, arm, Point2::origin());
        let mut joint = RevoluteJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
        }

        // The arm's anchor point must no longer move relative to the pivot
        let arm_body = store.get(arm).unwrap();
        let r = Point2::origin() - arm_body.pose.position;
        let anchor_vel = arm_body.constraint_velocity_at(&r);
        assert_relative_eq!(anchor_vel.norm(), 0.0, epsilon = 1e-6);
        // Rotation stays free: the arm picked up spin about the pivot
        assert!(arm_body.constraint_velocity.angular.abs() > 0.1);
    }

    #[test]
    fn test_position_solve_closes_gap() {
        let mut store = BodyStore::new();
        let a = store
            .add(&BodySpec::new().shape(ShapeSpec::circle(0.1)), MATERIALS)
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.1)),
                MATERIALS,
            )
            .unwrap();

        let spec = RevoluteJointSpec::new(a, b, Point2::new(0.5, 0.0));
        let mut joint = RevoluteJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        // Drag the second body away so the anchors separate
        let body = store.get_mut(b).unwrap();
        body.pose.position = Point2::new(1.6, 0.2);
        body.refresh_aabb();

        for _ in 0..32 {
            if joint.solve_positions(&mut store, &cfg) {
                break;
            }
        }

        let (wa1, wa2) = joint.pair().world_anchors(&store);
        assert!((wa2 - wa1).norm() < 1e-2);
    }
}
