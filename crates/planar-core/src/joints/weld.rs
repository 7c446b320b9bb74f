//! Weld joint: a revolute pin plus a relative-angle row (three rows total).

use nalgebra::{Matrix2, Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{
    apply_angular_impulse_pair, apply_impulse_pair, Constraint, JointKind, JointKindTag, JointPair,
};
use crate::linalg::cross;

/// Add-time description of a weld joint.
#[derive(Debug, Clone)]
pub struct WeldJointSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// World-space weld point.
    pub world_anchor: Point2<f64>,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl WeldJointSpec {
    /// A weld joint fixed at a world point.
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

/// A weld joint.
#[derive(Debug, Clone)]
pub struct WeldJoint {
    pair: JointPair,
    reference_angle: f64,

    r1: Vector2<f64>,
    r2: Vector2<f64>,
    inv_k: Matrix2<f64>,
    angular_mass: f64,
    bias: Vector2<f64>,
    angular_bias: f64,
    impulse: Vector2<f64>,
    angular_impulse: f64,
}

impl WeldJoint {
    fn relative_angle(&self, bodies: &BodyStore) -> f64 {
        let (i, j) = self.pair.indices();
        match (bodies.by_index(i), bodies.by_index(j)) {
            (Some(a), Some(b)) => b.pose.rotation - a.pose.rotation - self.reference_angle,
            _ => 0.0,
        }
    }
}

impl Constraint for WeldJoint {
    fn pair(&self) -> &JointPair {
        &self.pair
    }

    fn pair_mut(&mut self) -> &mut JointPair {
        &mut self.pair
    }

    fn startup(&mut self, bodies: &mut BodyStore, dt: f64, cfg: &SolverConfig) {
        let (wa1, wa2) = self.pair.world_anchors(bodies);
        let (i, j) = self.pair.indices();
        let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
            return;
        };

        self.r1 = wa1 - a.pose.position;
        self.r2 = wa2 - b.pose.position;

        let (im1, ii1) = (a.inverse_mass(), a.inverse_inertia());
        let (im2, ii2) = (b.inverse_mass(), b.inverse_inertia());

        let k = Matrix2::new(
            im1 + im2 + ii1 * self.r1.y * self.r1.y + ii2 * self.r2.y * self.r2.y,
            -ii1 * self.r1.x * self.r1.y - ii2 * self.r2.x * self.r2.y,
            -ii1 * self.r1.x * self.r1.y - ii2 * self.r2.x * self.r2.y,
            im1 + im2 + ii1 * self.r1.x * self.r1.x + ii2 * self.r2.x * self.r2.x,
        );
        self.inv_k = k.try_inverse().unwrap_or_else(Matrix2::zeros);

        let ii_sum = ii1 + ii2;
        self.angular_mass = if ii_sum > 0.0 { 1.0 / ii_sum } else { 0.0 };

        let separation = wa2 - wa1;
        let mut bias = separation * (cfg.baumgarte_coef / dt);
        let bias_norm = bias.norm();
        if bias_norm > cfg.baumgarte_threshold {
            bias *= cfg.baumgarte_threshold / bias_norm;
        }
        self.bias = bias;
        let angle_error = self.relative_angle(bodies);
        self.angular_bias = super::baumgarte_bias(angle_error, dt, cfg);
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        self.impulse *= dt_ratio;
        self.angular_impulse *= dt_ratio;

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
        if self.angular_impulse != 0.0 {
            apply_angular_impulse_pair(bodies, self.pair.indices(), self.angular_impulse, dt);
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        let (i, j) = self.pair.indices();

        // Angular row first, then the point rows
        let relative_omega = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            b.constraint_velocity.angular - a.constraint_velocity.angular
        };
        let angular_lambda = -self.angular_mass * (relative_omega + self.angular_bias);
        self.angular_impulse += angular_lambda;
        apply_angular_impulse_pair(bodies, (i, j), angular_lambda, dt);

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

    fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool {
        let mut solved = true;

        // Angle row
        let angle_error = self.relative_angle(bodies);
        if angle_error.abs() >= super::ANGULAR_TOLERANCE {
            solved = false;
            let (i, j) = self.pair.indices();
            let (a, b) = bodies.pair_mut(i, j);
            let ii_sum = a.inverse_inertia() + b.inverse_inertia();
            if ii_sum > 0.0 {
                let correction =
                    angle_error.clamp(-cfg.max_position_correction, cfg.max_position_correction);
                let impulse = -correction / ii_sum;
                a.pose.rotation -= a.inverse_inertia() * impulse;
                b.pose.rotation += b.inverse_inertia() * impulse;
            }
        }

        // Point rows
        let (wa1, wa2) = self.pair.world_anchors(bodies);
        let separation = wa2 - wa1;
        if separation.norm() >= super::LINEAR_TOLERANCE {
            solved = false;
            let (i, j) = self.pair.indices();
            let (a, b) = bodies.pair_mut(i, j);
            let r1 = wa1 - a.pose.position;
            let r2 = wa2 - b.pose.position;
            let (im1, ii1) = (a.inverse_mass(), a.inverse_inertia());
            let (im2, ii2) = (b.inverse_mass(), b.inverse_inertia());
            let k = Matrix2::new(
                im1 + im2 + ii1 * r1.y * r1.y + ii2 * r2.y * r2.y,
                -ii1 * r1.x * r1.y - ii2 * r2.x * r2.y,
                -ii1 * r1.x * r1.y - ii2 * r2.x * r2.y,
                im1 + im2 + ii1 * r1.x * r1.x + ii2 * r2.x * r2.x,
            );
            if let Some(inv_k) = k.try_inverse() {
                let impulse = inv_k * (-separation);
                a.pose.position -= im1 * impulse;
                a.pose.rotation -= ii1 * cross(&r1, &impulse);
                b.pose.position += im2 * impulse;
                b.pose.rotation += ii2 * cross(&r2, &impulse);
            }
        }

        solved
    }

    fn reactive_force(&self, dt: f64) -> Vector2<f64> {
        self.impulse / dt
    }

    fn reactive_torque(&self, dt: f64) -> f64 {
        self.angular_impulse / dt
    }
}

impl JointKind for WeldJoint {
    type Spec = WeldJointSpec;
    const KIND: JointKindTag = JointKindTag::Weld;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        let pair = JointPair::new(
            bodies,
            spec.first,
            spec.second,
            spec.world_anchor,
            spec.world_anchor,
            spec.collide_connected,
        )?;
        let a = bodies
            .get(spec.first)
            .ok_or(planar_types::SimError::UnknownBody(spec.first.raw()))?;
        let b = bodies
            .get(spec.second)
            .ok_or(planar_types::SimError::UnknownBody(spec.second.raw()))?;

        Ok(Self {
            pair,
            reference_angle: b.pose.rotation - a.pose.rotation,
            r1: Vector2::zeros(),
            r2: Vector2::zeros(),
            inv_k: Matrix2::zeros(),
            angular_mass: 0.0,
            bias: Vector2::zeros(),
            angular_bias: 0.0,
            impulse: Vector2::zeros(),
            angular_impulse: 0.0,
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.weld
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.weld
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_types::{BodySpec, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);
    const DT: f64 = 1e-3;

    #[test]
    fn test_weld_cancels_relative_motion() {
        let mut store = BodyStore::new();
        let a = store
            .add(&BodySpec::new().shape(ShapeSpec::rect(0.5, 0.5)), MATERIALS)
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .velocity(Vector2::new(0.0, 2.0))
                    .angular_velocity(3.0)
                    .shape(ShapeSpec::rect(0.5, 0.5)),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let spec = WeldJointSpec::new(a, b, Point2::new(0.5, 0.0));
        let mut joint = WeldJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..16 {
            joint.solve_velocities(&mut store, DT);
        }

        let body_a = store.get(a).unwrap();
        let body_b = store.get(b).unwrap();
        // Relative rotation locked
        assert_relative_eq!(
            body_a.constraint_velocity.angular,
            body_b.constraint_velocity.angular,
            epsilon = 1e-6
        );
        // Anchor velocities agree
        let ra = Point2::new(0.5, 0.0) - body_a.pose.position;
        let rb = Point2::new(0.5, 0.0) - body_b.pose.position;
        let va = body_a.constraint_velocity_at(&ra);
        let vb = body_b.constraint_velocity_at(&rb);
        assert_relative_eq!((vb - va).norm(), 0.0, epsilon = 1e-6);
    }
}
