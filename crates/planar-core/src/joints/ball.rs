//! Ball joint: limits the relative angle of two bodies to a range.
//!
//! Inside the range the joint is inactive; outside it, a one-sided angular
//! row drives the relative angle back to the violated bound.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{apply_angular_impulse_pair, Constraint, JointKind, JointKindTag, JointPair};

/// Add-time description of a ball joint.
#[derive(Debug, Clone)]
pub struct BallJointSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// Lower bound of the relative angle (radians).
    pub min_angle: f64,
    /// Upper bound of the relative angle (radians).
    pub max_angle: f64,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl BallJointSpec {
    /// A ball joint with a symmetric range around the current relative angle.
    #[must_use]
    pub fn new(first: BodyId, second: BodyId, min_angle: f64, max_angle: f64) -> Self {
        Self {
            first,
            second,
            min_angle,
            max_angle,
            collide_connected: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimitState {
    Inactive,
    AtLower,
    AtUpper,
}

/// A ball (angle-range) joint.
#[derive(Debug, Clone)]
pub struct BallJoint {
    pair: JointPair,
    min_angle: f64,
    max_angle: f64,
    reference_angle: f64,

    mass: f64,
    bias: f64,
    state: LimitState,
    impulse: f64,
}

impl BallJoint {
    /// The allowed relative-angle range.
    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        (self.min_angle, self.max_angle)
    }

    fn limit(&self, bodies: &BodyStore) -> (LimitState, f64) {
        let (i, j) = self.pair.indices();
        let angle = match (bodies.by_index(i), bodies.by_index(j)) {
            (Some(a), Some(b)) => b.pose.rotation - a.pose.rotation - self.reference_angle,
            _ => return (LimitState::Inactive, 0.0),
        };
        if angle < self.min_angle {
            (LimitState::AtLower, angle - self.min_angle)
        } else if angle > self.max_angle {
            (LimitState::AtUpper, angle - self.max_angle)
        } else {
            (LimitState::Inactive, 0.0)
        }
    }
}

impl Constraint for BallJoint {
    fn pair(&self) -> &JointPair {
        &self.pair
    }

    fn pair_mut(&mut self) -> &mut JointPair {
        &mut self.pair
    }

    fn startup(&mut self, bodies: &mut BodyStore, dt: f64, cfg: &SolverConfig) {
        let (state, error) = self.limit(bodies);
        self.state = state;
        if state == LimitState::Inactive {
            self.impulse = 0.0;
            return;
        }

        let (i, j) = self.pair.indices();
        let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
            return;
        };
        let ii_sum = a.inverse_inertia() + b.inverse_inertia();
        self.mass = if ii_sum > 0.0 { 1.0 / ii_sum } else { 0.0 };
        self.bias = super::baumgarte_bias(error, dt, cfg);
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        if self.state == LimitState::Inactive {
            return;
        }
        self.impulse *= dt_ratio;
        if self.impulse != 0.0 {
            apply_angular_impulse_pair(bodies, self.pair.indices(), self.impulse, dt);
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        if self.state == LimitState::Inactive {
            return;
        }
        let (i, j) = self.pair.indices();
        let relative_omega = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            b.constraint_velocity.angular - a.constraint_velocity.angular
        };

        let lambda = -self.mass * (relative_omega + self.bias);
        let new_impulse = match self.state {
            // Below the lower bound the corrective torque only pushes up
            LimitState::AtLower => (self.impulse + lambda).max(0.0),
            LimitState::AtUpper => (self.impulse + lambda).min(0.0),
            LimitState::Inactive => return,
        };
        let delta = new_impulse - self.impulse;
        self.impulse = new_impulse;

        if delta != 0.0 {
            apply_angular_impulse_pair(bodies, (i, j), delta, dt);
        }
    }

    fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool {
        let (state, error) = self.limit(bodies);
        if state == LimitState::Inactive || error.abs() < super::ANGULAR_TOLERANCE {
            return true;
        }

        let (i, j) = self.pair.indices();
        let (a, b) = bodies.pair_mut(i, j);
        let ii_sum = a.inverse_inertia() + b.inverse_inertia();
        if ii_sum <= 0.0 {
            return true;
        }
        let correction = error.clamp(-cfg.max_position_correction, cfg.max_position_correction);
        let impulse = -correction / ii_sum;
        a.pose.rotation -= a.inverse_inertia() * impulse;
        b.pose.rotation += b.inverse_inertia() * impulse;

        false
    }

    fn reactive_force(&self, _dt: f64) -> Vector2<f64> {
        Vector2::zeros()
    }

    fn reactive_torque(&self, dt: f64) -> f64 {
        self.impulse / dt
    }
}

impl JointKind for BallJoint {
    type Spec = BallJointSpec;
    const KIND: JointKindTag = JointKindTag::Ball;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        if spec.max_angle < spec.min_angle {
            return Err(planar_types::SimError::invalid_specs(
                "ball joint needs min_angle <= max_angle",
            ));
        }
        let anchor = bodies
            .get(spec.first)
            .map(|b| b.pose.position)
            .unwrap_or_else(Point2::origin);
        let pair = JointPair::new(
            bodies,
            spec.first,
            spec.second,
            anchor,
            anchor,
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
            min_angle: spec.min_angle,
            max_angle: spec.max_angle,
            reference_angle: b.pose.rotation - a.pose.rotation,
            mass: 0.0,
            bias: 0.0,
            state: LimitState::Inactive,
            impulse: 0.0,
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.ball
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.ball
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use planar_types::{BodySpec, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);
    const DT: f64 = 1e-3;

    fn store_pair() -> (BodyStore, BodyId, BodyId) {
        let mut store = BodyStore::new();
        let a = store
            .add(&BodySpec::new().shape(ShapeSpec::rect(0.5, 0.5)), MATERIALS)
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(2.0, 0.0))
                    .shape(ShapeSpec::rect(0.5, 0.5)),
                MATERIALS,
            )
            .unwrap();
        (store, a, b)
    }

    #[test]
    fn test_inactive_inside_range() {
        let (mut store, a, b) = store_pair();
        store.get_mut(b).unwrap().velocity.angular = 0.5;
        store.prepare_constraint_velocities();

        let spec = BallJointSpec::new(a, b, -1.0, 1.0);
        let mut joint = BallJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        joint.solve_velocities(&mut store, DT);
        assert_eq!(joint.impulse, 0.0);
    }

    #[test]
    fn test_upper_limit_stops_spin() {
        let (mut store, a, b) = store_pair();
        // Already past the upper bound and still spinning up
        store.get_mut(b).unwrap().pose.rotation = 0.6;
        store.get_mut(b).unwrap().velocity.angular = 2.0;
        store.prepare_constraint_velocities();

        let spec = BallJointSpec::new(a, b, -0.5, 0.5);
        let mut joint = BallJoint::from_spec(&store, &spec).unwrap();
        let mut cfg = SolverConfig::default();
        cfg.baumgarte_coef = 0.0;

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
        }

        let omega = store.get(b).unwrap().constraint_velocity.angular;
        assert!(omega <= 1e-9, "spin past the limit must stop, got {omega}");
    }

    #[test]
    fn test_position_pass_clamps_back_into_range() {
        let (mut store, a, b) = store_pair();
        store.get_mut(b).unwrap().pose.rotation = 1.5;

        let spec = BallJointSpec::new(a, b, -0.5, 0.5);
        let mut joint = BallJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        for _ in 0..32 {
            if joint.solve_positions(&mut store, &cfg) {
                break;
            }
        }
        let angle = store.get(b).unwrap().pose.rotation;
        assert!(angle <= 0.5 + 1e-2 + 1e-9);
    }
}
