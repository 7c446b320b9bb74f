//! Linear motor: drives the relative linear velocity toward a target with
//! a bounded corrective impulse.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{Constraint, JointKind, JointKindTag, JointPair};

/// Add-time description of a linear motor.
#[derive(Debug, Clone)]
pub struct MotorJointSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// Target relative linear velocity (m/s), second minus first.
    pub target_velocity: Vector2<f64>,
    /// Largest force the motor can exert (N).
    pub max_force: f64,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl MotorJointSpec {
    /// A motor driving the pair toward `target` m/s.
    #[must_use]
    pub fn new(first: BodyId, second: BodyId, target: Vector2<f64>, max_force: f64) -> Self {
        Self {
            first,
            second,
            target_velocity: target,
            max_force,
            collide_connected: true,
        }
    }
}

/// A linear motor actuator.
#[derive(Debug, Clone)]
pub struct MotorJoint {
    pair: JointPair,
    /// Target relative linear velocity (m/s).
    pub target_velocity: Vector2<f64>,
    /// Force bound (N).
    pub max_force: f64,

    mass: f64,
    impulse: Vector2<f64>,
}

impl MotorJoint {
    fn apply(&self, bodies: &mut BodyStore, impulse: Vector2<f64>, dt: f64) {
        let (i, j) = self.pair.indices();
        let (a, b) = bodies.pair_mut(i, j);
        a.constraint_velocity.linear -= a.inverse_mass() * impulse;
        b.constraint_velocity.linear += b.inverse_mass() * impulse;
        a.apply_sim_force(-impulse / dt);
        b.apply_sim_force(impulse / dt);
    }
}

impl Constraint for MotorJoint {
    fn pair(&self) -> &JointPair {
        &self.pair
    }

    fn pair_mut(&mut self) -> &mut JointPair {
        &mut self.pair
    }

    fn startup(&mut self, bodies: &mut BodyStore, _dt: f64, _cfg: &SolverConfig) {
        let (i, j) = self.pair.indices();
        let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
            return;
        };
        let im_sum = a.inverse_mass() + b.inverse_mass();
        self.mass = if im_sum > 0.0 { 1.0 / im_sum } else { 0.0 };
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        self.impulse *= dt_ratio;
        if self.impulse.norm_squared() > 0.0 {
            self.apply(bodies, self.impulse, dt);
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        let (i, j) = self.pair.indices();
        let relative = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            b.constraint_velocity.linear - a.constraint_velocity.linear
        };

        let lambda = (self.target_velocity - relative) * self.mass;
        let max_impulse = self.max_force * dt;
        let mut new_impulse = self.impulse + lambda;
        if new_impulse.norm() > max_impulse {
            new_impulse = new_impulse.normalize() * max_impulse;
        }
        let delta = new_impulse - self.impulse;
        self.impulse = new_impulse;

        if delta.norm_squared() > 0.0 {
            self.apply(bodies, delta, dt);
        }
    }

    fn solve_positions(&mut self, _bodies: &mut BodyStore, _cfg: &SolverConfig) -> bool {
        // Velocity drive only
        true
    }

    fn reactive_force(&self, dt: f64) -> Vector2<f64> {
        self.impulse / dt
    }

    fn reactive_torque(&self, _dt: f64) -> f64 {
        0.0
    }
}

impl JointKind for MotorJoint {
    type Spec = MotorJointSpec;
    const KIND: JointKindTag = JointKindTag::Motor;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        if spec.max_force < 0.0 {
            return Err(planar_types::SimError::invalid_specs(
                "motor max_force cannot be negative",
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
        Ok(Self {
            pair,
            target_velocity: spec.target_velocity,
            max_force: spec.max_force,
            mass: 0.0,
            impulse: Vector2::zeros(),
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.motor
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.motor
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
    fn test_motor_drives_and_saturates() {
        let mut store = BodyStore::new();
        let anchor = store
            .add(
                &BodySpec::new()
                    .shape(ShapeSpec::circle(0.5))
                    .body_type(BodyType::Static),
                MATERIALS,
            )
            .unwrap();
        let cart = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .shape(ShapeSpec::rect(0.5, 0.2)),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let spec = MotorJointSpec::new(anchor, cart, Vector2::new(3.0, 0.0), 1e6);
        let mut joint = MotorJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
        }
        assert_relative_eq!(
            store.get(cart).unwrap().constraint_velocity.linear.x,
            3.0,
            epsilon = 1e-9
        );

        // Bounded motor cannot exceed max_force * dt
        let weak = MotorJointSpec::new(anchor, cart, Vector2::new(100.0, 0.0), 2.0);
        let mut weak_joint = MotorJoint::from_spec(&store, &weak).unwrap();
        weak_joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            weak_joint.solve_velocities(&mut store, DT);
            assert!(weak_joint.impulse.norm() <= 2.0 * DT + 1e-15);
        }
    }
}
