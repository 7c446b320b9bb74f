//! Rotor: drives the relative angular velocity toward a target with a
//! bounded corrective impulse.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{apply_angular_impulse_pair, Constraint, JointKind, JointKindTag, JointPair};

/// Add-time description of a rotor.
#[derive(Debug, Clone)]
pub struct RotorJointSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// Target relative angular velocity (rad/s), second minus first.
    pub target_angular_velocity: f64,
    /// Largest torque the rotor can exert (N·m).
    pub max_torque: f64,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl RotorJointSpec {
    /// A rotor spinning the pair toward `target` rad/s.
    #[must_use]
    pub fn new(first: BodyId, second: BodyId, target: f64, max_torque: f64) -> Self {
        Self {
            first,
            second,
            target_angular_velocity: target,
            max_torque,
            collide_connected: true,
        }
    }
}

/// A rotor actuator.
#[derive(Debug, Clone)]
pub struct RotorJoint {
    pair: JointPair,
    /// Target relative angular velocity (rad/s).
    pub target_angular_velocity: f64,
    /// Torque bound (N·m).
    pub max_torque: f64,

    mass: f64,
    impulse: f64,
}

impl Constraint for RotorJoint {
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
        let ii_sum = a.inverse_inertia() + b.inverse_inertia();
        self.mass = if ii_sum > 0.0 { 1.0 / ii_sum } else { 0.0 };
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        self.impulse *= dt_ratio;
        if self.impulse != 0.0 {
            apply_angular_impulse_pair(bodies, self.pair.indices(), self.impulse, dt);
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        let (i, j) = self.pair.indices();
        let relative_omega = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            b.constraint_velocity.angular - a.constraint_velocity.angular
        };

        let lambda = -self.mass * (relative_omega - self.target_angular_velocity);
        let max_impulse = self.max_torque * dt;
        let new_impulse = (self.impulse + lambda).clamp(-max_impulse, max_impulse);
        let delta = new_impulse - self.impulse;
        self.impulse = new_impulse;

        if delta != 0.0 {
            apply_angular_impulse_pair(bodies, (i, j), delta, dt);
        }
    }

    fn solve_positions(&mut self, _bodies: &mut BodyStore, _cfg: &SolverConfig) -> bool {
        // Velocity drive only
        true
    }

    fn reactive_force(&self, _dt: f64) -> Vector2<f64> {
        Vector2::zeros()
    }

    fn reactive_torque(&self, dt: f64) -> f64 {
        self.impulse / dt
    }
}

impl JointKind for RotorJoint {
    type Spec = RotorJointSpec;
    const KIND: JointKindTag = JointKindTag::Rotor;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        if spec.max_torque < 0.0 {
            return Err(planar_types::SimError::invalid_specs(
                "rotor max_torque cannot be negative",
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
            target_angular_velocity: spec.target_angular_velocity,
            max_torque: spec.max_torque,
            mass: 0.0,
            impulse: 0.0,
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.rotor
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.rotor
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
    fn test_rotor_reaches_target_when_unbounded() {
        let mut store = BodyStore::new();
        let base = store
            .add(
                &BodySpec::new()
                    .shape(ShapeSpec::circle(0.5))
                    .body_type(BodyType::Static),
                MATERIALS,
            )
            .unwrap();
        let wheel = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let spec = RotorJointSpec::new(base, wheel, 4.0, 1e6);
        let mut joint = RotorJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
        }

        assert_relative_eq!(
            store.get(wheel).unwrap().constraint_velocity.angular,
            4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rotor_impulse_is_bounded() {
        let mut store = BodyStore::new();
        let base = store
            .add(
                &BodySpec::new()
                    .shape(ShapeSpec::circle(0.5))
                    .body_type(BodyType::Static),
                MATERIALS,
            )
            .unwrap();
        let wheel = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5))
                    .mass(10.0),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let max_torque = 0.5;
        let spec = RotorJointSpec::new(base, wheel, 100.0, max_torque);
        let mut joint = RotorJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
            assert!(joint.impulse.abs() <= max_torque * DT + 1e-15);
        }
        // Far from the target: the bounded rotor saturates
        assert_relative_eq!(joint.impulse, max_torque * DT, epsilon = 1e-12);
    }
}
