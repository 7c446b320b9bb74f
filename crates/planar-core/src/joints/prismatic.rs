//! Prismatic joint: motion constrained to an axis fixed in the first body,
//! with an optional relative-angle lock.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{apply_angular_impulse_pair, Constraint, JointKind, JointKindTag, JointPair};
use crate::linalg::{cross, normalize_or_x, perp};

/// Add-time description of a prismatic joint.
#[derive(Debug, Clone)]
pub struct PrismaticJointSpec {
    /// First body (carries the axis).
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// World-space anchor shared by both bodies.
    pub world_anchor: Point2<f64>,
    /// Sliding axis in world space at creation time.
    pub world_axis: Vector2<f64>,
    /// Lock the relative angle (the usual slider behavior).
    pub lock_rotation: bool,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl PrismaticJointSpec {
    /// A rotation-locked slider along `world_axis`.
    #[must_use]
    pub fn new(
        first: BodyId,
        second: BodyId,
        world_anchor: Point2<f64>,
        world_axis: Vector2<f64>,
    ) -> Self {
        Self {
            first,
            second,
            world_anchor,
            world_axis,
            lock_rotation: true,
            collide_connected: false,
        }
    }
}

/// A prismatic joint.
#[derive(Debug, Clone)]
pub struct PrismaticJoint {
    pair: JointPair,
    local_axis: Vector2<f64>,
    reference_angle: f64,
    lock_rotation: bool,

    perp_axis: Vector2<f64>,
    s1: f64,
    s2: f64,
    perp_mass: f64,
    angular_mass: f64,
    perp_bias: f64,
    angular_bias: f64,
    perp_impulse: f64,
    angular_impulse: f64,
}

impl PrismaticJoint {
    /// Sliding axis in the first body's frame.
    #[must_use]
    pub fn local_axis(&self) -> Vector2<f64> {
        self.local_axis
    }

    /// Whether the relative angle is locked.
    #[must_use]
    pub fn locks_rotation(&self) -> bool {
        self.lock_rotation
    }

    /// Geometry of the perpendicular row for the current poses:
    /// `(perp, s1, s2, C_perp)`.
    fn perp_geometry(
        &self,
        bodies: &BodyStore,
    ) -> Option<(Vector2<f64>, f64, f64, f64)> {
        let (i, j) = self.pair.indices();
        let a = bodies.by_index(i)?;
        let b = bodies.by_index(j)?;

        let wa1 = a.pose.transform_point(&self.pair.local_anchor1);
        let wa2 = b.pose.transform_point(&self.pair.local_anchor2);
        let r1 = wa1 - a.pose.position;
        let r2 = wa2 - b.pose.position;
        let d = wa2 - wa1;

        let axis = normalize_or_x(&a.pose.transform_vector(&self.local_axis));
        let perp_axis = perp(&axis);

        let s1 = cross(&(d + r1), &perp_axis);
        let s2 = cross(&r2, &perp_axis);
        let c = perp_axis.dot(&d);
        Some((perp_axis, s1, s2, c))
    }
}

impl Constraint for PrismaticJoint {
    fn pair(&self) -> &JointPair {
        &self.pair
    }

    fn pair_mut(&mut self) -> &mut JointPair {
        &mut self.pair
    }

    fn startup(&mut self, bodies: &mut BodyStore, dt: f64, cfg: &SolverConfig) {
        let Some((perp_axis, s1, s2, c)) = self.perp_geometry(bodies) else {
            return;
        };
        self.perp_axis = perp_axis;
        self.s1 = s1;
        self.s2 = s2;

        let (i, j) = self.pair.indices();
        let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
            return;
        };
        let k = a.inverse_mass()
            + b.inverse_mass()
            + a.inverse_inertia() * s1 * s1
            + b.inverse_inertia() * s2 * s2;
        self.perp_mass = if k > 0.0 { 1.0 / k } else { 0.0 };

        let ii_sum = a.inverse_inertia() + b.inverse_inertia();
        self.angular_mass = if ii_sum > 0.0 { 1.0 / ii_sum } else { 0.0 };

        self.perp_bias = super::baumgarte_bias(c, dt, cfg);
        let angle_error = b.pose.rotation - a.pose.rotation - self.reference_angle;
        self.angular_bias = if self.lock_rotation {
            super::baumgarte_bias(angle_error, dt, cfg)
        } else {
            0.0
        };
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        self.perp_impulse *= dt_ratio;
        self.angular_impulse *= dt_ratio;

        let (i, j) = self.pair.indices();
        if self.perp_impulse != 0.0 {
            let impulse = self.perp_axis * self.perp_impulse;
            let (a, b) = bodies.pair_mut(i, j);
            a.constraint_velocity.linear -= a.inverse_mass() * impulse;
            a.constraint_velocity.angular -= a.inverse_inertia() * self.s1 * self.perp_impulse;
            b.constraint_velocity.linear += b.inverse_mass() * impulse;
            b.constraint_velocity.angular += b.inverse_inertia() * self.s2 * self.perp_impulse;
            a.apply_sim_force(-impulse / dt);
            a.apply_sim_torque(-self.s1 * self.perp_impulse / dt);
            b.apply_sim_force(impulse / dt);
            b.apply_sim_torque(self.s2 * self.perp_impulse / dt);
        }
        if self.lock_rotation && self.angular_impulse != 0.0 {
            apply_angular_impulse_pair(bodies, (i, j), self.angular_impulse, dt);
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        let (i, j) = self.pair.indices();

        if self.lock_rotation {
            let relative_omega = {
                let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                    return;
                };
                b.constraint_velocity.angular - a.constraint_velocity.angular
            };
            let lambda = -self.angular_mass * (relative_omega + self.angular_bias);
            self.angular_impulse += lambda;
            apply_angular_impulse_pair(bodies, (i, j), lambda, dt);
        }

        let cdot = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            self.perp_axis
                .dot(&(b.constraint_velocity.linear - a.constraint_velocity.linear))
                + self.s2 * b.constraint_velocity.angular
                - self.s1 * a.constraint_velocity.angular
        };
        let lambda = -self.perp_mass * (cdot + self.perp_bias);
        self.perp_impulse += lambda;

        let impulse = self.perp_axis * lambda;
        let (a, b) = bodies.pair_mut(i, j);
        a.constraint_velocity.linear -= a.inverse_mass() * impulse;
        a.constraint_velocity.angular -= a.inverse_inertia() * self.s1 * lambda;
        b.constraint_velocity.linear += b.inverse_mass() * impulse;
        b.constraint_velocity.angular += b.inverse_inertia() * self.s2 * lambda;
        a.apply_sim_force(-impulse / dt);
        a.apply_sim_torque(-self.s1 * lambda / dt);
        b.apply_sim_force(impulse / dt);
        b.apply_sim_torque(self.s2 * lambda / dt);
    }

    fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool {
        let mut solved = true;

        if self.lock_rotation {
            let (i, j) = self.pair.indices();
            let angle_error = {
                let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                    return true;
                };
                b.pose.rotation - a.pose.rotation - self.reference_angle
            };
            if angle_error.abs() >= super::ANGULAR_TOLERANCE {
                solved = false;
                let (a, b) = bodies.pair_mut(i, j);
                let ii_sum = a.inverse_inertia() + b.inverse_inertia();
                if ii_sum > 0.0 {
                    let correction = angle_error
                        .clamp(-cfg.max_position_correction, cfg.max_position_correction);
                    let impulse = -correction / ii_sum;
                    a.pose.rotation -= a.inverse_inertia() * impulse;
                    b.pose.rotation += b.inverse_inertia() * impulse;
                }
            }
        }

        let Some((perp_axis, s1, s2, c)) = self.perp_geometry(bodies) else {
            return solved;
        };
        if c.abs() >= super::LINEAR_TOLERANCE {
            solved = false;
            let correction = c.clamp(-cfg.max_position_correction, cfg.max_position_correction);
            let (i, j) = self.pair.indices();
            let (a, b) = bodies.pair_mut(i, j);
            let k = a.inverse_mass()
                + b.inverse_mass()
                + a.inverse_inertia() * s1 * s1
                + b.inverse_inertia() * s2 * s2;
            if k > 0.0 {
                let lambda = -correction / k;
                let impulse = perp_axis * lambda;
                a.pose.position -= a.inverse_mass() * impulse;
                a.pose.rotation -= a.inverse_inertia() * s1 * lambda;
                b.pose.position += b.inverse_mass() * impulse;
                b.pose.rotation += b.inverse_inertia() * s2 * lambda;
            }
        }

        solved
    }

    fn reactive_force(&self, dt: f64) -> Vector2<f64> {
        self.perp_axis * (self.perp_impulse / dt)
    }

    fn reactive_torque(&self, dt: f64) -> f64 {
        self.angular_impulse / dt
    }
}

impl JointKind for PrismaticJoint {
    type Spec = PrismaticJointSpec;
    const KIND: JointKindTag = JointKindTag::Prismatic;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        if spec.world_axis.norm() < 1e-12 {
            return Err(planar_types::SimError::invalid_specs(
                "prismatic axis must be non-zero",
            ));
        }
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
            local_axis: a.pose.inverse_transform_vector(&spec.world_axis.normalize()),
            reference_angle: b.pose.rotation - a.pose.rotation,
            lock_rotation: spec.lock_rotation,
            perp_axis: Vector2::y(),
            s1: 0.0,
            s2: 0.0,
            perp_mass: 0.0,
            angular_mass: 0.0,
            perp_bias: 0.0,
            angular_bias: 0.0,
            perp_impulse: 0.0,
            angular_impulse: 0.0,
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.prismatic
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.prismatic
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
    fn test_slider_kills_off_axis_velocity() {
        let mut store = BodyStore::new();
        let rail = store
            .add(
                &BodySpec::new()
                    .shape(ShapeSpec::rect(5.0, 0.1))
                    .body_type(BodyType::Static),
                MATERIALS,
            )
            .unwrap();
        let slider = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .velocity(Vector2::new(2.0, 1.5))
                    .shape(ShapeSpec::rect(0.3, 0.3)),
                MATERIALS,
            )
            .unwrap();
        store.prepare_constraint_velocities();

        let spec = PrismaticJointSpec::new(rail, slider, Point2::new(1.0, 0.0), Vector2::x());
        let mut joint = PrismaticJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
        }

        let body = store.get(slider).unwrap();
        // Motion along the axis survives, off-axis motion is removed
        assert_relative_eq!(body.constraint_velocity.linear.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(body.constraint_velocity.linear.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(body.constraint_velocity.angular, 0.0, epsilon = 1e-9);
    }
}
