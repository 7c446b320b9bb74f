//! Distance joint: one row along the anchor-to-anchor direction, with a
//! length band.
//!
//! Equal bounds make the joint rigid (unclamped impulse); an unequal band
//! activates a one-sided row only when the distance leaves `[min, max]`.
//! Optional soft parameters (frequency, damping ratio) turn the rigid row
//! into a damped spring.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, SolverConfig};

use crate::body::BodyStore;
use crate::joints::{apply_impulse_pair, Constraint, JointKind, JointKindTag, JointPair, SoftParams};
use crate::linalg::{cross, normalize_or_x};

/// Add-time description of a distance joint.
#[derive(Debug, Clone)]
pub struct DistanceJointSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// World-space anchor on the first body.
    pub world_anchor1: Point2<f64>,
    /// World-space anchor on the second body.
    pub world_anchor2: Point2<f64>,
    /// Lower length bound.
    pub min_length: f64,
    /// Upper length bound.
    pub max_length: f64,
    /// Soft-constraint parameters; `None` keeps the row hard.
    pub soft: Option<SoftParams>,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl DistanceJointSpec {
    /// A rigid joint holding the current anchor distance.
    #[must_use]
    pub fn rigid(
        first: BodyId,
        second: BodyId,
        world_anchor1: Point2<f64>,
        world_anchor2: Point2<f64>,
    ) -> Self {
        let length = (world_anchor2 - world_anchor1).norm();
        Self {
            first,
            second,
            world_anchor1,
            world_anchor2,
            min_length: length,
            max_length: length,
            soft: None,
            collide_connected: true,
        }
    }

    /// Set the allowed length band.
    #[must_use]
    pub fn with_band(mut self, min_length: f64, max_length: f64) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    /// Make the row soft.
    #[must_use]
    pub fn with_soft(mut self, soft: SoftParams) -> Self {
        self.soft = Some(soft);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandState {
    Rigid,
    AtLower,
    AtUpper,
    Inactive,
}

/// A distance joint.
#[derive(Debug, Clone)]
pub struct DistanceJoint {
    pair: JointPair,
    min_length: f64,
    max_length: f64,
    soft: Option<SoftParams>,

    u: Vector2<f64>,
    r1: Vector2<f64>,
    r2: Vector2<f64>,
    mass: f64,
    bias: f64,
    gamma: f64,
    state: BandState,
    impulse: f64,
}

impl DistanceJoint {
    /// Current length bounds.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64) {
        (self.min_length, self.max_length)
    }

    /// Soft-constraint parameters, if any.
    #[must_use]
    pub fn soft(&self) -> Option<SoftParams> {
        self.soft
    }

    /// Anchor-to-anchor distance for the current poses.
    #[must_use]
    pub fn current_length(&self, bodies: &BodyStore) -> f64 {
        let (wa1, wa2) = self.pair.world_anchors(bodies);
        (wa2 - wa1).norm()
    }

    fn band_state(&self, dist: f64) -> (BandState, f64) {
        if (self.max_length - self.min_length).abs() < 1e-12 {
            (BandState::Rigid, dist - self.min_length)
        } else if dist < self.min_length {
            (BandState::AtLower, dist - self.min_length)
        } else if dist > self.max_length {
            (BandState::AtUpper, dist - self.max_length)
        } else {
            (BandState::Inactive, 0.0)
        }
    }
}

impl Constraint for DistanceJoint {
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

        let d = wa2 - wa1;
        let dist = d.norm();
        self.u = normalize_or_x(&d);
        self.r1 = wa1 - a.pose.position;
        self.r2 = wa2 - b.pose.position;

        let (state, error) = self.band_state(dist);
        self.state = state;
        if state == BandState::Inactive {
            self.impulse = 0.0;
            return;
        }

        let c1 = cross(&self.r1, &self.u);
        let c2 = cross(&self.r2, &self.u);
        let k = a.inverse_mass()
            + b.inverse_mass()
            + a.inverse_inertia() * c1 * c1
            + b.inverse_inertia() * c2 * c2;

        match (self.soft, state) {
            (Some(soft), BandState::Rigid) => {
                let (gamma, bias_coef) = soft.coefficients(k, dt);
                self.gamma = gamma;
                self.bias = error * bias_coef;
            }
            _ => {
                self.gamma = 0.0;
                self.bias = super::baumgarte_bias(error, dt, cfg);
            }
        }

        let denom = k + self.gamma;
        self.mass = if denom > 0.0 { 1.0 / denom } else { 0.0 };
    }

    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        if self.state == BandState::Inactive {
            return;
        }
        self.impulse *= dt_ratio;
        if self.impulse != 0.0 {
            apply_impulse_pair(
                bodies,
                self.pair.indices(),
                self.u * self.impulse,
                &self.r1,
                &self.r2,
                dt,
            );
        }
    }

    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        if self.state == BandState::Inactive {
            return;
        }
        let (i, j) = self.pair.indices();
        let cdot = {
            let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
                return;
            };
            self.u
                .dot(&(b.constraint_velocity_at(&self.r2) - a.constraint_velocity_at(&self.r1)))
        };

        let lambda = -self.mass * (cdot + self.bias + self.gamma * self.impulse);
        let new_impulse = match self.state {
            BandState::Rigid => self.impulse + lambda,
            // Below the band: only push apart
            BandState::AtLower => (self.impulse + lambda).max(0.0),
            // Above the band: only pull together
            BandState::AtUpper => (self.impulse + lambda).min(0.0),
            BandState::Inactive => return,
        };
        let delta = new_impulse - self.impulse;
        self.impulse = new_impulse;

        if delta != 0.0 {
            apply_impulse_pair(bodies, (i, j), self.u * delta, &self.r1, &self.r2, dt);
        }
    }

    fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool {
        if self.soft.is_some() {
            // Soft rows leave position error to the spring
            return true;
        }

        let (wa1, wa2) = self.pair.world_anchors(bodies);
        let d = wa2 - wa1;
        let dist = d.norm();
        let (state, error) = self.band_state(dist);
        if state == BandState::Inactive || error.abs() < super::LINEAR_TOLERANCE {
            return true;
        }

        let u = normalize_or_x(&d);
        let (i, j) = self.pair.indices();
        let correction = error.clamp(-cfg.max_position_correction, cfg.max_position_correction);

        let (a, b) = bodies.pair_mut(i, j);
        let r1 = wa1 - a.pose.position;
        let r2 = wa2 - b.pose.position;
        let c1 = cross(&r1, &u);
        let c2 = cross(&r2, &u);
        let k = a.inverse_mass()
            + b.inverse_mass()
            + a.inverse_inertia() * c1 * c1
            + b.inverse_inertia() * c2 * c2;
        if k <= 0.0 {
            return true;
        }

        let impulse = u * (-correction / k);
        a.pose.position -= a.inverse_mass() * impulse;
        a.pose.rotation -= a.inverse_inertia() * cross(&r1, &impulse);
        b.pose.position += b.inverse_mass() * impulse;
        b.pose.rotation += b.inverse_inertia() * cross(&r2, &impulse);

        false
    }

    fn reactive_force(&self, dt: f64) -> Vector2<f64> {
        self.u * (self.impulse / dt)
    }

    fn reactive_torque(&self, _dt: f64) -> f64 {
        0.0
    }
}

impl JointKind for DistanceJoint {
    type Spec = DistanceJointSpec;
    const KIND: JointKindTag = JointKindTag::Distance;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        if spec.min_length < 0.0 || spec.max_length < spec.min_length {
            return Err(planar_types::SimError::invalid_specs(
                "distance joint needs 0 <= min_length <= max_length",
            ));
        }
        let pair = JointPair::new(
            bodies,
            spec.first,
            spec.second,
            spec.world_anchor1,
            spec.world_anchor2,
            spec.collide_connected,
        )?;
        Ok(Self {
            pair,
            min_length: spec.min_length,
            max_length: spec.max_length,
            soft: spec.soft,
            u: Vector2::x(),
            r1: Vector2::zeros(),
            r2: Vector2::zeros(),
            mass: 0.0,
            bias: 0.0,
            gamma: 0.0,
            state: BandState::Inactive,
            impulse: 0.0,
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.distance
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.distance
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

    fn separated_pair(gap: f64) -> (BodyStore, BodyId, BodyId) {
        let mut store = BodyStore::new();
        let a = store
            .add(&BodySpec::new().shape(ShapeSpec::circle(0.1)), MATERIALS)
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(gap, 0.0))
                    .shape(ShapeSpec::circle(0.1)),
                MATERIALS,
            )
            .unwrap();
        (store, a, b)
    }

    #[test]
    fn test_rigid_joint_pulls_receding_bodies() {
        let (mut store, a, b) = separated_pair(1.0);
        store.get_mut(b).unwrap().velocity.linear = Vector2::new(1.0, 0.0);
        store.prepare_constraint_velocities();

        let spec = DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(1.0, 0.0));
        let mut joint = DistanceJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        for _ in 0..8 {
            joint.solve_velocities(&mut store, DT);
        }

        // The receding relative velocity along the rod is cancelled
        let va = store.get(a).unwrap().constraint_velocity.linear.x;
        let vb = store.get(b).unwrap().constraint_velocity.linear.x;
        assert_relative_eq!(vb - va, 0.0, epsilon = 1e-9);
        assert!(joint.impulse != 0.0);
    }

    #[test]
    fn test_band_inactive_inside() {
        let (mut store, a, b) = separated_pair(1.0);
        store.prepare_constraint_velocities();

        let spec = DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(1.0, 0.0))
            .with_band(0.5, 1.5);
        let mut joint = DistanceJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        joint.startup(&mut store, DT, &cfg);
        joint.solve_velocities(&mut store, DT);
        assert_eq!(joint.impulse, 0.0, "inside the band nothing happens");
        assert!(joint.solve_positions(&mut store, &cfg));
    }

    #[test]
    fn test_position_solve_restores_length() {
        // Stretched to 1.5 with a rest length of 1
        let (mut store, a, b) = separated_pair(1.5);
        let spec = DistanceJointSpec {
            min_length: 1.0,
            max_length: 1.0,
            ..DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(1.5, 0.0))
        };
        let mut joint = DistanceJoint::from_spec(&store, &spec).unwrap();
        let cfg = SolverConfig::default();

        for _ in 0..16 {
            if joint.solve_positions(&mut store, &cfg) {
                break;
            }
        }
        assert_relative_eq!(joint.current_length(&store), 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_invalid_band_rejected() {
        let (store, a, b) = separated_pair(1.0);
        let spec = DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(1.0, 0.0))
            .with_band(2.0, 1.0);
        assert!(DistanceJoint::from_spec(&store, &spec).is_err());
    }
}
