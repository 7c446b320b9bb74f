//! Springs: soft joints applied as forces, never through the solver.
//!
//! `F = k·Δx + c·Δẋ`, optionally augmented with a polynomial non-linear
//! term that stiffens the response at large displacements.

use nalgebra::{Point2, Vector2};
use planar_types::BodyId;

use crate::body::BodyStore;
use crate::joints::{JointKind, JointKindTag, JointPair};
use crate::linalg::{cross, normalize_or_x};

/// Add-time description of a spring.
#[derive(Debug, Clone)]
pub struct SpringSpec {
    /// First body.
    pub first: BodyId,
    /// Second body.
    pub second: BodyId,
    /// World-space anchor on the first body.
    pub world_anchor1: Point2<f64>,
    /// World-space anchor on the second body.
    pub world_anchor2: Point2<f64>,
    /// Stiffness (N/m).
    pub stiffness: f64,
    /// Damping (N·s/m).
    pub damping: f64,
    /// Rest length (m).
    pub rest_length: f64,
    /// Number of polynomial non-linear terms (0 keeps the spring linear).
    pub non_linear_terms: u32,
    /// Weight of the non-linear contribution.
    pub non_linear_contribution: f64,
    /// Whether the attached bodies may still collide.
    pub collide_connected: bool,
}

impl SpringSpec {
    /// A linear spring between two world anchors, at rest at the current
    /// distance.
    #[must_use]
    pub fn new(
        first: BodyId,
        second: BodyId,
        world_anchor1: Point2<f64>,
        world_anchor2: Point2<f64>,
        stiffness: f64,
        damping: f64,
    ) -> Self {
        Self {
            first,
            second,
            world_anchor1,
            world_anchor2,
            stiffness,
            damping,
            rest_length: (world_anchor2 - world_anchor1).norm(),
            non_linear_terms: 0,
            non_linear_contribution: 0.0,
            collide_connected: true,
        }
    }

    /// Set the rest length.
    #[must_use]
    pub fn rest_length(mut self, rest_length: f64) -> Self {
        self.rest_length = rest_length;
        self
    }

    /// Add polynomial stiffening terms.
    #[must_use]
    pub fn non_linear(mut self, terms: u32, contribution: f64) -> Self {
        self.non_linear_terms = terms;
        self.non_linear_contribution = contribution;
        self
    }
}

/// A spring joint.
#[derive(Debug, Clone)]
pub struct Spring {
    pair: JointPair,
    /// Stiffness (N/m).
    pub stiffness: f64,
    /// Damping (N·s/m).
    pub damping: f64,
    /// Rest length (m).
    pub rest_length: f64,
    /// Number of polynomial non-linear terms.
    pub non_linear_terms: u32,
    /// Weight of the non-linear contribution.
    pub non_linear_contribution: f64,
}

impl Spring {
    /// The attached pair.
    #[must_use]
    pub fn pair(&self) -> &JointPair {
        &self.pair
    }

    /// Mutable access to the attached pair.
    pub fn pair_mut(&mut self) -> &mut JointPair {
        &mut self.pair
    }

    /// Polynomial stiffening of a displacement.
    fn non_linear_displacement(&self, displacement: Vector2<f64>) -> Vector2<f64> {
        let mut term = displacement;
        let mut cumulative = displacement;
        let mut decay = 16.0;
        for _ in 0..self.non_linear_terms {
            term = term.component_mul(&displacement).component_mul(&displacement);
            cumulative += term / decay;
            decay *= decay;
        }
        cumulative * self.non_linear_contribution
    }

    /// Spring force on the first body plus the torques on both bodies:
    /// `(force, torque1, torque2)`.
    #[must_use]
    pub fn force(&self, bodies: &BodyStore) -> (Vector2<f64>, f64, f64) {
        let (i, j) = self.pair.indices();
        let (Some(a), Some(b)) = (bodies.by_index(i), bodies.by_index(j)) else {
            return (Vector2::zeros(), 0.0, 0.0);
        };

        let ga1 = a.pose.transform_point(&self.pair.local_anchor1);
        let ga2 = b.pose.transform_point(&self.pair.local_anchor2);
        let offset1 = ga1 - a.pose.position;
        let offset2 = ga2 - b.pose.position;

        let relpos = ga2 - ga1;
        let direction = normalize_or_x(&relpos);
        let relvel =
            direction * (b.velocity_at(&offset2) - a.velocity_at(&offset1)).dot(&direction);

        let displacement = relpos - direction * self.rest_length;
        let elastic = if self.non_linear_terms != 0 {
            self.non_linear_displacement(displacement)
        } else {
            displacement
        };
        let force = elastic * self.stiffness + relvel * self.damping;

        let torque1 = cross(&offset1, &force);
        let torque2 = cross(&force, &offset2);
        (force, torque1, torque2)
    }

    /// Apply the spring's forces to both bodies (force stage).
    pub fn apply(&self, bodies: &mut BodyStore) {
        let (force, torque1, torque2) = self.force(bodies);
        let (i, j) = self.pair.indices();
        let (a, b) = bodies.pair_mut(i, j);

        a.apply_sim_force(force);
        a.apply_sim_torque(torque1);
        b.apply_sim_force(-force);
        b.apply_sim_torque(torque2);
    }

    /// Elastic potential energy for the current poses.
    #[must_use]
    pub fn potential_energy(&self, bodies: &BodyStore) -> f64 {
        let (wa1, wa2) = self.pair.world_anchors(bodies);
        let stretch = (wa2 - wa1).norm() - self.rest_length;
        0.5 * self.stiffness * stretch * stretch
    }
}

impl JointKind for Spring {
    type Spec = SpringSpec;
    const KIND: JointKindTag = JointKindTag::Spring;

    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self> {
        if spec.stiffness < 0.0 || spec.damping < 0.0 || spec.rest_length < 0.0 {
            return Err(planar_types::SimError::invalid_specs(
                "spring parameters cannot be negative",
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
            stiffness: spec.stiffness,
            damping: spec.damping,
            rest_length: spec.rest_length,
            non_linear_terms: spec.non_linear_terms,
            non_linear_contribution: spec.non_linear_contribution,
        })
    }

    fn manager(set: &super::JointSet) -> &super::JointManager<Self> {
        &set.spring
    }

    fn manager_mut(set: &mut super::JointSet) -> &mut super::JointManager<Self> {
        &mut set.spring
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_types::{BodySpec, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);

    fn stretched_spring(gap: f64, rest: f64) -> (BodyStore, Spring) {
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
        let spec = SpringSpec::new(
            a,
            b,
            Point2::origin(),
            Point2::new(gap, 0.0),
            10.0,
            0.0,
        )
        .rest_length(rest);
        let spring = Spring::from_spec(&store, &spec).unwrap();
        (store, spring)
    }

    #[test]
    fn test_stretched_spring_pulls_together() {
        let (store, spring) = stretched_spring(2.0, 1.0);
        let (force, t1, t2) = spring.force(&store);

        // Force on the first body points toward the second
        assert!(force.x > 0.0);
        assert_relative_eq!(force.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(t1, 0.0, epsilon = 1e-12);
        assert_relative_eq!(t2, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_at_rest_no_force() {
        let (store, spring) = stretched_spring(1.0, 1.0);
        let (force, _, _) = spring.force(&store);
        assert_relative_eq!(force.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_potential_energy() {
        let (store, spring) = stretched_spring(2.0, 1.0);
        // E = k x² / 2 = 10 * 1 / 2
        assert_relative_eq!(spring.potential_energy(&store), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_non_linear_term_stiffens() {
        let (store, mut spring) = stretched_spring(3.0, 1.0);
        let (linear_force, _, _) = spring.force(&store);

        spring.non_linear_terms = 2;
        spring.non_linear_contribution = 1.0;
        let (non_linear_force, _, _) = spring.force(&store);

        assert!(non_linear_force.norm() > linear_force.norm());
    }

    #[test]
    fn test_apply_adds_opposite_forces() {
        let (mut store, spring) = stretched_spring(2.0, 1.0);
        spring.apply(&mut store);

        let fa = store.by_index(0).unwrap().force();
        let fb = store.by_index(1).unwrap().force();
        assert_relative_eq!((fa + fb).norm(), 0.0, epsilon = 1e-9);
        assert!(fa.x > 0.0);
    }
}
