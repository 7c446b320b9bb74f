//! Joints: velocity constraints binding two bodies at local anchors.
//!
//! Every joint kind implements the uniform [`Constraint`] contract the
//! solver drives (`startup`, `warm_start`, `solve_velocities`,
//! `solve_positions`, reactive loads). Kinds live in per-kind managers
//! inside a [`JointSet`]; the driver iterates the kinds in a fixed order so
//! solve order is deterministic. Springs are the exception: they are force
//! generators and never enter the solver.
//!
//! Joints hold `(stable id, dense index)` pairs into the body store and are
//! revalidated each step; a joint whose body disappeared is pruned.

mod ball;
mod distance;
mod motor;
mod prismatic;
mod revolute;
mod rotor;
mod spring;
mod weld;

pub use ball::{BallJoint, BallJointSpec};
pub use distance::{DistanceJoint, DistanceJointSpec};
pub use motor::{MotorJoint, MotorJointSpec};
pub use prismatic::{PrismaticJoint, PrismaticJointSpec};
pub use revolute::{RevoluteJoint, RevoluteJointSpec};
pub use rotor::{RotorJoint, RotorJointSpec};
pub use spring::{Spring, SpringSpec};
pub use weld::{WeldJoint, WeldJointSpec};

use hashbrown::HashMap;
use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, JointId, SimError, SolverConfig};

use crate::body::BodyStore;

/// Linear position tolerance below which a joint row reports solved (m).
///
/// Tighter than the contact slop: joints are assembly constraints, not
/// resting contacts, and drift accumulates visibly.
pub(crate) const LINEAR_TOLERANCE: f64 = 5e-3;

/// Angular position tolerance below which a joint row reports solved (rad).
pub(crate) const ANGULAR_TOLERANCE: f64 = 1e-2;

/// Baumgarte bias for a joint position error, capped by the configured
/// threshold so deep errors cannot inject unbounded energy.
pub(crate) fn baumgarte_bias(error: f64, dt: f64, cfg: &SolverConfig) -> f64 {
    (cfg.baumgarte_coef * error / dt).clamp(-cfg.baumgarte_threshold, cfg.baumgarte_threshold)
}

/// Soft-constraint parameters.
///
/// A non-zero frequency turns a hard row into a damped spring: the
/// frequency and damping ratio derive the bias and softness used in place
/// of the Baumgarte term.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoftParams {
    /// Oscillation frequency in Hz.
    pub frequency: f64,
    /// Damping ratio (1 = critically damped).
    pub damping_ratio: f64,
}

impl SoftParams {
    /// Softness (`gamma`) and bias coefficient for the given effective
    /// mass sum and timestep; returns `(gamma, bias_coef)`.
    #[must_use]
    pub fn coefficients(&self, inv_mass_sum: f64, dt: f64) -> (f64, f64) {
        if inv_mass_sum <= 0.0 {
            return (0.0, 0.0);
        }
        let mass = 1.0 / inv_mass_sum;
        let omega = 2.0 * std::f64::consts::PI * self.frequency;
        let stiffness = mass * omega * omega;
        let damping = 2.0 * mass * self.damping_ratio * omega;

        let gamma_denom = dt * (damping + dt * stiffness);
        if gamma_denom <= 0.0 {
            return (0.0, 0.0);
        }
        let gamma = 1.0 / gamma_denom;
        let bias_coef = dt * stiffness * gamma;
        (gamma, bias_coef)
    }
}

/// The two attached bodies of a joint, with local anchors.
#[derive(Debug, Clone)]
pub struct JointPair {
    first: BodyId,
    second: BodyId,
    first_index: usize,
    second_index: usize,
    /// Anchor on the first body, local coordinates.
    pub local_anchor1: Point2<f64>,
    /// Anchor on the second body, local coordinates.
    pub local_anchor2: Point2<f64>,
    /// Whether the attached bodies may still collide with each other.
    pub collide_connected: bool,
}

impl JointPair {
    /// Bind two bodies at world-space anchor points.
    pub fn new(
        bodies: &BodyStore,
        first: BodyId,
        second: BodyId,
        world_anchor1: Point2<f64>,
        world_anchor2: Point2<f64>,
        collide_connected: bool,
    ) -> planar_types::Result<Self> {
        let a = bodies.get(first).ok_or(SimError::UnknownBody(first.raw()))?;
        let b = bodies
            .get(second)
            .ok_or(SimError::UnknownBody(second.raw()))?;
        if first == second {
            return Err(SimError::invalid_specs(
                "joint must bind two distinct bodies",
            ));
        }
        Ok(Self {
            first,
            second,
            first_index: a.index(),
            second_index: b.index(),
            local_anchor1: a.pose.inverse_transform_point(&world_anchor1),
            local_anchor2: b.pose.inverse_transform_point(&world_anchor2),
            collide_connected,
        })
    }

    /// First attached body.
    #[must_use]
    pub fn first(&self) -> BodyId {
        self.first
    }

    /// Second attached body.
    #[must_use]
    pub fn second(&self) -> BodyId {
        self.second
    }

    /// Whether the joint binds the given body.
    #[must_use]
    pub fn contains(&self, body: BodyId) -> bool {
        self.first == body || self.second == body
    }

    /// Refresh the dense indices; false when a body no longer resolves.
    pub fn revalidate(&mut self, bodies: &BodyStore) -> bool {
        match (bodies.index_of(self.first), bodies.index_of(self.second)) {
            (Some(i), Some(j)) => {
                self.first_index = i;
                self.second_index = j;
                true
            }
            _ => false,
        }
    }

    /// Dense indices of the pair.
    #[must_use]
    pub fn indices(&self) -> (usize, usize) {
        (self.first_index, self.second_index)
    }

    /// World-space anchors for the current poses.
    #[must_use]
    pub fn world_anchors(&self, bodies: &BodyStore) -> (Point2<f64>, Point2<f64>) {
        match (
            bodies.by_index(self.first_index),
            bodies.by_index(self.second_index),
        ) {
            (Some(a), Some(b)) => (
                a.pose.transform_point(&self.local_anchor1),
                b.pose.transform_point(&self.local_anchor2),
            ),
            _ => (Point2::origin(), Point2::origin()),
        }
    }

    /// Whether either attached body is awake.
    #[must_use]
    pub fn awake(&self, bodies: &BodyStore) -> bool {
        let asleep = |id| bodies.get(id).is_some_and(crate::body::Body::is_sleeping);
        !(asleep(self.first) && asleep(self.second))
    }
}

/// Apply `impulse` to a body pair: `-impulse` at offset `r1` on the first,
/// `+impulse` at offset `r2` on the second.
///
/// The impulse lands in the constraint-velocity iterate and is mirrored as
/// a simulation force (`impulse / dt`) so the integrator carries the same
/// change into the velocity state.
pub(crate) fn apply_impulse_pair(
    bodies: &mut BodyStore,
    indices: (usize, usize),
    impulse: Vector2<f64>,
    r1: &Vector2<f64>,
    r2: &Vector2<f64>,
    dt: f64,
) {
    use crate::linalg::cross;

    let (a, b) = bodies.pair_mut(indices.0, indices.1);
    a.constraint_velocity.linear -= a.inverse_mass() * impulse;
    a.constraint_velocity.angular -= a.inverse_inertia() * cross(r1, &impulse);
    b.constraint_velocity.linear += b.inverse_mass() * impulse;
    b.constraint_velocity.angular += b.inverse_inertia() * cross(r2, &impulse);

    a.apply_sim_force_at(-impulse / dt, r1);
    b.apply_sim_force_at(impulse / dt, r2);
}

/// Apply an angular-only impulse to a body pair: `-impulse` on the first,
/// `+impulse` on the second.
pub(crate) fn apply_angular_impulse_pair(
    bodies: &mut BodyStore,
    indices: (usize, usize),
    impulse: f64,
    dt: f64,
) {
    let (a, b) = bodies.pair_mut(indices.0, indices.1);
    a.constraint_velocity.angular -= a.inverse_inertia() * impulse;
    b.constraint_velocity.angular += b.inverse_inertia() * impulse;

    a.apply_sim_torque(-impulse / dt);
    b.apply_sim_torque(impulse / dt);
}

/// Uniform contract every solved joint kind provides.
pub trait Constraint {
    /// The attached pair.
    fn pair(&self) -> &JointPair;

    /// Mutable access to the attached pair.
    fn pair_mut(&mut self) -> &mut JointPair;

    /// Compute Jacobian data, effective masses and biases.
    fn startup(&mut self, bodies: &mut BodyStore, dt: f64, cfg: &SolverConfig);

    /// Re-apply the previous step's accumulated impulse, rescaled by the
    /// timestep ratio.
    fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64);

    /// One velocity iteration.
    fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64);

    /// One position iteration; true when the position error is within
    /// tolerance.
    fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool;

    /// Force transmitted through the joint over the last step.
    fn reactive_force(&self, dt: f64) -> Vector2<f64>;

    /// Torque transmitted through the joint over the last step.
    fn reactive_torque(&self, dt: f64) -> f64;

    /// Whether the joint binds the given body.
    fn contains(&self, body: BodyId) -> bool {
        self.pair().contains(body)
    }

    /// Whether either attached body is awake.
    fn awake(&self, bodies: &BodyStore) -> bool {
        self.pair().awake(bodies)
    }
}

/// Discriminates joint kinds inside the [`JointSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKindTag {
    /// Distance joint.
    Distance,
    /// Revolute joint.
    Revolute,
    /// Weld joint.
    Weld,
    /// Prismatic joint.
    Prismatic,
    /// Ball (angle-limit) joint.
    Ball,
    /// Rotor actuator.
    Rotor,
    /// Linear motor actuator.
    Motor,
    /// Spring (force generator, not solved).
    Spring,
}

/// A joint kind that can live in the [`JointSet`].
pub trait JointKind: Sized {
    /// Add-time description of the joint.
    type Spec;

    /// The tag stored in the id map.
    const KIND: JointKindTag;

    /// Build the joint from its spec, resolving body handles.
    fn from_spec(bodies: &BodyStore, spec: &Self::Spec) -> planar_types::Result<Self>;

    /// This kind's manager within the set.
    fn manager(set: &JointSet) -> &JointManager<Self>;

    /// This kind's manager within the set, mutably.
    fn manager_mut(set: &mut JointSet) -> &mut JointManager<Self>;
}

/// Per-kind container preserving insertion order.
#[derive(Debug, Clone)]
pub struct JointManager<J> {
    entries: Vec<(JointId, J)>,
}

impl<J> Default for JointManager<J> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<J> JointManager<J> {
    /// Number of joints of this kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manager is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a joint by id.
    #[must_use]
    pub fn get(&self, id: JointId) -> Option<&J> {
        self.entries.iter().find(|(i, _)| *i == id).map(|(_, j)| j)
    }

    /// Get a joint by id, mutably.
    #[must_use]
    pub fn get_mut(&mut self, id: JointId) -> Option<&mut J> {
        self.entries
            .iter_mut()
            .find(|(i, _)| *i == id)
            .map(|(_, j)| j)
    }

    /// Iterate `(id, joint)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (JointId, &J)> {
        self.entries.iter().map(|(id, j)| (*id, j))
    }

    fn push(&mut self, id: JointId, joint: J) {
        self.entries.push((id, joint));
    }

    fn remove(&mut self, id: JointId) -> Option<J> {
        let index = self.entries.iter().position(|(i, _)| *i == id)?;
        Some(self.entries.remove(index).1)
    }
}

/// All joints of a world, grouped per kind.
///
/// Solve order is the fixed kind order below, insertion order within each
/// kind.
#[derive(Debug, Clone, Default)]
pub struct JointSet {
    distance: JointManager<DistanceJoint>,
    revolute: JointManager<RevoluteJoint>,
    weld: JointManager<WeldJoint>,
    prismatic: JointManager<PrismaticJoint>,
    ball: JointManager<BallJoint>,
    rotor: JointManager<RotorJoint>,
    motor: JointManager<MotorJoint>,
    spring: JointManager<Spring>,
    kind_of: HashMap<JointId, JointKindTag>,
    next_id: u64,
}

macro_rules! for_each_solved_manager {
    ($set:expr, $entry:pat => $body:expr) => {
        for (_, $entry) in &mut $set.distance.entries {
            $body
        }
        for (_, $entry) in &mut $set.revolute.entries {
            $body
        }
        for (_, $entry) in &mut $set.weld.entries {
            $body
        }
        for (_, $entry) in &mut $set.prismatic.entries {
            $body
        }
        for (_, $entry) in &mut $set.ball.entries {
            $body
        }
        for (_, $entry) in &mut $set.rotor.entries {
            $body
        }
        for (_, $entry) in &mut $set.motor.entries {
            $body
        }
    };
}

impl JointSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Total number of joints, springs included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kind_of.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kind_of.is_empty()
    }

    /// Add a joint of kind `K`, returning its handle.
    pub fn add<K: JointKind>(
        &mut self,
        bodies: &BodyStore,
        spec: &K::Spec,
    ) -> planar_types::Result<JointId> {
        let joint = K::from_spec(bodies, spec)?;
        let id = JointId::new(self.next_id);
        self.next_id += 1;
        self.kind_of.insert(id, K::KIND);
        K::manager_mut(self).push(id, joint);
        Ok(id)
    }

    /// Remove a joint by handle.
    ///
    /// # Errors
    ///
    /// `UnknownJoint` if the handle does not resolve.
    pub fn remove(&mut self, id: JointId) -> planar_types::Result<()> {
        let kind = self
            .kind_of
            .remove(&id)
            .ok_or(SimError::UnknownJoint(id.raw()))?;
        let removed = match kind {
            JointKindTag::Distance => self.distance.remove(id).is_some(),
            JointKindTag::Revolute => self.revolute.remove(id).is_some(),
            JointKindTag::Weld => self.weld.remove(id).is_some(),
            JointKindTag::Prismatic => self.prismatic.remove(id).is_some(),
            JointKindTag::Ball => self.ball.remove(id).is_some(),
            JointKindTag::Rotor => self.rotor.remove(id).is_some(),
            JointKindTag::Motor => self.motor.remove(id).is_some(),
            JointKindTag::Spring => self.spring.remove(id).is_some(),
        };
        debug_assert!(removed, "kind map and managers must agree");
        Ok(())
    }

    /// The kind of a joint handle.
    #[must_use]
    pub fn kind_of(&self, id: JointId) -> Option<JointKindTag> {
        self.kind_of.get(&id).copied()
    }

    /// Manager of a joint kind (read).
    #[must_use]
    pub fn manager<K: JointKind>(&self) -> &JointManager<K> {
        K::manager(self)
    }

    /// Manager of a joint kind (write).
    pub fn manager_mut<K: JointKind>(&mut self) -> &mut JointManager<K> {
        K::manager_mut(self)
    }

    /// Pairs whose joints forbid mutual collision.
    #[must_use]
    pub fn non_colliding_pairs(&self) -> Vec<(BodyId, BodyId)> {
        let mut out = Vec::new();
        let mut collect = |pair: &JointPair| {
            if !pair.collide_connected {
                let (a, b) = (pair.first(), pair.second());
                out.push(if a <= b { (a, b) } else { (b, a) });
            }
        };
        for (_, j) in self.distance.iter() {
            collect(j.pair());
        }
        for (_, j) in self.revolute.iter() {
            collect(j.pair());
        }
        for (_, j) in self.weld.iter() {
            collect(j.pair());
        }
        for (_, j) in self.prismatic.iter() {
            collect(j.pair());
        }
        for (_, j) in self.ball.iter() {
            collect(j.pair());
        }
        for (_, j) in self.rotor.iter() {
            collect(j.pair());
        }
        for (_, j) in self.motor.iter() {
            collect(j.pair());
        }
        for (_, j) in self.spring.iter() {
            collect(j.pair());
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Prune joints whose bodies no longer resolve; refresh dense indices
    /// everywhere else.
    pub fn validate(&mut self, bodies: &BodyStore) {
        macro_rules! prune {
            ($manager:expr) => {
                $manager.entries.retain_mut(|(id, joint)| {
                    let keep = joint.pair_mut().revalidate(bodies);
                    if !keep {
                        self.kind_of.remove(id);
                    }
                    keep
                });
            };
        }
        prune!(self.distance);
        prune!(self.revolute);
        prune!(self.weld);
        prune!(self.prismatic);
        prune!(self.ball);
        prune!(self.rotor);
        prune!(self.motor);
        self.spring.entries.retain_mut(|(id, joint)| {
            let keep = joint.pair_mut().revalidate(bodies);
            if !keep {
                self.kind_of.remove(id);
            }
            keep
        });
    }

    /// Wake both bodies of any joint with at least one awake body.
    pub fn propagate_wakes(&self, bodies: &mut BodyStore) {
        let mut to_wake = Vec::new();
        let mut scan = |pair: &JointPair| {
            let a_sleeping = bodies.get(pair.first()).is_some_and(|b| b.is_sleeping());
            let b_sleeping = bodies.get(pair.second()).is_some_and(|b| b.is_sleeping());
            if a_sleeping != b_sleeping {
                to_wake.push(if a_sleeping { pair.first() } else { pair.second() });
            }
        };
        for (_, j) in self.distance.iter() {
            scan(j.pair());
        }
        for (_, j) in self.revolute.iter() {
            scan(j.pair());
        }
        for (_, j) in self.weld.iter() {
            scan(j.pair());
        }
        for (_, j) in self.prismatic.iter() {
            scan(j.pair());
        }
        for (_, j) in self.ball.iter() {
            scan(j.pair());
        }
        for (_, j) in self.rotor.iter() {
            scan(j.pair());
        }
        for (_, j) in self.motor.iter() {
            scan(j.pair());
        }
        for (_, j) in self.spring.iter() {
            scan(j.pair());
        }
        for id in to_wake {
            if let Some(body) = bodies.get_mut(id) {
                body.wake();
            }
        }
    }

    /// Apply spring forces (force stage, outside the solver).
    pub fn apply_spring_forces(&self, bodies: &mut BodyStore) {
        for (_, spring) in self.spring.iter() {
            spring.apply(bodies);
        }
    }

    /// Potential energy stored in the springs.
    #[must_use]
    pub fn spring_potential_energy(&self, bodies: &BodyStore) -> f64 {
        self.spring
            .iter()
            .map(|(_, s)| s.potential_energy(bodies))
            .sum()
    }

    /// Startup every solved constraint.
    pub fn startup(&mut self, bodies: &mut BodyStore, dt: f64, cfg: &SolverConfig) {
        for_each_solved_manager!(self, joint => joint.startup(bodies, dt, cfg));
    }

    /// Warm-start every solved constraint.
    pub fn warm_start(&mut self, bodies: &mut BodyStore, dt: f64, dt_ratio: f64) {
        for_each_solved_manager!(self, joint => joint.warm_start(bodies, dt, dt_ratio));
    }

    /// One velocity iteration over every solved constraint.
    pub fn solve_velocities(&mut self, bodies: &mut BodyStore, dt: f64) {
        for_each_solved_manager!(self, joint => joint.solve_velocities(bodies, dt));
    }

    /// One position iteration; true when every constraint reports solved.
    pub fn solve_positions(&mut self, bodies: &mut BodyStore, cfg: &SolverConfig) -> bool {
        let mut all_solved = true;
        for_each_solved_manager!(self, joint => {
            all_solved &= joint.solve_positions(bodies, cfg);
        });
        all_solved
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use planar_types::{BodySpec, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);

    fn two_bodies() -> (BodyStore, BodyId, BodyId) {
        let mut store = BodyStore::new();
        let a = store
            .add(&BodySpec::new().shape(ShapeSpec::circle(0.5)), MATERIALS)
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(2.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();
        (store, a, b)
    }

    #[test]
    fn test_add_and_remove_joint() {
        let (store, a, b) = two_bodies();
        let mut set = JointSet::new();

        let spec = DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(2.0, 0.0));
        let id = set.add::<DistanceJoint>(&store, &spec).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.kind_of(id), Some(JointKindTag::Distance));

        set.remove(id).unwrap();
        assert!(set.is_empty());
        assert!(set.remove(id).is_err());
    }

    #[test]
    fn test_add_with_unknown_body_fails() {
        let (store, a, _) = two_bodies();
        let mut set = JointSet::new();
        let spec = DistanceJointSpec::rigid(
            a,
            BodyId::new(999),
            Point2::origin(),
            Point2::new(2.0, 0.0),
        );
        assert!(set.add::<DistanceJoint>(&store, &spec).is_err());
    }

    #[test]
    fn test_validate_prunes_dangling() {
        let (mut store, a, b) = two_bodies();
        let mut set = JointSet::new();
        let spec = DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(2.0, 0.0));
        set.add::<DistanceJoint>(&store, &spec).unwrap();

        store.remove(b).unwrap();
        set.validate(&store);
        assert!(set.is_empty(), "dangling joint must be pruned");
    }

    #[test]
    fn test_non_colliding_pairs() {
        let (store, a, b) = two_bodies();
        let mut set = JointSet::new();
        let mut spec = DistanceJointSpec::rigid(a, b, Point2::origin(), Point2::new(2.0, 0.0));
        spec.collide_connected = false;
        set.add::<DistanceJoint>(&store, &spec).unwrap();

        assert_eq!(set.non_colliding_pairs(), vec![(a, b)]);
    }

    #[test]
    fn test_soft_params_coefficients() {
        let soft = SoftParams {
            frequency: 5.0,
            damping_ratio: 0.7,
        };
        let (gamma, bias) = soft.coefficients(1.0, 1e-3);
        assert!(gamma > 0.0);
        assert!(bias > 0.0);

        // Zero inverse mass (two static bodies) degenerates to hard
        let (gamma, bias) = soft.coefficients(0.0, 1e-3);
        assert_eq!(gamma, 0.0);
        assert_eq!(bias, 0.0);
    }
}
