//! Rigid bodies and the dense body store.
//!
//! The store owns every body, keeps them densely indexed, and maps state to
//! and from the integrator's flat state vector. Removal is O(1) swap-remove:
//! the last body takes the vacated slot and its index is patched, so dense
//! indices stay contiguous at all times.

use hashbrown::HashMap;
use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, BodySpec, BodyType, MassProperties, Pose, SimError, Velocity};

use crate::integrator::State;
use crate::linalg::cross;
use crate::shape::{Aabb, Shape};

/// A rigid body.
#[derive(Debug, Clone)]
pub struct Body {
    id: BodyId,
    index: usize,
    /// Centroid pose in world space.
    pub pose: Pose,
    /// Velocity state, written back from the state vector after each step.
    pub velocity: Velocity,
    /// Solver iterate: snapshot of `velocity` plus accumulated constraint
    /// impulses within one derivative evaluation.
    pub constraint_velocity: Velocity,
    /// Electric charge, available to host behaviours.
    pub charge: f64,
    /// Coefficient of restitution for contacts.
    pub restitution: f64,
    /// Friction coefficient for contacts.
    pub friction: f64,

    body_type: BodyType,
    shape: Shape,
    mass_props: MassProperties,
    inv_mass: f64,
    inv_inertia: f64,
    aabb: Aabb,

    persistent_force: Vector2<f64>,
    persistent_torque: f64,
    impulse_force: Vector2<f64>,
    impulse_torque: f64,
    sim_force: Vector2<f64>,
    sim_torque: f64,

    sleeping: bool,
    resting_steps: u32,
}

impl Body {
    fn from_spec(id: BodyId, index: usize, spec: &BodySpec, defaults: (f64, f64)) -> planar_types::Result<Self> {
        spec.validate()?;
        let shape = Shape::from_spec(&spec.shape)?;

        let mass_props = match spec.body_type {
            BodyType::Dynamic => MassProperties::new(spec.mass, shape.inertia(spec.mass)),
            BodyType::Kinematic | BodyType::Static => {
                MassProperties::new(f64::INFINITY, f64::INFINITY)
            }
        };

        let pose = Pose::new(spec.position, spec.rotation);
        let velocity = match spec.body_type {
            BodyType::Static => Velocity::zero(),
            _ => Velocity::new(spec.velocity, spec.angular_velocity),
        };
        let aabb = shape.aabb(&pose);

        let mut body = Self {
            id,
            index,
            pose,
            velocity,
            constraint_velocity: velocity,
            charge: spec.charge,
            restitution: spec.restitution.unwrap_or(defaults.0),
            friction: spec.friction.unwrap_or(defaults.1),
            body_type: spec.body_type,
            shape,
            mass_props,
            inv_mass: 0.0,
            inv_inertia: 0.0,
            aabb,
            persistent_force: Vector2::zeros(),
            persistent_torque: 0.0,
            impulse_force: Vector2::zeros(),
            impulse_torque: 0.0,
            sim_force: Vector2::zeros(),
            sim_torque: 0.0,
            sleeping: false,
            resting_steps: 0,
        };
        body.refresh_inverses();
        Ok(body)
    }

    fn refresh_inverses(&mut self) {
        if self.body_type.is_dynamic() {
            self.inv_mass = self.mass_props.inverse_mass();
            self.inv_inertia = self.mass_props.inverse_inertia();
        } else {
            self.inv_mass = 0.0;
            self.inv_inertia = 0.0;
        }
    }

    /// Stable identity of this body.
    #[must_use]
    pub fn id(&self) -> BodyId {
        self.id
    }

    /// Dense index into the store, valid until the next removal.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// How this body participates in the simulation.
    #[must_use]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// The attached collision shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Replace the shape; inertia is recomputed.
    pub fn set_shape(&mut self, shape: Shape) {
        if self.body_type.is_dynamic() {
            self.mass_props.inertia = shape.inertia(self.mass_props.mass);
        }
        self.shape = shape;
        self.refresh_inverses();
        self.refresh_aabb();
    }

    /// Mass properties.
    #[must_use]
    pub fn mass_props(&self) -> MassProperties {
        self.mass_props
    }

    /// Set the mass of a dynamic body; inertia is recomputed from the shape.
    pub fn set_mass(&mut self, mass: f64) -> planar_types::Result<()> {
        if !mass.is_finite() || mass <= 0.0 {
            return Err(SimError::invalid_specs("mass must be positive and finite"));
        }
        if self.body_type.is_dynamic() {
            self.mass_props = MassProperties::new(mass, self.shape.inertia(mass));
            self.refresh_inverses();
        }
        Ok(())
    }

    /// Inverse mass as seen by the solver: zero unless dynamic.
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        self.inv_mass
    }

    /// Inverse inertia as seen by the solver: zero unless dynamic.
    #[must_use]
    pub fn inverse_inertia(&self) -> f64 {
        self.inv_inertia
    }

    /// Cached world-space bounding box.
    #[must_use]
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    /// Recompute the cached bounding box from the current pose.
    pub fn refresh_aabb(&mut self) {
        self.aabb = self.shape.aabb(&self.pose);
    }

    /// Whether the body is currently asleep.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    /// Wake the body.
    pub fn wake(&mut self) {
        self.sleeping = false;
        self.resting_steps = 0;
    }

    /// Put the body to sleep, zeroing its velocity.
    pub fn put_to_sleep(&mut self) {
        self.sleeping = true;
        self.velocity = Velocity::zero();
        self.constraint_velocity = Velocity::zero();
    }

    /// Advance the rest counter; returns true once the threshold is reached.
    pub(crate) fn note_resting(&mut self, resting: bool, steps_to_sleep: u32) -> bool {
        if resting {
            self.resting_steps = self.resting_steps.saturating_add(1);
        } else {
            self.resting_steps = 0;
        }
        self.resting_steps >= steps_to_sleep
    }

    /// Add a persistent force through the centroid (applied every step).
    pub fn add_force(&mut self, force: Vector2<f64>) {
        self.persistent_force += force;
        self.wake();
    }

    /// Add a persistent torque (applied every step).
    pub fn add_torque(&mut self, torque: f64) {
        self.persistent_torque += torque;
        self.wake();
    }

    /// Add an impulse force, cleared after the current step.
    pub fn add_impulse_force(&mut self, force: Vector2<f64>) {
        self.impulse_force += force;
        self.wake();
    }

    /// Add an impulse force at a world-space point, cleared after the step.
    pub fn add_impulse_force_at(&mut self, force: Vector2<f64>, point: Point2<f64>) {
        let r = point - self.pose.position;
        self.impulse_force += force;
        self.impulse_torque += cross(&r, &force);
        self.wake();
    }

    /// Add an internal simulation force through the centroid.
    ///
    /// Simulation forces (gravity, springs, behaviours, constraint
    /// impulses converted to forces) are cleared at the start of every
    /// derivative evaluation.
    pub fn apply_sim_force(&mut self, force: Vector2<f64>) {
        self.sim_force += force;
    }

    /// Add an internal simulation torque.
    pub fn apply_sim_torque(&mut self, torque: f64) {
        self.sim_torque += torque;
    }

    /// Add an internal simulation force at a centroid offset.
    pub fn apply_sim_force_at(&mut self, force: Vector2<f64>, offset: &Vector2<f64>) {
        self.sim_force += force;
        self.sim_torque += cross(offset, &force);
    }

    pub(crate) fn reset_sim_forces(&mut self) {
        self.sim_force = Vector2::zeros();
        self.sim_torque = 0.0;
    }

    pub(crate) fn clear_impulse_forces(&mut self) {
        self.impulse_force = Vector2::zeros();
        self.impulse_torque = 0.0;
    }

    /// Total force currently acting on the body.
    #[must_use]
    pub fn force(&self) -> Vector2<f64> {
        self.persistent_force + self.impulse_force + self.sim_force
    }

    /// Total torque currently acting on the body.
    #[must_use]
    pub fn torque(&self) -> f64 {
        self.persistent_torque + self.impulse_torque + self.sim_torque
    }

    /// Velocity of the material point at a world-space centroid offset.
    #[must_use]
    pub fn velocity_at(&self, offset: &Vector2<f64>) -> Vector2<f64> {
        self.velocity.velocity_at(offset)
    }

    /// Constraint-velocity iterate at a world-space centroid offset.
    #[must_use]
    pub fn constraint_velocity_at(&self, offset: &Vector2<f64>) -> Vector2<f64> {
        self.constraint_velocity.velocity_at(offset)
    }

    /// Kinetic energy of the body.
    #[must_use]
    pub fn kinetic_energy(&self) -> f64 {
        if self.body_type == BodyType::Static {
            0.0
        } else {
            let props = match self.body_type {
                BodyType::Dynamic => self.mass_props,
                // Kinematic mass is infinite for the solver; report none here
                _ => return 0.0,
            };
            self.velocity.kinetic_energy(&props)
        }
    }

    /// Load pose and velocity from a 6-wide state-vector slice.
    pub(crate) fn load_state(&mut self, vars: &[f64]) {
        self.pose.position = Point2::new(vars[0], vars[1]);
        self.pose.rotation = vars[2];
        self.velocity.linear = Vector2::new(vars[3], vars[4]);
        self.velocity.angular = vars[5];
        self.refresh_aabb();
    }

    /// Write pose and velocity into a 6-wide state-vector slice.
    pub(crate) fn store_state(&self, vars: &mut [f64]) {
        vars[0] = self.pose.position.x;
        vars[1] = self.pose.position.y;
        vars[2] = self.pose.rotation;
        vars[3] = self.velocity.linear.x;
        vars[4] = self.velocity.linear.y;
        vars[5] = self.velocity.angular;
    }
}

/// Dense, id-addressable collection of bodies.
#[derive(Debug, Clone, Default)]
pub struct BodyStore {
    bodies: Vec<Body>,
    index_of: HashMap<BodyId, usize>,
    next_id: u64,
}

impl BodyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            index_of: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Validate a spec and add the body, returning its handle.
    ///
    /// `material_defaults` is `(restitution, friction)` applied when the
    /// spec leaves them unset.
    pub fn add(
        &mut self,
        spec: &BodySpec,
        material_defaults: (f64, f64),
    ) -> planar_types::Result<BodyId> {
        let id = BodyId::new(self.next_id);
        let index = self.bodies.len();
        let body = Body::from_spec(id, index, spec, material_defaults)?;

        self.next_id += 1;
        self.index_of.insert(id, index);
        self.bodies.push(body);
        Ok(id)
    }

    /// Remove a body by handle.
    ///
    /// O(1): the last body is swapped into the vacated slot and its dense
    /// index updated.
    ///
    /// # Errors
    ///
    /// `UnknownBody` if the handle does not resolve.
    pub fn remove(&mut self, id: BodyId) -> planar_types::Result<Body> {
        let index = *self
            .index_of
            .get(&id)
            .ok_or(SimError::UnknownBody(id.raw()))?;
        self.index_of.remove(&id);

        let body = self.bodies.swap_remove(index);
        if index < self.bodies.len() {
            let moved = &mut self.bodies[index];
            moved.index = index;
            self.index_of.insert(moved.id, index);
        }
        Ok(body)
    }

    /// Look up the dense index of a handle.
    #[must_use]
    pub fn index_of(&self, id: BodyId) -> Option<usize> {
        self.index_of.get(&id).copied()
    }

    /// Get a body by handle.
    #[must_use]
    pub fn get(&self, id: BodyId) -> Option<&Body> {
        self.index_of(id).map(|i| &self.bodies[i])
    }

    /// Get a mutable body by handle.
    #[must_use]
    pub fn get_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        let index = self.index_of(id)?;
        Some(&mut self.bodies[index])
    }

    /// Get a body by dense index.
    #[must_use]
    pub fn by_index(&self, index: usize) -> Option<&Body> {
        self.bodies.get(index)
    }

    /// Get a mutable body by dense index.
    #[must_use]
    pub fn by_index_mut(&mut self, index: usize) -> Option<&mut Body> {
        self.bodies.get_mut(index)
    }

    /// Mutably borrow two distinct bodies at once.
    ///
    /// # Panics
    ///
    /// Panics if `i == j` or either index is out of bounds.
    #[must_use]
    pub fn pair_mut(&mut self, i: usize, j: usize) -> (&mut Body, &mut Body) {
        assert_ne!(i, j, "pair_mut requires distinct indices");
        if i < j {
            let (left, right) = self.bodies.split_at_mut(j);
            (&mut left[i], &mut right[0])
        } else {
            let (left, right) = self.bodies.split_at_mut(i);
            (&mut right[0], &mut left[j])
        }
    }

    /// Iterate over all bodies in dense order.
    pub fn iter(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter()
    }

    /// Iterate mutably over all bodies in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Body> {
        self.bodies.iter_mut()
    }

    /// Write every body's pose and velocity into the state vector.
    pub(crate) fn send_to_state(&self, state: &mut State) {
        state.resize(6 * self.bodies.len());
        for (i, body) in self.bodies.iter().enumerate() {
            body.store_state(state.slice_mut(i));
        }
    }

    /// Load every body's pose and velocity from a raw state buffer.
    pub(crate) fn retrieve(&mut self, vars: &[f64]) {
        debug_assert_eq!(vars.len(), 6 * self.bodies.len());
        for (i, body) in self.bodies.iter_mut().enumerate() {
            body.load_state(&vars[6 * i..6 * i + 6]);
        }
    }

    /// Clear per-evaluation simulation forces on every body.
    pub(crate) fn reset_sim_forces(&mut self) {
        for body in &mut self.bodies {
            body.reset_sim_forces();
        }
    }

    /// Clear per-step impulse forces on every body.
    pub(crate) fn clear_impulse_forces(&mut self) {
        for body in &mut self.bodies {
            body.clear_impulse_forces();
        }
    }

    /// Snapshot current velocities as the solver iterate.
    pub(crate) fn prepare_constraint_velocities(&mut self) {
        for body in &mut self.bodies {
            body.constraint_velocity = body.velocity;
        }
    }

    /// Check that dense indexing is consistent: `bodies[i].index == i`.
    #[must_use]
    pub fn indices_consistent(&self) -> bool {
        self.bodies.iter().enumerate().all(|(i, b)| {
            b.index == i && self.index_of.get(&b.id) == Some(&i)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_types::ShapeSpec;

    const MATERIALS: (f64, f64) = (0.0, 0.5);

    fn circle_spec(x: f64, y: f64) -> BodySpec {
        BodySpec::new()
            .position(Point2::new(x, y))
            .shape(ShapeSpec::circle(0.5))
    }

    #[test]
    fn test_add_assigns_dense_indices() {
        let mut store = BodyStore::new();
        let a = store.add(&circle_spec(0.0, 0.0), MATERIALS).unwrap();
        let b = store.add(&circle_spec(1.0, 0.0), MATERIALS).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a).unwrap().index(), 0);
        assert_eq!(store.get(b).unwrap().index(), 1);
        assert!(store.indices_consistent());
    }

    #[test]
    fn test_add_rejects_invalid_spec() {
        let mut store = BodyStore::new();
        let bad = BodySpec::new().mass(-2.0);
        assert!(store.add(&bad, MATERIALS).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_swap_remove_fixes_moved_index() {
        let mut store = BodyStore::new();
        let a = store.add(&circle_spec(0.0, 0.0), MATERIALS).unwrap();
        let b = store.add(&circle_spec(1.0, 0.0), MATERIALS).unwrap();
        let c = store.add(&circle_spec(2.0, 0.0), MATERIALS).unwrap();

        store.remove(a).unwrap();

        // c was swapped into slot 0; b kept slot 1
        assert_eq!(store.get(c).unwrap().index(), 0);
        assert_eq!(store.get(b).unwrap().index(), 1);
        assert!(store.indices_consistent());
    }

    #[test]
    fn test_remove_unknown_fails() {
        let mut store = BodyStore::new();
        let a = store.add(&circle_spec(0.0, 0.0), MATERIALS).unwrap();
        store.remove(a).unwrap();

        let err = store.remove(a).unwrap_err();
        assert!(err.is_unknown_entity());
    }

    #[test]
    fn test_state_roundtrip() {
        let mut store = BodyStore::new();
        let id = store
            .add(
                &circle_spec(1.0, 2.0).velocity(Vector2::new(3.0, 4.0)),
                MATERIALS,
            )
            .unwrap();

        let mut state = State::new();
        store.send_to_state(&mut state);
        assert_eq!(state.len(), 6);

        // Mutate the body, then restore from the state vector
        store.get_mut(id).unwrap().pose.position.x = 99.0;
        let vars = state.vars().to_vec();
        store.retrieve(&vars);

        let body = store.get(id).unwrap();
        assert_relative_eq!(body.pose.position.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(body.velocity.linear.y, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_static_body_has_zero_inverses() {
        let mut store = BodyStore::new();
        let id = store
            .add(&circle_spec(0.0, 0.0).body_type(BodyType::Static), MATERIALS)
            .unwrap();
        let body = store.get(id).unwrap();
        assert_eq!(body.inverse_mass(), 0.0);
        assert_eq!(body.inverse_inertia(), 0.0);
    }

    #[test]
    fn test_kinematic_keeps_velocity_but_no_inverse_mass() {
        let mut store = BodyStore::new();
        let id = store
            .add(
                &circle_spec(0.0, 0.0)
                    .body_type(BodyType::Kinematic)
                    .velocity(Vector2::new(2.0, 0.0)),
                MATERIALS,
            )
            .unwrap();
        let body = store.get(id).unwrap();
        assert_eq!(body.inverse_mass(), 0.0);
        assert_relative_eq!(body.velocity.linear.x, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_shape_recomputes_inertia() {
        let mut store = BodyStore::new();
        let id = store.add(&circle_spec(0.0, 0.0).mass(2.0), MATERIALS).unwrap();

        let before = store.get(id).unwrap().mass_props().inertia;
        store
            .get_mut(id)
            .unwrap()
            .set_shape(Shape::circle(2.0).unwrap());
        let after = store.get(id).unwrap().mass_props().inertia;

        // I = m r² / 2 scales with r²
        assert_relative_eq!(after / before, 16.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pair_mut_disjoint() {
        let mut store = BodyStore::new();
        store.add(&circle_spec(0.0, 0.0), MATERIALS).unwrap();
        store.add(&circle_spec(1.0, 0.0), MATERIALS).unwrap();

        let (a, b) = store.pair_mut(0, 1);
        a.pose.position.x = -5.0;
        b.pose.position.x = 5.0;
        assert_relative_eq!(
            store.by_index(0).unwrap().pose.position.x,
            -5.0,
            epsilon = 1e-12
        );
    }
}
