//! The simulation world and its per-step pipeline.
//!
//! One step is one logical sequence: pre-step preparation (timestep ratio,
//! cached-collision flush, bodies into the state vector), a Runge-Kutta
//! forward pass whose derivative evaluations apply forces, run the
//! collision pipeline and the velocity solve, then the position pass and
//! post-step bookkeeping (write-back, impulse-force clearing, sleeping,
//! collision enter/exit events).
//!
//! The body store is exclusively owned by the world during a step; joints
//! and contacts hold `(stable id, dense index)` pairs revalidated each
//! step.

use nalgebra::{Point2, Vector2};
use planar_types::{BodyId, BodySpec, BodyType, JointId, SimError, SimulationConfig};

use crate::behaviour::Behaviour;
use crate::body::{Body, BodyStore};
use crate::broad_phase::BroadPhaseDetector;
use crate::collision::CollisionSet;
use crate::contact_cache::ContactCache;
use crate::events::EventHooks;
use crate::integrator::{Integrator, State, Tableau};
use crate::joints::{Constraint, JointKind, JointSet, Spring, SpringSpec};
use crate::solver::{solve_position_phase, solve_velocity_phase};

/// Kinetic and potential energy of the system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Energies {
    /// Total kinetic energy.
    pub kinetic: f64,
    /// Total potential energy (gravity, springs, behaviours).
    pub potential: f64,
}

impl Energies {
    /// Total mechanical energy.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.kinetic + self.potential
    }
}

/// Outcome of a successful step.
#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    /// Whether the position pass converged within its iteration budget.
    pub positions_solved: bool,
    /// Number of contact constraints seeded this step.
    pub active_contacts: usize,
}

/// Snapshot for deterministic rollback.
#[derive(Debug, Clone)]
struct Checkpoint {
    elapsed: f64,
    step_count: u64,
    previous_timestep: f64,
    vars: Vec<f64>,
    bodies: BodyStore,
    contacts: ContactCache,
}

/// A 2D rigid-body simulation world.
pub struct World {
    config: SimulationConfig,
    bodies: BodyStore,
    joints: JointSet,
    behaviours: Vec<Box<dyn Behaviour>>,

    state: State,
    integrator: Integrator,
    broad_phase: BroadPhaseDetector,
    collisions: CollisionSet,
    contacts: ContactCache,
    events: EventHooks,

    elapsed: f64,
    step_count: u64,
    previous_timestep: f64,
    timestep_ratio: f64,
    active_pairs: Vec<(BodyId, BodyId)>,
    checkpoint: Option<Checkpoint>,
}

impl Default for World {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl World {
    /// Create an empty world with the given configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            integrator: Integrator::new(Tableau::from_method(config.integration)),
            broad_phase: BroadPhaseDetector::new(config.collision.clone()),
            bodies: BodyStore::new(),
            joints: JointSet::new(),
            behaviours: Vec::new(),
            state: State::new(),
            collisions: CollisionSet::new(),
            contacts: ContactCache::new(),
            events: EventHooks::default(),
            elapsed: 0.0,
            step_count: 0,
            previous_timestep: 0.0,
            timestep_ratio: 1.0,
            active_pairs: Vec::new(),
            checkpoint: None,
            config,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Elapsed simulated time.
    #[must_use]
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Number of completed steps.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// `dt_current / dt_previous` of the last step, used to rescale
    /// warm-started impulses.
    #[must_use]
    pub fn timestep_ratio(&self) -> f64 {
        self.timestep_ratio
    }

    /// Registered event callbacks.
    pub fn events_mut(&mut self) -> &mut EventHooks {
        &mut self.events
    }

    // =========================================================================
    // Body management
    // =========================================================================

    /// Validate a spec and add a body, returning its handle.
    pub fn add_body(&mut self, spec: &BodySpec) -> planar_types::Result<BodyId> {
        let defaults = (
            self.config.solver.default_restitution,
            self.config.solver.default_friction,
        );
        let id = self.bodies.add(spec, defaults)?;
        self.broad_phase.note_topology_changed();
        self.events.emit_body_added(id);
        Ok(id)
    }

    /// Remove a body; dangling joints and contacts are pruned.
    pub fn remove_body(&mut self, id: BodyId) -> planar_types::Result<()> {
        if self.bodies.index_of(id).is_none() {
            return Err(SimError::UnknownBody(id.raw()));
        }
        self.events.emit_body_removing(id);
        self.bodies.remove(id)?;
        self.joints.validate(&self.bodies);
        self.contacts.prune_missing(&self.bodies);
        self.broad_phase.note_topology_changed();
        Ok(())
    }

    /// Number of bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Get a body by handle.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(id)
    }

    /// Get a mutable body by handle.
    ///
    /// External code must not mutate bodies while a step is running.
    #[must_use]
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.get_mut(id)
    }

    /// Iterate over all bodies in dense order.
    pub fn bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter()
    }

    /// The body store.
    #[must_use]
    pub fn body_store(&self) -> &BodyStore {
        &self.bodies
    }

    // =========================================================================
    // Joints and behaviours
    // =========================================================================

    /// Add a joint of kind `K`, returning its handle.
    pub fn add_joint<K: JointKind>(&mut self, spec: &K::Spec) -> planar_types::Result<JointId> {
        self.joints.add::<K>(&self.bodies, spec)
    }

    /// Remove a joint by handle.
    pub fn remove_joint(&mut self, id: JointId) -> planar_types::Result<()> {
        self.joints.remove(id)
    }

    /// Add a spring (convenience for `add_joint::<Spring>`).
    pub fn add_spring(&mut self, spec: &SpringSpec) -> planar_types::Result<JointId> {
        self.add_joint::<Spring>(spec)
    }

    /// Number of joints, springs included.
    #[must_use]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// The joint set.
    #[must_use]
    pub fn joints(&self) -> &JointSet {
        &self.joints
    }

    /// The joint set, mutably.
    pub fn joints_mut(&mut self) -> &mut JointSet {
        &mut self.joints
    }

    /// Register a behaviour.
    pub fn add_behaviour(&mut self, behaviour: Box<dyn Behaviour>) {
        self.behaviours.push(behaviour);
    }

    /// Remove a behaviour by name; returns whether one was removed.
    pub fn remove_behaviour(&mut self, name: &str) -> bool {
        let before = self.behaviours.len();
        self.behaviours.retain(|b| b.name() != name);
        self.behaviours.len() != before
    }

    /// Registered behaviour names.
    #[must_use]
    pub fn behaviour_names(&self) -> Vec<&str> {
        self.behaviours.iter().map(|b| b.name()).collect()
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// Advance the simulation by one fixed timestep.
    ///
    /// # Errors
    ///
    /// `Diverged` when the integrator produces a non-finite state; the
    /// world keeps the offending state so the caller can inspect it or
    /// [`World::revert`] to the last checkpoint.
    pub fn step(&mut self) -> planar_types::Result<StepResult> {
        self.config.validate()?;
        let dt = self.config.timestep;

        // Pre-step preparation
        self.timestep_ratio = if self.previous_timestep.abs() < 1e-12 {
            1.0
        } else {
            dt / self.previous_timestep
        };
        self.collisions.clear();
        self.contacts.begin_step();
        self.joints.validate(&self.bodies);
        self.contacts.prune_missing(&self.bodies);
        self.bodies.send_to_state(&mut self.state);

        // Integrate; every stage evaluation runs forces, collisions and the
        // velocity solve
        let elapsed = self.elapsed;
        let dt_ratio = self.timestep_ratio;
        let valid = {
            let Self {
                bodies,
                joints,
                behaviours,
                state,
                integrator,
                broad_phase,
                collisions,
                contacts,
                config,
                ..
            } = self;
            // The timestep-ratio rescale of warm-started impulses applies
            // once per step, on the first stage evaluation only
            let mut first_evaluation = true;
            integrator.raw_forward(state, elapsed, dt, |_t, stage_dt, vars| {
                let stage_ratio = if first_evaluation { dt_ratio } else { 1.0 };
                first_evaluation = false;
                Self::evaluate_derivative(
                    bodies,
                    joints,
                    behaviours,
                    broad_phase,
                    collisions,
                    contacts,
                    config,
                    stage_dt,
                    stage_ratio,
                    vars,
                )
            })
        };

        // Write bodies back from the state vector
        self.bodies.retrieve(self.state.vars());

        if !valid {
            return Err(SimError::diverged(format!(
                "integrator produced a non-finite state at t = {}",
                self.elapsed
            )));
        }

        // Position pass (non-linear Gauss-Seidel on the advanced poses),
        // then sync the corrections back into the state vector
        let positions_solved = solve_position_phase(
            &mut self.bodies,
            &mut self.joints,
            &mut self.contacts,
            &self.config.solver,
        );
        for body in self.bodies.iter_mut() {
            body.refresh_aabb();
        }
        self.bodies.send_to_state(&mut self.state);

        // Post-step bookkeeping
        let active_contacts = self.contacts.active_pairs().len();
        self.bodies.clear_impulse_forces();
        self.contacts.finish_step(self.config.collision.contact_lifetime);
        self.update_sleep_state();
        self.fire_collision_events();

        self.previous_timestep = dt;
        self.elapsed += dt;
        self.step_count += 1;

        Ok(StepResult {
            positions_solved,
            active_contacts,
        })
    }

    /// The state-derivative operator `f(t, dt, x) -> ẋ`.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_derivative(
        bodies: &mut BodyStore,
        joints: &mut JointSet,
        behaviours: &[Box<dyn Behaviour>],
        broad_phase: &mut BroadPhaseDetector,
        collisions: &mut CollisionSet,
        contacts: &mut ContactCache,
        config: &SimulationConfig,
        dt: f64,
        dt_ratio: f64,
        vars: &[f64],
    ) -> Vec<f64> {
        // 1. Clear per-evaluation forces, load bodies from the state vector
        bodies.reset_sim_forces();
        bodies.retrieve(vars);

        // 2. Gravity (persistent and impulse forces are standing
        //    accumulators picked up by `Body::force`)
        let gravity = config.gravity;
        for body in bodies.iter_mut() {
            if body.body_type().is_dynamic() && !body.is_sleeping() {
                let force = gravity * body.mass_props().mass;
                body.apply_sim_force(force);
            }
        }

        // 3. Behaviours and springs
        for behaviour in behaviours {
            for index in 0..bodies.len() {
                let Some(body) = bodies.by_index(index) else {
                    continue;
                };
                if !body.body_type().is_dynamic() || body.is_sleeping() || !behaviour.applies_to(body)
                {
                    continue;
                }
                let (force, torque) = behaviour.force(body);
                if let Some(body) = bodies.by_index_mut(index) {
                    body.apply_sim_force(force);
                    body.apply_sim_torque(torque);
                }
            }
        }
        joints.apply_spring_forces(bodies);

        // 4. Collision pipeline: detect (or refine), then seed the cache
        if config.collision.enabled {
            let skip_pairs = joints.non_colliding_pairs();
            collisions.detect(
                bodies,
                broad_phase,
                config.collision.epa_threshold,
                config.collision.multithreaded,
                |a, b| {
                    let key = if a <= b { (a, b) } else { (b, a) };
                    skip_pairs.binary_search(&key).is_ok()
                },
            );
            let woken = contacts.absorb(collisions.collisions(), bodies, dt_ratio);
            for id in woken {
                if let Some(body) = bodies.get_mut(id) {
                    body.wake();
                }
            }
        }

        // 5. Snapshot velocities as the solver iterate, run the velocity
        //    phase (writes corrected velocities and mirrored forces)
        bodies.prepare_constraint_velocities();
        solve_velocity_phase(bodies, joints, contacts, dt, dt_ratio, &config.solver);

        // 6. Emit the derivative
        let mut derivative = vec![0.0; vars.len()];
        for body in bodies.iter() {
            let index = 6 * body.index();
            if body.body_type() == BodyType::Static || body.is_sleeping() {
                continue;
            }

            derivative[index] = body.velocity.linear.x;
            derivative[index + 1] = body.velocity.linear.y;
            derivative[index + 2] = body.velocity.angular;

            let accel = body.force() * body.inverse_mass();
            derivative[index + 3] = accel.x;
            derivative[index + 4] = accel.y;
            derivative[index + 5] = body.torque() * body.inverse_inertia();
        }
        derivative
    }

    fn update_sleep_state(&mut self) {
        let islands = &self.config.islands;
        if !islands.enable_sleep {
            return;
        }

        for body in self.bodies.iter_mut() {
            if !body.body_type().is_dynamic() || body.is_sleeping() {
                continue;
            }
            let resting = body.velocity.linear.norm() < islands.sleep_linear_threshold
                && body.velocity.angular.abs() < islands.sleep_angular_threshold;
            if body.note_resting(resting, islands.steps_to_sleep) {
                body.put_to_sleep();
            }
        }

        // A sleeping body coupled to an awake one must not stay asleep
        self.joints.propagate_wakes(&mut self.bodies);
    }

    fn fire_collision_events(&mut self) {
        let current = self.contacts.active_pairs();
        for pair in &current {
            if self.active_pairs.binary_search(pair).is_err() {
                self.events.emit_collision_enter(pair.0, pair.1);
            }
        }
        for pair in &self.active_pairs {
            if current.binary_search(pair).is_err() {
                self.events.emit_collision_exit(pair.0, pair.1);
            }
        }
        self.active_pairs = current;
    }

    // =========================================================================
    // Checkpointing, validation, diagnostics
    // =========================================================================

    /// Record a snapshot for deterministic rollback.
    pub fn checkpoint(&mut self) {
        self.bodies.send_to_state(&mut self.state);
        self.checkpoint = Some(Checkpoint {
            elapsed: self.elapsed,
            step_count: self.step_count,
            previous_timestep: self.previous_timestep,
            vars: self.state.vars().to_vec(),
            bodies: self.bodies.clone(),
            contacts: self.contacts.clone(),
        });
    }

    /// Restore the last checkpoint.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when no checkpoint was recorded.
    pub fn revert(&mut self) -> planar_types::Result<()> {
        let checkpoint = self
            .checkpoint
            .as_ref()
            .ok_or_else(|| SimError::invalid_config("no checkpoint to revert to"))?;

        self.elapsed = checkpoint.elapsed;
        self.step_count = checkpoint.step_count;
        self.previous_timestep = checkpoint.previous_timestep;
        self.state.set_vars(checkpoint.vars.clone());
        self.bodies = checkpoint.bodies.clone();
        self.contacts = checkpoint.contacts.clone();
        self.collisions.clear();
        self.broad_phase.note_topology_changed();
        Ok(())
    }

    /// The raw solver state vector (6 floats per body).
    #[must_use]
    pub fn state_vector(&self) -> &[f64] {
        self.state.vars()
    }

    /// Validate the world: configuration, finite body states, consistent
    /// dense indexing; prunes dangling joints and contacts.
    pub fn validate(&mut self) -> planar_types::Result<()> {
        self.config.validate()?;
        self.joints.validate(&self.bodies);
        self.contacts.prune_missing(&self.bodies);

        if !self.bodies.indices_consistent() {
            return Err(SimError::invalid_config(
                "body store indices are inconsistent",
            ));
        }
        for body in self.bodies.iter() {
            if !body.pose.is_finite() || !body.velocity.is_finite() {
                return Err(SimError::diverged(format!(
                    "body {} has a non-finite state",
                    body.id()
                )));
            }
        }
        Ok(())
    }

    /// Kinetic and potential energy of the system.
    #[must_use]
    pub fn energies(&self) -> Energies {
        let kinetic = self.bodies.iter().map(Body::kinetic_energy).sum();

        let gravity = self.config.gravity;
        let mut potential = 0.0;
        for body in self.bodies.iter() {
            if body.body_type().is_dynamic() {
                potential -= body.mass_props().mass * gravity.dot(&body.pose.position.coords);
            }
            for behaviour in &self.behaviours {
                if behaviour.applies_to(body) {
                    potential += behaviour.potential_energy(body);
                }
            }
        }
        potential += self.joints.spring_potential_energy(&self.bodies);

        Energies { kinetic, potential }
    }

    /// Total linear momentum of the dynamic bodies.
    #[must_use]
    pub fn linear_momentum(&self) -> Vector2<f64> {
        self.bodies
            .iter()
            .filter(|b| b.body_type().is_dynamic())
            .map(|b| b.velocity.linear_momentum(b.mass_props().mass))
            .fold(Vector2::zeros(), |acc, p| acc + p)
    }

    /// Centre of mass of the dynamic bodies.
    #[must_use]
    pub fn center_of_mass(&self) -> Option<Point2<f64>> {
        let mut total_mass = 0.0;
        let mut weighted = Vector2::zeros();
        for body in self.bodies.iter() {
            if body.body_type().is_dynamic() {
                let mass = body.mass_props().mass;
                total_mass += mass;
                weighted += body.pose.position.coords * mass;
            }
        }
        (total_mass > 0.0).then(|| Point2::from(weighted / total_mass))
    }

    /// The contact cache (diagnostics and tests).
    #[must_use]
    pub fn contacts(&self) -> &ContactCache {
        &self.contacts
    }
}

impl World {
    /// Capture the persisted state layout of this world.
    #[must_use]
    pub fn snapshot(&self) -> crate::snapshot::WorldSnapshot {
        use crate::joints::{
            BallJoint, DistanceJoint, MotorJoint, PrismaticJoint, RevoluteJoint, RotorJoint,
            WeldJoint,
        };
        use crate::snapshot::{
            BodySnapshot, ConstraintSnapshot, IntegratorSnapshot, SpringSnapshot, WorldSnapshot,
        };

        let bodies: Vec<BodySnapshot> = self
            .bodies
            .iter()
            .map(|body| BodySnapshot {
                position: body.pose.position,
                velocity: body.velocity.linear,
                rotation: body.pose.rotation,
                angular_velocity: body.velocity.angular,
                mass: body.mass_props().mass,
                charge: body.charge,
                body_type: body.body_type(),
                collider: body.shape().to_spec(),
                restitution: body.restitution,
                friction: body.friction,
            })
            .collect();

        let dense = |id: BodyId| self.bodies.index_of(id).unwrap_or(usize::MAX);

        let springs = self
            .joints
            .manager::<Spring>()
            .iter()
            .map(|(_, s)| SpringSnapshot {
                first: dense(s.pair().first()),
                second: dense(s.pair().second()),
                local_anchor1: s.pair().local_anchor1,
                local_anchor2: s.pair().local_anchor2,
                stiffness: s.stiffness,
                damping: s.damping,
                rest_length: s.rest_length,
                non_linear_terms: s.non_linear_terms,
                non_linear_contribution: s.non_linear_contribution,
            })
            .collect();

        let mut constraints = Vec::new();
        for (_, j) in self.joints.manager::<DistanceJoint>().iter() {
            let (min_length, max_length) = j.bounds();
            constraints.push(ConstraintSnapshot::Distance {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                local_anchor1: j.pair().local_anchor1,
                local_anchor2: j.pair().local_anchor2,
                min_length,
                max_length,
                soft: j.soft(),
            });
        }
        for (_, j) in self.joints.manager::<RevoluteJoint>().iter() {
            constraints.push(ConstraintSnapshot::Revolute {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                local_anchor: j.pair().local_anchor1,
            });
        }
        for (_, j) in self.joints.manager::<WeldJoint>().iter() {
            constraints.push(ConstraintSnapshot::Weld {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                local_anchor: j.pair().local_anchor1,
            });
        }
        for (_, j) in self.joints.manager::<PrismaticJoint>().iter() {
            constraints.push(ConstraintSnapshot::Prismatic {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                local_anchor: j.pair().local_anchor1,
                local_axis: j.local_axis(),
                lock_rotation: j.locks_rotation(),
            });
        }
        for (_, j) in self.joints.manager::<BallJoint>().iter() {
            let (min_angle, max_angle) = j.range();
            constraints.push(ConstraintSnapshot::Ball {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                min_angle,
                max_angle,
            });
        }
        for (_, j) in self.joints.manager::<RotorJoint>().iter() {
            constraints.push(ConstraintSnapshot::Rotor {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                target_angular_velocity: j.target_angular_velocity,
                max_torque: j.max_torque,
            });
        }
        for (_, j) in self.joints.manager::<MotorJoint>().iter() {
            constraints.push(ConstraintSnapshot::Motor {
                first: dense(j.pair().first()),
                second: dense(j.pair().second()),
                target_velocity: j.target_velocity,
                max_force: j.max_force,
            });
        }

        WorldSnapshot {
            integrator: IntegratorSnapshot {
                method: self.config.integration,
                timestep: self.config.timestep,
                elapsed: self.elapsed,
            },
            bodies,
            springs,
            constraints,
            behaviours: self.behaviours.iter().map(|b| b.name().to_owned()).collect(),
        }
    }

    /// Rebuild a world from a persisted snapshot.
    ///
    /// Behaviours are not restored; hosts re-register them by name.
    pub fn from_snapshot(
        snapshot: &crate::snapshot::WorldSnapshot,
        mut config: SimulationConfig,
    ) -> planar_types::Result<Self> {
        use crate::joints::{
            BallJoint, BallJointSpec, DistanceJoint, DistanceJointSpec, MotorJoint,
            MotorJointSpec, PrismaticJoint, PrismaticJointSpec, RevoluteJoint, RevoluteJointSpec,
            RotorJoint, RotorJointSpec, WeldJoint, WeldJointSpec,
        };
        use crate::snapshot::ConstraintSnapshot;
        use planar_types::Pose;

        config.integration = snapshot.integrator.method;
        config.timestep = snapshot.integrator.timestep;
        let mut world = Self::new(config);
        world.elapsed = snapshot.integrator.elapsed;

        let mut ids = Vec::with_capacity(snapshot.bodies.len());
        for body in &snapshot.bodies {
            let mut spec = BodySpec::new()
                .position(body.position)
                .velocity(body.velocity)
                .rotation(body.rotation)
                .angular_velocity(body.angular_velocity)
                .charge(body.charge)
                .body_type(body.body_type)
                .shape(body.collider.clone())
                .restitution(body.restitution)
                .friction(body.friction);
            if body.body_type.is_dynamic() {
                spec = spec.mass(body.mass);
            }
            ids.push(world.add_body(&spec)?);
        }

        let resolve = |index: usize| -> planar_types::Result<BodyId> {
            ids.get(index)
                .copied()
                .ok_or_else(|| SimError::invalid_specs("snapshot references a missing body"))
        };
        let pose_of = |index: usize| -> Pose {
            let b = &snapshot.bodies[index];
            Pose::new(b.position, b.rotation)
        };

        for spring in &snapshot.springs {
            let first = resolve(spring.first)?;
            let second = resolve(spring.second)?;
            let spec = crate::joints::SpringSpec {
                first,
                second,
                world_anchor1: pose_of(spring.first).transform_point(&spring.local_anchor1),
                world_anchor2: pose_of(spring.second).transform_point(&spring.local_anchor2),
                stiffness: spring.stiffness,
                damping: spring.damping,
                rest_length: spring.rest_length,
                non_linear_terms: spring.non_linear_terms,
                non_linear_contribution: spring.non_linear_contribution,
                collide_connected: true,
            };
            world.add_spring(&spec)?;
        }

        for constraint in &snapshot.constraints {
            match constraint {
                ConstraintSnapshot::Distance {
                    first,
                    second,
                    local_anchor1,
                    local_anchor2,
                    min_length,
                    max_length,
                    soft,
                } => {
                    let spec = DistanceJointSpec {
                        first: resolve(*first)?,
                        second: resolve(*second)?,
                        world_anchor1: pose_of(*first).transform_point(local_anchor1),
                        world_anchor2: pose_of(*second).transform_point(local_anchor2),
                        min_length: *min_length,
                        max_length: *max_length,
                        soft: *soft,
                        collide_connected: true,
                    };
                    world.add_joint::<DistanceJoint>(&spec)?;
                }
                ConstraintSnapshot::Revolute {
                    first,
                    second,
                    local_anchor,
                } => {
                    let spec = RevoluteJointSpec::new(
                        resolve(*first)?,
                        resolve(*second)?,
                        pose_of(*first).transform_point(local_anchor),
                    );
                    world.add_joint::<RevoluteJoint>(&spec)?;
                }
                ConstraintSnapshot::Weld {
                    first,
                    second,
                    local_anchor,
                } => {
                    let spec = WeldJointSpec::new(
                        resolve(*first)?,
                        resolve(*second)?,
                        pose_of(*first).transform_point(local_anchor),
                    );
                    world.add_joint::<WeldJoint>(&spec)?;
                }
                ConstraintSnapshot::Prismatic {
                    first,
                    second,
                    local_anchor,
                    local_axis,
                    lock_rotation,
                } => {
                    let mut spec = PrismaticJointSpec::new(
                        resolve(*first)?,
                        resolve(*second)?,
                        pose_of(*first).transform_point(local_anchor),
                        pose_of(*first).transform_vector(local_axis),
                    );
                    spec.lock_rotation = *lock_rotation;
                    world.add_joint::<PrismaticJoint>(&spec)?;
                }
                ConstraintSnapshot::Ball {
                    first,
                    second,
                    min_angle,
                    max_angle,
                } => {
                    let spec = BallJointSpec::new(
                        resolve(*first)?,
                        resolve(*second)?,
                        *min_angle,
                        *max_angle,
                    );
                    world.add_joint::<BallJoint>(&spec)?;
                }
                ConstraintSnapshot::Rotor {
                    first,
                    second,
                    target_angular_velocity,
                    max_torque,
                } => {
                    let spec = RotorJointSpec::new(
                        resolve(*first)?,
                        resolve(*second)?,
                        *target_angular_velocity,
                        *max_torque,
                    );
                    world.add_joint::<RotorJoint>(&spec)?;
                }
                ConstraintSnapshot::Motor {
                    first,
                    second,
                    target_velocity,
                    max_force,
                } => {
                    let spec = MotorJointSpec::new(
                        resolve(*first)?,
                        resolve(*second)?,
                        *target_velocity,
                        *max_force,
                    );
                    world.add_joint::<MotorJoint>(&spec)?;
                }
            }
        }

        Ok(world)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("bodies", &self.bodies.len())
            .field("joints", &self.joints.len())
            .field("behaviours", &self.behaviours.len())
            .field("contacts", &self.contacts.len())
            .field("elapsed", &self.elapsed)
            .field("step_count", &self.step_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_types::ShapeSpec;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn falling_circle_world() -> (World, BodyId) {
        let mut world = World::new(SimulationConfig::default());
        let id = world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(0.0, 10.0))
                    .shape(ShapeSpec::circle(0.5)),
            )
            .unwrap();
        (world, id)
    }

    #[test]
    fn test_free_fall() {
        let (mut world, id) = falling_circle_world();

        // 1 second of free fall at dt = 1e-3
        for _ in 0..1000 {
            world.step().expect("step should succeed");
        }

        let body = world.body(id).unwrap();
        // y ≈ 10 - g/2 ≈ 5.1 (explicit Euler overshoots slightly)
        assert_relative_eq!(body.pose.position.y, 10.0 - 4.9, epsilon = 0.05);
        assert_relative_eq!(body.velocity.linear.y, -9.8, epsilon = 1e-6);
    }

    #[test]
    fn test_static_body_never_moves() {
        let mut world = World::new(SimulationConfig::default());
        let id = world
            .add_body(
                &BodySpec::new()
                    .shape(ShapeSpec::rect(1.0, 1.0))
                    .body_type(BodyType::Static),
            )
            .unwrap();

        for _ in 0..100 {
            world.step().expect("step should succeed");
        }
        assert_eq!(world.body(id).unwrap().pose.position, Point2::origin());
    }

    #[test]
    fn test_kinematic_body_moves_without_forces() {
        let mut world = World::new(SimulationConfig::default());
        let id = world
            .add_body(
                &BodySpec::new()
                    .velocity(Vector2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5))
                    .body_type(BodyType::Kinematic),
            )
            .unwrap();

        for _ in 0..1000 {
            world.step().expect("step should succeed");
        }

        let body = world.body(id).unwrap();
        // Gravity ignored, velocity user-driven
        assert_relative_eq!(body.pose.position.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(body.pose.position.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(body.velocity.linear.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dense_indices_after_removal() {
        let (mut world, first) = falling_circle_world();
        let second = world
            .add_body(&BodySpec::new().shape(ShapeSpec::circle(0.5)))
            .unwrap();
        let _third = world
            .add_body(&BodySpec::new().shape(ShapeSpec::circle(0.5)))
            .unwrap();

        world.remove_body(first).unwrap();
        world.step().expect("step should succeed");

        assert_eq!(world.body_count(), 2);
        assert!(world.body_store().indices_consistent());
        assert!(world.body(second).unwrap().index() <= 1);
        assert!(world.remove_body(first).is_err());
    }

    #[test]
    fn test_checkpoint_revert_bit_identical() {
        let (mut world, _) = falling_circle_world();
        for _ in 0..10 {
            world.step().expect("step should succeed");
        }

        world.checkpoint();
        let before = world.state_vector().to_vec();

        world.step().expect("step should succeed");
        world.revert().expect("revert should succeed");

        assert_eq!(world.state_vector(), before.as_slice());
    }

    #[test]
    fn test_diverged_step_reports_error() {
        let (mut world, id) = falling_circle_world();
        world.body_mut(id).unwrap().add_force(Vector2::new(f64::NAN, 0.0));

        let err = world.step().unwrap_err();
        assert!(err.is_diverged());
    }

    #[test]
    fn test_momentum_changes_only_by_external_force() {
        let mut config = SimulationConfig::default();
        config.gravity = Vector2::zeros();
        let mut world = World::new(config);
        let id = world
            .add_body(
                &BodySpec::new()
                    .velocity(Vector2::new(2.0, 1.0))
                    .shape(ShapeSpec::circle(0.5)),
            )
            .unwrap();

        let before = world.linear_momentum();
        for _ in 0..100 {
            world.step().expect("step should succeed");
        }
        let after = world.linear_momentum();
        assert_relative_eq!((after - before).norm(), 0.0, epsilon = 1e-12);

        // Now push it: momentum changes by F·t
        world.body_mut(id).unwrap().add_force(Vector2::new(1.0, 0.0));
        for _ in 0..100 {
            world.step().expect("step should succeed");
        }
        let pushed = world.linear_momentum();
        assert_relative_eq!(pushed.x - after.x, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_collision_events_fire() {
        let mut world = World::new(SimulationConfig::default().zero_gravity());
        world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(-1.0, 0.0))
                    .velocity(Vector2::new(2.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
            )
            .unwrap();
        world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(1.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
            )
            .unwrap();

        let entered = Rc::new(RefCell::new(0u32));
        let entered_hook = Rc::clone(&entered);
        world
            .events_mut()
            .on_collision_enter(Box::new(move |_, _| *entered_hook.borrow_mut() += 1));

        for _ in 0..1000 {
            world.step().expect("step should succeed");
        }
        assert!(*entered.borrow() >= 1, "the circles must have touched");
    }

    #[test]
    fn test_sleep_quiescent_body() {
        let mut config = SimulationConfig::default();
        config.gravity = Vector2::zeros();
        config.islands.steps_to_sleep = 10;
        let mut world = World::new(config);
        let id = world
            .add_body(&BodySpec::new().shape(ShapeSpec::circle(0.5)))
            .unwrap();

        for _ in 0..20 {
            world.step().expect("step should succeed");
        }
        assert!(world.body(id).unwrap().is_sleeping());

        // An external force wakes it
        world.body_mut(id).unwrap().add_force(Vector2::new(1.0, 0.0));
        assert!(!world.body(id).unwrap().is_sleeping());
    }

    #[test]
    fn test_behaviour_force_applies() {
        let mut config = SimulationConfig::default();
        config.gravity = Vector2::zeros();
        let mut world = World::new(config);
        let id = world
            .add_body(
                &BodySpec::new()
                    .velocity(Vector2::new(10.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
            )
            .unwrap();
        world.add_behaviour(Box::new(crate::behaviour::LinearDrag {
            linear: 1.0,
            angular: 0.0,
        }));

        for _ in 0..1000 {
            world.step().expect("step should succeed");
        }
        let v = world.body(id).unwrap().velocity.linear.x;
        assert!(v < 10.0 && v > 0.0, "drag must slow the body, got {v}");

        assert!(world.remove_behaviour("linear-drag"));
        assert!(!world.remove_behaviour("linear-drag"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut world = World::new(SimulationConfig::default());
        let a = world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(0.0, 2.0))
                    .shape(ShapeSpec::circle(0.5))
                    .charge(2.0),
            )
            .unwrap();
        let b = world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(1.0, 2.0))
                    .shape(ShapeSpec::rect(0.5, 0.5)),
            )
            .unwrap();
        world
            .add_joint::<crate::joints::DistanceJoint>(&crate::joints::DistanceJointSpec::rigid(
                a,
                b,
                Point2::new(0.0, 2.0),
                Point2::new(1.0, 2.0),
            ))
            .unwrap();
        world
            .add_spring(&SpringSpec::new(
                a,
                b,
                Point2::new(0.0, 2.0),
                Point2::new(1.0, 2.0),
                5.0,
                0.1,
            ))
            .unwrap();

        let snapshot = world.snapshot();
        assert_eq!(snapshot.bodies.len(), 2);
        assert_eq!(snapshot.springs.len(), 1);
        assert_eq!(snapshot.constraints.len(), 1);

        let restored =
            World::from_snapshot(&snapshot, SimulationConfig::default()).expect("restore");
        assert_eq!(restored.body_count(), 2);
        assert_eq!(restored.joint_count(), 2);
        assert_eq!(restored.snapshot().bodies, snapshot.bodies);
    }

    #[test]
    fn test_energies_track_fall() {
        let (mut world, _) = falling_circle_world();
        let initial = world.energies();

        for _ in 0..500 {
            world.step().expect("step should succeed");
        }
        let later = world.energies();

        assert!(later.kinetic > initial.kinetic);
        assert!(later.potential < initial.potential);
        // Forward Euler gains a little energy; totals stay close
        assert_relative_eq!(later.total(), initial.total(), epsilon = 0.5);
    }
}
