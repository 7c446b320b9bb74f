//! End-to-end scenarios exercising the full step pipeline.

use approx::assert_relative_eq;
use nalgebra::{Point2, Vector2};
use planar_core::joints::{DistanceJoint, DistanceJointSpec};
use planar_core::World;
use planar_types::{
    BodyId, BodySpec, BodyType, DetectionMethod, ShapeSpec, SimulationConfig,
};

/// Tiny deterministic LCG so scenes are reproducible without an RNG crate.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 11) as f64) / ((1u64 << 53) as f64)
    }

    fn in_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

fn ground(world: &mut World, friction: f64) -> BodyId {
    world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(0.0, -1.0))
                .shape(ShapeSpec::rect(50.0, 1.0))
                .body_type(BodyType::Static)
                .friction(friction)
                .restitution(0.0),
        )
        .expect("ground should be valid")
}

#[test]
fn head_on_circles_reverse_with_full_restitution() {
    let mut world = World::new(SimulationConfig::default().zero_gravity());

    let a = world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(-1.0, 0.0))
                .velocity(Vector2::new(1.0, 0.0))
                .shape(ShapeSpec::circle(0.5))
                .restitution(1.0)
                .friction(0.0),
        )
        .expect("body should be valid");
    let b = world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(1.0, 0.0))
                .velocity(Vector2::new(-1.0, 0.0))
                .shape(ShapeSpec::circle(0.5))
                .restitution(1.0)
                .friction(0.0),
        )
        .expect("body should be valid");

    // Surfaces meet after 0.5 s; leave time for the bounce to finish
    for _ in 0..700 {
        world.step().expect("step should succeed");
    }

    let va = world.body(a).expect("body a").velocity.linear;
    let vb = world.body(b).expect("body b").velocity.linear;
    assert_relative_eq!(va.x, -1.0, epsilon = 1e-3);
    assert_relative_eq!(vb.x, 1.0, epsilon = 1e-3);
    assert_relative_eq!(va.y, 0.0, epsilon = 1e-3);
    assert_relative_eq!(vb.y, 0.0, epsilon = 1e-3);
}

#[test]
fn exactly_touching_circles_do_not_collide() {
    let mut world = World::new(SimulationConfig::default().zero_gravity());

    world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(-0.5, 0.0))
                .shape(ShapeSpec::circle(0.5)),
        )
        .expect("body should be valid");
    world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(0.5, 0.0))
                .shape(ShapeSpec::circle(0.5)),
        )
        .expect("body should be valid");

    let result = world.step().expect("step should succeed");
    assert_eq!(result.active_contacts, 0, "d = r1 + r2 is not a collision");
}

#[test]
fn stacked_boxes_come_to_rest() {
    let mut world = World::new(SimulationConfig::default());
    ground(&mut world, 0.5);

    let bottom = world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(0.0, 0.5))
                .shape(ShapeSpec::rect(0.5, 0.5))
                .restitution(0.0),
        )
        .expect("body should be valid");
    let top = world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(0.0, 1.5))
                .shape(ShapeSpec::rect(0.5, 0.5))
                .restitution(0.0),
        )
        .expect("body should be valid");

    // 2 seconds simulated
    for _ in 0..2000 {
        world.step().expect("step should succeed");
    }

    let slop = world.config().solver.slop;
    let top_body = world.body(top).expect("top box");
    assert!(
        (top_body.pose.position.y - 1.5).abs() <= slop,
        "top box centre must stay near 1.5, got {}",
        top_body.pose.position.y
    );
    assert!(
        top_body.velocity.angular.abs() < 1e-2,
        "top box must not be spinning, got {}",
        top_body.velocity.angular
    );

    let bottom_body = world.body(bottom).expect("bottom box");
    assert!((bottom_body.pose.position.y - 0.5).abs() <= slop);
}

#[test]
fn distance_joint_restores_rest_length() {
    let mut world = World::new(SimulationConfig::default().zero_gravity());

    // Two 1 kg bodies dragged apart to 1.5, joint rest length 1
    let a = world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(0.0, 0.0))
                .shape(ShapeSpec::circle(0.1)),
        )
        .expect("body should be valid");
    let b = world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(1.5, 0.0))
                .shape(ShapeSpec::circle(0.1)),
        )
        .expect("body should be valid");

    let spec = DistanceJointSpec {
        min_length: 1.0,
        max_length: 1.0,
        ..DistanceJointSpec::rigid(a, b, Point2::new(0.0, 0.0), Point2::new(1.5, 0.0))
    };
    world
        .add_joint::<DistanceJoint>(&spec)
        .expect("joint should be valid");

    // 1 second simulated
    for _ in 0..1000 {
        world.step().expect("step should succeed");
    }

    let pa = world.body(a).expect("body a").pose.position;
    let pb = world.body(b).expect("body b").pose.position;
    assert_relative_eq!((pb - pa).norm(), 1.0, epsilon = 0.01);
}

#[test]
fn quad_tree_candidates_cover_brute_force() {
    use planar_core::broad_phase::{BroadPhase, BroadPhaseDetector, BruteForce};
    use planar_core::body::BodyStore;
    use std::collections::HashSet;

    let mut rng = Lcg::new(42);
    let mut store = BodyStore::new();
    for _ in 0..1000 {
        let spec = BodySpec::new()
            .position(Point2::new(rng.in_range(-50.0, 50.0), rng.in_range(-50.0, 50.0)))
            .shape(ShapeSpec::circle(rng.in_range(0.3, 1.2)));
        store.add(&spec, (0.0, 0.5)).expect("spec should be valid");
    }

    let brute: HashSet<_> = BruteForce::new(false)
        .candidate_pairs(&store)
        .into_iter()
        .collect();

    let mut config = SimulationConfig::default();
    config.collision.method = DetectionMethod::QuadTree;
    let mut detector = BroadPhaseDetector::new(config.collision.clone());
    let quad: HashSet<_> = detector.candidate_pairs(&store).into_iter().collect();

    // Deduplicated, the quad tree reports no more pairs than brute force...
    assert!(quad.len() <= brute.len());
    // ...and every brute-force pair is contained in the candidate set
    for pair in &brute {
        assert!(
            quad.contains(pair),
            "quad tree is missing candidate pair {pair:?}"
        );
    }
}

#[test]
fn friction_cone_gates_sliding() {
    let run = |impulse: f64| -> f64 {
        let mut world = World::new(SimulationConfig::default());
        ground(&mut world, 0.3);
        let slider = world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(0.0, 0.5))
                    .shape(ShapeSpec::rect(0.5, 0.5))
                    .friction(0.3)
                    .restitution(0.0),
            )
            .expect("body should be valid");

        // Let the box settle onto the floor
        for _ in 0..300 {
            world.step().expect("step should succeed");
        }
        let start_x = world.body(slider).expect("slider").pose.position.x;

        // A horizontal impulse of the requested magnitude (N·s)
        let dt = world.config().timestep;
        world
            .body_mut(slider)
            .expect("slider")
            .add_impulse_force(Vector2::new(impulse / dt, 0.0));

        for _ in 0..1000 {
            world.step().expect("step should succeed");
        }
        world.body(slider).expect("slider").pose.position.x - start_x
    };

    // Per-step friction capacity is μ · m · g · dt ≈ 2.9e-3 N·s
    let weak = run(1.0e-3);
    let strong = run(10.0);

    assert!(
        weak.abs() < 0.01,
        "impulse below the cone must not slide the box, moved {weak}"
    );
    assert!(
        strong > 1.0,
        "impulse far above the cone must slide the box, moved {strong}"
    );
}

#[test]
fn checkpoint_step_revert_is_bit_identical() {
    let mut world = World::new(SimulationConfig::default());
    ground(&mut world, 0.5);
    for i in 0..5 {
        world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(f64::from(i) * 0.4 - 1.0, 1.0 + f64::from(i)))
                    .shape(ShapeSpec::circle(0.3)),
            )
            .expect("body should be valid");
    }

    for _ in 0..50 {
        world.step().expect("step should succeed");
    }

    world.checkpoint();
    let before = world.state_vector().to_vec();

    world.step().expect("step should succeed");
    world.revert().expect("revert should succeed");

    assert_eq!(world.state_vector(), before.as_slice());
}

#[test]
fn thousand_steps_are_deterministic() {
    // Sort-and-sweep sidesteps the process-wide quad-tree rebuild counter,
    // which is deliberately shared across worlds
    let build = || {
        let mut config = SimulationConfig::default();
        config.collision.method = DetectionMethod::SortAndSweep;
        let mut world = World::new(config);
        ground(&mut world, 0.4);

        let mut rng = Lcg::new(7);
        for _ in 0..30 {
            let x = rng.in_range(-5.0, 5.0);
            let y = rng.in_range(0.5, 8.0);
            let spec = if rng.next_f64() < 0.5 {
                BodySpec::new()
                    .position(Point2::new(x, y))
                    .shape(ShapeSpec::circle(rng.in_range(0.2, 0.5)))
            } else {
                BodySpec::new()
                    .position(Point2::new(x, y))
                    .shape(ShapeSpec::rect(rng.in_range(0.2, 0.5), rng.in_range(0.2, 0.5)))
            };
            world.add_body(&spec).expect("spec should be valid");
        }
        world
    };

    let mut first = build();
    let mut second = build();

    for _ in 0..1000 {
        first.step().expect("step should succeed");
    }
    for _ in 0..1000 {
        second.step().expect("step should succeed");
    }

    assert_eq!(
        first.state_vector(),
        second.state_vector(),
        "identical inputs must produce bitwise-identical state"
    );
}

#[test]
fn penetration_below_slop_reports_solved() {
    let mut world = World::new(SimulationConfig::default().zero_gravity());
    let slop = world.config().solver.slop;

    // Overlap of slop/2: the position pass has nothing to do
    world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(-0.5 + slop * 0.25, 0.0))
                .shape(ShapeSpec::circle(0.5)),
        )
        .expect("body should be valid");
    world
        .add_body(
            &BodySpec::new()
                .position(Point2::new(0.5 - slop * 0.25, 0.0))
                .shape(ShapeSpec::circle(0.5)),
        )
        .expect("body should be valid");

    let result = world.step().expect("step should succeed");
    assert_eq!(result.active_contacts, 1);
    assert!(result.positions_solved);
}
