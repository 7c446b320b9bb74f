//! Benchmarks for the collision pipeline.
//!
//! Run with: cargo bench -p planar-core

#![allow(missing_docs, clippy::wildcard_imports)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::Point2;

use planar_core::body::BodyStore;
use planar_core::broad_phase::{BroadPhase, BruteForce, SortAndSweep};
use planar_core::World;
use planar_types::{BodySpec, BodyType, DetectionMethod, ShapeSpec, SimulationConfig};

/// Deterministic pseudo-random scene without pulling in an RNG crate.
struct Lcg(u64);

impl Lcg {
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

fn scattered_store(count: usize, extent: f64) -> BodyStore {
    let mut rng = Lcg(99);
    let mut store = BodyStore::new();
    for _ in 0..count {
        let spec = BodySpec::new()
            .position(Point2::new(
                rng.in_range(-extent, extent),
                rng.in_range(-extent, extent),
            ))
            .shape(ShapeSpec::circle(rng.in_range(0.3, 1.0)));
        store.add(&spec, (0.0, 0.5)).expect("valid spec");
    }
    store
}

fn bench_broad_phase(c: &mut Criterion) {
    let mut group = c.benchmark_group("broad_phase");

    for &count in &[100usize, 500, 1000] {
        let store = scattered_store(count, 50.0);

        group.bench_with_input(BenchmarkId::new("brute_force", count), &store, |b, s| {
            let mut brute = BruteForce::new(false);
            b.iter(|| black_box(brute.candidate_pairs(s)));
        });
        group.bench_with_input(BenchmarkId::new("sort_and_sweep", count), &store, |b, s| {
            let mut sweep = SortAndSweep::new();
            b.iter(|| black_box(sweep.candidate_pairs(s)));
        });
    }
    group.finish();
}

fn bench_world_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");

    for method in [DetectionMethod::SortAndSweep, DetectionMethod::QuadTree] {
        let mut config = SimulationConfig::default();
        config.collision.method = method;
        let mut world = World::new(config);

        world
            .add_body(
                &BodySpec::new()
                    .position(Point2::new(0.0, -1.0))
                    .shape(ShapeSpec::rect(60.0, 1.0))
                    .body_type(BodyType::Static),
            )
            .expect("valid spec");

        let mut rng = Lcg(7);
        for _ in 0..200 {
            world
                .add_body(
                    &BodySpec::new()
                        .position(Point2::new(rng.in_range(-40.0, 40.0), rng.in_range(0.5, 20.0)))
                        .shape(ShapeSpec::circle(rng.in_range(0.2, 0.6))),
                )
                .expect("valid spec");
        }

        group.bench_function(BenchmarkId::new("settle", format!("{method:?}")), |b| {
            b.iter(|| {
                world.step().expect("step should succeed");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broad_phase, bench_world_step);
criterion_main!(benches);
