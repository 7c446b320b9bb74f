//! Narrow-phase collision detection and the per-step collision set.
//!
//! The first derivative evaluation of a step runs the full broad + narrow
//! pipeline; later Runge-Kutta stages only *refine* the cached collisions,
//! re-running the narrow phase on each cached pair against the freshly
//! loaded poses. Refinement is embarrassingly parallel and fans out across
//! threads when the `parallel` feature and the multithreaded flag are on.

use nalgebra::Vector2;
use planar_types::BodyId;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::body::{Body, BodyStore};
use crate::broad_phase::BroadPhaseDetector;
use crate::gjk_epa::gjk_epa_mtv;
use crate::manifold::{self, Manifold};
use crate::shape::{may_intersect, Shape};

/// A temporary collision record between two bodies.
#[derive(Debug, Clone)]
pub struct Collision {
    /// First participant.
    pub first: BodyId,
    /// Second participant.
    pub second: BodyId,
    /// Unit normal pointing from the first body toward the second.
    pub normal: Vector2<f64>,
    /// Penetration depth (MTV magnitude).
    pub depth: f64,
    /// Up to two contact points.
    pub manifold: Manifold,
    /// Cleared when a refinement pass finds the pair separated.
    pub valid: bool,
}

/// Narrow-phase check for one pair.
///
/// Circle-circle uses the analytic path; everything else goes through
/// GJK/EPA and face clipping. GJK non-convergence means no collision; EPA
/// degeneracy aborts the pair (logged at debug, no crash).
#[must_use]
pub fn narrow_check(a: &Body, b: &Body, epa_threshold: f64) -> Option<Collision> {
    if !may_intersect(a.aabb(), b.aabb()) {
        return None;
    }

    let (mtv, manifold) = match (a.shape(), b.shape()) {
        (Shape::Circle(ca), Shape::Circle(cb)) => {
            manifold::circle_circle(a.pose.position, ca.radius, b.pose.position, cb.radius)?
        }
        (shape_a, shape_b) => {
            let mtv = gjk_epa_mtv(shape_a, &a.pose, shape_b, &b.pose, epa_threshold)?;
            if mtv.depth <= 0.0 {
                return None;
            }
            let manifold = manifold::from_mtv(shape_a, &a.pose, shape_b, &b.pose, &mtv);
            if manifold.is_empty() {
                debug!(first = %a.id(), second = %b.id(), "dropping pair: empty manifold");
                return None;
            }
            (mtv, manifold)
        }
    };

    Some(Collision {
        first: a.id(),
        second: b.id(),
        normal: mtv.normal,
        depth: mtv.depth,
        manifold,
        valid: true,
    })
}

/// The collision set of the running step.
#[derive(Debug, Clone, Default)]
pub struct CollisionSet {
    collisions: Vec<Collision>,
}

impl CollisionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached collisions (start of a step).
    pub fn clear(&mut self) {
        self.collisions.clear();
    }

    /// The current collisions, including invalidated ones.
    #[must_use]
    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Valid collisions only.
    pub fn valid(&self) -> impl Iterator<Item = &Collision> {
        self.collisions.iter().filter(|c| c.valid)
    }

    /// Detect or refine collisions for the current body poses.
    ///
    /// An empty set triggers full detection through the broad phase; a
    /// non-empty set is refined pair by pair.
    pub fn detect(
        &mut self,
        bodies: &BodyStore,
        detector: &mut BroadPhaseDetector,
        epa_threshold: f64,
        multithreaded: bool,
        skip: impl Fn(BodyId, BodyId) -> bool,
    ) {
        if self.collisions.is_empty() {
            self.full_detection(bodies, detector, epa_threshold, &skip);
        } else {
            self.refine(bodies, epa_threshold, multithreaded);
        }
    }

    fn full_detection(
        &mut self,
        bodies: &BodyStore,
        detector: &mut BroadPhaseDetector,
        epa_threshold: f64,
        skip: &impl Fn(BodyId, BodyId) -> bool,
    ) {
        let pairs = detector.candidate_pairs(bodies);
        for (id_a, id_b) in pairs {
            if skip(id_a, id_b) {
                continue;
            }
            let (Some(a), Some(b)) = (bodies.get(id_a), bodies.get(id_b)) else {
                continue;
            };
            if let Some(collision) = narrow_check(a, b, epa_threshold) {
                self.collisions.push(collision);
            }
        }
    }

    fn refine(&mut self, bodies: &BodyStore, epa_threshold: f64, multithreaded: bool) {
        let refine_one = |collision: &mut Collision| {
            let (Some(a), Some(b)) = (bodies.get(collision.first), bodies.get(collision.second))
            else {
                collision.valid = false;
                return;
            };
            match narrow_check(a, b, epa_threshold) {
                Some(fresh) => {
                    collision.normal = fresh.normal;
                    collision.depth = fresh.depth;
                    collision.manifold = fresh.manifold;
                    collision.valid = true;
                }
                None => collision.valid = false,
            }
        };

        #[cfg(feature = "parallel")]
        if multithreaded {
            self.collisions.par_iter_mut().for_each(|c| refine_one(c));
            return;
        }
        #[cfg(not(feature = "parallel"))]
        let _ = multithreaded;

        for collision in &mut self.collisions {
            refine_one(collision);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point2;
    use planar_types::{BodySpec, CollisionConfig, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);
    const EPA: f64 = 1e-6;

    fn two_body_store(spec_a: BodySpec, spec_b: BodySpec) -> BodyStore {
        let mut store = BodyStore::new();
        store.add(&spec_a, MATERIALS).unwrap();
        store.add(&spec_b, MATERIALS).unwrap();
        store
    }

    #[test]
    fn test_narrow_circle_circle() {
        let store = two_body_store(
            BodySpec::new().shape(ShapeSpec::circle(1.0)),
            BodySpec::new()
                .position(Point2::new(1.5, 0.0))
                .shape(ShapeSpec::circle(1.0)),
        );
        let a = store.by_index(0).unwrap();
        let b = store.by_index(1).unwrap();

        let collision = narrow_check(a, b, EPA).expect("overlapping circles");
        assert_relative_eq!(collision.depth, 0.5, epsilon = 1e-9);
        assert_relative_eq!(collision.normal.x, 1.0, epsilon = 1e-9);
        assert_eq!(collision.manifold.len(), 1);
    }

    #[test]
    fn test_narrow_box_box_manifold() {
        let store = two_body_store(
            BodySpec::new().shape(ShapeSpec::rect(1.0, 1.0)),
            BodySpec::new()
                .position(Point2::new(1.8, 0.0))
                .shape(ShapeSpec::rect(1.0, 1.0)),
        );
        let a = store.by_index(0).unwrap();
        let b = store.by_index(1).unwrap();

        let collision = narrow_check(a, b, EPA).expect("overlapping boxes");
        assert_eq!(collision.manifold.len(), 2);
        assert_relative_eq!(collision.depth, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_narrow_separated() {
        let store = two_body_store(
            BodySpec::new().shape(ShapeSpec::circle(0.5)),
            BodySpec::new()
                .position(Point2::new(5.0, 0.0))
                .shape(ShapeSpec::rect(0.5, 0.5)),
        );
        assert!(narrow_check(store.by_index(0).unwrap(), store.by_index(1).unwrap(), EPA).is_none());
    }

    #[test]
    fn test_detect_then_refine() {
        let mut store = two_body_store(
            BodySpec::new().shape(ShapeSpec::circle(1.0)),
            BodySpec::new()
                .position(Point2::new(1.5, 0.0))
                .shape(ShapeSpec::circle(1.0)),
        );
        let mut detector = BroadPhaseDetector::new(CollisionConfig::default());
        let mut set = CollisionSet::new();

        set.detect(&store, &mut detector, EPA, false, |_, _| false);
        assert_eq!(set.valid().count(), 1);

        // Separate the bodies, refine: the cached pair turns invalid
        let body = store.by_index_mut(1).unwrap();
        body.pose.position = Point2::new(5.0, 0.0);
        body.refresh_aabb();

        set.detect(&store, &mut detector, EPA, false, |_, _| false);
        assert_eq!(set.valid().count(), 0);
        assert_eq!(set.collisions().len(), 1, "entry stays, flagged invalid");
    }

    #[test]
    fn test_skip_filter_suppresses_pair() {
        let store = two_body_store(
            BodySpec::new().shape(ShapeSpec::circle(1.0)),
            BodySpec::new()
                .position(Point2::new(1.5, 0.0))
                .shape(ShapeSpec::circle(1.0)),
        );
        let mut detector = BroadPhaseDetector::new(CollisionConfig::default());
        let mut set = CollisionSet::new();

        set.detect(&store, &mut detector, EPA, false, |_, _| true);
        assert_eq!(set.collisions().len(), 0);
    }
}
