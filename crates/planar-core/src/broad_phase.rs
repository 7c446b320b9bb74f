//! Broad-phase collision detection.
//!
//! Three interchangeable strategies produce a candidate pair set for the
//! narrow phase: a brute-force double loop (correctness baseline),
//! sort-and-sweep over x-axis AABB intervals, and the quad-tree partition.
//! Duplicate pairs are permitted; the contact cache deduplicates on its
//! key before anything reaches the solver.
//!
//! With the `parallel` feature and the `multithreaded` collision flag set,
//! quad-tree leaves (and the brute-force outer loop) fan out across
//! threads; merged results are reordered canonically (low id first) so the
//! downstream solve order is independent of thread interleaving.

use std::sync::atomic::{AtomicU64, Ordering};

use planar_types::{BodyId, CollisionConfig, DetectionMethod};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::body::{Body, BodyStore};
use crate::quad_tree::{QuadTree, QuadTreeEntry};
use crate::shape::{may_intersect, Aabb};

/// Step counter gating quad-tree rebuilds.
///
/// Deliberately process-wide: every world sharing the process advances the
/// same counter, so the rebuild period is shared across worlds.
static QT_REBUILD_TICKS: AtomicU64 = AtomicU64::new(0);

/// An unordered candidate pair, stored canonically (low id first).
pub type CandidatePair = (BodyId, BodyId);

fn canonical(a: BodyId, b: BodyId) -> CandidatePair {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Pre-filter applied to every candidate pair.
///
/// Skips self-pairs, pairs where neither body is dynamic, and pairs whose
/// bounding boxes do not intersect.
#[must_use]
pub fn pair_admissible(a: &Body, b: &Body) -> bool {
    a.id() != b.id()
        && (a.body_type().is_dynamic() || b.body_type().is_dynamic())
        && may_intersect(a.aabb(), b.aabb())
}

/// Trait for broad-phase strategies.
pub trait BroadPhase {
    /// Produce the candidate pair set for the current body population.
    fn candidate_pairs(&mut self, bodies: &BodyStore) -> Vec<CandidatePair>;
}

/// O(n²) double loop over bodies; the correctness baseline.
#[derive(Debug, Clone, Default)]
pub struct BruteForce {
    multithreaded: bool,
}

impl BruteForce {
    /// Create a brute-force broad phase.
    #[must_use]
    pub fn new(multithreaded: bool) -> Self {
        Self { multithreaded }
    }
}

impl BroadPhase for BruteForce {
    fn candidate_pairs(&mut self, bodies: &BodyStore) -> Vec<CandidatePair> {
        #[cfg(feature = "parallel")]
        if self.multithreaded {
            // Parallel branch sweeps the full inner range rather than
            // starting at i + 1, so every admissible pair is produced
            // twice; the canonical sort below collapses the duplicates.
            let all: Vec<&Body> = bodies.iter().collect();
            let mut pairs: Vec<CandidatePair> = all
                .par_iter()
                .enumerate()
                .flat_map_iter(|(i, &a)| {
                    all.iter()
                        .enumerate()
                        .filter(move |&(j, _)| j != i)
                        .filter(|&(_, &b)| pair_admissible(a, b))
                        .map(|(_, &b)| canonical(a.id(), b.id()))
                        .collect::<Vec<_>>()
                })
                .collect();
            pairs.sort_unstable();
            pairs.dedup();
            return pairs;
        }
        #[cfg(not(feature = "parallel"))]
        let _ = self.multithreaded;

        let mut pairs = Vec::new();
        let n = bodies.len();
        for i in 0..n {
            let Some(a) = bodies.by_index(i) else { continue };
            for j in (i + 1)..n {
                let Some(b) = bodies.by_index(j) else { continue };
                if pair_admissible(a, b) {
                    pairs.push(canonical(a.id(), b.id()));
                }
            }
        }
        pairs
    }
}

/// Endpoint kind for sort-and-sweep; lower endpoints sort before upper
/// endpoints at equal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EndpointKind {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    value: f64,
    kind: EndpointKind,
    id: BodyId,
    index: usize,
}

/// Sort-and-sweep over x-axis AABB intervals.
///
/// Two endpoints per body, sorted by value with ties broken by endpoint
/// kind (lower first) then body id. A pair is emitted for every body open
/// when a new lower endpoint is processed.
#[derive(Debug, Clone, Default)]
pub struct SortAndSweep {
    endpoints: Vec<Endpoint>,
}

impl SortAndSweep {
    /// Create a sort-and-sweep broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadPhase for SortAndSweep {
    fn candidate_pairs(&mut self, bodies: &BodyStore) -> Vec<CandidatePair> {
        self.endpoints.clear();
        for body in bodies.iter() {
            self.endpoints.push(Endpoint {
                value: body.aabb().min.x,
                kind: EndpointKind::Lower,
                id: body.id(),
                index: body.index(),
            });
            self.endpoints.push(Endpoint {
                value: body.aabb().max.x,
                kind: EndpointKind::Upper,
                id: body.id(),
                index: body.index(),
            });
        }

        self.endpoints.sort_by(|a, b| {
            a.value
                .partial_cmp(&b.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.kind.cmp(&b.kind))
                .then(a.id.cmp(&b.id))
        });

        let mut pairs = Vec::new();
        let mut open: Vec<(BodyId, usize)> = Vec::new();

        for endpoint in &self.endpoints {
            match endpoint.kind {
                EndpointKind::Lower => {
                    let Some(body) = bodies.by_index(endpoint.index) else {
                        continue;
                    };
                    for &(other_id, other_index) in &open {
                        let Some(other) = bodies.by_index(other_index) else {
                            continue;
                        };
                        if pair_admissible(body, other) {
                            pairs.push(canonical(endpoint.id, other_id));
                        }
                    }
                    open.push((endpoint.id, endpoint.index));
                }
                EndpointKind::Upper => {
                    open.retain(|&(id, _)| id != endpoint.id);
                }
            }
        }
        pairs
    }
}

/// Quad-tree broad phase: pairs within each leaf partition.
#[derive(Debug, Clone)]
pub struct QuadTreeBroadPhase {
    tree: QuadTree,
    config: CollisionConfig,
    needs_rebuild: bool,
}

impl QuadTreeBroadPhase {
    /// Create a quad-tree broad phase.
    #[must_use]
    pub fn new(config: CollisionConfig) -> Self {
        let tree = QuadTree::new(Aabb::default(), config.quad_tree);
        Self {
            tree,
            config,
            needs_rebuild: true,
        }
    }

    /// Read access to the underlying tree.
    #[must_use]
    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }

    /// Request a full rebuild on the next query (topology changed).
    pub fn invalidate(&mut self) {
        self.needs_rebuild = true;
    }

    /// Root region enclosing all bodies, optionally forced square.
    fn enclosing_region(&self, bodies: &BodyStore) -> Aabb {
        let mut region: Option<Aabb> = None;
        for body in bodies.iter() {
            region = Some(match region {
                Some(r) => r.merged(body.aabb()),
                None => *body.aabb(),
            });
        }
        let mut region = region.unwrap_or_default().expanded(1.0);

        if self.config.quad_tree.force_square_shape {
            let dim = region.dimensions();
            let side = dim.x.max(dim.y);
            region = Aabb::from_center(
                region.center(),
                nalgebra::Vector2::new(side * 0.5, side * 0.5),
            );
        }
        region
    }

    fn rebuild(&mut self, bodies: &BodyStore) {
        let region = self.enclosing_region(bodies);
        self.tree.reset_region(region);
        for body in bodies.iter() {
            self.tree.insert(QuadTreeEntry {
                index: body.index(),
                id: body.id(),
                aabb: *body.aabb(),
            });
        }
        self.needs_rebuild = false;
    }

    fn leaf_pairs(partition: &[QuadTreeEntry], bodies: &BodyStore) -> Vec<CandidatePair> {
        let mut pairs = Vec::new();
        for (i, ea) in partition.iter().enumerate() {
            for eb in partition.iter().skip(i + 1) {
                let (Some(a), Some(b)) = (bodies.get(ea.id), bodies.get(eb.id)) else {
                    continue;
                };
                if pair_admissible(a, b) {
                    pairs.push(canonical(ea.id, eb.id));
                }
            }
        }
        pairs
    }
}

impl BroadPhase for QuadTreeBroadPhase {
    fn candidate_pairs(&mut self, bodies: &BodyStore) -> Vec<CandidatePair> {
        let tick = QT_REBUILD_TICKS.fetch_add(1, Ordering::Relaxed);
        if self.needs_rebuild || tick % u64::from(self.config.rebuild_period) == 0 {
            self.rebuild(bodies);
        } else {
            let refresh = |id: BodyId| bodies.get(id).map(|b| *b.aabb());
            self.tree.refresh(refresh);
        }

        let mut partitions = Vec::new();
        self.tree.collect_partitions(&mut partitions);

        #[cfg(feature = "parallel")]
        if self.config.multithreaded {
            // Per-thread accumulation, then a canonical merge so the solve
            // order does not depend on thread interleaving
            let mut pairs: Vec<CandidatePair> = partitions
                .par_iter()
                .flat_map_iter(|&partition| Self::leaf_pairs(partition, bodies))
                .collect();
            pairs.sort_unstable();
            pairs.dedup();
            return pairs;
        }

        let mut pairs = Vec::new();
        for partition in partitions {
            pairs.extend(Self::leaf_pairs(partition, bodies));
        }
        pairs
    }
}

/// Dispatches to the configured broad-phase strategy.
#[derive(Debug, Clone)]
pub struct BroadPhaseDetector {
    config: CollisionConfig,
    brute: BruteForce,
    sweep: SortAndSweep,
    quad_tree: QuadTreeBroadPhase,
}

impl BroadPhaseDetector {
    /// Create a detector for the given collision configuration.
    #[must_use]
    pub fn new(config: CollisionConfig) -> Self {
        Self {
            brute: BruteForce::new(config.multithreaded),
            sweep: SortAndSweep::new(),
            quad_tree: QuadTreeBroadPhase::new(config.clone()),
            config,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Notify the detector that bodies were added or removed.
    pub fn note_topology_changed(&mut self) {
        self.quad_tree.invalidate();
    }

    /// Find all candidate pairs with the configured strategy.
    pub fn candidate_pairs(&mut self, bodies: &BodyStore) -> Vec<CandidatePair> {
        match self.config.method {
            DetectionMethod::BruteForce => self.brute.candidate_pairs(bodies),
            DetectionMethod::SortAndSweep => self.sweep.candidate_pairs(bodies),
            DetectionMethod::QuadTree => self.quad_tree.candidate_pairs(bodies),
        }
    }

    /// Read access to the quad tree (diagnostics and tests).
    #[must_use]
    pub fn quad_tree(&self) -> &QuadTree {
        self.quad_tree.tree()
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
    use nalgebra::{Point2, Vector2};
    use planar_types::{BodySpec, BodyType, ShapeSpec};
    use std::collections::HashSet;

    const MATERIALS: (f64, f64) = (0.0, 0.5);

    fn store_with_circles(positions: &[(f64, f64)], radius: f64) -> BodyStore {
        let mut store = BodyStore::new();
        for &(x, y) in positions {
            store
                .add(
                    &BodySpec::new()
                        .position(Point2::new(x, y))
                        .shape(ShapeSpec::circle(radius)),
                    MATERIALS,
                )
                .unwrap();
        }
        store
    }

    fn pair_set(pairs: &[CandidatePair]) -> HashSet<CandidatePair> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_brute_force_finds_overlap() {
        let store = store_with_circles(&[(0.0, 0.0), (1.5, 0.0), (10.0, 0.0)], 1.0);
        let mut brute = BruteForce::new(false);
        let pairs = brute.candidate_pairs(&store);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0], (BodyId::new(1), BodyId::new(2)));
    }

    #[test]
    fn test_filter_skips_static_static() {
        let mut store = BodyStore::new();
        for x in [0.0, 0.5] {
            store
                .add(
                    &BodySpec::new()
                        .position(Point2::new(x, 0.0))
                        .shape(ShapeSpec::circle(1.0))
                        .body_type(BodyType::Static),
                    MATERIALS,
                )
                .unwrap();
        }
        let mut brute = BruteForce::new(false);
        assert!(brute.candidate_pairs(&store).is_empty());
    }

    #[test]
    fn test_sweep_matches_brute_force() {
        let positions: Vec<(f64, f64)> = (0..25)
            .map(|i| (((i * 7) % 13) as f64 * 0.8, ((i * 3) % 5) as f64 * 0.9))
            .collect();
        let store = store_with_circles(&positions, 0.7);

        let brute_pairs = pair_set(&BruteForce::new(false).candidate_pairs(&store));
        let sweep_pairs = pair_set(&SortAndSweep::new().candidate_pairs(&store));

        assert_eq!(brute_pairs, sweep_pairs);
    }

    #[test]
    fn test_sweep_tie_break_on_touching_intervals() {
        // Two circles whose intervals share an endpoint value: the lower
        // endpoint sorts first, so the pair is still emitted
        let store = store_with_circles(&[(0.0, 0.0), (2.0, 0.0)], 1.0);
        let pairs = SortAndSweep::new().candidate_pairs(&store);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_quad_tree_contains_all_brute_pairs() {
        let positions: Vec<(f64, f64)> = (0..60)
            .map(|i| {
                (
                    ((i * 17) % 101) as f64 - 50.0,
                    ((i * 31) % 97) as f64 - 48.0,
                )
            })
            .collect();
        let store = store_with_circles(&positions, 2.5);

        let brute_pairs = pair_set(&BruteForce::new(false).candidate_pairs(&store));
        let mut qt = QuadTreeBroadPhase::new(CollisionConfig::default());
        let qt_pairs = pair_set(&qt.candidate_pairs(&store));

        for pair in &brute_pairs {
            assert!(
                qt_pairs.contains(pair),
                "quad tree must cover brute-force pair {pair:?}"
            );
        }
    }

    #[test]
    fn test_quad_tree_refresh_tracks_motion() {
        let mut store = store_with_circles(&[(0.0, 0.0), (8.0, 0.0)], 1.0);
        let mut qt = QuadTreeBroadPhase::new(CollisionConfig::default());

        assert!(qt.candidate_pairs(&store).is_empty());

        // Move the second body into contact and refresh (no topology change)
        let id = BodyId::new(2);
        let body = store.get_mut(id).unwrap();
        body.pose.position = Point2::new(1.5, 0.0);
        body.refresh_aabb();

        let pairs = qt.candidate_pairs(&store);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_detector_dispatch() {
        let store = store_with_circles(&[(0.0, 0.0), (1.5, 0.0)], 1.0);

        for method in [
            DetectionMethod::BruteForce,
            DetectionMethod::SortAndSweep,
            DetectionMethod::QuadTree,
        ] {
            let config = CollisionConfig {
                method,
                ..CollisionConfig::default()
            };
            let mut detector = BroadPhaseDetector::new(config);
            let pairs = detector.candidate_pairs(&store);
            assert_eq!(pairs.len(), 1, "{method:?} must find the single overlap");
        }
    }

    #[test]
    fn test_canonical_ordering() {
        let store = store_with_circles(&[(0.0, 0.0), (1.5, 0.0), (0.7, 0.1)], 1.0);
        let mut sweep = SortAndSweep::new();
        for (a, b) in sweep.candidate_pairs(&store) {
            assert!(a < b, "pairs must be ordered low id first");
        }
    }

    #[test]
    fn test_kinematic_pairs_with_dynamic_only() {
        let mut store = BodyStore::new();
        let spec = BodySpec::new().shape(ShapeSpec::circle(1.0));
        store
            .add(&spec.clone().body_type(BodyType::Kinematic), MATERIALS)
            .unwrap();
        store
            .add(
                &spec
                    .clone()
                    .position(Point2::new(1.0, 0.0))
                    .body_type(BodyType::Kinematic),
                MATERIALS,
            )
            .unwrap();
        store
            .add(
                &spec.position(Point2::new(0.5, 0.0)).velocity(Vector2::x()),
                MATERIALS,
            )
            .unwrap();

        let pairs = BruteForce::new(false).candidate_pairs(&store);
        // kinematic-kinematic is skipped; both kinematic-dynamic pairs stay
        assert_eq!(pairs.len(), 2);
    }
}
