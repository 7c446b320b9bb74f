//! GJK (Gilbert-Johnson-Keerthi) and EPA (Expanding Polytope Algorithm).
//!
//! Narrow-phase collision detection for convex shapes: GJK decides whether
//! two shapes overlap, EPA recovers the minimum translation vector (MTV)
//! when they do.
//!
//! # Algorithm Overview
//!
//! ## GJK
//!
//! GJK works in Minkowski space (the Minkowski difference of the two
//! shapes). If the shapes overlap, their difference contains the origin.
//! GJK iteratively builds a simplex (point, segment, triangle) that tries
//! to enclose the origin, driven only by the shapes' support functions.
//!
//! ## EPA
//!
//! When GJK reports overlap, EPA expands the terminal simplex into a
//! polytope that hugs the boundary of the Minkowski difference: repeatedly
//! find the edge closest to the origin, push it outward with a new support
//! point, and stop once the gain falls below the configured threshold.
//! The closest edge's outward normal and distance are the MTV.
//!
//! # References
//!
//! - Gilbert, Johnson, Keerthi: "A Fast Procedure for Computing the
//!   Distance Between Complex Objects in Three-Dimensional Space" (1988)
//! - van den Bergen: "Collision Detection in Interactive 3D Environments"

use nalgebra::{Point2, Vector2};
use planar_types::Pose;
use tracing::debug;

use crate::linalg::perp;
use crate::shape::Shape;

/// Tolerance for numerical comparisons in GJK/EPA.
const EPSILON: f64 = 1e-10;

/// Maximum iterations for GJK before giving up.
const GJK_MAX_ITERATIONS: usize = 64;

/// Maximum iterations for EPA before giving up.
const EPA_MAX_ITERATIONS: usize = 64;

/// Maximum vertices in the EPA polytope.
const EPA_MAX_VERTICES: usize = 96;

/// A point in Minkowski space, with the support points from both shapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinkowskiPoint {
    /// The point in Minkowski space (`support_a - support_b`).
    pub point: Point2<f64>,
    /// Support point from the first shape, world space.
    pub support_a: Point2<f64>,
    /// Support point from the second shape, world space.
    pub support_b: Point2<f64>,
}

impl MinkowskiPoint {
    fn new(support_a: Point2<f64>, support_b: Point2<f64>) -> Self {
        Self {
            point: Point2::from(support_a - support_b),
            support_a,
            support_b,
        }
    }
}

/// A simplex used in GJK iteration: point (1), segment (2) or triangle (3).
#[derive(Debug, Clone, Default)]
pub struct Simplex {
    points: [MinkowskiPoint; 3],
    size: usize,
}

impl Simplex {
    /// Create a new empty simplex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a point onto the simplex; the newest point is always index 0.
    pub fn push(&mut self, point: MinkowskiPoint) {
        for i in (1..=self.size.min(2)).rev() {
            self.points[i] = self.points[i - 1];
        }
        self.points[0] = point;
        self.size = (self.size + 1).min(3);
    }

    /// Number of points in the simplex.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the simplex is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The points as a slice.
    #[must_use]
    pub fn points(&self) -> &[MinkowskiPoint] {
        &self.points[..self.size]
    }

    fn set(&mut self, points: &[MinkowskiPoint]) {
        self.size = points.len().min(3);
        for (i, p) in points.iter().take(3).enumerate() {
            self.points[i] = *p;
        }
    }
}

/// Result of a GJK query.
#[derive(Debug, Clone)]
pub struct GjkResult {
    /// Whether the shapes intersect.
    pub intersecting: bool,
    /// The final simplex (seed for EPA when intersecting).
    pub simplex: Simplex,
    /// Number of iterations used.
    pub iterations: usize,
}

/// Minimum translation vector between two overlapping shapes.
///
/// Translating the second body by `normal * depth` separates the shapes.
#[derive(Debug, Clone, Copy)]
pub struct Mtv {
    /// Unit normal pointing from the first body toward the second.
    pub normal: Vector2<f64>,
    /// Penetration depth along `normal`.
    pub depth: f64,
}

/// Compute the support point on the Minkowski difference A - B.
fn support_minkowski(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    direction: &Vector2<f64>,
) -> MinkowskiPoint {
    let support_a = shape_a.support(pose_a, direction);
    let support_b = shape_b.support(pose_b, &-direction);
    MinkowskiPoint::new(support_a, support_b)
}

/// Run the GJK algorithm and return the terminal simplex.
#[must_use]
pub fn gjk_query(shape_a: &Shape, pose_a: &Pose, shape_b: &Shape, pose_b: &Pose) -> GjkResult {
    // Initial direction: from the centre of A toward the centre of B
    let mut direction = pose_b.position - pose_a.position;
    if direction.norm_squared() < EPSILON {
        direction = Vector2::x();
    }

    let mut simplex = Simplex::new();
    let first = support_minkowski(shape_a, pose_a, shape_b, pose_b, &direction);
    simplex.push(first);

    // New search direction: from the first point toward the origin
    direction = -first.point.coords;

    for iteration in 0..GJK_MAX_ITERATIONS {
        if direction.norm_squared() < EPSILON * EPSILON {
            // Origin lies on the current feature: touching counts as enclosed
            return GjkResult {
                intersecting: true,
                simplex,
                iterations: iteration,
            };
        }

        let new_point = support_minkowski(shape_a, pose_a, shape_b, pose_b, &direction);

        // If the new support did not pass the origin, the shapes are apart
        if new_point.point.coords.dot(&direction) < -EPSILON {
            return GjkResult {
                intersecting: false,
                simplex,
                iterations: iteration,
            };
        }

        simplex.push(new_point);

        if do_simplex(&mut simplex, &mut direction) {
            return GjkResult {
                intersecting: true,
                simplex,
                iterations: iteration,
            };
        }
    }

    // No enclosing simplex within the iteration bound: treat as no collision
    GjkResult {
        intersecting: false,
        simplex,
        iterations: GJK_MAX_ITERATIONS,
    }
}

/// Process the simplex and update the search direction.
///
/// Returns true when the origin is enclosed.
fn do_simplex(simplex: &mut Simplex, direction: &mut Vector2<f64>) -> bool {
    match simplex.len() {
        2 => do_simplex_line(simplex, direction),
        3 => do_simplex_triangle(simplex, direction),
        _ => false,
    }
}

/// Segment case: point toward the origin, perpendicular to the edge.
fn do_simplex_line(simplex: &mut Simplex, direction: &mut Vector2<f64>) -> bool {
    let a = simplex.points[0];
    let b = simplex.points[1];

    let ab = b.point - a.point;
    let ao = -a.point.coords;

    if ab.dot(&ao) > 0.0 {
        // Perpendicular to AB, on the origin's side
        let mut d = perp(&ab);
        if d.dot(&ao) < 0.0 {
            d = -d;
        }
        *direction = d;
    } else {
        // Origin is beyond A; keep only A
        simplex.set(&[a]);
        *direction = ao;
    }
    false
}

/// Triangle case: locate the origin among the edge Voronoi regions.
fn do_simplex_triangle(simplex: &mut Simplex, direction: &mut Vector2<f64>) -> bool {
    let a = simplex.points[0];
    let b = simplex.points[1];
    let c = simplex.points[2];

    let ab = b.point - a.point;
    let ac = c.point - a.point;
    let ao = -a.point.coords;

    // Outward perpendiculars of the two edges incident to the newest vertex
    let mut ab_perp = perp(&ab);
    if ab_perp.dot(&ac) > 0.0 {
        ab_perp = -ab_perp;
    }
    let mut ac_perp = perp(&ac);
    if ac_perp.dot(&ab) > 0.0 {
        ac_perp = -ac_perp;
    }

    if ab_perp.dot(&ao) > 0.0 {
        // Origin outside edge AB
        simplex.set(&[a, b]);
        *direction = ab_perp;
        return false;
    }
    if ac_perp.dot(&ao) > 0.0 {
        // Origin outside edge AC
        simplex.set(&[a, c]);
        *direction = ac_perp;
        return false;
    }

    // Origin inside the triangle
    true
}

/// Run EPA on a simplex produced by a successful GJK query.
///
/// Returns `None` when the polytope degenerates (collinear support set,
/// vanishing edge normals); the caller drops the pair for this step.
#[must_use]
pub fn epa_query(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    simplex: &Simplex,
    threshold: f64,
) -> Option<Mtv> {
    let mut polytope: Vec<MinkowskiPoint> = simplex.points().to_vec();

    // EPA needs a triangle; expand degenerate simplices with axis supports
    if polytope.len() < 3 {
        for dir in [Vector2::x(), Vector2::y(), -Vector2::x(), -Vector2::y()] {
            if polytope.len() >= 3 {
                break;
            }
            let candidate = support_minkowski(shape_a, pose_a, shape_b, pose_b, &dir);
            let is_new = polytope
                .iter()
                .all(|v| (v.point - candidate.point).norm_squared() > EPSILON);
            if is_new {
                polytope.push(candidate);
            }
        }
        if polytope.len() < 3 {
            debug!("epa: simplex could not be expanded to a triangle");
            return None;
        }
    }

    // Ensure counter-clockwise winding so edge normals face outward
    let signed_area = {
        let a = polytope[0].point.coords;
        let b = polytope[1].point.coords;
        let c = polytope[2].point.coords;
        crate::linalg::cross(&(b - a), &(c - a))
    };
    if signed_area.abs() < EPSILON {
        debug!("epa: degenerate (collinear) initial polytope");
        return None;
    }
    if signed_area < 0.0 {
        polytope.swap(1, 2);
    }

    for _ in 0..EPA_MAX_ITERATIONS {
        let (edge_index, edge_normal, edge_distance) = closest_edge(&polytope)?;

        let support = support_minkowski(shape_a, pose_a, shape_b, pose_b, &edge_normal);
        let support_distance = support.point.coords.dot(&edge_normal);

        if support_distance - edge_distance < threshold {
            return Some(Mtv {
                normal: edge_normal,
                depth: edge_distance.max(0.0),
            });
        }

        if polytope.len() >= EPA_MAX_VERTICES {
            break;
        }
        polytope.insert(edge_index + 1, support);
    }

    // Iteration bound reached: report the best edge found so far
    let (_, normal, distance) = closest_edge(&polytope)?;
    Some(Mtv {
        normal,
        depth: distance.max(0.0),
    })
}

/// Find the polytope edge closest to the origin.
///
/// Returns `(start index, outward unit normal, distance from origin)`.
fn closest_edge(polytope: &[MinkowskiPoint]) -> Option<(usize, Vector2<f64>, f64)> {
    let mut best: Option<(usize, Vector2<f64>, f64)> = None;

    for i in 0..polytope.len() {
        let j = (i + 1) % polytope.len();
        let a = polytope[i].point;
        let b = polytope[j].point;
        let edge = b - a;

        let len = edge.norm();
        if len < EPSILON {
            continue;
        }
        // CCW winding: outward normal is the clockwise perpendicular
        let normal = Vector2::new(edge.y, -edge.x) / len;
        let distance = normal.dot(&a.coords);

        if best.map_or(true, |(_, _, d)| distance < d) {
            best = Some((i, normal, distance));
        }
    }

    if best.is_none() {
        debug!("epa: polytope has no usable edges");
    }
    best
}

/// Compute the MTV between two shapes, if they penetrate.
///
/// The returned normal points from the first body toward the second; GJK
/// non-convergence and EPA degeneracy both yield `None`.
#[must_use]
pub fn gjk_epa_mtv(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    epa_threshold: f64,
) -> Option<Mtv> {
    let gjk = gjk_query(shape_a, pose_a, shape_b, pose_b);
    if !gjk.intersecting {
        return None;
    }
    epa_query(shape_a, pose_a, shape_b, pose_b, &gjk.simplex, epa_threshold)
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

    const THRESHOLD: f64 = 1e-6;

    fn pose_at(x: f64, y: f64) -> Pose {
        Pose::from_position(Point2::new(x, y))
    }

    #[test]
    fn test_gjk_circles_intersecting() {
        let a = Shape::circle(1.0).unwrap();
        let b = Shape::circle(1.0).unwrap();
        // Centres 1.5 apart, radii sum to 2
        assert!(gjk_query(&a, &pose_at(0.0, 0.0), &b, &pose_at(1.5, 0.0)).intersecting);
    }

    #[test]
    fn test_gjk_circles_separated() {
        let a = Shape::circle(1.0).unwrap();
        let b = Shape::circle(1.0).unwrap();
        assert!(!gjk_query(&a, &pose_at(0.0, 0.0), &b, &pose_at(3.0, 0.0)).intersecting);
    }

    #[test]
    fn test_gjk_box_box() {
        let a = Shape::rect(1.0, 1.0).unwrap();
        let b = Shape::rect(1.0, 1.0).unwrap();
        assert!(gjk_query(&a, &pose_at(0.0, 0.0), &b, &pose_at(1.5, 0.0)).intersecting);
        assert!(!gjk_query(&a, &pose_at(0.0, 0.0), &b, &pose_at(2.5, 0.0)).intersecting);
    }

    #[test]
    fn test_gjk_rotated_box() {
        // A unit square rotated 45° reaches sqrt(2) along the axes
        let a = Shape::rect(1.0, 1.0).unwrap();
        let b = Shape::rect(1.0, 1.0).unwrap();
        let rotated = Pose::new(Point2::new(3.2, 0.0), std::f64::consts::FRAC_PI_4);
        assert!(gjk_query(&a, &pose_at(0.0, 0.0), &b, &rotated).intersecting);
    }

    #[test]
    fn test_epa_depth_circles() {
        let a = Shape::circle(1.0).unwrap();
        let b = Shape::circle(1.0).unwrap();
        let mtv = gjk_epa_mtv(&a, &pose_at(0.0, 0.0), &b, &pose_at(1.5, 0.0), THRESHOLD)
            .expect("penetrating circles must produce an MTV");

        // Penetration is 2 - 1.5 = 0.5, normal along +X (from A toward B)
        assert_relative_eq!(mtv.depth, 0.5, epsilon = 1e-3);
        assert_relative_eq!(mtv.normal.x, 1.0, epsilon = 1e-3);
        assert_relative_eq!(mtv.normal.norm(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_epa_depth_boxes() {
        let a = Shape::rect(1.0, 1.0).unwrap();
        let b = Shape::rect(1.0, 1.0).unwrap();
        let mtv = gjk_epa_mtv(&a, &pose_at(0.0, 0.0), &b, &pose_at(1.6, 0.0), THRESHOLD)
            .expect("penetrating boxes must produce an MTV");

        assert_relative_eq!(mtv.depth, 0.4, epsilon = 1e-6);
        assert_relative_eq!(mtv.normal.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mtv_antisymmetric_under_swap() {
        let a = Shape::rect(1.0, 0.5).unwrap();
        let b = Shape::circle(0.75).unwrap();
        let pa = pose_at(0.0, 0.0);
        let pb = pose_at(1.2, 0.4);

        let fwd = gjk_epa_mtv(&a, &pa, &b, &pb, THRESHOLD).expect("overlap expected");
        let rev = gjk_epa_mtv(&b, &pb, &a, &pa, THRESHOLD).expect("overlap expected");

        assert_relative_eq!(fwd.depth, rev.depth, epsilon = 1e-6);
        assert_relative_eq!(fwd.normal.x, -rev.normal.x, epsilon = 1e-6);
        assert_relative_eq!(fwd.normal.y, -rev.normal.y, epsilon = 1e-6);
    }

    #[test]
    fn test_separated_yields_no_mtv() {
        let a = Shape::rect(1.0, 1.0).unwrap();
        let b = Shape::circle(0.5).unwrap();
        assert!(gjk_epa_mtv(&a, &pose_at(0.0, 0.0), &b, &pose_at(4.0, 0.0), THRESHOLD).is_none());
    }

    #[test]
    fn test_simplex_push_shifts() {
        let mut simplex = Simplex::new();
        assert!(simplex.is_empty());

        let p1 = MinkowskiPoint::new(Point2::new(1.0, 0.0), Point2::origin());
        let p2 = MinkowskiPoint::new(Point2::new(0.0, 1.0), Point2::origin());
        simplex.push(p1);
        simplex.push(p2);

        assert_eq!(simplex.len(), 2);
        // The newest point occupies slot 0
        assert_eq!(simplex.points()[0].point, Point2::new(0.0, 1.0));
    }
}
