//! Contact manifolds: from an MTV to concrete contact points.
//!
//! Circle pairs get an analytic contact; any pair involving a polygon is
//! resolved by identifying the reference and incident faces (largest dot
//! product with the MTV normal) and clipping the incident face against the
//! reference face's side planes, retaining up to two points with positive
//! penetration.

use nalgebra::{Point2, Vector2};
use planar_types::Pose;

use crate::gjk_epa::Mtv;
use crate::shape::{ConvexPolygon, Shape};

/// A single contact point of a manifold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldPoint {
    /// Contact point on the first body, world space.
    pub on_first: Point2<f64>,
    /// Contact point on the second body, world space.
    pub on_second: Point2<f64>,
    /// Penetration at this point (positive when overlapping).
    pub penetration: f64,
}

/// Up to two contact points between a pair of bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manifold {
    points: [Option<ManifoldPoint>; 2],
    len: usize,
}

impl Manifold {
    /// An empty manifold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A manifold with a single point.
    #[must_use]
    pub fn single(point: ManifoldPoint) -> Self {
        let mut m = Self::new();
        m.push(point);
        m
    }

    /// Append a point; silently ignored beyond two points.
    pub fn push(&mut self, point: ManifoldPoint) {
        if self.len < 2 {
            self.points[self.len] = Some(point);
            self.len += 1;
        }
    }

    /// Number of contact points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the manifold has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Point at a manifold slot, if occupied.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&ManifoldPoint> {
        self.points.get(slot).and_then(Option::as_ref)
    }

    /// Iterate over `(slot, point)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ManifoldPoint)> {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (i, p)))
    }
}

/// Analytic circle-circle contact.
///
/// Intersects iff the centre distance is strictly below the radii sum;
/// exactly-touching circles produce no contact.
#[must_use]
pub fn circle_circle(
    c1: Point2<f64>,
    r1: f64,
    c2: Point2<f64>,
    r2: f64,
) -> Option<(Mtv, Manifold)> {
    let delta = c2 - c1;
    let dist = delta.norm();
    if dist >= r1 + r2 {
        return None;
    }

    let normal = if dist > 1e-12 {
        delta / dist
    } else {
        Vector2::x()
    };
    let depth = r1 + r2 - dist;

    let point = ManifoldPoint {
        on_first: c1 + normal * r1,
        on_second: c2 - normal * r2,
        penetration: depth,
    };
    Some((Mtv { normal, depth }, Manifold::single(point)))
}

/// Build a manifold for a pair whose MTV is already known.
///
/// The MTV normal must point from the first body toward the second.
#[must_use]
pub fn from_mtv(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    mtv: &Mtv,
) -> Manifold {
    match (shape_a, shape_b) {
        (Shape::Circle(ca), Shape::Circle(cb)) => {
            circle_circle(pose_a.position, ca.radius, pose_b.position, cb.radius)
                .map_or_else(Manifold::new, |(_, m)| m)
        }
        (Shape::Circle(c), Shape::Polygon(_)) => {
            let on_first = pose_a.position + mtv.normal * c.radius;
            Manifold::single(ManifoldPoint {
                on_first,
                on_second: on_first - mtv.normal * mtv.depth,
                penetration: mtv.depth,
            })
        }
        (Shape::Polygon(_), Shape::Circle(c)) => {
            let on_second = pose_b.position - mtv.normal * c.radius;
            Manifold::single(ManifoldPoint {
                on_first: on_second + mtv.normal * mtv.depth,
                on_second,
                penetration: mtv.depth,
            })
        }
        (Shape::Polygon(pa), Shape::Polygon(pb)) => {
            clip_polygons(pa, pose_a, pb, pose_b, &mtv.normal)
        }
    }
}

/// A polygon face in world space with its outward normal.
struct Face {
    v1: Point2<f64>,
    v2: Point2<f64>,
    normal: Vector2<f64>,
}

/// The face whose outward normal is most aligned with `direction`, plus the
/// achieved alignment.
fn best_face(poly: &ConvexPolygon, pose: &Pose, direction: &Vector2<f64>) -> (Face, f64) {
    let verts = poly.vertices();
    let n = verts.len();

    let mut best_index = 0;
    let mut best_dot = f64::NEG_INFINITY;
    for i in 0..n {
        let a = pose.transform_point(&verts[i]);
        let b = pose.transform_point(&verts[(i + 1) % n]);
        let edge = b - a;
        // CCW winding: outward normal is the clockwise perpendicular
        let normal = Vector2::new(edge.y, -edge.x).normalize();
        let d = normal.dot(direction);
        if d > best_dot {
            best_dot = d;
            best_index = i;
        }
    }

    let a = pose.transform_point(&verts[best_index]);
    let b = pose.transform_point(&verts[(best_index + 1) % n]);
    let edge = b - a;
    let normal = Vector2::new(edge.y, -edge.x).normalize();
    (Face { v1: a, v2: b, normal }, best_dot)
}

/// Keep the segment points on the positive side of a half-plane, inserting
/// the crossing point when the segment straddles it.
fn clip_segment(
    points: &mut Vec<Point2<f64>>,
    plane_normal: &Vector2<f64>,
    plane_offset: f64,
) {
    if points.len() < 2 {
        points.retain(|p| plane_normal.dot(&p.coords) - plane_offset >= 0.0);
        return;
    }

    let a = points[0];
    let b = points[1];
    let da = plane_normal.dot(&a.coords) - plane_offset;
    let db = plane_normal.dot(&b.coords) - plane_offset;

    let mut kept = Vec::with_capacity(2);
    if da >= 0.0 {
        kept.push(a);
    }
    if db >= 0.0 {
        kept.push(b);
    }
    if da * db < 0.0 {
        let t = da / (da - db);
        kept.push(a + (b - a) * t);
    }
    *points = kept;
}

/// Polygon-polygon manifold via reference/incident face clipping.
fn clip_polygons(
    pa: &ConvexPolygon,
    pose_a: &Pose,
    pb: &ConvexPolygon,
    pose_b: &Pose,
    normal: &Vector2<f64>,
) -> Manifold {
    let (face_a, dot_a) = best_face(pa, pose_a, normal);
    let (face_b, dot_b) = best_face(pb, pose_b, &-normal);

    // The better aligned face becomes the reference
    let (reference, incident_poly, incident_pose) = if dot_a >= dot_b {
        (face_a, pb, pose_b)
    } else {
        (face_b, pa, pose_a)
    };
    let a_is_reference = dot_a >= dot_b;

    let (incident, _) = best_face(incident_poly, incident_pose, &-reference.normal);

    // Clip the incident face against the reference face's side planes
    let side = (reference.v2 - reference.v1).normalize();
    let mut points = vec![incident.v1, incident.v2];
    clip_segment(&mut points, &side, side.dot(&reference.v1.coords));
    if points.len() < 2 {
        return Manifold::new();
    }
    clip_segment(&mut points, &-side, -side.dot(&reference.v2.coords));

    let mut manifold = Manifold::new();
    for p in points {
        // Separation along the reference normal; negative means overlap
        let separation = reference.normal.dot(&(p - reference.v1));
        if separation >= 0.0 {
            continue;
        }
        let penetration = -separation;
        let on_reference = p - reference.normal * separation;

        let point = if a_is_reference {
            ManifoldPoint {
                on_first: on_reference,
                on_second: p,
                penetration,
            }
        } else {
            ManifoldPoint {
                on_first: p,
                on_second: on_reference,
                penetration,
            }
        };
        manifold.push(point);
    }
    manifold
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

    #[test]
    fn test_circle_circle_contact() {
        let result = circle_circle(Point2::new(0.0, 0.0), 1.0, Point2::new(1.5, 0.0), 1.0);
        let (mtv, manifold) = result.expect("overlapping circles");

        assert_relative_eq!(mtv.depth, 0.5, epsilon = 1e-12);
        assert_relative_eq!(mtv.normal.x, 1.0, epsilon = 1e-12);
        assert_eq!(manifold.len(), 1);

        let p = manifold.get(0).unwrap();
        assert_relative_eq!(p.on_first.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.on_second.x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_circle_circle_exact_touch_is_no_contact() {
        // d = r1 + r2 exactly
        assert!(circle_circle(Point2::new(0.0, 0.0), 0.5, Point2::new(1.0, 0.0), 0.5).is_none());
    }

    #[test]
    fn test_box_box_two_point_manifold() {
        let a = Shape::rect(1.0, 1.0).unwrap();
        let b = Shape::rect(1.0, 1.0).unwrap();
        let pose_a = Pose::identity();
        let pose_b = Pose::from_position(Point2::new(1.8, 0.0));

        let mtv = Mtv {
            normal: Vector2::x(),
            depth: 0.2,
        };
        let manifold = from_mtv(&a, &pose_a, &b, &pose_b, &mtv);

        assert_eq!(manifold.len(), 2, "face-on boxes should make two contacts");
        for (_, p) in manifold.iter() {
            assert_relative_eq!(p.penetration, 0.2, epsilon = 1e-9);
            // Contact points straddle the overlap band x ∈ [0.8, 1.0]
            assert!(p.on_first.x > 0.7 && p.on_first.x < 1.1);
            // Convention: on_second - on_first = -penetration * normal
            let diff = p.on_second - p.on_first;
            assert_relative_eq!(diff.x, -0.2, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_circle_polygon_single_point() {
        let a = Shape::circle(0.5).unwrap();
        let b = Shape::rect(1.0, 1.0).unwrap();
        let pose_a = Pose::from_position(Point2::new(-1.3, 0.0));
        let pose_b = Pose::identity();

        let mtv = Mtv {
            normal: Vector2::x(),
            depth: 0.2,
        };
        let manifold = from_mtv(&a, &pose_a, &b, &pose_b, &mtv);

        assert_eq!(manifold.len(), 1);
        let p = manifold.get(0).unwrap();
        assert_relative_eq!(p.on_first.x, -0.8, epsilon = 1e-12);
        assert_relative_eq!(p.penetration, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_shallow_box_overlap_keeps_positive_penetrations() {
        let a = Shape::rect(1.0, 1.0).unwrap();
        let b = Shape::rect(1.0, 1.0).unwrap();
        // Offset vertically: only part of the face overlaps
        let pose_a = Pose::identity();
        let pose_b = Pose::from_position(Point2::new(1.9, 1.2));

        let mtv = Mtv {
            normal: Vector2::x(),
            depth: 0.1,
        };
        let manifold = from_mtv(&a, &pose_a, &b, &pose_b, &mtv);

        assert!(!manifold.is_empty());
        for (_, p) in manifold.iter() {
            assert!(p.penetration > 0.0);
        }
    }
}
