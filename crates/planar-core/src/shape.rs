//! Collision shapes and bounding volumes.
//!
//! A [`Shape`] is either a circle or a convex polygon in body-local
//! coordinates. Every shape provides a world-space support function (the
//! furthest point in a direction, the key operation for GJK), a world-space
//! AABB, and mass properties for a given total mass.

use nalgebra::{Point2, Vector2};
use planar_types::{Pose, ShapeSpec, SimError};

use crate::linalg::cross;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point2<f64>,
    /// Maximum corner.
    pub max: Point2<f64>,
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point2<f64>, max: Point2<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB centred at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point2<f64>, half_extents: Vector2<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Check if this AABB overlaps another.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// Check if this AABB contains a point.
    #[must_use]
    pub fn contains_point(&self, p: &Point2<f64>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Expand this AABB by a margin on all sides.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: Point2::new(self.min.x - margin, self.min.y - margin),
            max: Point2::new(self.max.x + margin, self.max.y + margin),
        }
    }

    /// The smallest AABB enclosing both operands.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: Point2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Centre of the box.
    #[must_use]
    pub fn center(&self) -> Point2<f64> {
        Point2::from((self.min.coords + self.max.coords) * 0.5)
    }

    /// Width and height of the box.
    #[must_use]
    pub fn dimensions(&self) -> Vector2<f64> {
        self.max - self.min
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point2::origin(), Point2::origin())
    }
}

/// Cheap pre-filter over bounding boxes.
#[inline]
#[must_use]
pub fn may_intersect(a: &Aabb, b: &Aabb) -> bool {
    a.overlaps(b)
}

/// A circle, centred on the body centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Circle {
    /// Radius in metres.
    pub radius: f64,
}

/// A convex polygon in body-local coordinates.
///
/// Vertices are stored counter-clockwise and re-centred so the centroid sits
/// at the local origin; the body pose maps them to world space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvexPolygon {
    vertices: Vec<Point2<f64>>,
    inertia_per_mass: f64,
    bounding_radius: f64,
}

impl ConvexPolygon {
    /// Build a polygon from CCW vertices.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpecs` for fewer than 3 vertices, clockwise or
    /// non-convex winding, or a degenerate (zero-area) outline.
    pub fn new(mut vertices: Vec<Point2<f64>>) -> planar_types::Result<Self> {
        if vertices.len() < 3 {
            return Err(SimError::invalid_specs("polygon needs at least 3 vertices"));
        }

        let n = vertices.len();
        let mut twice_area = 0.0;
        for i in 0..n {
            let a = vertices[i].coords;
            let b = vertices[(i + 1) % n].coords;
            twice_area += cross(&a, &b);
        }
        if twice_area <= 1e-12 {
            return Err(SimError::invalid_specs(
                "polygon must be counter-clockwise with positive area",
            ));
        }

        // Convexity: every consecutive edge pair must turn left
        for i in 0..n {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            let c = vertices[(i + 2) % n];
            if cross(&(b - a), &(c - b)) < -1e-9 {
                return Err(SimError::invalid_specs("polygon must be convex"));
            }
        }

        // Re-centre on the area centroid
        let mut centroid = Vector2::zeros();
        for i in 0..n {
            let a = vertices[i].coords;
            let b = vertices[(i + 1) % n].coords;
            centroid += (a + b) * cross(&a, &b);
        }
        centroid /= 3.0 * twice_area;
        for v in &mut vertices {
            v.coords -= centroid;
        }

        // Second moment about the centroid, per unit mass:
        // I/m = Σ (vi × vj)(vi·vi + vi·vj + vj·vj) / (6 · Σ (vi × vj))
        let mut numer = 0.0;
        let mut denom = 0.0;
        for i in 0..n {
            let a = vertices[i].coords;
            let b = vertices[(i + 1) % n].coords;
            let c = cross(&a, &b);
            numer += c * (a.dot(&a) + a.dot(&b) + b.dot(&b));
            denom += c;
        }
        let inertia_per_mass = numer / (6.0 * denom);

        let bounding_radius = vertices
            .iter()
            .map(|v| v.coords.norm())
            .fold(0.0_f64, f64::max);

        Ok(Self {
            vertices,
            inertia_per_mass,
            bounding_radius,
        })
    }

    /// Local-space vertices, CCW, centroid at the origin.
    #[must_use]
    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the polygon has no vertices. Construction forbids this.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Moment of inertia about the centroid for a unit mass.
    #[must_use]
    pub fn inertia_per_mass(&self) -> f64 {
        self.inertia_per_mass
    }

    /// Index of the local vertex furthest along a local-space direction.
    #[must_use]
    pub fn support_index(&self, local_dir: &Vector2<f64>) -> usize {
        let mut best = 0;
        let mut best_dot = f64::NEG_INFINITY;
        for (i, v) in self.vertices.iter().enumerate() {
            let d = v.coords.dot(local_dir);
            if d > best_dot {
                best_dot = d;
                best = i;
            }
        }
        best
    }
}

/// A collision shape attached to a body, in local coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// A circle.
    Circle(Circle),
    /// A convex polygon.
    Polygon(ConvexPolygon),
}

impl Shape {
    /// A circle shape.
    pub fn circle(radius: f64) -> planar_types::Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(SimError::invalid_specs("circle radius must be positive"));
        }
        Ok(Self::Circle(Circle { radius }))
    }

    /// A convex polygon shape from CCW vertices.
    pub fn polygon(vertices: Vec<Point2<f64>>) -> planar_types::Result<Self> {
        Ok(Self::Polygon(ConvexPolygon::new(vertices)?))
    }

    /// An axis-aligned box with the given half-extents.
    pub fn rect(half_width: f64, half_height: f64) -> planar_types::Result<Self> {
        Self::polygon(vec![
            Point2::new(-half_width, -half_height),
            Point2::new(half_width, -half_height),
            Point2::new(half_width, half_height),
            Point2::new(-half_width, half_height),
        ])
    }

    /// Build a shape from its add-time description.
    pub fn from_spec(spec: &ShapeSpec) -> planar_types::Result<Self> {
        match spec {
            ShapeSpec::Circle { radius } => Self::circle(*radius),
            ShapeSpec::Polygon { vertices } => Self::polygon(vertices.clone()),
        }
    }

    /// The add-time description of this shape.
    #[must_use]
    pub fn to_spec(&self) -> ShapeSpec {
        match self {
            Self::Circle(c) => ShapeSpec::Circle { radius: c.radius },
            Self::Polygon(p) => ShapeSpec::Polygon {
                vertices: p.vertices().to_vec(),
            },
        }
    }

    /// World-space support point: `argmax_{v ∈ shape} ⟨v, direction⟩`.
    #[must_use]
    pub fn support(&self, pose: &Pose, direction: &Vector2<f64>) -> Point2<f64> {
        match self {
            Self::Circle(c) => {
                let n = direction.norm();
                if n < 1e-12 {
                    return pose.position;
                }
                pose.position + direction * (c.radius / n)
            }
            Self::Polygon(p) => {
                let local_dir = pose.inverse_transform_vector(direction);
                let v = p.vertices()[p.support_index(&local_dir)];
                pose.transform_point(&v)
            }
        }
    }

    /// World-space bounding box for the given pose.
    #[must_use]
    pub fn aabb(&self, pose: &Pose) -> Aabb {
        match self {
            Self::Circle(c) => {
                Aabb::from_center(pose.position, Vector2::new(c.radius, c.radius))
            }
            Self::Polygon(p) => {
                let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
                let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
                for v in p.vertices() {
                    let w = pose.transform_point(v);
                    min.x = min.x.min(w.x);
                    min.y = min.y.min(w.y);
                    max.x = max.x.max(w.x);
                    max.y = max.y.max(w.y);
                }
                Aabb::new(min, max)
            }
        }
    }

    /// Moment of inertia about the centroid for the given total mass.
    #[must_use]
    pub fn inertia(&self, mass: f64) -> f64 {
        match self {
            Self::Circle(c) => 0.5 * mass * c.radius * c.radius,
            Self::Polygon(p) => mass * p.inertia_per_mass(),
        }
    }

    /// Radius of the smallest centroid-centred circle enclosing the shape.
    #[must_use]
    pub fn bounding_radius(&self) -> f64 {
        match self {
            Self::Circle(c) => c.radius,
            Self::Polygon(p) => p.bounding_radius,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_aabb_overlaps() {
        let a = Aabb::from_center(Point2::origin(), Vector2::new(1.0, 1.0));
        let b = Aabb::from_center(Point2::new(1.5, 0.0), Vector2::new(1.0, 1.0));
        let c = Aabb::from_center(Point2::new(5.0, 0.0), Vector2::new(1.0, 1.0));

        assert!(a.overlaps(&b), "a and b should overlap");
        assert!(b.overlaps(&a), "overlap should be symmetric");
        assert!(!a.overlaps(&c), "a and c should not overlap");
        assert!(may_intersect(&a, &b));
    }

    #[test]
    fn test_aabb_merged() {
        let a = Aabb::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        let b = Aabb::new(Point2::new(-1.0, 0.5), Point2::new(0.5, 2.0));
        let m = a.merged(&b);
        assert_eq!(m.min, Point2::new(-1.0, 0.0));
        assert_eq!(m.max, Point2::new(1.0, 2.0));
    }

    #[test]
    fn test_polygon_recentred() {
        // An off-centre square: centroid must land at the origin
        let p = ConvexPolygon::new(vec![
            Point2::new(1.0, 1.0),
            Point2::new(3.0, 1.0),
            Point2::new(3.0, 3.0),
            Point2::new(1.0, 3.0),
        ])
        .unwrap();
        let centroid: Vector2<f64> =
            p.vertices().iter().map(|v| v.coords).sum::<Vector2<f64>>() / 4.0;
        assert_relative_eq!(centroid.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_polygon_rejects_clockwise() {
        let cw = vec![
            Point2::new(-1.0, -1.0),
            Point2::new(-1.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, -1.0),
        ];
        assert!(ConvexPolygon::new(cw).is_err());
    }

    #[test]
    fn test_polygon_rejects_concave() {
        let concave = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 2.0),
            Point2::new(1.0, 0.5),
            Point2::new(0.0, 2.0),
        ];
        assert!(ConvexPolygon::new(concave).is_err());
    }

    #[test]
    fn test_box_inertia_matches_closed_form() {
        // For a w×h box: I = m (w² + h²) / 12
        let shape = Shape::rect(0.5, 1.0).unwrap();
        let expected = 12.0 * (1.0_f64.powi(2) + 2.0_f64.powi(2)) / 12.0;
        assert_relative_eq!(shape.inertia(12.0), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_circle_inertia() {
        let shape = Shape::circle(2.0).unwrap();
        // I = m r² / 2
        assert_relative_eq!(shape.inertia(3.0), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_support_circle() {
        let shape = Shape::circle(0.5).unwrap();
        let pose = Pose::from_position(Point2::new(1.0, 2.0));
        let s = shape.support(&pose, &Vector2::x());
        assert_relative_eq!(s.x, 1.5, epsilon = 1e-12);
        assert_relative_eq!(s.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_support_polygon_rotated() {
        let shape = Shape::rect(1.0, 0.5).unwrap();
        let pose = Pose::new(Point2::origin(), std::f64::consts::FRAC_PI_2);
        // After a 90° CCW rotation the long axis points along Y
        let s = shape.support(&pose, &Vector2::y());
        assert_relative_eq!(s.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_polygon_aabb() {
        let shape = Shape::rect(1.0, 2.0).unwrap();
        let aabb = shape.aabb(&Pose::from_position(Point2::new(10.0, 0.0)));
        assert_relative_eq!(aabb.min.x, 9.0, epsilon = 1e-12);
        assert_relative_eq!(aabb.max.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_spec_roundtrip() {
        let shape = Shape::rect(1.0, 2.0).unwrap();
        let spec = shape.to_spec();
        let rebuilt = Shape::from_spec(&spec).unwrap();
        assert_eq!(shape, rebuilt);
    }
}
