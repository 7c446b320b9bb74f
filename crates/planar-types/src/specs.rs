//! Add-time descriptions of simulation entities.
//!
//! A [`BodySpec`] describes a body before it exists; the world validates it
//! and turns it into a stored body with a stable id and a dense index.

use nalgebra::{Point2, Vector2};

use crate::{BodyType, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Geometry-free description of a collision shape, in local coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeSpec {
    /// A circle of the given radius, centred on the body centroid.
    Circle {
        /// Radius in metres.
        radius: f64,
    },
    /// A convex polygon given as counter-clockwise vertices.
    Polygon {
        /// Local-space vertices, CCW order.
        vertices: Vec<Point2<f64>>,
    },
}

impl ShapeSpec {
    /// A circle shape.
    #[must_use]
    pub fn circle(radius: f64) -> Self {
        Self::Circle { radius }
    }

    /// A convex polygon from CCW vertices.
    #[must_use]
    pub fn polygon(vertices: Vec<Point2<f64>>) -> Self {
        Self::Polygon { vertices }
    }

    /// An axis-aligned box with the given half-extents.
    #[must_use]
    pub fn rect(half_width: f64, half_height: f64) -> Self {
        Self::Polygon {
            vertices: vec![
                Point2::new(-half_width, -half_height),
                Point2::new(half_width, -half_height),
                Point2::new(half_width, half_height),
                Point2::new(-half_width, half_height),
            ],
        }
    }

    /// Validate the shape description.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::Circle { radius } => {
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(SimError::invalid_specs("circle radius must be positive"));
                }
            }
            Self::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(SimError::invalid_specs(
                        "polygon needs at least 3 vertices",
                    ));
                }
                if vertices
                    .iter()
                    .any(|v| !v.coords.iter().all(|x| x.is_finite()))
                {
                    return Err(SimError::invalid_specs("polygon vertices must be finite"));
                }
            }
        }
        Ok(())
    }
}

impl Default for ShapeSpec {
    fn default() -> Self {
        Self::rect(0.5, 0.5)
    }
}

/// Description of a body to be added to the world.
///
/// # Example
///
/// ```
/// use planar_types::{BodySpec, BodyType, ShapeSpec};
/// use nalgebra::Point2;
///
/// let ground = BodySpec::new()
///     .position(Point2::new(0.0, -1.0))
///     .shape(ShapeSpec::rect(50.0, 1.0))
///     .body_type(BodyType::Static);
/// assert!(ground.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodySpec {
    /// Initial centroid position.
    pub position: Point2<f64>,
    /// Initial linear velocity.
    pub velocity: Vector2<f64>,
    /// Initial rotation (radians).
    pub rotation: f64,
    /// Initial angular velocity (rad/s).
    pub angular_velocity: f64,
    /// Mass in kg. Ignored for static bodies.
    pub mass: f64,
    /// Electric charge, available to host behaviours.
    pub charge: f64,
    /// How the body participates in the simulation.
    pub body_type: BodyType,
    /// Attached collision shape, in local coordinates.
    pub shape: ShapeSpec,
    /// Coefficient of restitution. `None` uses the solver default.
    pub restitution: Option<f64>,
    /// Friction coefficient. `None` uses the solver default.
    pub friction: Option<f64>,
}

impl Default for BodySpec {
    fn default() -> Self {
        Self {
            position: Point2::origin(),
            velocity: Vector2::zeros(),
            rotation: 0.0,
            angular_velocity: 0.0,
            mass: 1.0,
            charge: 1.0,
            body_type: BodyType::Dynamic,
            shape: ShapeSpec::default(),
            restitution: None,
            friction: None,
        }
    }
}

impl BodySpec {
    /// Create a default dynamic body spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial position.
    #[must_use]
    pub fn position(mut self, position: Point2<f64>) -> Self {
        self.position = position;
        self
    }

    /// Set the initial linear velocity.
    #[must_use]
    pub fn velocity(mut self, velocity: Vector2<f64>) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set the initial rotation.
    #[must_use]
    pub fn rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set the initial angular velocity.
    #[must_use]
    pub fn angular_velocity(mut self, angular_velocity: f64) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    /// Set the mass.
    #[must_use]
    pub fn mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// Set the charge.
    #[must_use]
    pub fn charge(mut self, charge: f64) -> Self {
        self.charge = charge;
        self
    }

    /// Set the body type.
    #[must_use]
    pub fn body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self
    }

    /// Set the collision shape.
    #[must_use]
    pub fn shape(mut self, shape: ShapeSpec) -> Self {
        self.shape = shape;
        self
    }

    /// Set the coefficient of restitution.
    #[must_use]
    pub fn restitution(mut self, restitution: f64) -> Self {
        self.restitution = Some(restitution);
        self
    }

    /// Set the friction coefficient.
    #[must_use]
    pub fn friction(mut self, friction: f64) -> Self {
        self.friction = Some(friction);
        self
    }

    /// Validate the spec.
    ///
    /// Rejects negative or `NaN` mass, non-finite positions and velocities,
    /// and degenerate shapes.
    pub fn validate(&self) -> crate::Result<()> {
        if self.body_type.is_dynamic() && (!self.mass.is_finite() || self.mass <= 0.0) {
            return Err(SimError::invalid_specs(
                "dynamic body mass must be positive and finite",
            ));
        }
        if self.mass < 0.0 || self.mass.is_nan() {
            return Err(SimError::invalid_specs("mass cannot be negative or NaN"));
        }
        if !self.position.coords.iter().all(|x| x.is_finite()) {
            return Err(SimError::invalid_specs("position must be finite"));
        }
        if !self.velocity.iter().all(|x| x.is_finite()) {
            return Err(SimError::invalid_specs("velocity must be finite"));
        }
        if !self.rotation.is_finite() || !self.angular_velocity.is_finite() {
            return Err(SimError::invalid_specs("rotation state must be finite"));
        }
        if let Some(e) = self.restitution {
            if !(0.0..=1.0).contains(&e) {
                return Err(SimError::invalid_specs(
                    "restitution must be between 0 and 1",
                ));
            }
        }
        if let Some(mu) = self.friction {
            if !mu.is_finite() || mu < 0.0 {
                return Err(SimError::invalid_specs("friction cannot be negative"));
            }
        }
        self.shape.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_is_valid() {
        assert!(BodySpec::new().validate().is_ok());
    }

    #[test]
    fn test_rejects_negative_mass() {
        let spec = BodySpec::new().mass(-1.0);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_position() {
        let spec = BodySpec::new().position(Point2::new(f64::NAN, 0.0));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_rejects_degenerate_polygon() {
        let spec = BodySpec::new().shape(ShapeSpec::polygon(vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
        ]));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_static_body_ignores_mass() {
        let spec = BodySpec::new()
            .body_type(BodyType::Static)
            .mass(f64::INFINITY);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_rect_shape_winding() {
        let ShapeSpec::Polygon { vertices } = ShapeSpec::rect(1.0, 2.0) else {
            panic!("rect must be a polygon");
        };
        assert_eq!(vertices.len(), 4);
        // Shoelace area must be positive for CCW winding
        let area: f64 = vertices
            .iter()
            .zip(vertices.iter().cycle().skip(1))
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum();
        assert!(area > 0.0);
    }
}
