//! Behaviours: host-defined force fields applied during the force stage.
//!
//! A behaviour contributes a force and torque per body each derivative
//! evaluation (gravity wells, drag, electric fields over the body charge).
//! Behaviours are identified by name for removal and snapshotting.

use nalgebra::Vector2;

use crate::body::Body;

/// A force field over the body population.
pub trait Behaviour {
    /// Stable name identifying this behaviour.
    fn name(&self) -> &str;

    /// Whether the behaviour acts on the given body.
    fn applies_to(&self, _body: &Body) -> bool {
        true
    }

    /// Force and torque contributed to a body.
    fn force(&self, body: &Body) -> (Vector2<f64>, f64);

    /// Potential energy the behaviour stores for a body.
    fn potential_energy(&self, _body: &Body) -> f64 {
        0.0
    }
}

/// Uniform drag proportional to velocity.
///
/// A small ready-made behaviour, mostly useful in tests and demos.
#[derive(Debug, Clone)]
pub struct LinearDrag {
    /// Linear drag coefficient (N·s/m).
    pub linear: f64,
    /// Angular drag coefficient (N·m·s).
    pub angular: f64,
}

impl Behaviour for LinearDrag {
    fn name(&self) -> &str {
        "linear-drag"
    }

    fn force(&self, body: &Body) -> (Vector2<f64>, f64) {
        (
            -body.velocity.linear * self.linear,
            -body.velocity.angular * self.angular,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::BodyStore;
    use nalgebra::Vector2;
    use planar_types::{BodySpec, ShapeSpec};

    #[test]
    fn test_drag_opposes_motion() {
        let mut store = BodyStore::new();
        let id = store
            .add(
                &BodySpec::new()
                    .velocity(Vector2::new(2.0, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                (0.0, 0.5),
            )
            .unwrap();

        let drag = LinearDrag {
            linear: 0.5,
            angular: 0.1,
        };
        let (force, torque) = drag.force(store.get(id).unwrap());
        assert_eq!(force, Vector2::new(-1.0, 0.0));
        assert_eq!(torque, 0.0);
    }
}
