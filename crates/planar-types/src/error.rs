//! Error types for simulation operations.

use thiserror::Error;

/// Errors that can occur during simulation.
///
/// Recoverable internal failures (a degenerate GJK/EPA pair, a diverging
/// constraint impulse) never surface here; the core drops or clamps them
/// locally and reports through `tracing`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// An add-time description was rejected (negative mass, `NaN` position,
    /// degenerate polygon).
    #[error("invalid specs: {reason}")]
    InvalidSpecs {
        /// Description of what's wrong.
        reason: String,
    },

    /// A body handle did not resolve.
    #[error("unknown body: {0}")]
    UnknownBody(u64),

    /// A joint handle did not resolve.
    #[error("unknown joint: {0}")]
    UnknownJoint(u64),

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// The integrator produced a non-finite state (`NaN` or `Inf`).
    ///
    /// The world is left as the integrator produced it; the caller may
    /// discard the step by reverting to a checkpoint.
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },
}

impl SimError {
    /// Create an invalid-specs error.
    #[must_use]
    pub fn invalid_specs(reason: impl Into<String>) -> Self {
        Self::InvalidSpecs {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is an unknown-entity error.
    #[must_use]
    pub fn is_unknown_entity(&self) -> bool {
        matches!(self, Self::UnknownBody(_) | Self::UnknownJoint(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::UnknownBody(42);
        assert!(err.to_string().contains("42"));

        let err = SimError::diverged("NaN in velocity");
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn test_error_predicates() {
        let err = SimError::diverged("test");
        assert!(err.is_diverged());
        assert!(!err.is_unknown_entity());

        let err = SimError::UnknownJoint(3);
        assert!(err.is_unknown_entity());
        assert!(!err.is_diverged());
    }
}
