//! Explicit Runge-Kutta time integration over a flat state vector.
//!
//! The state vector holds 6 floats per body: `[x, y, θ, vx, vy, ω]`. It is
//! the single source of truth during integration; body attributes are views
//! into it between steps. The integrator is parameterized by a Butcher
//! tableau and calls back into the world for every stage's derivative
//! evaluation.

use planar_types::IntegrationMethod;

/// Flat solver state: 6 floats per body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    vars: Vec<f64>,
}

impl State {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scalar variables (6 × body count).
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the state holds no bodies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The raw variables.
    #[must_use]
    pub fn vars(&self) -> &[f64] {
        &self.vars
    }

    /// Replace the raw variables wholesale (checkpoint restore).
    pub fn set_vars(&mut self, vars: Vec<f64>) {
        self.vars = vars;
    }

    /// Resize to hold the given number of scalars, zero-filling new slots.
    pub fn resize(&mut self, len: usize) {
        self.vars.resize(len, 0.0);
    }

    /// The 6-wide slice for body `index`.
    #[must_use]
    pub fn slice(&self, index: usize) -> &[f64] {
        &self.vars[6 * index..6 * index + 6]
    }

    /// The mutable 6-wide slice for body `index`.
    #[must_use]
    pub fn slice_mut(&mut self, index: usize) -> &mut [f64] {
        &mut self.vars[6 * index..6 * index + 6]
    }
}

/// Butcher tableau of an explicit Runge-Kutta method.
///
/// `a` is the strictly lower-triangular stage matrix stored by row, `b` the
/// output weights, `c` the stage times.
#[derive(Debug, Clone)]
pub struct Tableau {
    a: Vec<Vec<f64>>,
    b: Vec<f64>,
    c: Vec<f64>,
    order: u32,
}

impl Tableau {
    /// Forward Euler.
    #[must_use]
    pub fn rk1() -> Self {
        Self {
            a: vec![vec![]],
            b: vec![1.0],
            c: vec![0.0],
            order: 1,
        }
    }

    /// Explicit midpoint.
    #[must_use]
    pub fn rk2() -> Self {
        Self {
            a: vec![vec![], vec![0.5]],
            b: vec![0.0, 1.0],
            c: vec![0.0, 0.5],
            order: 2,
        }
    }

    /// Classic fourth-order Runge-Kutta.
    #[must_use]
    pub fn rk4() -> Self {
        Self {
            a: vec![vec![], vec![0.5], vec![0.0, 0.5], vec![0.0, 0.0, 1.0]],
            b: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            c: vec![0.0, 0.5, 0.5, 1.0],
            order: 4,
        }
    }

    /// Fourth-order 3/8-rule Runge-Kutta.
    #[must_use]
    pub fn rk38() -> Self {
        Self {
            a: vec![
                vec![],
                vec![1.0 / 3.0],
                vec![-1.0 / 3.0, 1.0],
                vec![1.0, -1.0, 1.0],
            ],
            b: vec![1.0 / 8.0, 3.0 / 8.0, 3.0 / 8.0, 1.0 / 8.0],
            c: vec![0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0],
            order: 4,
        }
    }

    /// Tableau for a configured integration method.
    #[must_use]
    pub fn from_method(method: IntegrationMethod) -> Self {
        match method {
            IntegrationMethod::Rk1 => Self::rk1(),
            IntegrationMethod::Rk2 => Self::rk2(),
            IntegrationMethod::Rk4 => Self::rk4(),
            IntegrationMethod::Rk38 => Self::rk38(),
        }
    }

    /// Number of stages.
    #[must_use]
    pub fn stages(&self) -> usize {
        self.b.len()
    }

    /// Order of accuracy.
    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }
}

/// Explicit Runge-Kutta driver.
#[derive(Debug, Clone)]
pub struct Integrator {
    tableau: Tableau,
    // Scratch buffers reused across steps
    stage_derivatives: Vec<Vec<f64>>,
    stage_state: Vec<f64>,
}

impl Integrator {
    /// Create an integrator with the given tableau.
    #[must_use]
    pub fn new(tableau: Tableau) -> Self {
        Self {
            tableau,
            stage_derivatives: Vec::new(),
            stage_state: Vec::new(),
        }
    }

    /// The active tableau.
    #[must_use]
    pub fn tableau(&self) -> &Tableau {
        &self.tableau
    }

    /// Replace the tableau.
    pub fn set_tableau(&mut self, tableau: Tableau) {
        self.tableau = tableau;
    }

    /// Advance `state` by one step of size `dt`.
    ///
    /// `f(t, dt, x) -> ẋ` is the state derivative operator. Returns false
    /// when any stage derivative or the final state is non-finite; in that
    /// case the state is left as produced and the caller decides whether to
    /// revert.
    pub fn raw_forward<F>(&mut self, state: &mut State, t: f64, dt: f64, mut f: F) -> bool
    where
        F: FnMut(f64, f64, &[f64]) -> Vec<f64>,
    {
        let n = state.len();
        let stages = self.tableau.stages();

        self.stage_derivatives.clear();
        self.stage_state.resize(n, 0.0);

        for stage in 0..stages {
            // y_s = y + dt * Σ_{j<s} a[s][j] * k_j
            self.stage_state.copy_from_slice(state.vars());
            for (j, k) in self.stage_derivatives.iter().enumerate() {
                let a = self.tableau.a[stage][j];
                if a == 0.0 {
                    continue;
                }
                for (y, kj) in self.stage_state.iter_mut().zip(k.iter()) {
                    *y += dt * a * kj;
                }
            }

            let stage_t = t + self.tableau.c[stage] * dt;
            let k = f(stage_t, dt, &self.stage_state);
            debug_assert_eq!(k.len(), n);
            self.stage_derivatives.push(k);
        }

        // y += dt * Σ b_s * k_s
        for (stage, k) in self.stage_derivatives.iter().enumerate() {
            let b = self.tableau.b[stage];
            if b == 0.0 {
                continue;
            }
            for (y, ks) in state.vars.iter_mut().zip(k.iter()) {
                *y += dt * b * ks;
            }
        }

        state.vars.iter().all(|x| x.is_finite())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// ẏ = y, starting at 1: solution e^t.
    fn exponential(_t: f64, _dt: f64, x: &[f64]) -> Vec<f64> {
        x.to_vec()
    }

    fn integrate_to_one(method: IntegrationMethod, steps: usize) -> f64 {
        let mut state = State::new();
        state.set_vars(vec![1.0]);
        let mut integ = Integrator::new(Tableau::from_method(method));

        let dt = 1.0 / steps as f64;
        let mut t = 0.0;
        for _ in 0..steps {
            assert!(integ.raw_forward(&mut state, t, dt, exponential));
            t += dt;
        }
        state.vars()[0]
    }

    #[test]
    fn test_rk1_converges_coarsely() {
        let y = integrate_to_one(IntegrationMethod::Rk1, 1000);
        assert_relative_eq!(y, std::f64::consts::E, epsilon = 2e-3);
    }

    #[test]
    fn test_rk4_is_accurate() {
        let y = integrate_to_one(IntegrationMethod::Rk4, 10);
        assert_relative_eq!(y, std::f64::consts::E, epsilon = 1e-6);
    }

    #[test]
    fn test_rk38_matches_rk4_order() {
        let y = integrate_to_one(IntegrationMethod::Rk38, 10);
        assert_relative_eq!(y, std::f64::consts::E, epsilon = 1e-6);
    }

    #[test]
    fn test_order_increases_accuracy() {
        let coarse = (integrate_to_one(IntegrationMethod::Rk1, 100) - std::f64::consts::E).abs();
        let fine = (integrate_to_one(IntegrationMethod::Rk2, 100) - std::f64::consts::E).abs();
        assert!(fine < coarse);
    }

    #[test]
    fn test_non_finite_detected() {
        let mut state = State::new();
        state.set_vars(vec![1.0]);
        let mut integ = Integrator::new(Tableau::rk1());

        let ok = integ.raw_forward(&mut state, 0.0, 1.0, |_, _, _| vec![f64::NAN]);
        assert!(!ok);
    }

    #[test]
    fn test_stage_times() {
        // Record the stage times RK4 evaluates at
        let mut state = State::new();
        state.set_vars(vec![0.0]);
        let mut integ = Integrator::new(Tableau::rk4());

        let mut times = Vec::new();
        integ.raw_forward(&mut state, 2.0, 0.5, |t, _, _| {
            times.push(t);
            vec![0.0]
        });
        assert_eq!(times.len(), 4);
        assert_relative_eq!(times[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(times[1], 2.25, epsilon = 1e-12);
        assert_relative_eq!(times[3], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_state_slices() {
        let mut state = State::new();
        state.resize(12);
        state.slice_mut(1)[2] = 7.0;
        assert_eq!(state.slice(1)[2], 7.0);
        assert_eq!(state.slice(0)[2], 0.0);
    }
}
