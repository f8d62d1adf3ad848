//! # Solver Boundary
//!
//! The engine does not integrate differential equations or run its own nonlinear
//! optimizer. Both are consumed through the traits in this module:
//!
//! - [`ModelFunction`]: maps `(time_points, params)` to a flat model output.
//! - [`TrajectorySimulator`]: an ODE simulator, adapted to a model function by
//!   [`SimulatorModel`].
//! - [`BoundedLeastSquares`]: a box-bounded, sigma-weighted nonlinear least-squares
//!   solver returning an estimate and its covariance.
//!
//! [`AugmentedModel`] appends the ridge pseudo-residuals `sqrt(lambda / p) * theta` so a
//! plain least-squares solver minimises `RSS + lambda / p * sum(theta^2)`.

use crate::estimate::types::{Bounds, ParameterScale};
use ndarray::{Array1, Array2, ArrayView1, Axis, concatenate, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the external solver or of the model it evaluates. These are recovered
/// locally by the fitting stages and never abort a run on their own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Solver did not converge within {evaluations} function evaluations.")]
    DidNotConverge { evaluations: usize },

    #[error("Numerical failure inside the solver: {0}")]
    Numerical(String),

    #[error("Model evaluation failed: {0}")]
    Model(String),
}

/// A model mapping a parameter vector to a flat output series.
pub trait ModelFunction: Sync {
    /// Length of the vector returned by [`ModelFunction::evaluate`].
    fn n_outputs(&self) -> usize;

    fn evaluate(
        &self,
        time_points: ArrayView1<f64>,
        params: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError>;
}

/// Output of one simulator run.
#[derive(Clone, Debug)]
pub struct Trajectory {
    /// Full state trajectory, time by state.
    pub states: Array2<f64>,
    /// Per-site series, site by time.
    pub site_series: Array2<f64>,
}

/// External ODE simulator. Deterministic; any error counts as a failed fit.
pub trait TrajectorySimulator: Sync {
    fn simulate(
        &self,
        params: ArrayView1<f64>,
        initial_conditions: ArrayView1<f64>,
        site_count: usize,
        time_points: ArrayView1<f64>,
    ) -> Result<Trajectory, SolverError>;
}

/// Adapts a [`TrajectorySimulator`] into a [`ModelFunction`] whose output is the
/// flattened (row-major) site series.
pub struct SimulatorModel<'a, S: TrajectorySimulator> {
    simulator: &'a S,
    initial_conditions: Array1<f64>,
    site_count: usize,
    n_time: usize,
}

impl<'a, S: TrajectorySimulator> SimulatorModel<'a, S> {
    pub fn new(
        simulator: &'a S,
        initial_conditions: Array1<f64>,
        site_count: usize,
        n_time: usize,
    ) -> Self {
        Self {
            simulator,
            initial_conditions,
            site_count,
            n_time,
        }
    }
}

impl<S: TrajectorySimulator> ModelFunction for SimulatorModel<'_, S> {
    fn n_outputs(&self) -> usize {
        self.site_count * self.n_time
    }

    fn evaluate(
        &self,
        time_points: ArrayView1<f64>,
        params: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        let trajectory = self.simulator.simulate(
            params,
            self.initial_conditions.view(),
            self.site_count,
            time_points,
        )?;
        let out: Array1<f64> = trajectory.site_series.iter().copied().collect();
        if out.len() != self.n_outputs() {
            return Err(SolverError::Model(format!(
                "simulator returned {} site values, expected {}",
                out.len(),
                self.n_outputs()
            )));
        }
        Ok(out)
    }
}

/// Presents a natural-scale model to the solver in the given parameter scale.
pub struct ScaledModel<'a> {
    inner: &'a dyn ModelFunction,
    scale: ParameterScale,
}

impl<'a> ScaledModel<'a> {
    pub fn new(inner: &'a dyn ModelFunction, scale: ParameterScale) -> Self {
        Self { inner, scale }
    }
}

impl ModelFunction for ScaledModel<'_> {
    fn n_outputs(&self) -> usize {
        self.inner.n_outputs()
    }

    fn evaluate(
        &self,
        time_points: ArrayView1<f64>,
        params: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        match self.scale {
            ParameterScale::Linear => self.inner.evaluate(time_points, params),
            ParameterScale::Log => {
                let natural = self.scale.to_natural(params);
                self.inner.evaluate(time_points, natural.view())
            }
        }
    }
}

/// Base model output followed by one ridge pseudo-residual per parameter.
pub struct AugmentedModel<'a> {
    inner: &'a dyn ModelFunction,
    lambda: f64,
    n_params: usize,
}

impl<'a> AugmentedModel<'a> {
    pub fn new(inner: &'a dyn ModelFunction, lambda: f64, n_params: usize) -> Self {
        Self {
            inner,
            lambda,
            n_params,
        }
    }

    /// `sqrt(lambda / p) * theta`; squares to the per-parameter ridge penalty.
    pub fn penalty_residuals(&self, params: ArrayView1<f64>) -> Array1<f64> {
        if params.is_empty() {
            return Array1::zeros(0);
        }
        let scale = (self.lambda / params.len() as f64).sqrt();
        params.mapv(|v| scale * v)
    }

    /// Target padded with one zero per parameter.
    pub fn augment_target(&self, target: ArrayView1<f64>) -> Array1<f64> {
        pad(target, self.n_params, 0.0)
    }

    /// Sigma padded with unit weight for every pseudo-residual.
    pub fn augment_sigma(&self, sigma: ArrayView1<f64>) -> Array1<f64> {
        pad(sigma, self.n_params, 1.0)
    }
}

impl ModelFunction for AugmentedModel<'_> {
    fn n_outputs(&self) -> usize {
        self.inner.n_outputs() + self.n_params
    }

    fn evaluate(
        &self,
        time_points: ArrayView1<f64>,
        params: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        let base = self.inner.evaluate(time_points, params)?;
        let penalty = self.penalty_residuals(params);
        concatenate(Axis(0), &[base.view(), penalty.view()])
            .map_err(|e| SolverError::Model(e.to_string()))
    }
}

fn pad(values: ArrayView1<f64>, extra: usize, fill: f64) -> Array1<f64> {
    let mut out = Array1::from_elem(values.len() + extra, fill);
    out.slice_mut(s![..values.len()]).assign(&values);
    out
}

/// Knobs forwarded to the external solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Upper limit on model evaluations before the solver gives up.
    pub max_evaluations: usize,
    /// Scale each parameter by the inverse norm of its Jacobian column.
    pub jacobian_scaling: bool,
    /// Treat sigma as absolute measurement error rather than relative weights.
    pub absolute_sigma: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 20_000,
            jacobian_scaling: true,
            absolute_sigma: true,
        }
    }
}

/// Everything the solver needs for one fit.
pub struct LeastSquaresProblem<'a> {
    pub model: &'a dyn ModelFunction,
    pub time_points: ArrayView1<'a, f64>,
    pub target: ArrayView1<'a, f64>,
    pub initial_guess: ArrayView1<'a, f64>,
    pub bounds: &'a Bounds,
    pub sigma: ArrayView1<'a, f64>,
}

/// Point estimate and covariance returned by the solver.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverSolution {
    pub estimate: Array1<f64>,
    pub covariance: Array2<f64>,
}

/// External bounded, weighted nonlinear least-squares solver.
pub trait BoundedLeastSquares: Sync {
    fn fit(
        &self,
        problem: &LeastSquaresProblem<'_>,
        options: &SolverOptions,
    ) -> Result<SolverSolution, SolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct Identity;

    impl ModelFunction for Identity {
        fn n_outputs(&self) -> usize {
            2
        }

        fn evaluate(
            &self,
            _: ArrayView1<f64>,
            params: ArrayView1<f64>,
        ) -> Result<Array1<f64>, SolverError> {
            Ok(params.to_owned())
        }
    }

    /// Site `i` at time `t` is `params[i] * t + initial_conditions[0]`, with
    /// `extra_rows` spurious rows appended to the site series.
    struct RampSimulator {
        extra_rows: usize,
    }

    impl TrajectorySimulator for RampSimulator {
        fn simulate(
            &self,
            params: ArrayView1<f64>,
            initial_conditions: ArrayView1<f64>,
            site_count: usize,
            time_points: ArrayView1<f64>,
        ) -> Result<Trajectory, SolverError> {
            if params.iter().any(|p| p.is_nan()) {
                return Err(SolverError::Numerical("integrator step failed".into()));
            }
            let rows = site_count + self.extra_rows;
            let site_series = Array2::from_shape_fn((rows, time_points.len()), |(i, t)| {
                params[i % params.len()] * time_points[t] + initial_conditions[0]
            });
            Ok(Trajectory {
                states: site_series.t().to_owned(),
                site_series,
            })
        }
    }

    #[test]
    fn simulator_model_flattens_site_series_row_major() {
        let simulator = RampSimulator { extra_rows: 0 };
        let model = SimulatorModel::new(&simulator, array![0.5], 2, 3);
        assert_eq!(model.n_outputs(), 6);
        let out = model
            .evaluate(array![0.0, 1.0, 2.0].view(), array![1.0, 2.0].view())
            .unwrap();
        assert_eq!(out, array![0.5, 1.5, 2.5, 0.5, 2.5, 4.5]);
    }

    #[test]
    fn simulator_model_rejects_wrong_site_count() {
        let simulator = RampSimulator { extra_rows: 1 };
        let model = SimulatorModel::new(&simulator, array![0.0], 2, 3);
        let err = model
            .evaluate(array![0.0, 1.0, 2.0].view(), array![1.0, 2.0].view())
            .unwrap_err();
        assert!(matches!(err, SolverError::Model(_)));
    }

    #[test]
    fn simulator_failure_propagates() {
        let simulator = RampSimulator { extra_rows: 0 };
        let model = SimulatorModel::new(&simulator, array![0.0], 2, 3);
        let err = model
            .evaluate(array![0.0, 1.0, 2.0].view(), array![f64::NAN, 2.0].view())
            .unwrap_err();
        assert_eq!(err, SolverError::Numerical("integrator step failed".into()));
    }

    #[test]
    fn augmented_output_appends_scaled_parameters() {
        let augmented = AugmentedModel::new(&Identity, 0.5, 2);
        let out = augmented
            .evaluate(array![0.0].view(), array![2.0, -4.0].view())
            .unwrap();
        // sqrt(0.5 / 2) = 0.5
        assert_eq!(out, array![2.0, -4.0, 1.0, -2.0]);
        assert_eq!(augmented.n_outputs(), 4);
    }

    #[test]
    fn penalty_residuals_square_to_ridge_term() {
        let lambda = 0.3;
        let params = array![1.5, -0.5, 2.0];
        let augmented = AugmentedModel::new(&Identity, lambda, params.len());
        let squared: f64 = augmented
            .penalty_residuals(params.view())
            .iter()
            .map(|v| v * v)
            .sum();
        let ridge = lambda / 3.0 * params.iter().map(|v| v * v).sum::<f64>();
        assert!((squared - ridge).abs() < 1e-12);
    }

    #[test]
    fn target_and_sigma_padding() {
        let augmented = AugmentedModel::new(&Identity, 1.0, 2);
        assert_eq!(
            augmented.augment_target(array![3.0, 4.0].view()),
            array![3.0, 4.0, 0.0, 0.0]
        );
        assert_eq!(
            augmented.augment_sigma(array![0.5, 0.25].view()),
            array![0.5, 0.25, 1.0, 1.0]
        );
    }

    #[test]
    fn log_scaled_model_exponentiates() {
        let scaled = ScaledModel::new(&Identity, ParameterScale::Log);
        let out = scaled
            .evaluate(array![0.0].view(), array![0.0, 2.0_f64.ln()].view())
            .unwrap();
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!((out[1] - 2.0).abs() < 1e-12);
    }
}
