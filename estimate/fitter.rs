//! # Weighted Fitter
//!
//! One bounded, sigma-weighted, optionally ridge-regularized fit through the external
//! solver. The same call backs the regularization search, the final fit and every
//! bootstrap refit.
//!
//! A solver failure in [`WeightedFitter::fit`] is not an error: the initial guess is
//! kept as the estimate, the covariance is marked absent and the observer is told.

use crate::estimate::metrics::FitMetrics;
use crate::estimate::observer::FitObserver;
use crate::estimate::solver::{
    AugmentedModel, BoundedLeastSquares, LeastSquaresProblem, ModelFunction, SolverError,
    SolverOptions, SolverSolution,
};
use crate::estimate::types::{Bounds, ParameterScale, ParameterVector};
use ndarray::{Array1, Array2, ArrayView1};

/// Fit-quality metric used to rank candidate fits. Lower is better.
pub trait FitScorer: Sync {
    /// `params` are on the natural scale; `prediction` is the un-augmented model output.
    fn score(
        &self,
        params: ArrayView1<f64>,
        target: ArrayView1<f64>,
        prediction: ArrayView1<f64>,
    ) -> f64;
}

/// Mean squared residual between target and prediction.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredScore;

impl FitScorer for MeanSquaredScore {
    fn score(
        &self,
        _: ArrayView1<f64>,
        target: ArrayView1<f64>,
        prediction: ArrayView1<f64>,
    ) -> f64 {
        FitMetrics::compute(target, prediction)
            .map(|m| m.mse)
            .unwrap_or(f64::INFINITY)
    }
}

/// Adapts a closure `(params, target, prediction) -> score` into a [`FitScorer`].
pub struct ScoreFn<F>(pub F);

impl<F> ScoreFn<F>
where
    F: Fn(ArrayView1<f64>, ArrayView1<f64>, ArrayView1<f64>) -> f64 + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> FitScorer for ScoreFn<F>
where
    F: Fn(ArrayView1<f64>, ArrayView1<f64>, ArrayView1<f64>) -> f64 + Sync,
{
    fn score(
        &self,
        params: ArrayView1<f64>,
        target: ArrayView1<f64>,
        prediction: ArrayView1<f64>,
    ) -> f64 {
        (self.0)(params, target, prediction)
    }
}

/// Read-only inputs shared by every fit of one gene. Everything here is `Sync`, so a
/// context can be handed to any number of worker threads.
pub struct FitContext<'a> {
    pub gene: &'a str,
    /// Model in solver space (already wrapped for the parameter scale).
    pub model: &'a dyn ModelFunction,
    pub scale: ParameterScale,
    pub solver: &'a dyn BoundedLeastSquares,
    pub scorer: &'a dyn FitScorer,
    pub observer: &'a dyn FitObserver,
    pub time_points: ArrayView1<'a, f64>,
    /// Bounds in solver space.
    pub bounds: &'a Bounds,
    pub options: SolverOptions,
}

/// Outcome of a fit for one gene.
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult {
    pub estimate: ParameterVector,
    /// Absent when the solver failed and the estimate is a fallback.
    pub covariance: Option<Array2<f64>>,
    pub score: f64,
    pub scheme: String,
    pub lambda: f64,
}

impl FitResult {
    /// Maps the estimate from solver space to the natural scale. The covariance is
    /// carried over unchanged.
    pub fn to_natural(&self, scale: ParameterScale) -> FitResult {
        FitResult {
            estimate: ParameterVector::new(scale.to_natural(self.estimate.as_view())),
            ..self.clone()
        }
    }
}

pub struct WeightedFitter<'a> {
    ctx: &'a FitContext<'a>,
}

impl<'a> WeightedFitter<'a> {
    pub fn new(ctx: &'a FitContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &FitContext<'a> {
        self.ctx
    }

    /// Single solver call. With `lambda = Some(l)` the model, target and sigma are
    /// augmented with `p` ridge pseudo-residuals.
    pub fn solve(
        &self,
        lambda: Option<f64>,
        sigma: ArrayView1<f64>,
        initial_guess: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) -> Result<SolverSolution, SolverError> {
        let ctx = self.ctx;
        match lambda {
            Some(l) => {
                let augmented = AugmentedModel::new(ctx.model, l, initial_guess.len());
                let target_fit = augmented.augment_target(target);
                let sigma_fit = augmented.augment_sigma(sigma);
                let problem = LeastSquaresProblem {
                    model: &augmented,
                    time_points: ctx.time_points.view(),
                    target: target_fit.view(),
                    initial_guess: initial_guess.view(),
                    bounds: ctx.bounds,
                    sigma: sigma_fit.view(),
                };
                ctx.solver.fit(&problem, &ctx.options)
            }
            None => {
                let problem = LeastSquaresProblem {
                    model: ctx.model,
                    time_points: ctx.time_points.view(),
                    target: target.view(),
                    initial_guess: initial_guess.view(),
                    bounds: ctx.bounds,
                    sigma: sigma.view(),
                };
                ctx.solver.fit(&problem, &ctx.options)
            }
        }
    }

    /// Scores `params` (solver space) on the un-augmented model output.
    pub fn score(
        &self,
        params: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) -> Result<f64, SolverError> {
        let prediction = self.ctx.model.evaluate(self.ctx.time_points, params)?;
        let natural = self.ctx.scale.to_natural(params);
        Ok(self
            .ctx
            .scorer
            .score(natural.view(), target, prediction.view()))
    }

    /// Final fit with fallback to `initial_guess` on solver failure.
    pub fn fit(
        &self,
        lambda: Option<f64>,
        scheme: &str,
        sigma: ArrayView1<f64>,
        initial_guess: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) -> FitResult {
        let ctx = self.ctx;
        let (estimate, covariance) = match self.solve(lambda, sigma, initial_guess, target) {
            Ok(solution) => (solution.estimate, Some(solution.covariance)),
            Err(error) => {
                ctx.observer.fit_fallback(ctx.gene, scheme, &error);
                (initial_guess.to_owned(), None)
            }
        };
        let score = self.score_or_infinite(estimate.view(), target);
        if covariance.is_some() {
            ctx.observer.fit_completed(ctx.gene, scheme, score);
        }
        FitResult {
            estimate: ParameterVector::new(estimate),
            covariance,
            score,
            scheme: scheme.to_string(),
            lambda: lambda.unwrap_or(0.0),
        }
    }

    pub(crate) fn score_or_infinite(
        &self,
        params: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) -> f64 {
        match self.score(params, target) {
            Ok(s) if s.is_finite() => s,
            _ => f64::INFINITY,
        }
    }

    /// Model output at `params` with the same augmentation the solver saw.
    pub fn fitted_output(
        &self,
        lambda: Option<f64>,
        params: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        match lambda {
            Some(l) => {
                AugmentedModel::new(self.ctx.model, l, params.len())
                    .evaluate(self.ctx.time_points, params)
            }
            None => self.ctx.model.evaluate(self.ctx.time_points, params),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::{LinearModel, ScriptedSolver};
    use crate::estimate::observer::SilentObserver;
    use ndarray::array;

    fn context<'a>(
        model: &'a LinearModel,
        solver: &'a ScriptedSolver,
        bounds: &'a Bounds,
        time_points: &'a Array1<f64>,
    ) -> FitContext<'a> {
        FitContext {
            gene: "G1",
            model,
            scale: ParameterScale::Linear,
            solver,
            scorer: &MeanSquaredScore,
            observer: &SilentObserver,
            time_points: time_points.view(),
            bounds,
            options: SolverOptions::default(),
        }
    }

    #[test]
    fn solver_failure_falls_back_to_initial_guess() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScriptedSolver::failing();
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let fitter = WeightedFitter::new(&ctx);

        let p0 = array![0.5, 1.5];
        let target = array![1.0, 1.0];
        let result = fitter.fit(
            Some(0.1),
            "uniform",
            array![1.0, 1.0].view(),
            p0.view(),
            target.view(),
        );

        assert_eq!(result.estimate.0, p0);
        assert!(result.covariance.is_none());
        // score over the un-augmented output: ((0.5)^2 + (0.5)^2) / 2
        assert!((result.score - 0.25).abs() < 1e-12);
        assert_eq!(result.lambda, 0.1);
    }

    #[test]
    fn regularized_fit_pads_target_and_sigma() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScriptedSolver::returning(array![1.0, 2.0]);
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let fitter = WeightedFitter::new(&ctx);

        let result = fitter.fit(
            Some(0.5),
            "uniform",
            array![0.2, 0.4].view(),
            array![0.0, 0.0].view(),
            array![1.0, 2.0].view(),
        );
        assert_eq!(result.estimate.0, array![1.0, 2.0]);
        assert!(result.covariance.is_some());
        assert_eq!(result.score, 0.0);

        let targets = solver.seen_targets.lock().unwrap();
        assert_eq!(targets[0], array![1.0, 2.0, 0.0, 0.0]);
        let sigmas = solver.seen_sigmas.lock().unwrap();
        assert_eq!(sigmas[0], array![0.2, 0.4, 1.0, 1.0]);
    }

    #[test]
    fn unregularized_fit_passes_target_through() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScriptedSolver::returning(array![1.0, 2.0]);
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let fitter = WeightedFitter::new(&ctx);

        fitter.fit(
            None,
            "uniform",
            array![1.0, 1.0].view(),
            array![0.0, 0.0].view(),
            array![1.0, 2.0].view(),
        );
        assert_eq!(solver.seen_targets.lock().unwrap()[0], array![1.0, 2.0]);
    }

    #[test]
    fn solve_borrows_caller_arrays_only_for_the_call() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScriptedSolver::returning(array![1.0, 2.0]);
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let fitter = WeightedFitter::new(&ctx);

        for lambda in [Some(0.5), None] {
            let sigma = array![1.0, 1.0];
            let p0 = array![0.0, 0.0];
            let target = array![1.0, 2.0];
            let solution = fitter
                .solve(lambda, sigma.view(), p0.view(), target.view())
                .unwrap();
            assert_eq!(solution.estimate, array![1.0, 2.0]);
        }
        let targets = solver.seen_targets.lock().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].len(), 4);
        assert_eq!(targets[1], array![1.0, 2.0]);
    }

    #[test]
    fn fitted_output_includes_penalty_rows() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScriptedSolver::failing();
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let fitter = WeightedFitter::new(&ctx);

        let out = fitter
            .fitted_output(Some(2.0), array![1.0, -1.0].view())
            .unwrap();
        assert_eq!(out, array![1.0, -1.0, 1.0, -1.0]);
    }
}
