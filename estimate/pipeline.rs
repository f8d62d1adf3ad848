//! # Per-Gene Estimation Pipeline
//!
//! Runs the full sequence for one gene: seeded initial guess, regularization search,
//! final weighted fit, bootstrap, confidence intervals and error metrics.
//!
//! Genes are independent. [`Estimator::estimate_genes`] records a failed gene as
//! [`GeneOutcome::Failed`] and moves on to the next one.

use crate::estimate::bootstrap::{BootstrapEngine, BootstrapSummary};
use crate::estimate::confidence::{ConfidenceIntervalTable, ConfidenceIntervals, IntervalRequest};
use crate::estimate::config::EstimationConfig;
use crate::estimate::error::EstimationError;
use crate::estimate::fitter::{FitContext, FitResult, FitScorer, WeightedFitter};
use crate::estimate::metrics::FitMetrics;
use crate::estimate::observer::FitObserver;
use crate::estimate::problem::NetworkModel;
use crate::estimate::search::{RegularizationSearch, SearchOutcome};
use crate::estimate::solver::{AugmentedModel, BoundedLeastSquares, ModelFunction, ScaledModel};
use crate::estimate::types::Bounds;
use crate::estimate::weights::WeightingSchemeSupplier;
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::ThreadPool;

/// One gene's fitting inputs. `model` and `bounds` are on the natural scale.
pub struct GeneProblem<'a> {
    pub gene: String,
    pub model: &'a dyn ModelFunction,
    pub target: Array1<f64>,
    pub time_points: Array1<f64>,
    pub bounds: Bounds,
    pub parameter_names: Vec<String>,
    /// Number of measured sites, forwarded to the weighting-scheme supplier.
    pub site_count: usize,
}

/// External capabilities used by the pipeline.
pub struct Collaborators<'a> {
    pub solver: &'a dyn BoundedLeastSquares,
    pub intervals: &'a dyn ConfidenceIntervals,
    pub weights: &'a dyn WeightingSchemeSupplier,
    pub scorer: &'a dyn FitScorer,
    pub observer: &'a dyn FitObserver,
}

/// Reported result for one gene. All parameter values are on the natural scale.
#[derive(Debug, Clone)]
pub struct GeneEstimate {
    pub gene: String,
    pub parameter_names: Vec<String>,
    pub fit: FitResult,
    pub search: SearchOutcome,
    pub bootstrap: BootstrapSummary,
    pub intervals: ConfidenceIntervalTable,
    /// Un-augmented model output at the final estimate.
    pub prediction: Array1<f64>,
    pub metrics: FitMetrics,
    /// `lambda / p * sum(theta^2)`; zero when the final fit is unregularized.
    pub regularization_term: f64,
}

impl GeneEstimate {
    pub fn log_summary(&self) {
        log::info!(
            "[{}] Selected λ = {:.4} with '{}' weights",
            self.gene,
            self.search.lambda,
            self.fit.scheme
        );
        for (name, value) in self.parameter_names.iter().zip(self.fit.estimate.iter()) {
            log::info!("[{}] {:>24} = {:.4}", self.gene, name, value);
        }
        log::info!(
            "[{}] Regularization term: {:.6}",
            self.gene,
            self.regularization_term
        );
        self.metrics.log_summary(&self.gene);
    }
}

#[derive(Debug)]
pub enum GeneOutcome {
    Estimated(Box<GeneEstimate>),
    Failed { gene: String, error: EstimationError },
}

impl GeneOutcome {
    pub fn gene(&self) -> &str {
        match self {
            GeneOutcome::Estimated(est) => &est.gene,
            GeneOutcome::Failed { gene, .. } => gene,
        }
    }

    pub fn estimate(&self) -> Option<&GeneEstimate> {
        match self {
            GeneOutcome::Estimated(est) => Some(est.as_ref()),
            GeneOutcome::Failed { .. } => None,
        }
    }
}

/// Uniform draw inside finite bounds.
pub fn initial_guess<R: Rng + ?Sized>(
    bounds: &Bounds,
    rng: &mut R,
) -> Result<Array1<f64>, EstimationError> {
    bounds
        .lower
        .iter()
        .zip(bounds.upper.iter())
        .map(|(&lo, &hi)| {
            if !(lo.is_finite() && hi.is_finite() && (hi - lo).is_finite()) {
                return Err(EstimationError::InvalidConfig(format!(
                    "cannot draw an initial guess inside unbounded interval [{}, {}]",
                    lo, hi
                )));
            }
            Ok(if lo == hi { lo } else { rng.gen_range(lo..hi) })
        })
        .collect()
}

/// `lambda / p * sum(theta^2)`.
pub fn regularization_term(lambda: f64, params: ArrayView1<f64>) -> f64 {
    if params.is_empty() {
        return 0.0;
    }
    lambda / params.len() as f64 * params.dot(&params)
}

pub struct Estimator {
    config: EstimationConfig,
    pool: ThreadPool,
}

impl Estimator {
    pub fn new(config: EstimationConfig) -> Result<Self, EstimationError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count())
            .build()
            .map_err(|e| EstimationError::InvalidConfig(format!("worker pool: {}", e)))?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EstimationConfig {
        &self.config
    }

    pub fn estimate_gene(
        &self,
        problem: &GeneProblem<'_>,
        collab: &Collaborators<'_>,
    ) -> Result<GeneEstimate, EstimationError> {
        let gene = problem.gene.as_str();
        let target = problem.target.view();
        let time_points = problem.time_points.view();
        let n_params = problem.bounds.len();

        if target.len() != problem.model.n_outputs() {
            return Err(EstimationError::shape(
                "target",
                problem.model.n_outputs(),
                target.len(),
            ));
        }
        if n_params == 0 {
            return Err(EstimationError::InvalidConfig(format!(
                "gene '{}' has no parameters to fit",
                gene
            )));
        }
        if problem.parameter_names.len() != n_params {
            return Err(EstimationError::shape(
                "parameter names",
                n_params,
                problem.parameter_names.len(),
            ));
        }

        let scale = self.config.parameter_scale;
        let solver_bounds = scale.solver_bounds(&problem.bounds);
        let scaled = ScaledModel::new(problem.model, scale);

        // Initial guess and bootstrap noise share one stream.
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let p0 = initial_guess(&solver_bounds, &mut rng)?;

        let schemes = collab
            .weights
            .schemes(target, time_points, problem.site_count)?;
        schemes.validate(target.len())?;

        let ctx = FitContext {
            gene,
            model: &scaled,
            scale,
            solver: collab.solver,
            scorer: collab.scorer,
            observer: collab.observer,
            time_points,
            bounds: &solver_bounds,
            options: self.config.solver,
        };

        let lambdas = self.config.lambda_grid.lambdas();
        let search = RegularizationSearch::new(&ctx, &self.pool).run(
            &lambdas,
            &schemes,
            p0.view(),
            target,
        )?;
        let sigma = schemes.get(&search.scheme).ok_or_else(|| {
            EstimationError::InvalidConfig(format!("scheme '{}' disappeared", search.scheme))
        })?;

        let lambda = self.config.use_regularization.then_some(search.lambda);
        let fitter = WeightedFitter::new(&ctx);
        let fitted = fitter.fit(lambda, &search.scheme, sigma, p0.view(), target);

        let (fitted, bootstrap) = BootstrapEngine::new(&ctx, &self.pool).run(
            &fitted,
            lambda,
            sigma,
            target,
            self.config.bootstraps,
            self.config.bootstrap_noise,
            &mut rng,
        )?;

        let target_fit = match lambda {
            Some(l) => AugmentedModel::new(&scaled, l, n_params).augment_target(target),
            None => target.to_owned(),
        };
        let fitted_output = fitter
            .fitted_output(lambda, fitted.estimate.as_view())
            .unwrap_or_else(|e| {
                log::warn!("[{}] Model evaluation at the final estimate failed: {}", gene, e);
                Array1::from_elem(target_fit.len(), f64::NAN)
            });

        let natural = fitted.to_natural(scale);
        let request = IntervalRequest {
            gene,
            parameter_names: &problem.parameter_names,
            estimate: natural.estimate.as_view(),
            covariance: natural.covariance.as_ref(),
            target: target_fit.view(),
            model_output: fitted_output.view(),
            alpha: self.config.ci_alpha,
        };
        request.validate()?;
        let intervals = collab.intervals.compute(&request);

        let prediction = problem
            .model
            .evaluate(time_points, natural.estimate.as_view())
            .unwrap_or_else(|_| Array1::from_elem(target.len(), f64::NAN));
        let metrics = FitMetrics::compute(target, prediction.view())?;
        let regularization_term =
            lambda.map_or(0.0, |l| regularization_term(l, natural.estimate.as_view()));

        Ok(GeneEstimate {
            gene: gene.to_string(),
            parameter_names: problem.parameter_names.clone(),
            fit: natural,
            search,
            bootstrap,
            intervals,
            prediction,
            metrics,
            regularization_term,
        })
    }

    /// Fits every gene in order. A failure is reported to the observer and recorded;
    /// the remaining genes still run.
    pub fn estimate_genes(
        &self,
        problems: &[GeneProblem<'_>],
        collab: &Collaborators<'_>,
    ) -> Vec<GeneOutcome> {
        problems
            .iter()
            .map(|problem| match self.estimate_gene(problem, collab) {
                Ok(estimate) => GeneOutcome::Estimated(Box::new(estimate)),
                Err(error) => {
                    collab.observer.gene_failed(&problem.gene, &error);
                    GeneOutcome::Failed {
                        gene: problem.gene.clone(),
                        error,
                    }
                }
            })
            .collect()
    }
}

impl NetworkModel {
    /// The whole network as one fitting problem over the flattened observed series.
    pub fn gene_problem(&self, name: &str) -> GeneProblem<'_> {
        GeneProblem {
            gene: name.to_string(),
            model: &self.forward,
            target: self.target(),
            time_points: self.time_points.clone(),
            bounds: self.bounds.clone(),
            parameter_names: self.layout().parameter_names(),
            site_count: self.layout().n_sites(),
        }
    }
}
