//! # Bootstrap Engine
//!
//! Refits on multiplicatively perturbed targets and averages the results.
//!
//! Noise for every iteration is drawn up front from the caller's generator, in iteration
//! order, so a fixed seed gives the same aggregate no matter how the refits are scheduled
//! on the pool.

use crate::estimate::error::EstimationError;
use crate::estimate::fitter::{FitContext, FitResult, WeightedFitter};
use crate::estimate::types::ParameterVector;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::ThreadPool;
use rayon::prelude::*;

/// One perturbed refit. `covariance` is `None` when the solver failed and the best
/// estimate was substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSample {
    pub estimate: Array1<f64>,
    pub covariance: Option<Array2<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapSummary {
    pub iterations: usize,
    pub failed: usize,
}

/// Element-wise mean of every estimate, and of the covariances that are present.
pub fn aggregate_samples(
    samples: &[BootstrapSample],
) -> Result<(Array1<f64>, Option<Array2<f64>>), EstimationError> {
    let first = samples
        .first()
        .ok_or_else(|| EstimationError::InvalidConfig("no bootstrap samples to aggregate".into()))?;
    let p = first.estimate.len();

    let mut estimate = Array1::<f64>::zeros(p);
    let mut covariance: Option<Array2<f64>> = None;
    let mut valid = 0usize;

    for sample in samples {
        if sample.estimate.len() != p {
            return Err(EstimationError::shape(
                "bootstrap estimate",
                p,
                sample.estimate.len(),
            ));
        }
        estimate += &sample.estimate;
        if let Some(cov) = &sample.covariance {
            if cov.dim() != (p, p) {
                return Err(EstimationError::shape("bootstrap covariance", p * p, cov.len()));
            }
            match covariance.as_mut() {
                Some(acc) => *acc += cov,
                None => covariance = Some(cov.clone()),
            }
            valid += 1;
        }
    }

    estimate /= samples.len() as f64;
    if let Some(acc) = covariance.as_mut() {
        *acc /= valid as f64;
    }
    Ok((estimate, covariance))
}

pub struct BootstrapEngine<'a> {
    fitter: WeightedFitter<'a>,
    pool: &'a ThreadPool,
}

impl<'a> BootstrapEngine<'a> {
    pub fn new(ctx: &'a FitContext<'a>, pool: &'a ThreadPool) -> Self {
        Self {
            fitter: WeightedFitter::new(ctx),
            pool,
        }
    }

    /// Draws `iterations` perturbed copies of `target`: `y * (1 + e)`, `e ~ N(0, noise_sd)`.
    pub fn perturbed_targets<R: Rng + ?Sized>(
        target: ArrayView1<f64>,
        iterations: usize,
        noise_sd: f64,
        rng: &mut R,
    ) -> Result<Vec<Array1<f64>>, EstimationError> {
        if !(noise_sd.is_finite() && noise_sd >= 0.0) {
            return Err(EstimationError::InvalidConfig(format!(
                "bootstrap noise must be finite and non-negative, got {}",
                noise_sd
            )));
        }
        let normal = Normal::new(0.0, noise_sd).map_err(|e| {
            EstimationError::InvalidConfig(format!("bootstrap noise {}: {}", noise_sd, e))
        })?;
        Ok((0..iterations)
            .map(|_| target.mapv(|y| y * (1.0 + normal.sample(rng))))
            .collect())
    }

    /// Returns `best` unchanged when `iterations == 0`. Otherwise refits every perturbed
    /// target starting from `best.estimate` and returns the aggregate, rescored on the
    /// unperturbed target.
    #[allow(clippy::too_many_arguments)]
    pub fn run<R: Rng + ?Sized>(
        &self,
        best: &FitResult,
        lambda: Option<f64>,
        sigma: ArrayView1<f64>,
        target: ArrayView1<f64>,
        iterations: usize,
        noise_sd: f64,
        rng: &mut R,
    ) -> Result<(FitResult, BootstrapSummary), EstimationError> {
        if iterations == 0 {
            return Ok((
                best.clone(),
                BootstrapSummary {
                    iterations: 0,
                    failed: 0,
                },
            ));
        }

        let ctx = self.fitter.context();
        ctx.observer.bootstrap_started(ctx.gene, iterations);

        let targets = Self::perturbed_targets(target, iterations, noise_sd, rng)?;
        let seed = best.estimate.as_view();

        let samples: Vec<BootstrapSample> = self.pool.install(|| {
            targets
                .par_iter()
                .enumerate()
                .map(|(i, noisy)| match self.fitter.solve(lambda, sigma, seed, noisy.view()) {
                    Ok(solution) => BootstrapSample {
                        estimate: solution.estimate,
                        covariance: Some(solution.covariance),
                    },
                    Err(e) => {
                        ctx.observer.bootstrap_iteration_failed(ctx.gene, i, &e);
                        BootstrapSample {
                            estimate: seed.to_owned(),
                            covariance: None,
                        }
                    }
                })
                .collect()
        });

        let failed = samples.iter().filter(|s| s.covariance.is_none()).count();
        let (estimate, covariance) = aggregate_samples(&samples)?;
        ctx.observer
            .bootstrap_completed(ctx.gene, iterations, iterations - failed);

        let score = self.fitter.score_or_infinite(estimate.view(), target);
        Ok((
            FitResult {
                estimate: ParameterVector::new(estimate),
                covariance,
                score,
                scheme: best.scheme.clone(),
                lambda: best.lambda,
            },
            BootstrapSummary { iterations, failed },
        ))
    }
}
