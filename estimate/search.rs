//! # Regularization Search
//!
//! Scans candidate ridge strengths in parallel. Each candidate is fitted once per
//! weighting scheme; the candidate reports its best scheme, and the global winner is the
//! lowest score across candidates.
//!
//! Workers share only read-only borrows of the fit context, so the outcome does not
//! depend on how the pool schedules them. The reduction orders candidates by
//! `(score, lambda, scheme)`, which makes the selection independent of the order the
//! candidates were supplied in.

use crate::estimate::error::EstimationError;
use crate::estimate::fitter::{FitContext, WeightedFitter};
use crate::estimate::solver::SolverError;
use crate::estimate::weights::WeightingSchemes;
use ndarray::ArrayView1;
use rayon::ThreadPool;
use rayon::prelude::*;

/// `count` values log-spaced between `10^start_exponent` and `10^stop_exponent`.
pub fn lambda_grid(start_exponent: f64, stop_exponent: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![10f64.powf(start_exponent)],
        n => {
            let step = (stop_exponent - start_exponent) / (n - 1) as f64;
            (0..n)
                .map(|i| 10f64.powf(start_exponent + step * i as f64))
                .collect()
        }
    }
}

/// Best scheme for one candidate strength, or `None` if every scheme failed.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub lambda: f64,
    pub best: Option<(String, f64)>,
}

/// The selected `(lambda, scheme)` pair plus every candidate's report.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub lambda: f64,
    pub scheme: String,
    pub score: f64,
    pub candidates: Vec<CandidateScore>,
}

pub struct RegularizationSearch<'a> {
    fitter: WeightedFitter<'a>,
    pool: &'a ThreadPool,
}

impl<'a> RegularizationSearch<'a> {
    pub fn new(ctx: &'a FitContext<'a>, pool: &'a ThreadPool) -> Self {
        Self {
            fitter: WeightedFitter::new(ctx),
            pool,
        }
    }

    /// Fits every scheme at `lambda` and keeps the lowest finite score. On an exact tie the
    /// scheme that comes first in key order is kept.
    pub fn evaluate_candidate(
        &self,
        lambda: f64,
        schemes: &WeightingSchemes,
        initial_guess: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) -> CandidateScore {
        let ctx = self.fitter.context();
        let mut best: Option<(String, f64)> = None;

        for (key, sigma) in schemes.iter() {
            let solution = match self.fitter.solve(Some(lambda), sigma, initial_guess, target) {
                Ok(s) => s,
                Err(e) => {
                    ctx.observer.scheme_failed(ctx.gene, lambda, key, &e);
                    continue;
                }
            };
            let score = match self.fitter.score(solution.estimate.view(), target) {
                Ok(s) if s.is_finite() => s,
                Ok(s) => {
                    let e = SolverError::Numerical(format!("non-finite score {s}"));
                    ctx.observer.scheme_failed(ctx.gene, lambda, key, &e);
                    continue;
                }
                Err(e) => {
                    ctx.observer.scheme_failed(ctx.gene, lambda, key, &e);
                    continue;
                }
            };
            let improves = best.as_ref().is_none_or(|(_, current)| score < *current);
            if improves {
                best = Some((key.to_string(), score));
            }
        }

        ctx.observer.lambda_evaluated(
            ctx.gene,
            lambda,
            best.as_ref().map(|(k, s)| (k.as_str(), *s)),
        );
        CandidateScore { lambda, best }
    }

    /// Evaluates all candidates on the pool and selects the global minimum.
    pub fn run(
        &self,
        lambdas: &[f64],
        schemes: &WeightingSchemes,
        initial_guess: ArrayView1<f64>,
        target: ArrayView1<f64>,
    ) -> Result<SearchOutcome, EstimationError> {
        let candidates: Vec<CandidateScore> = self.pool.install(|| {
            lambdas
                .par_iter()
                .map(|&lambda| self.evaluate_candidate(lambda, schemes, initial_guess, target))
                .collect()
        });

        let ctx = self.fitter.context();
        let winner = select_best(&candidates).ok_or_else(|| EstimationError::NoFeasibleFit {
            gene: ctx.gene.to_string(),
            last_lambda: lambdas.last().copied(),
            last_scheme: schemes.iter().last().map(|(k, _)| k.to_string()),
        })?;

        ctx.observer
            .lambda_selected(ctx.gene, winner.0, &winner.1, winner.2);
        Ok(SearchOutcome {
            lambda: winner.0,
            scheme: winner.1,
            score: winner.2,
            candidates,
        })
    }
}

/// Lowest score wins; ties go to the smaller lambda, then the smaller scheme key.
pub fn select_best(candidates: &[CandidateScore]) -> Option<(f64, String, f64)> {
    candidates
        .iter()
        .filter_map(|c| c.best.as_ref().map(|(k, s)| (c.lambda, k, *s)))
        .min_by(|a, b| {
            a.2.total_cmp(&b.2)
                .then_with(|| a.0.total_cmp(&b.0))
                .then_with(|| a.1.cmp(b.1))
        })
        .map(|(lambda, key, score)| (lambda, key.clone(), score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::fitter::MeanSquaredScore;
    use crate::estimate::fitter::test_support::LinearModel;
    use crate::estimate::observer::SilentObserver;
    use crate::estimate::solver::{
        BoundedLeastSquares, LeastSquaresProblem, SolverError, SolverOptions, SolverSolution,
    };
    use crate::estimate::types::{Bounds, ParameterScale};
    use ndarray::{Array1, Array2, array};

    /// Returns `target[0] + sigma[0]` for every parameter, or fails when
    /// `sigma[0]` is above `fail_above`.
    struct ScoreShaper {
        fail_above: f64,
    }

    impl BoundedLeastSquares for ScoreShaper {
        fn fit(
            &self,
            problem: &LeastSquaresProblem<'_>,
            _: &SolverOptions,
        ) -> Result<SolverSolution, SolverError> {
            let s = problem.sigma[0];
            if s > self.fail_above {
                return Err(SolverError::Numerical("diverged".into()));
            }
            let n = problem.initial_guess.len();
            assert_eq!(problem.target.len(), problem.model.n_outputs());
            let value = problem.target[0] + s;
            Ok(SolverSolution {
                estimate: Array1::from_elem(n, value),
                covariance: Array2::eye(n),
            })
        }
    }

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(3)
            .build()
            .unwrap()
    }

    fn schemes() -> WeightingSchemes {
        let mut s = WeightingSchemes::new();
        s.insert("alpha", array![0.5, 1.0]).unwrap();
        s.insert("beta", array![0.1, 1.0]).unwrap();
        s.insert("gamma", array![2.0, 1.0]).unwrap();
        s
    }

    fn context<'a>(
        model: &'a LinearModel,
        solver: &'a dyn BoundedLeastSquares,
        bounds: &'a Bounds,
        tp: &'a Array1<f64>,
    ) -> FitContext<'a> {
        FitContext {
            gene: "G",
            model,
            scale: ParameterScale::Linear,
            solver,
            scorer: &MeanSquaredScore,
            observer: &SilentObserver,
            time_points: tp.view(),
            bounds,
            options: SolverOptions::default(),
        }
    }

    #[test]
    fn lambda_grid_is_log_spaced() {
        let grid = lambda_grid(-2.0, 0.0, 3);
        assert_eq!(grid.len(), 3);
        assert!((grid[0] - 0.01).abs() < 1e-15);
        assert!((grid[1] - 0.1).abs() < 1e-15);
        assert!((grid[2] - 1.0).abs() < 1e-15);
        assert_eq!(lambda_grid(-2.0, 0.0, 10).len(), 10);
        assert_eq!(lambda_grid(0.0, 1.0, 1), vec![1.0]);
        assert!(lambda_grid(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn best_scheme_has_lowest_score_and_selection_ignores_order() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScoreShaper { fail_above: 10.0 };
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let pool = pool();
        let search = RegularizationSearch::new(&ctx, &pool);
        let target = array![1.0, 1.0];
        let p0 = array![0.0, 0.0];
        let schemes = schemes();

        let forward = search
            .run(&[0.01, 0.1, 1.0], &schemes, p0.view(), target.view())
            .unwrap();
        let reversed = search
            .run(&[1.0, 0.1, 0.01], &schemes, p0.view(), target.view())
            .unwrap();

        // sigma 0.1 gives the smallest offset; every lambda scores identically, so the
        // smallest lambda wins the tie.
        assert_eq!(forward.scheme, "beta");
        assert_eq!(forward.lambda, 0.01);
        assert_eq!(
            (forward.lambda, &forward.scheme, forward.score),
            (reversed.lambda, &reversed.scheme, reversed.score)
        );
        assert_eq!(forward.candidates.len(), 3);
    }

    #[test]
    fn failing_schemes_are_skipped() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScoreShaper { fail_above: 0.3 };
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let pool = pool();
        let search = RegularizationSearch::new(&ctx, &pool);

        let outcome = search
            .run(&[0.5], &schemes(), array![0.0, 0.0].view(), array![1.0, 1.0].view())
            .unwrap();
        assert_eq!(outcome.scheme, "beta");
    }

    #[test]
    fn all_candidates_failing_is_no_feasible_fit() {
        let model = LinearModel {
            design: Array2::eye(2),
        };
        let solver = ScoreShaper { fail_above: 0.0 };
        let bounds = Bounds::uniform(2, -10.0, 10.0).unwrap();
        let tp = array![0.0, 1.0];
        let ctx = context(&model, &solver, &bounds, &tp);
        let pool = pool();
        let search = RegularizationSearch::new(&ctx, &pool);

        let err = search
            .run(&[0.01, 1.0], &schemes(), array![0.0, 0.0].view(), array![1.0, 1.0].view())
            .unwrap_err();
        match err {
            EstimationError::NoFeasibleFit {
                gene,
                last_lambda,
                last_scheme,
            } => {
                assert_eq!(gene, "G");
                assert_eq!(last_lambda, Some(1.0));
                assert_eq!(last_scheme.as_deref(), Some("gamma"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn select_best_breaks_ties_deterministically() {
        let candidates = vec![
            CandidateScore {
                lambda: 1.0,
                best: Some(("a".into(), 0.5)),
            },
            CandidateScore {
                lambda: 0.1,
                best: None,
            },
            CandidateScore {
                lambda: 0.5,
                best: Some(("b".into(), 0.5)),
            },
            CandidateScore {
                lambda: 0.5,
                best: Some(("a".into(), 0.5)),
            },
        ];
        let (lambda, scheme, score) = select_best(&candidates).unwrap();
        assert_eq!((lambda, scheme.as_str(), score), (0.5, "a", 0.5));

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(select_best(&reversed).unwrap(), (0.5, "a".to_string(), 0.5));

        assert!(select_best(&[CandidateScore { lambda: 1.0, best: None }]).is_none());
    }
}
