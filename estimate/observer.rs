use crate::estimate::error::EstimationError;
use crate::estimate::solver::SolverError;

/// Receives intermediate optimisation events. All methods default to no-ops.
///
/// Called from worker threads during the regularization search and bootstrap, so
/// implementations must be `Sync`.
pub trait FitObserver: Sync {
    /// One regularization strength finished; `best` is `None` if every scheme failed.
    fn lambda_evaluated(&self, gene: &str, lambda: f64, best: Option<(&str, f64)>) {
        let _ = (gene, lambda, best);
    }

    fn scheme_failed(&self, gene: &str, lambda: f64, scheme: &str, error: &SolverError) {
        let _ = (gene, lambda, scheme, error);
    }

    fn lambda_selected(&self, gene: &str, lambda: f64, scheme: &str, score: f64) {
        let _ = (gene, lambda, scheme, score);
    }

    /// The final fit failed and the initial guess stands in for the estimate.
    fn fit_fallback(&self, gene: &str, scheme: &str, error: &SolverError) {
        let _ = (gene, scheme, error);
    }

    fn fit_completed(&self, gene: &str, scheme: &str, score: f64) {
        let _ = (gene, scheme, score);
    }

    fn bootstrap_started(&self, gene: &str, iterations: usize) {
        let _ = (gene, iterations);
    }

    fn bootstrap_iteration_failed(&self, gene: &str, iteration: usize, error: &SolverError) {
        let _ = (gene, iteration, error);
    }

    fn bootstrap_completed(&self, gene: &str, iterations: usize, valid_covariances: usize) {
        let _ = (gene, iterations, valid_covariances);
    }

    fn gene_failed(&self, gene: &str, error: &EstimationError) {
        let _ = (gene, error);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl FitObserver for SilentObserver {}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

/// `early_emphasis` -> `Early Emphasis`.
fn pretty_scheme(scheme: &str) -> String {
    scheme
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl FitObserver for LogObserver {
    fn lambda_evaluated(&self, gene: &str, lambda: f64, best: Option<(&str, f64)>) {
        match best {
            Some((scheme, score)) => log::info!(
                "[{}]\t| λ = {:8.4} | Weight: {:20} | Score = {:8.4}",
                gene,
                lambda,
                pretty_scheme(scheme),
                score
            ),
            None => log::warn!("[{}] All fits failed for λ = {:.4}", gene, lambda),
        }
    }

    fn scheme_failed(&self, gene: &str, lambda: f64, scheme: &str, error: &SolverError) {
        log::debug!(
            "[{}] Fit with '{}' weights failed at λ = {:.4}: {}",
            gene,
            scheme,
            lambda,
            error
        );
    }

    fn lambda_selected(&self, gene: &str, lambda: f64, scheme: &str, score: f64) {
        log::info!(
            "[{}] Using λ = {:.4} with '{}' weights (score {:.4})",
            gene,
            lambda,
            pretty_scheme(scheme),
            score
        );
    }

    fn fit_fallback(&self, gene: &str, scheme: &str, error: &SolverError) {
        log::warn!(
            "[{}] Final fit failed for '{}' weights, keeping the initial guess: {}",
            gene,
            scheme,
            error
        );
    }

    fn fit_completed(&self, gene: &str, scheme: &str, score: f64) {
        log::info!(
            "[{}] Fit score {:.4} with '{}' weights",
            gene,
            score,
            pretty_scheme(scheme)
        );
    }

    fn bootstrap_started(&self, gene: &str, iterations: usize) {
        log::info!("[{}] Bootstrapping with {} iterations", gene, iterations);
    }

    fn bootstrap_iteration_failed(&self, gene: &str, iteration: usize, error: &SolverError) {
        log::warn!(
            "[{}] Bootstrap iteration {} failed, reusing the best estimate: {}",
            gene,
            iteration,
            error
        );
    }

    fn bootstrap_completed(&self, gene: &str, iterations: usize, valid_covariances: usize) {
        log::info!(
            "[{}] Bootstrap finished: {} iterations, {} with a covariance",
            gene,
            iterations,
            valid_covariances
        );
    }

    fn gene_failed(&self, gene: &str, error: &EstimationError) {
        log::warn!("[{}] Skipping gene: {}", gene, error);
    }
}
