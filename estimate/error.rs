use crate::estimate::sparse::SparseError;
use thiserror::Error;

/// Errors raised by the estimation engine.
///
/// Solver non-convergence is not represented here: it is recovered where it
/// happens (see `fitter` and `bootstrap`) and only surfaces here as
/// `NoFeasibleFit` once every regularization candidate for a gene has failed.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Shape mismatch in {what}: expected {expected}, found {found}.")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "Time-weighted loss has zero total applied weight; at least one time point must carry a non-zero weight."
    )]
    DegenerateWeights,

    #[error(
        "No regularization candidate produced a usable fit for gene '{gene}' (last attempted lambda {last_lambda:?}, scheme {last_scheme:?})."
    )]
    NoFeasibleFit {
        gene: String,
        last_lambda: Option<f64>,
        last_scheme: Option<String>,
    },

    #[error("Invalid parameter layout: {0}")]
    Layout(String),

    #[error("Invalid estimation configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed activation matrix: {0}")]
    Sparse(#[from] SparseError),
}

impl EstimationError {
    pub(crate) fn shape(what: &'static str, expected: usize, found: usize) -> Self {
        EstimationError::ShapeMismatch {
            what,
            expected,
            found,
        }
    }
}
