use crate::estimate::error::EstimationError;
use ndarray::{Array2, ArrayView1};
use serde::Serialize;

/// Interval for one parameter. Fields are NaN when no covariance was available.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInterval {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub p_value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Per-parameter intervals for one gene's final estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceIntervalTable {
    pub gene: String,
    pub rows: Vec<ParameterInterval>,
}

impl ConfidenceIntervalTable {
    /// Table with every statistic undefined, used when the covariance is absent.
    pub fn undefined(gene: &str, names: &[String], estimate: ArrayView1<f64>) -> Self {
        Self {
            gene: gene.to_string(),
            rows: names
                .iter()
                .zip(estimate.iter())
                .map(|(name, &value)| ParameterInterval {
                    name: name.clone(),
                    estimate: value,
                    std_error: f64::NAN,
                    p_value: f64::NAN,
                    lower: f64::NAN,
                    upper: f64::NAN,
                })
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterInterval> {
        self.rows.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as TSV, one row per parameter.
    pub fn write_tsv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Everything an interval estimator sees for one gene.
pub struct IntervalRequest<'a> {
    pub gene: &'a str,
    pub parameter_names: &'a [String],
    /// Natural-scale estimate.
    pub estimate: ArrayView1<'a, f64>,
    pub covariance: Option<&'a Array2<f64>>,
    /// Fitting target, including any ridge padding.
    pub target: ArrayView1<'a, f64>,
    /// Model output at the estimate, aligned with `target`.
    pub model_output: ArrayView1<'a, f64>,
    pub alpha: f64,
}

impl IntervalRequest<'_> {
    pub fn validate(&self) -> Result<(), EstimationError> {
        let p = self.estimate.len();
        if self.parameter_names.len() != p {
            return Err(EstimationError::shape(
                "parameter names",
                p,
                self.parameter_names.len(),
            ));
        }
        if let Some(cov) = self.covariance {
            if cov.dim() != (p, p) {
                return Err(EstimationError::shape("covariance", p * p, cov.len()));
            }
        }
        if self.model_output.len() != self.target.len() {
            return Err(EstimationError::shape(
                "model output",
                self.target.len(),
                self.model_output.len(),
            ));
        }
        Ok(())
    }
}

/// Computes confidence intervals from a fitted estimate and its covariance.
pub trait ConfidenceIntervals: Sync {
    fn compute(&self, request: &IntervalRequest<'_>) -> ConfidenceIntervalTable;
}
