use crate::estimate::error::EstimationError;
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use serde::Serialize;

/// Residual-based error metrics for a fitted series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percentage error, in percent. A zero observation contributes an
    /// infinite (or NaN, if its residual is also zero) term.
    pub mape: f64,
    /// `1 - SS_res / SS_tot`; NaN when the observed series is constant.
    pub r_squared: f64,
}

impl FitMetrics {
    /// Metrics of `predicted` against `observed`, sample by sample.
    pub fn compute(
        observed: ArrayView1<f64>,
        predicted: ArrayView1<f64>,
    ) -> Result<Self, EstimationError> {
        if observed.len() != predicted.len() {
            return Err(EstimationError::shape(
                "predicted series",
                observed.len(),
                predicted.len(),
            ));
        }
        if observed.is_empty() {
            return Err(EstimationError::shape("observed series", 1, 0));
        }
        let n = observed.len() as f64;

        let mut ss_res = 0.0;
        let mut abs_sum = 0.0;
        let mut pct_sum = 0.0;
        Zip::from(&observed).and(&predicted).for_each(|&o, &p| {
            let r = o - p;
            ss_res += r * r;
            abs_sum += r.abs();
            pct_sum += (r / o).abs();
        });

        let mean = observed.sum() / n;
        let ss_tot: f64 = observed.iter().map(|&o| (o - mean) * (o - mean)).sum();
        let r_squared = if ss_tot == 0.0 {
            f64::NAN
        } else {
            1.0 - ss_res / ss_tot
        };

        let mse = ss_res / n;
        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            mae: abs_sum / n,
            mape: pct_sum / n * 100.0,
            r_squared,
        })
    }

    /// Metrics over two equally shaped matrices, flattened row-major.
    pub fn from_matrices(
        observed: ArrayView2<f64>,
        predicted: ArrayView2<f64>,
    ) -> Result<Self, EstimationError> {
        if observed.dim() != predicted.dim() {
            return Err(EstimationError::shape(
                "predicted matrix",
                observed.len(),
                predicted.len(),
            ));
        }
        let obs: Array1<f64> = observed.iter().copied().collect();
        let pred: Array1<f64> = predicted.iter().copied().collect();
        Self::compute(obs.view(), pred.view())
    }

    pub fn log_summary(&self, label: &str) {
        log::info!("[{}] --- Error Metrics ---", label);
        log::info!("[{}] Mean Squared Error (MSE): {:.4}", label, self.mse);
        log::info!("[{}] Root Mean Squared Error (RMSE): {:.4}", label, self.rmse);
        log::info!("[{}] Mean Absolute Error (MAE): {:.4}", label, self.mae);
        log::info!(
            "[{}] Mean Absolute Percentage Error (MAPE): {:.2}%",
            label,
            self.mape
        );
        log::info!("[{}] R-squared (R^2): {:.4}", label, self.r_squared);
    }
}
