use crate::estimate::error::EstimationError;
use crate::estimate::forward::ForwardModel;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-sample loss applied to `observed - predicted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossKind {
    /// `r^2`, normalized by the number of series.
    #[default]
    #[serde(rename = "base")]
    Squared,
    /// `w_t * r^2`, normalized by the sum of the applied weights.
    #[serde(rename = "weighted")]
    TimeWeighted,
    /// `2 * (sqrt(1 + r^2 / 2) - 1)`.
    #[serde(rename = "softl1")]
    SoftL1,
    /// `ln(1 + r^2 / 2)`.
    #[serde(rename = "cauchy")]
    Cauchy,
    /// `atan(r^2)`.
    #[serde(rename = "arctan")]
    Arctan,
}

impl LossKind {
    pub const ALL: [LossKind; 5] = [
        LossKind::Squared,
        LossKind::TimeWeighted,
        LossKind::SoftL1,
        LossKind::Cauchy,
        LossKind::Arctan,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LossKind::Squared => "base",
            LossKind::TimeWeighted => "weighted",
            LossKind::SoftL1 => "softl1",
            LossKind::Cauchy => "cauchy",
            LossKind::Arctan => "arctan",
        }
    }

    /// Contribution of one residual, before any time weight is applied.
    #[inline]
    pub fn contribution(self, residual: f64) -> f64 {
        let r2 = residual * residual;
        match self {
            LossKind::Squared | LossKind::TimeWeighted => r2,
            LossKind::SoftL1 => 2.0 * ((1.0 + 0.5 * r2).sqrt() - 1.0),
            LossKind::Cauchy => (0.5 * r2).ln_1p(),
            LossKind::Arctan => r2.atan(),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LossKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                EstimationError::InvalidConfig(format!(
                    "unknown loss kind '{}'; expected one of base, weighted, softl1, cauchy, arctan",
                    s
                ))
            })
    }
}

/// Scalar loss of `predicted` against `observed` (both series by time).
///
/// Rows are accumulated in parallel; each row yields a `(loss, applied_weight)` partial
/// sum and partials are combined by addition.
pub fn evaluate_loss(
    observed: ArrayView2<f64>,
    predicted: ArrayView2<f64>,
    kind: LossKind,
    time_weights: Option<ArrayView1<f64>>,
) -> Result<f64, EstimationError> {
    if observed.dim() != predicted.dim() {
        return Err(EstimationError::shape(
            "predicted matrix",
            observed.len(),
            predicted.len(),
        ));
    }
    let weights = match kind {
        LossKind::TimeWeighted => {
            let w = time_weights.ok_or(EstimationError::shape(
                "time weights",
                observed.ncols(),
                0,
            ))?;
            if w.len() != observed.ncols() {
                return Err(EstimationError::shape(
                    "time weights",
                    observed.ncols(),
                    w.len(),
                ));
            }
            Some(w)
        }
        _ => None,
    };

    let (total, applied_weight) = observed
        .axis_iter(Axis(0))
        .into_par_iter()
        .zip(predicted.axis_iter(Axis(0)).into_par_iter())
        .map(|(obs, pred)| {
            let mut loss = 0.0;
            let mut weight = 0.0;
            match weights {
                Some(w) => Zip::from(&obs).and(&pred).and(&w).for_each(|&o, &p, &wt| {
                    loss += wt * kind.contribution(o - p);
                    weight += wt;
                }),
                None => Zip::from(&obs).and(&pred).for_each(|&o, &p| {
                    loss += kind.contribution(o - p);
                }),
            }
            (loss, weight)
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    match kind {
        LossKind::TimeWeighted => {
            if applied_weight == 0.0 {
                return Err(EstimationError::DegenerateWeights);
            }
            Ok(total / applied_weight)
        }
        _ => Ok(total / observed.nrows().max(1) as f64),
    }
}

/// Forward model, observations and loss settings bound into one `params -> loss` map.
pub struct Objective<'a> {
    model: &'a ForwardModel,
    observed: ArrayView2<'a, f64>,
    kind: LossKind,
    time_weights: Option<Array1<f64>>,
}

impl<'a> Objective<'a> {
    pub fn new(
        model: &'a ForwardModel,
        observed: ArrayView2<'a, f64>,
        kind: LossKind,
        time_weights: Option<Array1<f64>>,
    ) -> Result<Self, EstimationError> {
        let expected = (model.n_sites(), model.n_time());
        if observed.dim() != expected {
            return Err(EstimationError::shape(
                "observed matrix",
                expected.0 * expected.1,
                observed.len(),
            ));
        }
        Ok(Self {
            model,
            observed,
            kind,
            time_weights,
        })
    }

    pub fn kind(&self) -> LossKind {
        self.kind
    }

    pub fn value(&self, params: ArrayView1<f64>) -> Result<f64, EstimationError> {
        let pred = self.model.predict(params)?;
        evaluate_loss(
            self.observed,
            pred.view(),
            self.kind,
            self.time_weights.as_ref().map(|w| w.view()),
        )
    }
}
