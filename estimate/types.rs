use crate::estimate::error::EstimationError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Smallest value a lower bound is clamped to before taking its logarithm.
pub const LOG_BOUND_FLOOR: f64 = 1e-8;

/// Flat parameter vector: alpha slots first, then beta slots.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterVector(pub Array1<f64>);

impl ParameterVector {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for ParameterVector {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Box constraints for a fit, one `(lower, upper)` pair per parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl Bounds {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self, EstimationError> {
        if lower.len() != upper.len() {
            return Err(EstimationError::shape(
                "upper bounds",
                lower.len(),
                upper.len(),
            ));
        }
        if let Some(idx) = lower
            .iter()
            .zip(upper.iter())
            .position(|(&lo, &hi)| !(lo <= hi))
        {
            return Err(EstimationError::InvalidConfig(format!(
                "bound {} has lower {} above upper {}",
                idx, lower[idx], upper[idx]
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Same `(lower, upper)` pair repeated for every parameter.
    pub fn uniform(len: usize, lower: f64, upper: f64) -> Result<Self, EstimationError> {
        Self::new(Array1::from_elem(len, lower), Array1::from_elem(len, upper))
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn clamp(&self, params: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(params.len(), |i| {
            params[i].clamp(self.lower[i], self.upper[i])
        })
    }
}

/// Space in which the solver moves the parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterScale {
    /// The solver sees the natural parameters.
    #[default]
    Linear,
    /// The solver sees `ln(theta)`; models receive `exp` of the solver's vector.
    Log,
}

impl ParameterScale {
    /// Maps solver-space parameters to the natural scale the model consumes.
    pub fn to_natural(self, params: ArrayView1<f64>) -> Array1<f64> {
        match self {
            ParameterScale::Linear => params.to_owned(),
            ParameterScale::Log => params.mapv(f64::exp),
        }
    }

    /// Maps natural-scale bounds into solver space.
    pub fn solver_bounds(self, natural: &Bounds) -> Bounds {
        match self {
            ParameterScale::Linear => natural.clone(),
            ParameterScale::Log => Bounds {
                lower: natural.lower.mapv(|b| b.max(LOG_BOUND_FLOOR).ln()),
                upper: natural.upper.mapv(|b| b.max(LOG_BOUND_FLOOR).ln()),
            },
        }
    }
}
