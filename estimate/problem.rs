//! Declarative kinase-network problems loaded from TOML.
//!
//! A problem file names the measured sites, the kinases and the phosphosites they act
//! through, the activation matrix (as triplets or dense rows), and the observed series.
//!
//! ```toml
//! loss = "base"
//! observed = [[1.0, 2.0, 3.0]]
//!
//! [activation]
//! n_time = 3
//! triplets = [{ row = 0, col = 0, value = 1.0 }]
//!
//! [[sites]]
//! gene = "G1"
//! psite = "S1"
//! kinases = ["K1"]
//!
//! [[kinases]]
//! kinase = "K1"
//! psites = ["P1"]
//! ```

use crate::estimate::config::ConfigError;
use crate::estimate::error::EstimationError;
use crate::estimate::forward::ForwardModel;
use crate::estimate::layout::{KinaseSites, ParameterLayout, SiteRegulation};
use crate::estimate::loss::{LossKind, Objective};
use crate::estimate::sparse::{ActivationMatrix, Triplet};
use crate::estimate::types::{Bounds, ParameterVector};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationSpec {
    pub n_time: usize,
    #[serde(default)]
    pub triplets: Vec<Triplet>,
    /// Dense rows, one per beta slot; takes precedence over `triplets`.
    #[serde(default)]
    pub dense: Option<Vec<Vec<f64>>>,
}

/// Box bounds applied to every alpha and every beta parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsSpec {
    pub alpha: (f64, f64),
    pub beta: (f64, f64),
}

impl Default for BoundsSpec {
    fn default() -> Self {
        Self {
            alpha: (0.0, 1.0),
            beta: (-4.0, 4.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProblem {
    #[serde(default)]
    pub loss: LossKind,
    /// Sites by time, in the order of `sites`.
    pub observed: Vec<Vec<f64>>,
    #[serde(default)]
    pub time_points: Option<Vec<f64>>,
    #[serde(default)]
    pub time_weights: Option<Vec<f64>>,
    /// A parameter vector to evaluate, in layout order.
    #[serde(default)]
    pub params: Option<Vec<f64>>,
    pub activation: ActivationSpec,
    #[serde(default)]
    pub bounds: BoundsSpec,
    pub sites: Vec<SiteRegulation>,
    pub kinases: Vec<KinaseSites>,
}

/// A validated problem, ready to predict and score.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    pub forward: ForwardModel,
    pub observed: Array2<f64>,
    pub time_points: Array1<f64>,
    pub time_weights: Option<Array1<f64>>,
    pub loss: LossKind,
    pub params: Option<ParameterVector>,
    pub bounds: Bounds,
}

fn rows_to_array(
    what: &'static str,
    rows: &[Vec<f64>],
    ncols: usize,
) -> Result<Array2<f64>, EstimationError> {
    let mut out = Array2::<f64>::zeros((rows.len(), ncols));
    for (i, row) in rows.iter().enumerate() {
        if row.len() != ncols {
            return Err(EstimationError::shape(what, ncols, row.len()));
        }
        out.row_mut(i).assign(&Array1::from(row.clone()));
    }
    Ok(out)
}

impl NetworkProblem {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn layout(&self) -> Result<ParameterLayout, EstimationError> {
        ParameterLayout::new(&self.sites, &self.kinases)
    }

    pub fn build(&self) -> Result<NetworkModel, EstimationError> {
        let layout = Arc::new(self.layout()?);
        let n_time = self.activation.n_time;

        let activation = match &self.activation.dense {
            Some(rows) => {
                let dense = rows_to_array("activation row", rows, n_time)?;
                ActivationMatrix::from_dense(dense.view(), 0.0)?
            }
            None => ActivationMatrix::from_triplets(
                layout.total_beta(),
                n_time,
                &self.activation.triplets,
            )?,
        };
        let forward = ForwardModel::new(Arc::clone(&layout), Arc::new(activation))?;

        if self.observed.len() != layout.n_sites() {
            return Err(EstimationError::shape(
                "observed rows",
                layout.n_sites(),
                self.observed.len(),
            ));
        }
        let observed = rows_to_array("observed row", &self.observed, n_time)?;

        let time_points = match &self.time_points {
            Some(tp) if tp.len() != n_time => {
                return Err(EstimationError::shape("time points", n_time, tp.len()));
            }
            Some(tp) => Array1::from(tp.clone()),
            None => Array1::from_iter((0..n_time).map(|t| t as f64)),
        };

        let time_weights = match &self.time_weights {
            Some(w) if w.len() != n_time => {
                return Err(EstimationError::shape("time weights", n_time, w.len()));
            }
            Some(w) => Some(Array1::from(w.clone())),
            None => None,
        };

        let params = match &self.params {
            Some(p) => {
                let p = Array1::from(p.clone());
                layout.check_len(p.view())?;
                Some(ParameterVector::new(p))
            }
            None => None,
        };

        let (a_lo, a_hi) = self.bounds.alpha;
        let (b_lo, b_hi) = self.bounds.beta;
        let lower = Array1::from_iter(
            std::iter::repeat_n(a_lo, layout.total_alpha())
                .chain(std::iter::repeat_n(b_lo, layout.total_beta())),
        );
        let upper = Array1::from_iter(
            std::iter::repeat_n(a_hi, layout.total_alpha())
                .chain(std::iter::repeat_n(b_hi, layout.total_beta())),
        );
        let bounds = Bounds::new(lower, upper)?;

        Ok(NetworkModel {
            forward,
            observed,
            time_points,
            time_weights,
            loss: self.loss,
            params,
            bounds,
        })
    }
}

impl NetworkModel {
    pub fn layout(&self) -> &ParameterLayout {
        self.forward.layout()
    }

    /// Observed series flattened row-major, matching the forward model's output order.
    pub fn target(&self) -> Array1<f64> {
        self.observed.iter().copied().collect()
    }

    pub fn objective(&self, kind: LossKind) -> Result<Objective<'_>, EstimationError> {
        Objective::new(
            &self.forward,
            self.observed.view(),
            kind,
            self.time_weights.clone(),
        )
    }
}
