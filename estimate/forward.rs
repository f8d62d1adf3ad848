//! # Forward Model
//!
//! Two-stage sparse contraction from a parameter vector to a predicted site-by-time
//! matrix:
//!
//! 1.  **Kinase activity.** `M[k, t] = sum over beta rows r of kinase k of
//!     beta[r] * K[r, t]`, where `K` is the activation matrix.
//! 2.  **Prediction.** `pred[i, t] = sum over alpha slots j of site i of
//!     alpha[j] * M[kinase(j), t]`.
//!
//! Rows of each stage are disjoint, so each stage is a parallel map over rows. Stage 2
//! reads all of `M`, which is complete once stage 1 returns.

use crate::estimate::error::EstimationError;
use crate::estimate::layout::ParameterLayout;
use crate::estimate::solver::{ModelFunction, SolverError};
use crate::estimate::sparse::ActivationMatrix;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct ForwardModel {
    layout: Arc<ParameterLayout>,
    activation: Arc<ActivationMatrix>,
    n_time: usize,
}

impl ForwardModel {
    /// The activation matrix must have one row per beta slot; its column count is the
    /// number of time points.
    pub fn new(
        layout: Arc<ParameterLayout>,
        activation: Arc<ActivationMatrix>,
    ) -> Result<Self, EstimationError> {
        if activation.nrows() != layout.total_beta() {
            return Err(EstimationError::shape(
                "activation matrix rows",
                layout.total_beta(),
                activation.nrows(),
            ));
        }
        let n_time = activation.ncols();
        Ok(Self {
            layout,
            activation,
            n_time,
        })
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn n_time(&self) -> usize {
        self.n_time
    }

    pub fn n_sites(&self) -> usize {
        self.layout.n_sites()
    }

    /// Stage 1: kinase-by-time activity matrix driven by the beta values.
    pub fn kinase_activity(
        &self,
        params: ArrayView1<f64>,
    ) -> Result<Array2<f64>, EstimationError> {
        self.layout.check_len(params)?;
        let beta = params.slice(s![self.layout.total_alpha()..]);
        let layout = &*self.layout;
        let activation = &*self.activation;

        let mut activity = Array2::zeros((layout.n_kinases(), self.n_time));
        activity
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(k, mut row)| {
                for r in layout.beta_rows(k) {
                    let beta_val = beta[r];
                    let (cols, values) = activation.row(r);
                    for (&col, &v) in cols.iter().zip(values) {
                        row[col] += beta_val * v;
                    }
                }
            });
        Ok(activity)
    }

    /// Stage 2: alpha-weighted combination of a precomputed activity matrix.
    pub fn predict_from_activity(
        &self,
        params: ArrayView1<f64>,
        activity: ArrayView2<f64>,
    ) -> Result<Array2<f64>, EstimationError> {
        self.layout.check_len(params)?;
        let expected = (self.layout.n_kinases(), self.n_time);
        if activity.dim() != expected {
            return Err(EstimationError::shape(
                "kinase activity matrix",
                expected.0 * expected.1,
                activity.len(),
            ));
        }
        let layout = &*self.layout;

        let mut pred = Array2::zeros((layout.n_sites(), self.n_time));
        pred.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for slot in layout.alpha_range(i) {
                    row.scaled_add(params[slot], &activity.row(layout.alpha_kinase(slot)));
                }
            });
        Ok(pred)
    }

    /// Predicted site-by-time matrix for `params`.
    pub fn predict(&self, params: ArrayView1<f64>) -> Result<Array2<f64>, EstimationError> {
        let activity = self.kinase_activity(params)?;
        self.predict_from_activity(params, activity.view())
    }
}

impl ModelFunction for ForwardModel {
    fn n_outputs(&self) -> usize {
        self.layout.n_sites() * self.n_time
    }

    fn evaluate(
        &self,
        time_points: ArrayView1<f64>,
        params: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        if time_points.len() != self.n_time {
            return Err(SolverError::Model(format!(
                "forward model has {} time points, caller supplied {}",
                self.n_time,
                time_points.len()
            )));
        }
        let pred = self
            .predict(params)
            .map_err(|e| SolverError::Model(e.to_string()))?;
        Ok(pred.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::layout::{GenePsiteKey, KinaseSites, SiteRegulation};
    use crate::estimate::sparse::Triplet;
    use ndarray::array;

    fn single_site_model() -> ForwardModel {
        let sites = vec![SiteRegulation {
            key: GenePsiteKey::new("G1", "S1"),
            kinases: vec!["K1".into()],
        }];
        let kinases = vec![KinaseSites {
            kinase: "K1".into(),
            psites: vec!["P1".into()],
        }];
        let layout = ParameterLayout::new(&sites, &kinases).unwrap();
        let dense = array![[1.0, 1.0, 1.0]];
        let activation = ActivationMatrix::from_dense(dense.view(), 0.0).unwrap();
        ForwardModel::new(Arc::new(layout), Arc::new(activation)).unwrap()
    }

    fn two_site_model() -> ForwardModel {
        let sites = vec![
            SiteRegulation {
                key: GenePsiteKey::new("G1", "S1"),
                kinases: vec!["K1".into(), "K2".into()],
            },
            SiteRegulation {
                key: GenePsiteKey::new("G2", "T4"),
                kinases: vec!["K2".into()],
            },
        ];
        let kinases = vec![
            KinaseSites {
                kinase: "K1".into(),
                psites: vec!["P1".into(), "P2".into()],
            },
            KinaseSites {
                kinase: "K2".into(),
                psites: vec!["P3".into()],
            },
        ];
        let layout = ParameterLayout::new(&sites, &kinases).unwrap();
        let triplets = [
            Triplet {
                row: 0,
                col: 0,
                value: 1.0,
            },
            Triplet {
                row: 0,
                col: 2,
                value: 0.5,
            },
            Triplet {
                row: 1,
                col: 1,
                value: 2.0,
            },
            Triplet {
                row: 2,
                col: 0,
                value: 0.25,
            },
            Triplet {
                row: 2,
                col: 1,
                value: 0.75,
            },
            Triplet {
                row: 2,
                col: 2,
                value: 1.25,
            },
        ];
        let activation = ActivationMatrix::from_triplets(3, 3, &triplets).unwrap();
        ForwardModel::new(Arc::new(layout), Arc::new(activation)).unwrap()
    }

    #[test]
    fn constant_kinase_gives_constant_prediction() {
        let model = single_site_model();
        let pred = model.predict(array![1.0, 1.0].view()).unwrap();
        assert_eq!(pred, array![[1.0, 1.0, 1.0]]);
    }

    #[test]
    fn hand_computed_two_site_prediction() {
        let model = two_site_model();
        // alpha = [2, 1, 3], beta = [1, 1, 2]
        let params = array![2.0, 1.0, 3.0, 1.0, 1.0, 2.0];
        let activity = model.kinase_activity(params.view()).unwrap();
        assert_eq!(activity, array![[1.0, 2.0, 0.5], [0.5, 1.5, 2.5]]);
        let pred = model.predict(params.view()).unwrap();
        assert_eq!(pred, array![[2.5, 5.5, 3.5], [1.5, 4.5, 7.5]]);
    }

    #[test]
    fn prediction_is_linear_in_alpha_for_fixed_beta() {
        let model = two_site_model();
        let beta = array![0.3, -1.2, 0.8];
        let a1 = array![0.5, -2.0, 1.5];
        let a2 = array![1.25, 0.75, -0.5];
        let (c1, c2) = (1.7, -0.6);

        let layout = model.layout();
        let p1 = layout.assemble(a1.view(), beta.view()).unwrap();
        let p2 = layout.assemble(a2.view(), beta.view()).unwrap();
        let combined = &a1 * c1 + &a2 * c2;
        let pc = layout.assemble(combined.view(), beta.view()).unwrap();

        let lhs = model.predict(pc.as_view()).unwrap();
        let rhs = model.predict(p1.as_view()).unwrap() * c1
            + model.predict(p2.as_view()).unwrap() * c2;
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            assert!((l - r).abs() < 1e-12);
        }
    }

    #[test]
    fn prediction_is_linear_in_beta_for_fixed_alpha() {
        let model = two_site_model();
        let alpha = array![0.9, -0.4, 2.2];
        let b1 = array![1.0, 0.0, -3.0];
        let b2 = array![-0.5, 2.5, 0.25];
        let (c1, c2) = (-1.1, 2.3);

        let layout = model.layout();
        let p1 = layout.assemble(alpha.view(), b1.view()).unwrap();
        let p2 = layout.assemble(alpha.view(), b2.view()).unwrap();
        let combined = &b1 * c1 + &b2 * c2;
        let pc = layout.assemble(alpha.view(), combined.view()).unwrap();

        let lhs = model.predict(pc.as_view()).unwrap();
        let rhs = model.predict(p1.as_view()).unwrap() * c1
            + model.predict(p2.as_view()).unwrap() * c2;
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            assert!((l - r).abs() < 1e-12);
        }
    }

    #[test]
    fn wrong_vector_length_is_a_shape_mismatch() {
        let model = two_site_model();
        let err = model.predict(array![1.0, 2.0].view()).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::ShapeMismatch {
                expected: 6,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn activation_rows_must_match_beta_slots() {
        let model = single_site_model();
        let bad = ActivationMatrix::from_dense(array![[1.0], [1.0]].view(), 0.0).unwrap();
        let err = ForwardModel::new(Arc::new(model.layout().clone()), Arc::new(bad)).unwrap_err();
        assert!(matches!(err, EstimationError::ShapeMismatch { .. }));
    }

    #[test]
    fn model_function_output_is_row_major() {
        let model = two_site_model();
        let params = array![2.0, 1.0, 3.0, 1.0, 1.0, 2.0];
        let out = model
            .evaluate(array![0.0, 1.0, 2.0].view(), params.view())
            .unwrap();
        assert_eq!(out, array![2.5, 5.5, 3.5, 1.5, 4.5, 7.5]);
        assert_eq!(model.n_outputs(), 6);
    }
}
