use crate::estimate::error::EstimationError;
use ndarray::{Array1, ArrayView1};
use std::collections::BTreeMap;

/// Named per-sample sigma vectors, iterated in key order.
///
/// Each sigma has one entry per target sample. Padding for regularization
/// pseudo-residuals is added by the fitting stages, never stored here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightingSchemes {
    schemes: BTreeMap<String, Array1<f64>>,
}

impl WeightingSchemes {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single scheme named `uniform` with unit sigma everywhere.
    pub fn uniform(len: usize) -> Self {
        let mut schemes = Self::new();
        schemes
            .schemes
            .insert("uniform".to_string(), Array1::ones(len));
        schemes
    }

    /// Adds or replaces a scheme. Sigma entries must be finite and strictly positive.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        sigma: Array1<f64>,
    ) -> Result<(), EstimationError> {
        let key = key.into();
        if let Some(v) = sigma.iter().find(|&&v| !(v.is_finite() && v > 0.0)) {
            return Err(EstimationError::InvalidConfig(format!(
                "weighting scheme '{}' contains non-positive sigma {}",
                key, v
            )));
        }
        self.schemes.insert(key, sigma);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<ArrayView1<'_, f64>> {
        self.schemes.get(key).map(|s| s.view())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ArrayView1<'_, f64>)> {
        self.schemes.iter().map(|(k, v)| (k.as_str(), v.view()))
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// Checks that every sigma matches the target length.
    pub fn validate(&self, target_len: usize) -> Result<(), EstimationError> {
        if self.schemes.is_empty() {
            return Err(EstimationError::InvalidConfig(
                "at least one weighting scheme is required".to_string(),
            ));
        }
        for sigma in self.schemes.values() {
            if sigma.len() != target_len {
                return Err(EstimationError::shape("sigma", target_len, sigma.len()));
            }
        }
        Ok(())
    }
}

/// Supplies the candidate weighting schemes for one gene's fit.
pub trait WeightingSchemeSupplier: Sync {
    fn schemes(
        &self,
        target: ArrayView1<f64>,
        time_points: ArrayView1<f64>,
        site_count: usize,
    ) -> Result<WeightingSchemes, EstimationError>;
}

/// Always returns the same precomputed schemes.
impl WeightingSchemeSupplier for WeightingSchemes {
    fn schemes(
        &self,
        target: ArrayView1<f64>,
        _: ArrayView1<f64>,
        _: usize,
    ) -> Result<WeightingSchemes, EstimationError> {
        self.validate(target.len())?;
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn iteration_is_in_key_order() {
        let mut schemes = WeightingSchemes::new();
        schemes.insert("z_last", array![1.0]).unwrap();
        schemes.insert("a_first", array![2.0]).unwrap();
        let keys: Vec<&str> = schemes.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a_first", "z_last"]);
    }

    #[test]
    fn non_positive_sigma_is_rejected() {
        let mut schemes = WeightingSchemes::new();
        assert!(schemes.insert("bad", array![1.0, 0.0]).is_err());
        assert!(schemes.insert("nan", array![f64::NAN]).is_err());
        assert!(schemes.is_empty());
    }

    #[test]
    fn validate_checks_lengths() {
        let schemes = WeightingSchemes::uniform(3);
        assert!(schemes.validate(3).is_ok());
        assert!(matches!(
            schemes.validate(4),
            Err(EstimationError::ShapeMismatch { .. })
        ));
        assert!(WeightingSchemes::new().validate(1).is_err());
    }
}
