//! # Parameter Layout
//!
//! Maps the flat parameter vector onto its semantic slots. The vector is laid out as
//!
//! ```text
//! [ alpha(site 0) | alpha(site 1) | ... | beta(kinase 0) | beta(kinase 1) | ... ]
//! ```
//!
//! where each site's alpha block holds one coupling weight per regulating kinase (in the
//! order the kinases were listed for that site), and each kinase's beta block holds one
//! weight per regulated phosphosite. Beta slot `r` (counted from the start of the beta
//! region) is also row `r` of the activation matrix.

use crate::estimate::error::EstimationError;
use crate::estimate::types::ParameterVector;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;

/// One measured site: a gene (or TF) and one of its phosphosites.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenePsiteKey {
    pub gene: String,
    pub psite: String,
}

impl GenePsiteKey {
    pub fn new(gene: impl Into<String>, psite: impl Into<String>) -> Self {
        Self {
            gene: gene.into(),
            psite: psite.into(),
        }
    }
}

impl fmt::Display for GenePsiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.gene, self.psite)
    }
}

/// A site together with the ordered list of kinases regulating it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteRegulation {
    #[serde(flatten)]
    pub key: GenePsiteKey,
    pub kinases: Vec<String>,
}

/// A kinase together with the ordered list of phosphosites it acts through.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KinaseSites {
    pub kinase: String,
    pub psites: Vec<String>,
}

/// Fitted coupling weight of one kinase on one site.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlphaValue {
    pub key: GenePsiteKey,
    pub kinase: String,
    pub value: f64,
}

/// Fitted regulatory weight of one kinase at one phosphosite.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BetaValue {
    pub kinase: String,
    pub psite: String,
    pub value: f64,
}

/// Named view of a parameter vector, in layout order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractedParameters {
    pub alpha: Vec<AlphaValue>,
    pub beta: Vec<BetaValue>,
}

impl ExtractedParameters {
    pub fn alpha_values(&self) -> Array1<f64> {
        self.alpha.iter().map(|a| a.value).collect()
    }

    pub fn beta_values(&self) -> Array1<f64> {
        self.beta.iter().map(|b| b.value).collect()
    }

    pub fn log_values(&self) {
        log::info!("Optimized alpha values:");
        for a in &self.alpha {
            log::info!("  {} <- {}: {:.6}", a.key, a.kinase, a.value);
        }
        log::info!("Optimized beta values:");
        for b in &self.beta {
            log::info!("  {} @ {}: {:.6}", b.kinase, b.psite, b.value);
        }
    }
}

/// Immutable slot map built once per problem instance.
#[derive(Clone, Debug)]
pub struct ParameterLayout {
    site_keys: Vec<GenePsiteKey>,
    site_alpha_starts: Vec<usize>,
    site_kinase_counts: Vec<usize>,
    /// Kinase row referenced by each alpha slot.
    alpha_kinase_idx: Vec<usize>,
    kinase_names: Vec<String>,
    kinase_beta_starts: Vec<usize>,
    kinase_beta_counts: Vec<usize>,
    beta_psites: Vec<String>,
    total_alpha: usize,
    total_beta: usize,
}

impl ParameterLayout {
    /// Builds the layout. Site order and kinase order are taken as given and define
    /// slot order; every kinase named by a site must have a kinase record.
    pub fn new(
        sites: &[SiteRegulation],
        kinases: &[KinaseSites],
    ) -> Result<Self, EstimationError> {
        let mut kinase_index: HashMap<&str, usize> = HashMap::with_capacity(kinases.len());
        let mut kinase_names = Vec::with_capacity(kinases.len());
        let mut kinase_beta_starts = Vec::with_capacity(kinases.len());
        let mut kinase_beta_counts = Vec::with_capacity(kinases.len());
        let mut beta_psites = Vec::new();

        for (k, record) in kinases.iter().enumerate() {
            if kinase_index.insert(record.kinase.as_str(), k).is_some() {
                return Err(EstimationError::Layout(format!(
                    "kinase '{}' is listed more than once",
                    record.kinase
                )));
            }
            let mut seen = HashSet::with_capacity(record.psites.len());
            for psite in &record.psites {
                if !seen.insert(psite.as_str()) {
                    return Err(EstimationError::Layout(format!(
                        "kinase '{}' lists psite '{}' more than once",
                        record.kinase, psite
                    )));
                }
            }
            kinase_names.push(record.kinase.clone());
            kinase_beta_starts.push(beta_psites.len());
            kinase_beta_counts.push(record.psites.len());
            beta_psites.extend(record.psites.iter().cloned());
        }

        let mut seen_keys = HashSet::with_capacity(sites.len());
        let mut site_keys = Vec::with_capacity(sites.len());
        let mut site_alpha_starts = Vec::with_capacity(sites.len());
        let mut site_kinase_counts = Vec::with_capacity(sites.len());
        let mut alpha_kinase_idx = Vec::new();

        for site in sites {
            if !seen_keys.insert(&site.key) {
                return Err(EstimationError::Layout(format!(
                    "site '{}' is listed more than once",
                    site.key
                )));
            }
            site_alpha_starts.push(alpha_kinase_idx.len());
            site_kinase_counts.push(site.kinases.len());
            for kinase in &site.kinases {
                let k = kinase_index.get(kinase.as_str()).copied().ok_or_else(|| {
                    EstimationError::Layout(format!(
                        "site '{}' is regulated by unknown kinase '{}'",
                        site.key, kinase
                    ))
                })?;
                alpha_kinase_idx.push(k);
            }
            site_keys.push(site.key.clone());
        }

        Ok(Self {
            total_alpha: alpha_kinase_idx.len(),
            total_beta: beta_psites.len(),
            site_keys,
            site_alpha_starts,
            site_kinase_counts,
            alpha_kinase_idx,
            kinase_names,
            kinase_beta_starts,
            kinase_beta_counts,
            beta_psites,
        })
    }

    pub fn n_sites(&self) -> usize {
        self.site_keys.len()
    }

    pub fn n_kinases(&self) -> usize {
        self.kinase_names.len()
    }

    pub fn total_alpha(&self) -> usize {
        self.total_alpha
    }

    pub fn total_beta(&self) -> usize {
        self.total_beta
    }

    /// Required parameter vector length.
    pub fn n_params(&self) -> usize {
        self.total_alpha + self.total_beta
    }

    pub fn site_keys(&self) -> &[GenePsiteKey] {
        &self.site_keys
    }

    pub fn kinase_names(&self) -> &[String] {
        &self.kinase_names
    }

    /// Absolute slot range of a site's alpha block.
    pub fn alpha_range(&self, site: usize) -> Range<usize> {
        let start = self.site_alpha_starts[site];
        start..start + self.site_kinase_counts[site]
    }

    /// Beta slot range of a kinase, relative to the start of the beta region.
    /// These are also the kinase's rows in the activation matrix.
    pub fn beta_rows(&self, kinase: usize) -> Range<usize> {
        let start = self.kinase_beta_starts[kinase];
        start..start + self.kinase_beta_counts[kinase]
    }

    /// Kinase row referenced by absolute alpha slot `slot`.
    pub fn alpha_kinase(&self, slot: usize) -> usize {
        self.alpha_kinase_idx[slot]
    }

    pub fn check_len(&self, params: ArrayView1<f64>) -> Result<(), EstimationError> {
        if params.len() != self.n_params() {
            return Err(EstimationError::shape(
                "parameter vector",
                self.n_params(),
                params.len(),
            ));
        }
        Ok(())
    }

    /// Builds a parameter vector from separately supplied alpha and beta values.
    pub fn assemble(
        &self,
        alpha: ArrayView1<f64>,
        beta: ArrayView1<f64>,
    ) -> Result<ParameterVector, EstimationError> {
        if alpha.len() != self.total_alpha {
            return Err(EstimationError::shape(
                "alpha values",
                self.total_alpha,
                alpha.len(),
            ));
        }
        if beta.len() != self.total_beta {
            return Err(EstimationError::shape(
                "beta values",
                self.total_beta,
                beta.len(),
            ));
        }
        let values: Array1<f64> = alpha.iter().chain(beta.iter()).copied().collect();
        Ok(ParameterVector::new(values))
    }

    /// Names every slot of `params` by site, kinase and psite.
    pub fn extract(
        &self,
        params: ArrayView1<f64>,
    ) -> Result<ExtractedParameters, EstimationError> {
        self.check_len(params)?;

        let mut alpha = Vec::with_capacity(self.total_alpha);
        for (site, key) in self.site_keys.iter().enumerate() {
            for slot in self.alpha_range(site) {
                alpha.push(AlphaValue {
                    key: key.clone(),
                    kinase: self.kinase_names[self.alpha_kinase_idx[slot]].clone(),
                    value: params[slot],
                });
            }
        }

        let mut beta = Vec::with_capacity(self.total_beta);
        for (k, kinase) in self.kinase_names.iter().enumerate() {
            for row in self.beta_rows(k) {
                beta.push(BetaValue {
                    kinase: kinase.clone(),
                    psite: self.beta_psites[row].clone(),
                    value: params[self.total_alpha + row],
                });
            }
        }

        Ok(ExtractedParameters { alpha, beta })
    }

    /// One name per slot, in vector order.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_params());
        for (site, key) in self.site_keys.iter().enumerate() {
            for slot in self.alpha_range(site) {
                names.push(format!(
                    "alpha[{},{}]",
                    key,
                    self.kinase_names[self.alpha_kinase_idx[slot]]
                ));
            }
        }
        for (k, kinase) in self.kinase_names.iter().enumerate() {
            for row in self.beta_rows(k) {
                names.push(format!("beta[{},{}]", kinase, self.beta_psites[row]));
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_layout() -> ParameterLayout {
        let sites = vec![
            SiteRegulation {
                key: GenePsiteKey::new("TP53", "S15"),
                kinases: vec!["ATM".into(), "CHEK2".into()],
            },
            SiteRegulation {
                key: GenePsiteKey::new("MDM2", "S166"),
                kinases: vec!["AKT1".into()],
            },
        ];
        let kinases = vec![
            KinaseSites {
                kinase: "ATM".into(),
                psites: vec!["S1981".into()],
            },
            KinaseSites {
                kinase: "CHEK2".into(),
                psites: vec!["T68".into(), "S516".into()],
            },
            KinaseSites {
                kinase: "AKT1".into(),
                psites: vec!["S473".into()],
            },
        ];
        ParameterLayout::new(&sites, &kinases).unwrap()
    }

    #[test]
    fn totals_match_vector_length() {
        let layout = sample_layout();
        assert_eq!(layout.total_alpha(), 3);
        assert_eq!(layout.total_beta(), 4);
        assert_eq!(layout.n_params(), 7);
        assert_eq!(layout.parameter_names().len(), layout.n_params());
        assert_eq!(layout.alpha_range(1), 2..3);
        assert_eq!(layout.beta_rows(1), 1..3);
        assert_eq!(layout.alpha_kinase(2), 2);
    }

    #[test]
    fn assemble_then_extract_reproduces_values() {
        let layout = sample_layout();
        let alpha = array![0.1, 0.2, 0.3];
        let beta = array![1.5, -2.5, 3.5, 4.5];
        let params = layout.assemble(alpha.view(), beta.view()).unwrap();
        let extracted = layout.extract(params.as_view()).unwrap();

        assert_eq!(extracted.alpha_values(), alpha);
        assert_eq!(extracted.beta_values(), beta);
        assert_eq!(extracted.alpha[1].kinase, "CHEK2");
        assert_eq!(extracted.alpha[2].key, GenePsiteKey::new("MDM2", "S166"));
        assert_eq!(extracted.beta[2].psite, "S516");
    }

    #[test]
    fn names_follow_slot_order() {
        let names = sample_layout().parameter_names();
        assert_eq!(names[0], "alpha[TP53_S15,ATM]");
        assert_eq!(names[2], "alpha[MDM2_S166,AKT1]");
        assert_eq!(names[3], "beta[ATM,S1981]");
        assert_eq!(names[6], "beta[AKT1,S473]");
    }

    #[test]
    fn unknown_kinase_is_rejected() {
        let sites = vec![SiteRegulation {
            key: GenePsiteKey::new("G", "S1"),
            kinases: vec!["MISSING".into()],
        }];
        let err = ParameterLayout::new(&sites, &[]).unwrap_err();
        assert!(matches!(err, EstimationError::Layout(_)));
    }

    #[test]
    fn duplicate_site_is_rejected() {
        let site = SiteRegulation {
            key: GenePsiteKey::new("G", "S1"),
            kinases: vec![],
        };
        let err = ParameterLayout::new(&[site.clone(), site], &[]).unwrap_err();
        assert!(matches!(err, EstimationError::Layout(_)));
    }

    #[test]
    fn extract_rejects_wrong_length() {
        let layout = sample_layout();
        let err = layout.extract(array![1.0, 2.0].view()).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::ShapeMismatch {
                expected: 7,
                found: 2,
                ..
            }
        ));
    }
}
