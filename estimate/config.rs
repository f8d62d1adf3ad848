use crate::estimate::error::EstimationError;
use crate::estimate::search::lambda_grid;
use crate::estimate::solver::SolverOptions;
use crate::estimate::types::ParameterScale;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

/// Base-10 log-spaced regularization strengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LambdaGrid {
    pub start_exponent: f64,
    pub stop_exponent: f64,
    pub count: usize,
    /// Explicit strengths; overrides the log-spaced grid when present.
    pub values: Option<Vec<f64>>,
}

impl Default for LambdaGrid {
    fn default() -> Self {
        Self {
            start_exponent: -2.0,
            stop_exponent: 0.0,
            count: 10,
            values: None,
        }
    }
}

impl LambdaGrid {
    pub fn lambdas(&self) -> Vec<f64> {
        match &self.values {
            Some(v) => v.clone(),
            None => lambda_grid(self.start_exponent, self.stop_exponent, self.count),
        }
    }
}

/// Run-wide settings for [`crate::estimate::pipeline::Estimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub lambda_grid: LambdaGrid,
    /// When false the final fit and bootstrap run without the ridge penalty; the search
    /// still selects the weighting scheme.
    pub use_regularization: bool,
    pub bootstraps: usize,
    /// Relative standard deviation of the multiplicative bootstrap noise.
    pub bootstrap_noise: f64,
    pub seed: u64,
    pub ci_alpha: f64,
    /// Search and bootstrap pool size; hardware concurrency when unset.
    pub workers: Option<usize>,
    pub parameter_scale: ParameterScale,
    pub solver: SolverOptions,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            lambda_grid: LambdaGrid::default(),
            use_regularization: true,
            bootstraps: 0,
            bootstrap_noise: 0.05,
            seed: 42,
            ci_alpha: 0.05,
            workers: None,
            parameter_scale: ParameterScale::Linear,
            solver: SolverOptions::default(),
        }
    }
}

impl EstimationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn validate(&self) -> Result<(), EstimationError> {
        let invalid = |msg: String| Err(EstimationError::InvalidConfig(msg));

        let lambdas = self.lambda_grid.lambdas();
        if lambdas.is_empty() {
            return invalid("the regularization grid is empty".into());
        }
        if let Some(l) = lambdas.iter().find(|l| !(l.is_finite() && **l > 0.0)) {
            return invalid(format!("regularization strength {} must be positive", l));
        }
        if !(self.bootstrap_noise.is_finite() && self.bootstrap_noise >= 0.0) {
            return invalid(format!(
                "bootstrap_noise {} must be finite and non-negative",
                self.bootstrap_noise
            ));
        }
        if !(self.ci_alpha > 0.0 && self.ci_alpha < 1.0) {
            return invalid(format!("ci_alpha {} must lie in (0, 1)", self.ci_alpha));
        }
        if self.workers == Some(0) {
            return invalid("workers must be at least 1".into());
        }
        if self.solver.max_evaluations == 0 {
            return invalid("solver.max_evaluations must be at least 1".into());
        }
        Ok(())
    }
}
