#![deny(dead_code)]
#![deny(unused_imports)]

pub mod bootstrap;
pub mod confidence;
pub mod config;
pub mod error;
pub mod fitter;
pub mod forward;
pub mod layout;
pub mod loss;
pub mod metrics;
pub mod observer;
pub mod pipeline;
pub mod problem;
pub mod search;
pub mod solver;
pub mod sparse;
pub mod types;
pub mod weights;

pub use error::EstimationError;
pub use fitter::FitResult;
pub use pipeline::{GeneEstimate, GeneOutcome};
