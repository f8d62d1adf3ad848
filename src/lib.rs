#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

// The estimation engine lives in its own top-level tree.
#[path = "../estimate/mod.rs"]
pub mod estimate;

pub use estimate::{EstimationError, FitResult, GeneEstimate, GeneOutcome};
