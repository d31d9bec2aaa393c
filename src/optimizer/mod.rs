//! Plan rewrites that run between construction and SQL conversion.
//!
//! Each optimizer maps a finished plan to an equivalent plan that reads or
//! computes less. Optimizers never mutate their input; a failed rewrite
//! leaves the caller holding the plan from the previous stage.

pub mod predicate_pushdown;
pub mod pushdown_state;
pub mod source_scan;

use thiserror::Error;

use crate::dataflow::DataflowPlan;
use crate::manifest::ManifestError;

pub use predicate_pushdown::PredicatePushdownOptimizer;
pub use pushdown_state::{PredicateInputType, PredicatePushdownState, PushdownBranchStateTracker};
pub use source_scan::SourceScanOptimizer;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("manifest configuration: {0}")]
    Manifest(#[from] ManifestError),
}

/// A rewrite from one plan to an equivalent, cheaper plan.
pub trait DataflowPlanOptimizer {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    fn optimize(&self, plan: &DataflowPlan) -> Result<DataflowPlan, OptimizeError>;
}
