//! # Strata
//!
//! A dataflow plan builder for a semantic metrics layer.
//!
//! A [`MetricQuery`] names metrics, group-by elements, filters, and ordering.
//! The builder resolves those names against a [`SemanticManifest`], picks the
//! cheapest combination of source reads and joins that can satisfy them, and
//! produces a [`DataflowPlan`]: a DAG of typed relational operator nodes
//! ready for conversion to SQL.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │       MetricQuery (metrics, group-bys, filters)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [manifest lookup]
//! ┌─────────────────────────────────────────────────────────┐
//! │    SemanticManifestLookup (models, metrics, spines)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [plan builder]
//! ┌─────────────────────────────────────────────────────────┐
//! │           DataflowPlan (typed operator DAG)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [optimizer passes]
//! ┌─────────────────────────────────────────────────────────┐
//! │  Optimized DataflowPlan (predicate pushdown, source      │
//! │  scan merging)                                           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod builder;
pub mod dataflow;
pub mod manifest;
pub mod optimizer;
pub mod spec;
pub mod testing;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::builder::{
        BuildCaches, BuildError, DataflowPlanBuilder, OptimizationLevel,
    };
    pub use crate::dataflow::{DataflowNodeRef, DataflowPlan, NodeKind, SqlJoinType};
    pub use crate::manifest::{ManifestError, SemanticManifest, SemanticManifestLookup};
    pub use crate::optimizer::{
        DataflowPlanOptimizer, PredicatePushdownOptimizer, SourceScanOptimizer,
    };
    pub use crate::spec::{
        DimensionSpec, EntitySpec, ExpandedGranularity, LinkableSpec, MetricQuery, OrderBySpec,
        TimeDimensionSpec, TimeGranularity, TimeRangeConstraint, WhereFilterSpec, METRIC_TIME,
    };
}

// Also export the main entry points at crate root for convenience
pub use builder::{BuildError, DataflowPlanBuilder, OptimizationLevel};
pub use dataflow::DataflowPlan;
pub use manifest::{SemanticManifest, SemanticManifestLookup};
pub use spec::MetricQuery;
