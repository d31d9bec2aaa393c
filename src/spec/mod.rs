//! Query-facing spec records.
//!
//! Specs identify the columns a query works with: linkable elements
//! (dimensions, entities, time dimensions addressed through entity-link
//! paths), measures, metrics, and filters. They are plain structural values
//! with `Eq`/`Hash`, which is what lets the plan builder memoize on them and
//! the optimizers compare plan nodes for functional identity.

pub mod filter;
pub mod instance;
pub mod linkable;
pub mod metric;
pub mod query;
pub mod time;

pub use filter::{FilterParseError, WhereFilterSpec};
pub use instance::{InstanceSpec, InstanceSpecSet, OrderBySpec};
pub use linkable::{
    DimensionSpec, EntitySpec, LinkableSpec, LinkableSpecSet, TimeDimensionSpec,
};
pub use metric::{MeasureSpec, MetricInputSpec, MetricSpec};
pub use query::MetricQuery;
pub use time::{
    DatePart, ExpandedGranularity, MetricTimeWindow, TimeGranularity, TimeRangeConstraint,
};

/// Separator between entity links and element names in qualified names.
pub const DUNDER: &str = "__";

/// Element name of the canonical query-time dimension. Every measure's
/// aggregation time dimension is re-labeled to this name so metrics from
/// different models line up on a shared time axis.
pub const METRIC_TIME: &str = "metric_time";
