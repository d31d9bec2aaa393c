//! The metric query - what the caller asks the plan builder to compute.

use super::filter::{FilterParseError, WhereFilterSpec};
use super::instance::OrderBySpec;
use super::linkable::{LinkableSpec, LinkableSpecSet};
use super::metric::MetricSpec;
use super::time::TimeRangeConstraint;

/// A resolved semantic query: metrics, group-by elements, filters, and
/// output shaping. Instances are built by the query-resolution layer or, in
/// tests, through the builder-style helpers.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub metric_specs: Vec<MetricSpec>,
    pub group_by_specs: Vec<LinkableSpec>,
    pub where_filter_specs: Vec<WhereFilterSpec>,
    pub time_range_constraint: Option<TimeRangeConstraint>,
    pub order_by_specs: Vec<OrderBySpec>,
    pub limit: Option<u64>,
}

impl MetricQuery {
    pub fn for_metrics<S: Into<String>>(metric_names: impl IntoIterator<Item = S>) -> Self {
        Self {
            metric_specs: metric_names
                .into_iter()
                .map(|name| MetricSpec::from_name(name))
                .collect(),
            ..Self::default()
        }
    }

    /// A query over group-by elements only, for distinct-values plans.
    pub fn for_group_by(group_by_specs: impl IntoIterator<Item = LinkableSpec>) -> Self {
        Self {
            group_by_specs: group_by_specs.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn group_by(mut self, spec: impl Into<LinkableSpec>) -> Self {
        self.group_by_specs.push(spec.into());
        self
    }

    pub fn with_filter(mut self, filter: WhereFilterSpec) -> Self {
        self.where_filter_specs.push(filter);
        self
    }

    /// Parse a filter template and add it to the query.
    pub fn with_filter_sql(self, template: &str) -> Result<Self, FilterParseError> {
        let filter = WhereFilterSpec::parse(template)?;
        Ok(self.with_filter(filter))
    }

    pub fn with_time_range(mut self, constraint: TimeRangeConstraint) -> Self {
        self.time_range_constraint = Some(constraint);
        self
    }

    pub fn order_by(mut self, spec: OrderBySpec) -> Self {
        self.order_by_specs.push(spec);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The queried group-by elements as a spec set, in query order.
    pub fn linkable_spec_set(&self) -> LinkableSpecSet {
        LinkableSpecSet::from_specs(self.group_by_specs.iter().cloned()).dedupe()
    }

    pub fn has_metrics(&self) -> bool {
        !self.metric_specs.is_empty()
    }
}
