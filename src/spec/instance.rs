//! Instance spec sets: everything present at a point in a plan, including
//! measures and metrics alongside the linkable elements.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::linkable::{LinkableSpec, LinkableSpecSet};
use super::metric::{MeasureSpec, MetricSpec};

/// Any column-producing spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceSpec {
    Metric(MetricSpec),
    Measure(MeasureSpec),
    Linkable(LinkableSpec),
}

impl InstanceSpec {
    pub fn qualified_name(&self) -> String {
        match self {
            Self::Metric(spec) => spec.output_name().to_string(),
            Self::Measure(spec) => spec.element_name.clone(),
            Self::Linkable(spec) => spec.qualified_name(),
        }
    }
}

impl fmt::Display for InstanceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A column selection at a point in the plan: linkable elements plus the
/// measure and metric columns flowing alongside them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceSpecSet {
    pub measure_specs: Vec<MeasureSpec>,
    pub metric_specs: Vec<MetricSpec>,
    pub linkable_specs: LinkableSpecSet,
}

impl InstanceSpecSet {
    pub fn from_linkable(linkable_specs: LinkableSpecSet) -> Self {
        Self {
            measure_specs: Vec::new(),
            metric_specs: Vec::new(),
            linkable_specs,
        }
    }

    pub fn with_measures(mut self, measure_specs: Vec<MeasureSpec>) -> Self {
        self.measure_specs = measure_specs;
        self
    }

    pub fn with_metrics(mut self, metric_specs: Vec<MetricSpec>) -> Self {
        self.metric_specs = metric_specs;
        self
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            measure_specs: [self.measure_specs.clone(), other.measure_specs.clone()].concat(),
            metric_specs: [self.metric_specs.clone(), other.metric_specs.clone()].concat(),
            linkable_specs: self.linkable_specs.merge(&other.linkable_specs),
        }
    }

    pub fn dedupe(&self) -> Self {
        fn dedupe_vec<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
            let mut out: Vec<T> = Vec::with_capacity(items.len());
            for item in items {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            out
        }
        Self {
            measure_specs: dedupe_vec(&self.measure_specs),
            metric_specs: dedupe_vec(&self.metric_specs),
            linkable_specs: self.linkable_specs.dedupe(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.measure_specs.is_empty() && self.metric_specs.is_empty() && self.linkable_specs.is_empty()
    }
}

/// One ordering key in a query's ORDER BY.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBySpec {
    pub instance_spec: InstanceSpec,
    pub descending: bool,
}

impl OrderBySpec {
    pub fn asc(instance_spec: InstanceSpec) -> Self {
        Self {
            instance_spec,
            descending: false,
        }
    }

    pub fn desc(instance_spec: InstanceSpec) -> Self {
        Self {
            instance_spec,
            descending: true,
        }
    }
}

impl fmt::Display for OrderBySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.instance_spec,
            if self.descending { "desc" } else { "asc" },
        )
    }
}
