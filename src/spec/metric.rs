//! Metric and measure specs: what a query asks to compute.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::filter::WhereFilterSpec;
use super::time::{MetricTimeWindow, TimeGranularity};

/// A reference to an aggregatable input column.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MeasureSpec {
    pub element_name: String,
}

impl MeasureSpec {
    pub fn new(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
        }
    }
}

impl fmt::Display for MeasureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.element_name)
    }
}

/// A metric reference plus the modifiers applied to this use of it: filters,
/// an output alias, and a time offset inherited from an enclosing derived
/// metric input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricSpec {
    pub element_name: String,
    pub filter_specs: Vec<WhereFilterSpec>,
    pub alias: Option<String>,
    pub offset_window: Option<MetricTimeWindow>,
    pub offset_to_grain: Option<TimeGranularity>,
}

impl MetricSpec {
    pub fn from_name(element_name: impl Into<String>) -> Self {
        Self {
            element_name: element_name.into(),
            filter_specs: Vec::new(),
            alias: None,
            offset_window: None,
            offset_to_grain: None,
        }
    }

    pub fn with_filters(mut self, filter_specs: Vec<WhereFilterSpec>) -> Self {
        self.filter_specs = filter_specs;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_offset_window(mut self, window: MetricTimeWindow) -> Self {
        self.offset_window = Some(window);
        self
    }

    pub fn with_offset_to_grain(mut self, grain: TimeGranularity) -> Self {
        self.offset_to_grain = Some(grain);
        self
    }

    pub fn has_offset(&self) -> bool {
        self.offset_window.is_some() || self.offset_to_grain.is_some()
    }

    /// The granularity a time offset shifts by, when one is configured.
    pub fn offset_granularity(&self) -> Option<TimeGranularity> {
        self.offset_window
            .as_ref()
            .map(|window| window.granularity)
            .or(self.offset_to_grain)
    }

    /// The name this metric's value is exposed under.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.element_name)
    }
}

impl fmt::Display for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.element_name)
    }
}

/// A metric's input measure with the modifiers that make its aggregation
/// branch-local: filters, and the alias that keeps a constrained copy of a
/// measure distinct from an unconstrained one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricInputSpec {
    pub measure_spec: MeasureSpec,
    pub filter_specs: Vec<WhereFilterSpec>,
    pub alias: Option<String>,
}

impl MetricInputSpec {
    pub fn unconstrained(measure_spec: MeasureSpec) -> Self {
        Self {
            measure_spec,
            filter_specs: Vec::new(),
            alias: None,
        }
    }

    pub fn with_filters(mut self, filter_specs: Vec<WhereFilterSpec>) -> Self {
        self.filter_specs = filter_specs;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The measure spec as visible after aggregation, with any alias applied.
    pub fn post_aggregation_spec(&self) -> MeasureSpec {
        match &self.alias {
            Some(alias) => MeasureSpec::new(alias.clone()),
            None => self.measure_spec.clone(),
        }
    }
}

impl fmt::Display for MetricInputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.measure_spec, alias),
            None => self.measure_spec.fmt(f),
        }
    }
}
