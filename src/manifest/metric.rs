//! Metric definitions - named computations over measures and other metrics.

use serde::{Deserialize, Serialize};

use crate::spec::{MetricTimeWindow, TimeGranularity};

/// A metric as declared in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub metric_type: MetricType,
    #[serde(default)]
    pub type_params: MetricTypeParams,
    /// Filter template applied to every query of this metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Metric {
    pub fn simple(name: impl Into<String>, measure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Simple,
            type_params: MetricTypeParams {
                measure: Some(MetricInputMeasure::new(measure)),
                ..MetricTypeParams::default()
            },
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// The measures this metric aggregates directly.
    pub fn input_measures(&self) -> Vec<&MetricInputMeasure> {
        match self.metric_type {
            MetricType::Simple | MetricType::Cumulative => {
                self.type_params.measure.iter().collect()
            }
            MetricType::Conversion => self
                .type_params
                .conversion_type_params
                .iter()
                .flat_map(|params| [&params.base_measure, &params.conversion_measure])
                .collect(),
            MetricType::Ratio | MetricType::Derived => Vec::new(),
        }
    }

    /// The metrics this metric is derived from.
    pub fn input_metrics(&self) -> Vec<&MetricInput> {
        match self.metric_type {
            MetricType::Ratio => self
                .type_params
                .numerator
                .iter()
                .chain(self.type_params.denominator.iter())
                .collect(),
            MetricType::Derived => self.type_params.metrics.iter().collect(),
            MetricType::Simple | MetricType::Cumulative | MetricType::Conversion => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Simple,
    Ratio,
    Derived,
    Cumulative,
    Conversion,
}

/// Type-specific metric parameters. Which fields apply depends on the
/// declared [`MetricType`]; the plan builder raises a manifest error when a
/// required sub-object is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricTypeParams {
    /// Simple and cumulative metrics: the aggregated measure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<MetricInputMeasure>,

    /// Ratio metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerator: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<MetricInput>,

    /// Derived metrics: the expression and its metric inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricInput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_type_params: Option<CumulativeTypeParams>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_type_params: Option<ConversionTypeParams>,
}

/// A measure used as a metric input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricInputMeasure {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Keep a row for every time-spine period even when no source rows exist.
    #[serde(default)]
    pub join_to_timespine: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_nulls_with: Option<i64>,
}

impl MetricInputMeasure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            alias: None,
            join_to_timespine: false,
            fill_nulls_with: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_join_to_timespine(mut self) -> Self {
        self.join_to_timespine = true;
        self
    }
}

/// A metric used as an input to a derived or ratio metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_window: Option<MetricTimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_to_grain: Option<TimeGranularity>,
}

impl MetricInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            alias: None,
            offset_window: None,
            offset_to_grain: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
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
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeTypeParams {
    /// Trailing accumulation window; `None` with no `grain_to_date` means
    /// accumulation over all time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<MetricTimeWindow>,
    /// Accumulate from the start of this grain's period instead of a window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain_to_date: Option<TimeGranularity>,
    #[serde(default)]
    pub period_agg: PeriodAggregation,
}

/// How to collapse cumulative values when re-aggregating to a coarser period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodAggregation {
    #[default]
    First,
    Last,
    Average,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTypeParams {
    pub base_measure: MetricInputMeasure,
    pub conversion_measure: MetricInputMeasure,
    /// Entity both event streams share.
    pub entity: String,
    #[serde(default)]
    pub calculation: ConversionCalculationType,
    /// Maximum time between a base event and a conversion attributed to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<MetricTimeWindow>,
    /// Additional columns that must match between the two events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constant_properties: Vec<ConstantPropertyInput>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionCalculationType {
    #[default]
    ConversionRate,
    Conversions,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstantPropertyInput {
    pub base_property: String,
    pub conversion_property: String,
}
