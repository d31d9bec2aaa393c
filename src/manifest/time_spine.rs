//! Time spine sources - generated calendar tables backing time-spine joins.

use serde::{Deserialize, Serialize};

use crate::spec::TimeGranularity;

/// A configured calendar table with one row per period of its base grain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSpineSource {
    pub table_name: String,
    pub base_column: String,
    pub base_granularity: TimeGranularity,
    /// Custom calendar grains this spine carries as extra columns.
    #[serde(default)]
    pub custom_granularity_columns: Vec<CustomGrainColumn>,
}

impl TimeSpineSource {
    pub fn new(
        table_name: impl Into<String>,
        base_column: impl Into<String>,
        base_granularity: TimeGranularity,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            base_column: base_column.into(),
            base_granularity,
            custom_granularity_columns: Vec::new(),
        }
    }

    pub fn with_custom_grain(mut self, column: CustomGrainColumn) -> Self {
        self.custom_granularity_columns.push(column);
        self
    }

    /// Whether this spine can produce rows at the given grain: its base grain
    /// must be at least as fine.
    pub fn supports(&self, granularity: TimeGranularity) -> bool {
        !self.base_granularity.is_coarser_than(granularity)
    }

    pub fn custom_grain(&self, name: &str) -> Option<&CustomGrainColumn> {
        self.custom_granularity_columns
            .iter()
            .find(|column| column.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomGrainColumn {
    /// Grain name as used in queries (e.g. "retail_month").
    pub name: String,
    pub column_name: String,
    /// The standard grain one row of this custom calendar maps onto.
    pub base_granularity: TimeGranularity,
}

/// Pick the coarsest spine still fine enough for the given grain.
pub fn choose_time_spine(
    spines: &[TimeSpineSource],
    granularity: TimeGranularity,
) -> Option<&TimeSpineSource> {
    spines
        .iter()
        .filter(|spine| spine.supports(granularity))
        .max_by_key(|spine| spine.base_granularity)
}
