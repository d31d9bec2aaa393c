//! Semantic model definitions - the tables that measures, dimensions, and
//! entities live on.

use serde::{Deserialize, Serialize};

use crate::spec::TimeGranularity;

/// A semantic model: one logical table plus the elements defined on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModel {
    pub name: String,

    /// Physical table backing this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_table: Option<String>,

    /// Arbitrary SQL backing this model, used when no table is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<SemanticModelDefaults>,

    #[serde(default)]
    pub entities: Vec<EntityDef>,

    #[serde(default)]
    pub dimensions: Vec<DimensionDef>,

    #[serde(default)]
    pub measures: Vec<MeasureDef>,
}

impl SemanticModel {
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionDef> {
        self.dimensions.iter().find(|dimension| dimension.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureDef> {
        self.measures.iter().find(|measure| measure.name == name)
    }

    pub fn primary_entity(&self) -> Option<&EntityDef> {
        self.entities
            .iter()
            .find(|entity| entity.entity_type == EntityType::Primary)
    }

    /// Entities other models can join to this model on.
    pub fn join_key_entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities
            .iter()
            .filter(|entity| entity.entity_type.is_join_key())
    }

    pub fn time_dimensions(&self) -> impl Iterator<Item = &DimensionDef> {
        self.dimensions
            .iter()
            .filter(|dimension| dimension.dimension_type == DimensionType::Time)
    }

    /// The model-level default aggregation time dimension, if configured.
    pub fn default_agg_time_dimension(&self) -> Option<&str> {
        self.defaults
            .as_ref()
            .and_then(|defaults| defaults.agg_time_dimension.as_deref())
    }

    /// The validity window (start, end) dimensions for slowly-changing
    /// dimension models, when both are configured.
    pub fn validity_window_dimensions(&self) -> Option<(&DimensionDef, &DimensionDef)> {
        let start = self.dimensions.iter().find(|dimension| {
            dimension
                .validity_params()
                .is_some_and(|params| params.is_start)
        })?;
        let end = self.dimensions.iter().find(|dimension| {
            dimension
                .validity_params()
                .is_some_and(|params| params.is_end)
        })?;
        Some((start, end))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticModelDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_time_dimension: Option<String>,
}

/// A join key defined on a semantic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            expr: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Primary,
    Unique,
    Foreign,
    Natural,
}

impl EntityType {
    /// Whether an entity of this type identifies rows well enough to be the
    /// target side of a join.
    pub fn is_join_key(&self) -> bool {
        matches!(self, Self::Primary | Self::Unique | Self::Natural)
    }
}

/// A dimension defined on a semantic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionDef {
    pub name: String,
    pub dimension_type: DimensionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_params: Option<DimensionTypeParams>,
    #[serde(default)]
    pub is_partition: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl DimensionDef {
    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimension_type: DimensionType::Categorical,
            type_params: None,
            is_partition: false,
            expr: None,
        }
    }

    pub fn time(name: impl Into<String>, granularity: TimeGranularity) -> Self {
        Self {
            name: name.into(),
            dimension_type: DimensionType::Time,
            type_params: Some(DimensionTypeParams {
                time_granularity: granularity,
                validity_params: None,
            }),
            is_partition: false,
            expr: None,
        }
    }

    pub fn as_partition(mut self) -> Self {
        self.is_partition = true;
        self
    }

    pub fn with_validity(mut self, is_start: bool, is_end: bool) -> Self {
        if let Some(params) = &mut self.type_params {
            params.validity_params = Some(ValidityParams { is_start, is_end });
        }
        self
    }

    pub fn time_granularity(&self) -> Option<TimeGranularity> {
        match self.dimension_type {
            DimensionType::Time => self.type_params.as_ref().map(|params| params.time_granularity),
            DimensionType::Categorical => None,
        }
    }

    pub fn validity_params(&self) -> Option<&ValidityParams> {
        self.type_params
            .as_ref()
            .and_then(|params| params.validity_params.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    Categorical,
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionTypeParams {
    pub time_granularity: TimeGranularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_params: Option<ValidityParams>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidityParams {
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub is_end: bool,
}

/// An aggregatable input column defined on a semantic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureDef {
    pub name: String,
    pub agg: AggregationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// Overrides the model-level default aggregation time dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_time_dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_additive_dimension: Option<NonAdditiveDimensionParams>,
}

impl MeasureDef {
    pub fn new(name: impl Into<String>, agg: AggregationType) -> Self {
        Self {
            name: name.into(),
            agg,
            expr: None,
            agg_time_dimension: None,
            non_additive_dimension: None,
        }
    }

    pub fn with_expr(mut self, expr: impl Into<String>) -> Self {
        self.expr = Some(expr.into());
        self
    }

    pub fn with_agg_time_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.agg_time_dimension = Some(dimension.into());
        self
    }

    pub fn with_non_additive_dimension(mut self, params: NonAdditiveDimensionParams) -> Self {
        self.non_additive_dimension = Some(params);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Sum,
    Min,
    Max,
    Average,
    Count,
    CountDistinct,
    SumBoolean,
    Median,
}

/// Configuration for semi-additive measures: aggregate only the rows at the
/// chosen end of the named time dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonAdditiveDimensionParams {
    /// Must name a time dimension on the same model.
    pub name: String,
    pub window_choice: NonAdditiveWindowChoice,
    #[serde(default)]
    pub window_groupings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonAdditiveWindowChoice {
    Min,
    Max,
}
