//! The semantic manifest: models, metrics, and time spine configuration,
//! plus the lookup services the plan builder resolves names against.

pub mod join_graph;
pub mod lookup;
pub mod metric;
pub mod semantic_model;
pub mod time_spine;

pub use join_graph::EntityLinkGraph;
pub use lookup::{
    ManifestError, MetricLookup, SemanticManifest, SemanticManifestLookup, SemanticModelLookup,
};
pub use metric::{
    ConstantPropertyInput, ConversionCalculationType, ConversionTypeParams, CumulativeTypeParams,
    Metric, MetricInput, MetricInputMeasure, MetricType, MetricTypeParams, PeriodAggregation,
};
pub use semantic_model::{
    AggregationType, DimensionDef, DimensionType, DimensionTypeParams, EntityDef, EntityType,
    MeasureDef, NonAdditiveDimensionParams, NonAdditiveWindowChoice, SemanticModel,
    SemanticModelDefaults, ValidityParams,
};
pub use time_spine::{choose_time_spine, CustomGrainColumn, TimeSpineSource};
