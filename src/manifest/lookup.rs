//! Name-indexed lookup services over a semantic manifest.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::spec::{
    DatePart, DimensionSpec, EntitySpec, ExpandedGranularity, LinkableSpecSet, TimeDimensionSpec,
    TimeGranularity,
};

use super::join_graph::EntityLinkGraph;
use super::metric::{Metric, MetricType};
use super::semantic_model::{DimensionType, SemanticModel};
use super::time_spine::{choose_time_spine, CustomGrainColumn, TimeSpineSource};

/// Errors raised while loading or resolving against a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown semantic model '{0}'")]
    UnknownSemanticModel(String),

    #[error("unknown measure '{0}'")]
    UnknownMeasure(String),

    #[error("measure '{measure}' is defined on both '{first_model}' and '{second_model}'")]
    DuplicateMeasure {
        measure: String,
        first_model: String,
        second_model: String,
    },

    #[error("metric '{0}' is defined more than once")]
    DuplicateMetric(String),

    #[error("measure '{measure}' has no aggregation time dimension")]
    MissingAggTimeDimension { measure: String },

    #[error(
        "aggregation time dimension '{dimension}' for measure '{measure}' is not a time dimension"
    )]
    AggTimeDimensionNotTime { measure: String, dimension: String },

    #[error(
        "non-additive dimension '{dimension}' for measure '{measure}' is not a time dimension"
    )]
    NonAdditiveDimensionNotTime { measure: String, dimension: String },

    #[error("metric '{metric}' is missing its {params} configuration")]
    MissingTypeParams {
        metric: String,
        params: &'static str,
    },

    #[error("semantic model '{0}' has neither a backing table nor a backing query")]
    NoBackingTable(String),
}

/// The full manifest consumed by the plan builder.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SemanticManifest {
    pub semantic_models: Vec<SemanticModel>,
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub time_spines: Vec<TimeSpineSource>,
}

impl SemanticManifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Name-indexed view over the semantic models of a manifest.
#[derive(Debug)]
pub struct SemanticModelLookup<'a> {
    models_by_name: HashMap<&'a str, &'a SemanticModel>,
    measure_owner: HashMap<&'a str, &'a SemanticModel>,
}

impl<'a> SemanticModelLookup<'a> {
    pub fn new(manifest: &'a SemanticManifest) -> Result<Self, ManifestError> {
        let mut models_by_name = HashMap::new();
        let mut measure_owner: HashMap<&'a str, &'a SemanticModel> = HashMap::new();

        for model in &manifest.semantic_models {
            models_by_name.insert(model.name.as_str(), model);
            for measure in &model.measures {
                if let Some(existing) = measure_owner.insert(measure.name.as_str(), model) {
                    if existing.name != model.name {
                        return Err(ManifestError::DuplicateMeasure {
                            measure: measure.name.clone(),
                            first_model: existing.name.clone(),
                            second_model: model.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            models_by_name,
            measure_owner,
        })
    }

    pub fn model(&self, name: &str) -> Result<&'a SemanticModel, ManifestError> {
        self.models_by_name
            .get(name)
            .copied()
            .ok_or_else(|| ManifestError::UnknownSemanticModel(name.to_string()))
    }

    pub fn model_for_measure(&self, measure: &str) -> Result<&'a SemanticModel, ManifestError> {
        self.measure_owner
            .get(measure)
            .copied()
            .ok_or_else(|| ManifestError::UnknownMeasure(measure.to_string()))
    }

    /// The SQL relation a model's scan reads from.
    pub fn backing_table(&self, model: &SemanticModel) -> Result<String, ManifestError> {
        if let Some(table) = &model.sql_table {
            return Ok(table.clone());
        }
        if let Some(query) = &model.sql_query {
            return Ok(format!("({query})"));
        }
        Err(ManifestError::NoBackingTable(model.name.clone()))
    }

    /// The time dimension a measure aggregates over: the measure-level
    /// override if present, else the model default.
    pub fn agg_time_dimension_name(&self, measure: &str) -> Result<&'a str, ManifestError> {
        let model = self.model_for_measure(measure)?;
        let measure_def = model
            .measure(measure)
            .ok_or_else(|| ManifestError::UnknownMeasure(measure.to_string()))?;
        measure_def
            .agg_time_dimension
            .as_deref()
            .or_else(|| model.default_agg_time_dimension())
            .ok_or_else(|| ManifestError::MissingAggTimeDimension {
                measure: measure.to_string(),
            })
    }

    /// The aggregation time dimension of a measure as a local spec at its
    /// defined granularity.
    pub fn agg_time_dimension_spec(
        &self,
        measure: &str,
    ) -> Result<TimeDimensionSpec, ManifestError> {
        let model = self.model_for_measure(measure)?;
        let dimension_name = self.agg_time_dimension_name(measure)?;
        let granularity = model
            .dimension(dimension_name)
            .and_then(|dimension| dimension.time_granularity())
            .ok_or_else(|| ManifestError::AggTimeDimensionNotTime {
                measure: measure.to_string(),
                dimension: dimension_name.to_string(),
            })?;
        Ok(TimeDimensionSpec::local(dimension_name, granularity))
    }

    /// Every linkable spec a scan of this model can output directly: each
    /// element with no links, and with a one-element link through each of the
    /// model's key entities. Time dimensions are enumerated at every grain
    /// from their defined grain up, and day-grain dimensions additionally as
    /// date-part extractions.
    pub fn local_linkable_specs(&self, model_name: &str) -> Result<LinkableSpecSet, ManifestError> {
        let model = self.model(model_name)?;
        let mut set = LinkableSpecSet::default();

        let key_prefixes: Vec<&str> = model
            .join_key_entities()
            .map(|entity| entity.name.as_str())
            .collect();

        for entity in &model.entities {
            set.entity_specs.push(EntitySpec::local(&entity.name));
            for prefix in &key_prefixes {
                if *prefix != entity.name {
                    set.entity_specs
                        .push(EntitySpec::with_links(&entity.name, [*prefix]));
                }
            }
        }

        for dimension in &model.dimensions {
            match dimension.dimension_type {
                DimensionType::Categorical => {
                    set.dimension_specs.push(DimensionSpec::local(&dimension.name));
                    for prefix in &key_prefixes {
                        set.dimension_specs
                            .push(DimensionSpec::with_links(&dimension.name, [*prefix]));
                    }
                }
                DimensionType::Time => {
                    let Some(defined) = dimension.time_granularity() else {
                        continue;
                    };
                    let mut links: Vec<Vec<String>> = vec![Vec::new()];
                    links.extend(key_prefixes.iter().map(|prefix| vec![prefix.to_string()]));
                    for link in &links {
                        for granularity in granularities_from(defined) {
                            set.time_dimension_specs.push(TimeDimensionSpec::new(
                                &dimension.name,
                                link.clone(),
                                ExpandedGranularity::standard(granularity),
                            ));
                        }
                        if defined == TimeGranularity::Day {
                            for part in ALL_DATE_PARTS {
                                set.time_dimension_specs.push(
                                    TimeDimensionSpec::new(
                                        &dimension.name,
                                        link.clone(),
                                        ExpandedGranularity::standard(TimeGranularity::Day),
                                    )
                                    .with_date_part(part),
                                );
                            }
                        }
                    }
                }
            }
        }

        Ok(set)
    }

    /// Partition dimensions of a model as local specs, used to constrain
    /// joins against partitioned tables.
    pub fn partition_specs(
        &self,
        model_name: &str,
    ) -> Result<(Vec<DimensionSpec>, Vec<TimeDimensionSpec>), ManifestError> {
        let model = self.model(model_name)?;
        let mut dimensions = Vec::new();
        let mut time_dimensions = Vec::new();
        for dimension in &model.dimensions {
            if !dimension.is_partition {
                continue;
            }
            match dimension.time_granularity() {
                Some(granularity) => {
                    time_dimensions.push(TimeDimensionSpec::local(&dimension.name, granularity))
                }
                None => dimensions.push(DimensionSpec::local(&dimension.name)),
            }
        }
        Ok((dimensions, time_dimensions))
    }
}

pub(crate) const ALL_DATE_PARTS: [DatePart; 7] = [
    DatePart::Dow,
    DatePart::Doy,
    DatePart::Day,
    DatePart::Week,
    DatePart::Month,
    DatePart::Quarter,
    DatePart::Year,
];

pub(crate) fn granularities_from(finest: TimeGranularity) -> Vec<TimeGranularity> {
    [
        TimeGranularity::Day,
        TimeGranularity::Week,
        TimeGranularity::Month,
        TimeGranularity::Quarter,
        TimeGranularity::Year,
    ]
    .into_iter()
    .filter(|granularity| !finest.is_coarser_than(*granularity))
    .collect()
}

/// Name-indexed view over the metrics of a manifest.
#[derive(Debug)]
pub struct MetricLookup<'a> {
    metrics_by_name: HashMap<&'a str, &'a Metric>,
}

impl<'a> MetricLookup<'a> {
    pub fn new(manifest: &'a SemanticManifest) -> Result<Self, ManifestError> {
        let mut metrics_by_name = HashMap::new();
        for metric in &manifest.metrics {
            if metrics_by_name.insert(metric.name.as_str(), metric).is_some() {
                return Err(ManifestError::DuplicateMetric(metric.name.clone()));
            }
        }
        Ok(Self { metrics_by_name })
    }

    pub fn metric(&self, name: &str) -> Result<&'a Metric, ManifestError> {
        self.metrics_by_name
            .get(name)
            .copied()
            .ok_or_else(|| ManifestError::UnknownMetric(name.to_string()))
    }

    /// The aggregation time dimension specs of every measure feeding this
    /// metric, transitively, in first-seen order.
    pub fn aggregation_time_dimension_specs(
        &self,
        metric_name: &str,
        models: &SemanticModelLookup<'_>,
    ) -> Result<Vec<TimeDimensionSpec>, ManifestError> {
        let mut specs: Vec<TimeDimensionSpec> = Vec::new();
        let mut visited = HashSet::new();
        self.collect_agg_time_dimension_specs(metric_name, models, &mut specs, &mut visited)?;
        Ok(specs)
    }

    fn collect_agg_time_dimension_specs(
        &self,
        metric_name: &str,
        models: &SemanticModelLookup<'_>,
        specs: &mut Vec<TimeDimensionSpec>,
        visited: &mut HashSet<String>,
    ) -> Result<(), ManifestError> {
        if !visited.insert(metric_name.to_string()) {
            return Ok(());
        }
        let metric = self.metric(metric_name)?;
        for measure in metric.input_measures() {
            let spec = models.agg_time_dimension_spec(&measure.name)?;
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
        for input in metric.input_metrics() {
            self.collect_agg_time_dimension_specs(&input.name, models, specs, visited)?;
        }
        Ok(())
    }

    /// The finest granularity this metric can be queried at: the coarsest
    /// defined grain among all of its input measures' aggregation time
    /// dimensions.
    pub fn min_queryable_granularity(
        &self,
        metric_name: &str,
        models: &SemanticModelLookup<'_>,
    ) -> Result<TimeGranularity, ManifestError> {
        let specs = self.aggregation_time_dimension_specs(metric_name, models)?;
        specs
            .iter()
            .map(TimeDimensionSpec::base_granularity)
            .max()
            .ok_or_else(|| ManifestError::MissingAggTimeDimension {
                measure: metric_name.to_string(),
            })
    }

    /// Whether a metric, or any metric it is derived from, is cumulative.
    pub fn contains_cumulative_metric(
        &self,
        metric_name: &str,
    ) -> Result<bool, ManifestError> {
        let metric = self.metric(metric_name)?;
        if metric.metric_type == MetricType::Cumulative {
            return Ok(true);
        }
        for input in metric.input_metrics() {
            if self.contains_cumulative_metric(&input.name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// The combined lookup surface handed to the plan builder.
#[derive(Debug)]
pub struct SemanticManifestLookup<'a> {
    manifest: &'a SemanticManifest,
    model_lookup: SemanticModelLookup<'a>,
    metric_lookup: MetricLookup<'a>,
    join_graph: EntityLinkGraph,
}

impl<'a> SemanticManifestLookup<'a> {
    pub fn new(manifest: &'a SemanticManifest) -> Result<Self, ManifestError> {
        Ok(Self {
            manifest,
            model_lookup: SemanticModelLookup::new(manifest)?,
            metric_lookup: MetricLookup::new(manifest)?,
            join_graph: EntityLinkGraph::from_models(&manifest.semantic_models),
        })
    }

    pub fn manifest(&self) -> &'a SemanticManifest {
        self.manifest
    }

    pub fn model_lookup(&self) -> &SemanticModelLookup<'a> {
        &self.model_lookup
    }

    pub fn metric_lookup(&self) -> &MetricLookup<'a> {
        &self.metric_lookup
    }

    pub fn join_graph(&self) -> &EntityLinkGraph {
        &self.join_graph
    }

    pub fn time_spine_for(&self, granularity: TimeGranularity) -> Option<&'a TimeSpineSource> {
        choose_time_spine(&self.manifest.time_spines, granularity)
    }

    /// Resolve a custom calendar grain to the spine that carries it.
    pub fn custom_grain(&self, name: &str) -> Option<(&'a TimeSpineSource, &'a CustomGrainColumn)> {
        self.manifest.time_spines.iter().find_map(|spine| {
            spine.custom_grain(name).map(|column| (spine, column))
        })
    }

    /// The standard grain underlying a custom grain name, if configured.
    pub fn custom_grain_base(&self, name: &str) -> Option<TimeGranularity> {
        self.custom_grain(name)
            .map(|(_, column)| column.base_granularity)
    }
}
