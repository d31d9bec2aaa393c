//! Candidate source nodes derived from a manifest.
//!
//! Built once per [`DataflowPlanBuilder`](super::DataflowPlanBuilder). Each
//! candidate pairs a template node chain with the measures and linkable
//! specs a scan of it can provide; the recipe search compares requirements
//! against these sets without touching any SQL. Template nodes never appear
//! in plans directly: materializing a recipe deep-copies them so separate
//! branches get separate scans unless the optimizer proves they can share.

use std::collections::{BTreeMap, BTreeSet};

use crate::dataflow::{
    DataflowNode, DataflowNodeRef, MetricTimeTransformNode, NodeIdAllocator, NodeKind,
    ReadSqlSourceNode, SqlSource,
};
use crate::manifest::lookup::{granularities_from, ALL_DATE_PARTS};
use crate::manifest::{ManifestError, SemanticManifestLookup};
use crate::spec::{
    ExpandedGranularity, LinkableSpecSet, TimeDimensionSpec, TimeGranularity, METRIC_TIME,
};

/// A source the recipe search can root a branch at, or join to.
#[derive(Debug, Clone)]
pub struct SourceNodeCandidate {
    /// Template node chain ending at this candidate's output.
    pub node: DataflowNodeRef,
    /// The model this candidate scans; `None` for time-spine reads.
    pub semantic_model: Option<String>,
    /// Set when the chain aliases an aggregation time dimension to
    /// `metric_time`.
    pub aggregation_time_dimension: Option<String>,
    pub measure_names: BTreeSet<String>,
    pub linkable_specs: LinkableSpecSet,
}

impl SourceNodeCandidate {
    pub fn contains_measures(&self, measures: &[String]) -> bool {
        measures
            .iter()
            .all(|measure| self.measure_names.contains(measure))
    }
}

/// Every candidate derivable from a manifest, indexed for the recipe search.
#[derive(Debug)]
pub struct SourceNodeSet {
    model_read_candidates: Vec<SourceNodeCandidate>,
    metric_time_candidates: Vec<SourceNodeCandidate>,
    time_spine_nodes: BTreeMap<TimeGranularity, DataflowNodeRef>,
}

impl SourceNodeSet {
    pub fn from_manifest(
        lookup: &SemanticManifestLookup<'_>,
        ids: &mut NodeIdAllocator,
    ) -> Result<Self, ManifestError> {
        let models = lookup.model_lookup();
        let mut model_read_candidates = Vec::new();
        let mut metric_time_candidates = Vec::new();

        for model in &lookup.manifest().semantic_models {
            let read_node = DataflowNode::new(
                NodeKind::ReadSqlSource(ReadSqlSourceNode {
                    source: SqlSource::SemanticModel {
                        model_name: model.name.clone(),
                        table: models.backing_table(model)?,
                    },
                }),
                ids,
            );
            let local_specs = models.local_linkable_specs(&model.name)?;
            let all_measures: BTreeSet<String> = model
                .measures
                .iter()
                .map(|measure| measure.name.clone())
                .collect();

            model_read_candidates.push(SourceNodeCandidate {
                node: read_node.clone(),
                semantic_model: Some(model.name.clone()),
                aggregation_time_dimension: None,
                measure_names: all_measures,
                linkable_specs: local_specs.clone(),
            });

            // One metric_time alias chain per distinct aggregation time
            // dimension, in measure declaration order.
            let mut groups: Vec<(&str, TimeGranularity, BTreeSet<String>)> = Vec::new();
            for measure in &model.measures {
                let dimension = models.agg_time_dimension_name(&measure.name)?;
                match groups.iter_mut().find(|(name, _, _)| *name == dimension) {
                    Some((_, _, measures)) => {
                        measures.insert(measure.name.clone());
                    }
                    None => {
                        let grain = models
                            .agg_time_dimension_spec(&measure.name)?
                            .base_granularity();
                        groups.push((dimension, grain, BTreeSet::from([measure.name.clone()])));
                    }
                }
            }

            for (dimension, defined_grain, measures_on_dimension) in groups {
                let mut linkable_specs = local_specs.clone();
                for granularity in granularities_from(defined_grain) {
                    linkable_specs.time_dimension_specs.push(TimeDimensionSpec::new(
                        METRIC_TIME,
                        Vec::new(),
                        ExpandedGranularity::standard(granularity),
                    ));
                }
                if defined_grain == TimeGranularity::Day {
                    for part in ALL_DATE_PARTS {
                        linkable_specs.time_dimension_specs.push(
                            TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day)
                                .with_date_part(part),
                        );
                    }
                }

                let transform_node = DataflowNode::new(
                    NodeKind::MetricTimeTransform(MetricTimeTransformNode {
                        parent: read_node.clone(),
                        aggregation_time_dimension: dimension.to_string(),
                    }),
                    ids,
                );
                metric_time_candidates.push(SourceNodeCandidate {
                    node: transform_node,
                    semantic_model: Some(model.name.clone()),
                    aggregation_time_dimension: Some(dimension.to_string()),
                    measure_names: measures_on_dimension,
                    linkable_specs,
                });
            }
        }

        let mut time_spine_nodes = BTreeMap::new();
        for spine in &lookup.manifest().time_spines {
            let node = DataflowNode::new(
                NodeKind::ReadSqlSource(ReadSqlSourceNode {
                    source: SqlSource::TimeSpine {
                        table: spine.table_name.clone(),
                        base_column: spine.base_column.clone(),
                        base_granularity: spine.base_granularity,
                    },
                }),
                ids,
            );
            time_spine_nodes.insert(spine.base_granularity, node);
        }

        Ok(Self {
            model_read_candidates,
            metric_time_candidates,
            time_spine_nodes,
        })
    }

    pub fn model_read_candidates(&self) -> &[SourceNodeCandidate] {
        &self.model_read_candidates
    }

    pub fn metric_time_candidates(&self) -> &[SourceNodeCandidate] {
        &self.metric_time_candidates
    }

    pub fn read_candidate_for_model(&self, model_name: &str) -> Option<&SourceNodeCandidate> {
        self.model_read_candidates
            .iter()
            .find(|candidate| candidate.semantic_model.as_deref() == Some(model_name))
    }

    /// The coarsest spine template still fine enough for the given grain.
    pub fn time_spine_node_for(&self, granularity: TimeGranularity) -> Option<&DataflowNodeRef> {
        self.time_spine_nodes
            .range(..=granularity)
            .next_back()
            .map(|(_, node)| node)
    }
}
