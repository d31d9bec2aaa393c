//! Greedy source recipe search.
//!
//! A recipe is a chosen left-side source plus the joins that, together,
//! supply every required linkable spec. The search evaluates candidates in
//! ascending provided-spec order, stops early at a zero-join hit, and
//! otherwise keeps the first fully-satisfied evaluation with the fewest
//! joins. Materializing a recipe instantiates fresh copies of the template
//! chains so no plan ever shares nodes with the candidate set.

use crate::dataflow::{
    ConstrainTimeRangeNode, DataflowNode, DataflowNodeRef, JoinDescription, JoinOnEntitiesNode,
    NodeIdAllocator, NodeKind, SqlJoinType, WhereConstraintNode,
};
use crate::manifest::{ManifestError, SemanticManifestLookup};
use crate::optimizer::PredicatePushdownState;
use crate::spec::{LinkableSpecSet, METRIC_TIME};

use super::evaluator::{JoinLinkableInstanceSet, NodeEvaluation, NodeEvaluator};
use super::source_nodes::{SourceNodeCandidate, SourceNodeSet};

/// Cache key for one recipe search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRecipeParams {
    pub linkable_spec_set: LinkableSpecSet,
    pub measure_names: Vec<String>,
    pub predicate_pushdown_state: PredicatePushdownState,
    pub default_join_type: SqlJoinType,
}

/// A satisfiable way to source a requirement: a left node plus join plan.
#[derive(Debug, Clone)]
pub struct SourceNodeRecipe {
    pub source_node: DataflowNodeRef,
    pub required_local_linkable_specs: LinkableSpecSet,
    pub join_linkable_instances: Vec<JoinLinkableInstanceSet>,
    pub join_targets: Vec<JoinDescription>,
}

impl SourceNodeRecipe {
    pub fn join_count(&self) -> usize {
        self.join_targets.len()
    }

    /// The node every downstream operator hangs off: the source itself when
    /// the recipe needs no joins, else a join of the source to every target.
    pub fn join_output_node(&self, ids: &mut NodeIdAllocator) -> DataflowNodeRef {
        if self.join_targets.is_empty() {
            self.source_node.clone()
        } else {
            DataflowNode::new(
                NodeKind::JoinOnEntities(JoinOnEntitiesNode {
                    left: self.source_node.clone(),
                    joins: self.join_targets.clone(),
                }),
                ids,
            )
        }
    }
}

/// A fresh copy of a template chain, with new ids throughout.
pub(crate) fn instantiate_template(
    node: &DataflowNodeRef,
    ids: &mut NodeIdAllocator,
) -> DataflowNodeRef {
    let parents: Vec<DataflowNodeRef> = node
        .parent_nodes()
        .iter()
        .map(|parent| instantiate_template(parent, ids))
        .collect();
    node.with_new_parents(&parents, ids)
}

/// Replace custom-grain time dimensions with their base-grain equivalents.
/// Custom grains are joined in from a spine after aggregation, so source
/// resolution only ever sees standard grains. Unknown custom grains are left
/// untouched and fail the search.
pub fn rewrite_custom_grains(
    lookup: &SemanticManifestLookup<'_>,
    specs: &LinkableSpecSet,
) -> LinkableSpecSet {
    let mut rewritten = specs.clone();
    for spec in &mut rewritten.time_dimension_specs {
        if !spec.has_custom_granularity() {
            continue;
        }
        if let Some(base) = lookup.custom_grain_base(&spec.granularity.name) {
            *spec = spec.clone().with_base_granularity(base);
        }
    }
    rewritten.dedupe()
}

pub struct SourceRecipeFinder<'a> {
    lookup: &'a SemanticManifestLookup<'a>,
    source_nodes: &'a SourceNodeSet,
}

impl<'a> SourceRecipeFinder<'a> {
    pub fn new(lookup: &'a SemanticManifestLookup<'a>, source_nodes: &'a SourceNodeSet) -> Self {
        Self {
            lookup,
            source_nodes,
        }
    }

    pub fn find(
        &self,
        params: &SourceRecipeParams,
        ids: &mut NodeIdAllocator,
    ) -> Result<Option<SourceNodeRecipe>, ManifestError> {
        let required = rewrite_custom_grains(self.lookup, &params.linkable_spec_set);
        let needs_metric_time = required
            .time_dimension_specs
            .iter()
            .any(|spec| spec.element_name == METRIC_TIME);

        let pool = if needs_metric_time {
            self.source_nodes.metric_time_candidates()
        } else {
            self.source_nodes.model_read_candidates()
        };
        let mut candidates: Vec<&SourceNodeCandidate> = pool
            .iter()
            .filter(|candidate| candidate.contains_measures(&params.measure_names))
            .collect();
        candidates.sort_by_key(|candidate| candidate.linkable_specs.len());

        let evaluator =
            NodeEvaluator::new(self.lookup, self.source_nodes, params.default_join_type);

        let mut best: Option<(&SourceNodeCandidate, NodeEvaluation)> = None;
        for candidate in candidates {
            let evaluation = evaluator.evaluate(candidate, &required, ids)?;
            if !evaluation.is_fully_satisfied() {
                continue;
            }
            if evaluation.join_count() == 0 {
                return Ok(Some(self.materialize(candidate, evaluation, params, ids)));
            }
            let improves = best
                .as_ref()
                .map(|(_, held)| evaluation.join_count() < held.join_count())
                .unwrap_or(true);
            if improves {
                best = Some((candidate, evaluation));
            }
        }

        Ok(best.map(|(candidate, evaluation)| self.materialize(candidate, evaluation, params, ids)))
    }

    fn materialize(
        &self,
        candidate: &SourceNodeCandidate,
        evaluation: NodeEvaluation,
        params: &SourceRecipeParams,
        ids: &mut NodeIdAllocator,
    ) -> SourceNodeRecipe {
        let mut source_node = instantiate_template(&candidate.node, ids);

        // Pushdown onto the left side. Unsafe under a FULL OUTER default:
        // pre-filtering either side of a full join drops rows the other side
        // should still produce.
        if params.default_join_type != SqlJoinType::FullOuter {
            let state = &params.predicate_pushdown_state;
            if candidate.aggregation_time_dimension.is_some() {
                if let Some(range) = state.time_range_constraint() {
                    source_node = DataflowNode::new(
                        NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                            parent: source_node,
                            time_range: *range,
                        }),
                        ids,
                    );
                }
            }
            let eligible = state.eligible_filters_for_output(&candidate.linkable_specs);
            if !eligible.is_empty() {
                source_node = DataflowNode::new(
                    NodeKind::WhereConstraint(WhereConstraintNode {
                        parent: source_node,
                        where_specs: eligible,
                        always_apply: false,
                    }),
                    ids,
                );
            }
        }

        let mut join_linkable_instances = Vec::with_capacity(evaluation.join_targets.len());
        let mut join_targets = Vec::with_capacity(evaluation.join_targets.len());
        for (instance, join) in evaluation
            .join_linkable_instances
            .into_iter()
            .zip(evaluation.join_targets)
        {
            let node = instantiate_template(&join.join_node, ids);
            join_linkable_instances.push(JoinLinkableInstanceSet {
                node: node.clone(),
                satisfiable_linkable_specs: instance.satisfiable_linkable_specs,
            });
            join_targets.push(JoinDescription {
                join_node: node,
                ..join
            });
        }

        SourceNodeRecipe {
            source_node,
            required_local_linkable_specs: evaluation.local_linkable_specs,
            join_linkable_instances,
            join_targets,
        }
    }
}
