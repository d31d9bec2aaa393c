//! Moves filter predicates down to the scans that can evaluate them.
//!
//! The walk descends from the sink carrying a branch state stack. Constraint
//! nodes feed their filters into the state, join nodes decide what each input
//! side may still see, and source-like nodes wrap themselves in whatever the
//! arriving state makes eligible. Applied filters propagate back up the stack
//! so a constraint whose filters all landed deeper drops out of the plan.
//!
//! Only filters over categorical dimensions move; a filter that names a time
//! dimension or entity stays where the builder put it. Any join that can
//! null-extend rows clears the carried filters for the inputs it affects,
//! since a predicate evaluated below such a join cannot see the null rows it
//! produces.

use std::sync::Arc;

use crate::dataflow::{
    DataflowNode, DataflowNodeRef, DataflowPlan, JoinDescription, JoinOnEntitiesNode,
    NodeIdAllocator, NodeKind, SqlJoinType, SqlSource, WhereConstraintNode,
};
use crate::manifest::SemanticManifestLookup;
use crate::spec::{LinkableSpecSet, WhereFilterSpec};

use super::pushdown_state::{PredicatePushdownState, PushdownBranchStateTracker};
use super::{DataflowPlanOptimizer, OptimizeError};

pub struct PredicatePushdownOptimizer<'a> {
    manifest_lookup: &'a SemanticManifestLookup<'a>,
}

impl<'a> PredicatePushdownOptimizer<'a> {
    pub fn new(manifest_lookup: &'a SemanticManifestLookup<'a>) -> Self {
        Self { manifest_lookup }
    }

    fn optimize_branch(
        &self,
        node: &DataflowNodeRef,
        tracker: &mut PushdownBranchStateTracker,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, OptimizeError> {
        let rewritten = match node.kind() {
            NodeKind::ReadSqlSource(read) => {
                let provided = match &read.source {
                    SqlSource::SemanticModel { model_name, .. } => Some(
                        self.manifest_lookup
                            .model_lookup()
                            .local_linkable_specs(model_name)?,
                    ),
                    SqlSource::TimeSpine { .. } => None,
                };
                apply_at_source(node, provided, tracker, ids)
            }
            // The transform chain is a template leaf; nothing between it and
            // its scan can hold a filter, so it is treated as one source.
            NodeKind::MetricTimeTransform(transform) => {
                let provided = match transform.parent.kind() {
                    NodeKind::ReadSqlSource(read) => match read.source.semantic_model_name() {
                        Some(model_name) => Some(
                            self.manifest_lookup
                                .model_lookup()
                                .local_linkable_specs(model_name)?,
                        ),
                        None => None,
                    },
                    _ => None,
                };
                apply_at_source(node, provided, tracker, ids)
            }
            NodeKind::WhereConstraint(constraint) => {
                if constraint.always_apply {
                    // Mandatory re-application; never moved, never dropped.
                    let new_parent = self.optimize_branch(&constraint.parent, tracker, ids)?;
                    rebuild_if_changed(node, &[new_parent], ids)
                } else {
                    let state = tracker
                        .current()
                        .with_additional_where_filters(constraint.where_specs.iter().cloned());
                    tracker.track(state);
                    let new_parent = self.optimize_branch(&constraint.parent, tracker, ids)?;
                    let popped = tracker.finish();
                    let applied = popped.applied_where_filter_specs();
                    let remaining: Vec<WhereFilterSpec> = constraint
                        .where_specs
                        .iter()
                        .filter(|filter| !applied.contains(filter))
                        .cloned()
                        .collect();
                    if remaining.is_empty() {
                        new_parent
                    } else if remaining == constraint.where_specs
                        && Arc::ptr_eq(&new_parent, &constraint.parent)
                    {
                        node.clone()
                    } else {
                        DataflowNode::new(
                            NodeKind::WhereConstraint(WhereConstraintNode {
                                parent: new_parent,
                                where_specs: remaining,
                                always_apply: false,
                            }),
                            ids,
                        )
                    }
                }
            }
            NodeKind::ConstrainTimeRange(constrain) => {
                // The innermost range wins for anything below it.
                let state = tracker
                    .current()
                    .with_time_range_constraint(constrain.time_range);
                tracker.track(state);
                let new_parent = self.optimize_branch(&constrain.parent, tracker, ids)?;
                tracker.finish();
                rebuild_if_changed(node, &[new_parent], ids)
            }
            NodeKind::JoinOnEntities(join) => {
                let any_full_outer = join
                    .joins
                    .iter()
                    .any(|description| description.join_type == SqlJoinType::FullOuter);

                let left_state = if any_full_outer {
                    tracker.current().without_where_filters()
                } else {
                    tracker.current().clone()
                };
                tracker.track(left_state);
                let new_left = self.optimize_branch(&join.left, tracker, ids)?;
                tracker.finish();

                let mut new_joins = Vec::with_capacity(join.joins.len());
                for description in &join.joins {
                    let target_state =
                        if description.join_type == SqlJoinType::Inner && !any_full_outer {
                            tracker.current().clone()
                        } else {
                            tracker.current().without_where_filters()
                        };
                    tracker.track(target_state);
                    let new_target = self.optimize_branch(&description.join_node, tracker, ids)?;
                    tracker.finish();
                    new_joins.push(JoinDescription {
                        join_node: new_target,
                        ..description.clone()
                    });
                }

                let unchanged = Arc::ptr_eq(&new_left, &join.left)
                    && new_joins
                        .iter()
                        .zip(&join.joins)
                        .all(|(new, old)| Arc::ptr_eq(&new.join_node, &old.join_node));
                if unchanged {
                    node.clone()
                } else {
                    DataflowNode::new(
                        NodeKind::JoinOnEntities(JoinOnEntitiesNode {
                            left: new_left,
                            joins: new_joins,
                        }),
                        ids,
                    )
                }
            }
            NodeKind::JoinOverTimeRange(join) => {
                let new_parent = self.optimize_branch(&join.parent, tracker, ids)?;
                tracker.track(PredicatePushdownState::disabled());
                let new_spine = self.optimize_branch(&join.time_spine_node, tracker, ids)?;
                tracker.finish();
                rebuild_if_changed(node, &[new_parent, new_spine], ids)
            }
            NodeKind::JoinToTimeSpine(join) => {
                // A left-outer spine join fills missing periods with nulls,
                // so filters from above must not run below it.
                let parent_state = if join.join_type == SqlJoinType::Inner {
                    tracker.current().clone()
                } else {
                    tracker.current().without_where_filters()
                };
                tracker.track(parent_state);
                let new_parent = self.optimize_branch(&join.parent, tracker, ids)?;
                tracker.finish();
                tracker.track(PredicatePushdownState::disabled());
                let new_spine = self.optimize_branch(&join.time_spine_node, tracker, ids)?;
                tracker.finish();
                rebuild_if_changed(node, &[new_parent, new_spine], ids)
            }
            NodeKind::JoinConversionEvents(join) => {
                // Pre-filtering conversion events would change attribution;
                // that side is off limits.
                let new_base = self.optimize_branch(&join.base_node, tracker, ids)?;
                tracker.track(PredicatePushdownState::disabled());
                let new_conversion = self.optimize_branch(&join.conversion_node, tracker, ids)?;
                tracker.finish();
                rebuild_if_changed(node, &[new_base, new_conversion], ids)
            }
            NodeKind::SemiAdditiveJoin(join) => {
                // Filtering below could change which row is the window edge.
                tracker.track(tracker.current().without_where_filters());
                let new_parent = self.optimize_branch(&join.parent, tracker, ids)?;
                tracker.finish();
                rebuild_if_changed(node, &[new_parent], ids)
            }
            NodeKind::ComputeMetrics(compute) => {
                let has_offset = compute.metric_specs.iter().any(|spec| spec.has_offset());
                if has_offset {
                    // Filters from above would run against pre-shift rows.
                    tracker.track(PredicatePushdownState::disabled());
                    let new_parent = self.optimize_branch(&compute.parent, tracker, ids)?;
                    tracker.finish();
                    rebuild_if_changed(node, &[new_parent], ids)
                } else {
                    let new_parent = self.optimize_branch(&compute.parent, tracker, ids)?;
                    rebuild_if_changed(node, &[new_parent], ids)
                }
            }
            NodeKind::CombineAggregatedOutputs(combine) => {
                let mut new_parents = Vec::with_capacity(combine.parents.len());
                for parent in &combine.parents {
                    // The combine coalesces branches full-outer style; rows
                    // missing on one side surface as nulls above it.
                    tracker.track(tracker.current().without_where_filters());
                    new_parents.push(self.optimize_branch(parent, tracker, ids)?);
                    tracker.finish();
                }
                rebuild_if_changed(node, &new_parents, ids)
            }
            NodeKind::AddGeneratedUuidColumn(_)
            | NodeKind::FilterElements(_)
            | NodeKind::AggregateMetricInputs(_)
            | NodeKind::WindowReaggregation(_)
            | NodeKind::OrderByLimit(_)
            | NodeKind::WriteToResultTable(_) => {
                let mut new_parents = Vec::new();
                for parent in node.parent_nodes() {
                    new_parents.push(self.optimize_branch(&parent, tracker, ids)?);
                }
                rebuild_if_changed(node, &new_parents, ids)
            }
        };
        Ok(rewritten)
    }
}

fn apply_at_source(
    node: &DataflowNodeRef,
    provided: Option<LinkableSpecSet>,
    tracker: &mut PushdownBranchStateTracker,
    ids: &mut NodeIdAllocator,
) -> DataflowNodeRef {
    let Some(provided) = provided else {
        return node.clone();
    };
    let eligible = tracker.current().eligible_filters_for_output(&provided);
    if eligible.is_empty() {
        return node.clone();
    }
    tracker.record_applied(&eligible);
    DataflowNode::new(
        NodeKind::WhereConstraint(WhereConstraintNode {
            parent: node.clone(),
            where_specs: eligible,
            always_apply: false,
        }),
        ids,
    )
}

fn rebuild_if_changed(
    node: &DataflowNodeRef,
    new_parents: &[DataflowNodeRef],
    ids: &mut NodeIdAllocator,
) -> DataflowNodeRef {
    let old_parents = node.parent_nodes();
    let unchanged = old_parents.len() == new_parents.len()
        && old_parents
            .iter()
            .zip(new_parents)
            .all(|(old, new)| Arc::ptr_eq(old, new));
    if unchanged {
        node.clone()
    } else {
        node.with_new_parents(new_parents, ids)
    }
}

impl DataflowPlanOptimizer for PredicatePushdownOptimizer<'_> {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn optimize(&self, plan: &DataflowPlan) -> Result<DataflowPlan, OptimizeError> {
        let mut ids = NodeIdAllocator::starting_after(plan.max_node_sequence());
        let mut tracker =
            PushdownBranchStateTracker::new(PredicatePushdownState::new(None, Vec::new()));
        let sink = self.optimize_branch(plan.sink_node(), &mut tracker, &mut ids)?;
        Ok(DataflowPlan::new(sink))
    }
}
