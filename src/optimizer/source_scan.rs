//! Collapses combine inputs that read the same source the same way.
//!
//! Metric branches are built independently, so a query for several metrics
//! over one model scans it once per branch. This pass walks each combine
//! node's inputs greedily: every incoming branch is checked against the
//! already-kept branches in order, and the first compatible pair merges into
//! one branch carrying the union of their outputs. Compatibility is decided
//! structurally, bottom-up; any mismatch along a pair of chains keeps the
//! branches separate.

use std::sync::Arc;

use crate::dataflow::{
    AggregateMetricInputsNode, CombineAggregatedOutputsNode, ComputeMetricsNode, DataflowNode,
    DataflowNodeRef, DataflowPlan, FilterElementsNode, NodeIdAllocator, NodeKind,
};

use super::{DataflowPlanOptimizer, OptimizeError};

pub struct SourceScanOptimizer;

impl DataflowPlanOptimizer for SourceScanOptimizer {
    fn name(&self) -> &'static str {
        "source_scan"
    }

    fn optimize(&self, plan: &DataflowPlan) -> Result<DataflowPlan, OptimizeError> {
        let mut ids = NodeIdAllocator::starting_after(plan.max_node_sequence());
        Ok(DataflowPlan::new(rewrite(plan.sink_node(), &mut ids)))
    }
}

fn rewrite(node: &DataflowNodeRef, ids: &mut NodeIdAllocator) -> DataflowNodeRef {
    let new_parents: Vec<DataflowNodeRef> = node
        .parent_nodes()
        .iter()
        .map(|parent| rewrite(parent, ids))
        .collect();

    if matches!(node.kind(), NodeKind::CombineAggregatedOutputs(_)) {
        let incoming = new_parents.len();
        let mut branches: Vec<DataflowNodeRef> = Vec::with_capacity(incoming);
        for parent in new_parents {
            let mut merged = None;
            for (index, existing) in branches.iter().enumerate() {
                if let Some(combined) = combine_branches(existing, &parent, ids) {
                    merged = Some((index, combined));
                    break;
                }
            }
            match merged {
                Some((index, combined)) => branches[index] = combined,
                None => branches.push(parent),
            }
        }
        if branches.len() == incoming {
            return rebuild_if_changed(node, &branches, ids);
        }
        if branches.len() == 1 {
            return branches.swap_remove(0);
        }
        return DataflowNode::new(
            NodeKind::CombineAggregatedOutputs(CombineAggregatedOutputsNode { parents: branches }),
            ids,
        );
    }

    rebuild_if_changed(node, &new_parents, ids)
}

/// One branch computing everything both inputs computed, or `None` when the
/// chains differ anywhere in a way the union cannot express.
fn combine_branches(
    a: &DataflowNodeRef,
    b: &DataflowNodeRef,
    ids: &mut NodeIdAllocator,
) -> Option<DataflowNodeRef> {
    if Arc::ptr_eq(a, b) {
        return Some(a.clone());
    }
    match (a.kind(), b.kind()) {
        (NodeKind::ComputeMetrics(left), NodeKind::ComputeMetrics(right)) => {
            if left.aggregated_to_elements != right.aggregated_to_elements
                || left.for_group_by_source_node != right.for_group_by_source_node
            {
                return None;
            }
            let parent = combine_branches(&left.parent, &right.parent, ids)?;
            let mut metric_specs = left.metric_specs.clone();
            for spec in &right.metric_specs {
                if !metric_specs.contains(spec) {
                    metric_specs.push(spec.clone());
                }
            }
            Some(DataflowNode::new(
                NodeKind::ComputeMetrics(ComputeMetricsNode {
                    parent,
                    metric_specs,
                    aggregated_to_elements: left.aggregated_to_elements.clone(),
                    for_group_by_source_node: left.for_group_by_source_node,
                }),
                ids,
            ))
        }
        (NodeKind::AggregateMetricInputs(left), NodeKind::AggregateMetricInputs(right)) => {
            // An aliased input renames its output column; merging those would
            // need instance tracking the combine step does not do.
            let any_alias = left
                .metric_input_specs
                .iter()
                .chain(&right.metric_input_specs)
                .any(|input| input.alias.is_some());
            if any_alias {
                return None;
            }
            let parent = combine_branches(&left.parent, &right.parent, ids)?;
            let mut metric_input_specs = left.metric_input_specs.clone();
            for input in &right.metric_input_specs {
                if !metric_input_specs.contains(input) {
                    metric_input_specs.push(input.clone());
                }
            }
            Some(DataflowNode::new(
                NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
                    parent,
                    metric_input_specs,
                }),
                ids,
            ))
        }
        (NodeKind::FilterElements(left), NodeKind::FilterElements(right)) => {
            if left.include_specs.linkable_specs != right.include_specs.linkable_specs
                || left.distinct != right.distinct
            {
                return None;
            }
            let parent = combine_branches(&left.parent, &right.parent, ids)?;
            let mut include_specs = left.include_specs.clone();
            for measure in &right.include_specs.measure_specs {
                if !include_specs.measure_specs.contains(measure) {
                    include_specs.measure_specs.push(measure.clone());
                }
            }
            for metric in &right.include_specs.metric_specs {
                if !include_specs.metric_specs.contains(metric) {
                    include_specs.metric_specs.push(metric.clone());
                }
            }
            Some(DataflowNode::new(
                NodeKind::FilterElements(FilterElementsNode {
                    parent,
                    include_specs,
                    distinct: left.distinct,
                }),
                ids,
            ))
        }
        _ => {
            if !a.functionally_identical(b) {
                return None;
            }
            let a_parents = a.parent_nodes();
            let b_parents = b.parent_nodes();
            if a_parents.len() != b_parents.len() {
                return None;
            }
            let mut merged_parents = Vec::with_capacity(a_parents.len());
            for (a_parent, b_parent) in a_parents.iter().zip(&b_parents) {
                merged_parents.push(combine_branches(a_parent, b_parent, ids)?);
            }
            let all_left = merged_parents
                .iter()
                .zip(&a_parents)
                .all(|(merged, original)| Arc::ptr_eq(merged, original));
            if all_left {
                Some(a.clone())
            } else {
                Some(a.with_new_parents(&merged_parents, ids))
            }
        }
    }
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
