//! Exhaustive traversal over node kinds.
//!
//! Every node kind gets its own required method, so adding a kind breaks
//! every visitor at compile time instead of silently falling through a
//! default.

use super::node::{
    AddGeneratedUuidColumnNode, AggregateMetricInputsNode, CombineAggregatedOutputsNode,
    ComputeMetricsNode, ConstrainTimeRangeNode, DataflowNode, FilterElementsNode,
    JoinConversionEventsNode, JoinOnEntitiesNode, JoinOverTimeRangeNode, JoinToTimeSpineNode,
    MetricTimeTransformNode, NodeKind, OrderByLimitNode, ReadSqlSourceNode, SemiAdditiveJoinNode,
    WhereConstraintNode, WindowReaggregationNode, WriteToResultTableNode,
};

pub trait DataflowNodeVisitor {
    type Output;

    fn visit_read_sql_source(
        &mut self,
        node: &DataflowNode,
        payload: &ReadSqlSourceNode,
    ) -> Self::Output;

    fn visit_metric_time_transform(
        &mut self,
        node: &DataflowNode,
        payload: &MetricTimeTransformNode,
    ) -> Self::Output;

    fn visit_join_on_entities(
        &mut self,
        node: &DataflowNode,
        payload: &JoinOnEntitiesNode,
    ) -> Self::Output;

    fn visit_join_over_time_range(
        &mut self,
        node: &DataflowNode,
        payload: &JoinOverTimeRangeNode,
    ) -> Self::Output;

    fn visit_join_to_time_spine(
        &mut self,
        node: &DataflowNode,
        payload: &JoinToTimeSpineNode,
    ) -> Self::Output;

    fn visit_join_conversion_events(
        &mut self,
        node: &DataflowNode,
        payload: &JoinConversionEventsNode,
    ) -> Self::Output;

    fn visit_add_generated_uuid_column(
        &mut self,
        node: &DataflowNode,
        payload: &AddGeneratedUuidColumnNode,
    ) -> Self::Output;

    fn visit_filter_elements(
        &mut self,
        node: &DataflowNode,
        payload: &FilterElementsNode,
    ) -> Self::Output;

    fn visit_where_constraint(
        &mut self,
        node: &DataflowNode,
        payload: &WhereConstraintNode,
    ) -> Self::Output;

    fn visit_constrain_time_range(
        &mut self,
        node: &DataflowNode,
        payload: &ConstrainTimeRangeNode,
    ) -> Self::Output;

    fn visit_aggregate_metric_inputs(
        &mut self,
        node: &DataflowNode,
        payload: &AggregateMetricInputsNode,
    ) -> Self::Output;

    fn visit_semi_additive_join(
        &mut self,
        node: &DataflowNode,
        payload: &SemiAdditiveJoinNode,
    ) -> Self::Output;

    fn visit_compute_metrics(
        &mut self,
        node: &DataflowNode,
        payload: &ComputeMetricsNode,
    ) -> Self::Output;

    fn visit_combine_aggregated_outputs(
        &mut self,
        node: &DataflowNode,
        payload: &CombineAggregatedOutputsNode,
    ) -> Self::Output;

    fn visit_window_reaggregation(
        &mut self,
        node: &DataflowNode,
        payload: &WindowReaggregationNode,
    ) -> Self::Output;

    fn visit_order_by_limit(
        &mut self,
        node: &DataflowNode,
        payload: &OrderByLimitNode,
    ) -> Self::Output;

    fn visit_write_to_result_table(
        &mut self,
        node: &DataflowNode,
        payload: &WriteToResultTableNode,
    ) -> Self::Output;
}

impl DataflowNode {
    pub fn accept<V: DataflowNodeVisitor>(&self, visitor: &mut V) -> V::Output {
        match self.kind() {
            NodeKind::ReadSqlSource(payload) => visitor.visit_read_sql_source(self, payload),
            NodeKind::MetricTimeTransform(payload) => {
                visitor.visit_metric_time_transform(self, payload)
            }
            NodeKind::JoinOnEntities(payload) => visitor.visit_join_on_entities(self, payload),
            NodeKind::JoinOverTimeRange(payload) => {
                visitor.visit_join_over_time_range(self, payload)
            }
            NodeKind::JoinToTimeSpine(payload) => visitor.visit_join_to_time_spine(self, payload),
            NodeKind::JoinConversionEvents(payload) => {
                visitor.visit_join_conversion_events(self, payload)
            }
            NodeKind::AddGeneratedUuidColumn(payload) => {
                visitor.visit_add_generated_uuid_column(self, payload)
            }
            NodeKind::FilterElements(payload) => visitor.visit_filter_elements(self, payload),
            NodeKind::WhereConstraint(payload) => visitor.visit_where_constraint(self, payload),
            NodeKind::ConstrainTimeRange(payload) => {
                visitor.visit_constrain_time_range(self, payload)
            }
            NodeKind::AggregateMetricInputs(payload) => {
                visitor.visit_aggregate_metric_inputs(self, payload)
            }
            NodeKind::SemiAdditiveJoin(payload) => visitor.visit_semi_additive_join(self, payload),
            NodeKind::ComputeMetrics(payload) => visitor.visit_compute_metrics(self, payload),
            NodeKind::CombineAggregatedOutputs(payload) => {
                visitor.visit_combine_aggregated_outputs(self, payload)
            }
            NodeKind::WindowReaggregation(payload) => {
                visitor.visit_window_reaggregation(self, payload)
            }
            NodeKind::OrderByLimit(payload) => visitor.visit_order_by_limit(self, payload),
            NodeKind::WriteToResultTable(payload) => {
                visitor.visit_write_to_result_table(self, payload)
            }
        }
    }
}
