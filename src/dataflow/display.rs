//! Indented text rendering of a plan, one node per line with its
//! distinguishing parameters. Shared nodes print once and are referenced by
//! id afterwards.

use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;

use super::node::{
    AddGeneratedUuidColumnNode, AggregateMetricInputsNode, CombineAggregatedOutputsNode,
    ComputeMetricsNode, ConstrainTimeRangeNode, DataflowNode, FilterElementsNode,
    JoinConversionEventsNode, JoinOnEntitiesNode, JoinOverTimeRangeNode, JoinToTimeSpineNode,
    MetricTimeTransformNode, OrderByLimitNode, ReadSqlSourceNode, SemiAdditiveJoinNode, SqlSource,
    WhereConstraintNode, WindowReaggregationNode, WriteToResultTableNode,
};
use super::plan::DataflowPlan;
use super::visitor::DataflowNodeVisitor;

struct PlanDescriber {
    out: String,
    depth: usize,
    printed: HashSet<*const DataflowNode>,
}

impl PlanDescriber {
    fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
            printed: HashSet::new(),
        }
    }

    fn line(&mut self, node: &DataflowNode, detail: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        let _ = write!(self.out, "{} ({})", node.kind_name(), node.node_id());
        if !detail.is_empty() {
            let _ = write!(self.out, " {detail}");
        }
        self.out.push('\n');
    }

    /// Prints the node, then recurses into parents unless this node was
    /// already printed elsewhere in the tree.
    fn describe_current(&mut self, node: &DataflowNode, detail: &str) {
        if !self.printed.insert(node as *const DataflowNode) {
            self.line(node, &join_detail(detail, "(ref)"));
            return;
        }
        self.line(node, detail);
        self.depth += 1;
        for parent in node.parent_nodes() {
            parent.accept(self);
        }
        self.depth -= 1;
    }
}

fn join_detail(detail: &str, suffix: &str) -> String {
    if detail.is_empty() {
        suffix.to_string()
    } else {
        format!("{detail} {suffix}")
    }
}

fn comma_list<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl DataflowNodeVisitor for PlanDescriber {
    type Output = ();

    fn visit_read_sql_source(&mut self, node: &DataflowNode, payload: &ReadSqlSourceNode) {
        let detail = match &payload.source {
            SqlSource::SemanticModel { model_name, table } => {
                format!("model={model_name} table={table}")
            }
            SqlSource::TimeSpine {
                table,
                base_column,
                base_granularity,
            } => format!("time_spine={table}.{base_column} grain={base_granularity}"),
        };
        self.describe_current(node, &detail);
    }

    fn visit_metric_time_transform(
        &mut self,
        node: &DataflowNode,
        payload: &MetricTimeTransformNode,
    ) {
        self.describe_current(node, &format!("column={}", payload.aggregation_time_dimension));
    }

    fn visit_join_on_entities(&mut self, node: &DataflowNode, payload: &JoinOnEntitiesNode) {
        let joins = payload
            .joins
            .iter()
            .map(|join| match &join.join_on_entity {
                Some(entity) => format!("{} on {entity}", join.join_type),
                None => join.join_type.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.describe_current(node, &format!("joins=[{joins}]"));
    }

    fn visit_join_over_time_range(&mut self, node: &DataflowNode, payload: &JoinOverTimeRangeNode) {
        let detail = match (&payload.window, payload.grain_to_date) {
            (Some(window), _) => format!("window={window}"),
            (None, Some(grain)) => format!("grain_to_date={grain}"),
            (None, None) => "all_time".to_string(),
        };
        self.describe_current(node, &detail);
    }

    fn visit_join_to_time_spine(&mut self, node: &DataflowNode, payload: &JoinToTimeSpineNode) {
        let mut detail = format!("join_type={}", payload.join_type);
        if let Some(window) = &payload.offset_window {
            let _ = write!(detail, " offset_window={window}");
        }
        if let Some(grain) = payload.offset_to_grain {
            let _ = write!(detail, " offset_to_grain={grain}");
        }
        self.describe_current(node, &detail);
    }

    fn visit_join_conversion_events(
        &mut self,
        node: &DataflowNode,
        payload: &JoinConversionEventsNode,
    ) {
        let mut detail = format!("entity={}", payload.entity_spec);
        if let Some(window) = &payload.window {
            let _ = write!(detail, " window={window}");
        }
        self.describe_current(node, &detail);
    }

    fn visit_add_generated_uuid_column(
        &mut self,
        node: &DataflowNode,
        _payload: &AddGeneratedUuidColumnNode,
    ) {
        self.describe_current(node, "");
    }

    fn visit_filter_elements(&mut self, node: &DataflowNode, payload: &FilterElementsNode) {
        let mut columns: Vec<String> = Vec::new();
        columns.extend(
            payload
                .include_specs
                .measure_specs
                .iter()
                .map(|spec| spec.to_string()),
        );
        columns.extend(
            payload
                .include_specs
                .metric_specs
                .iter()
                .map(|spec| spec.to_string()),
        );
        columns.extend(
            payload
                .include_specs
                .linkable_specs
                .as_specs()
                .iter()
                .map(|spec| spec.to_string()),
        );
        let mut detail = format!("include=[{}]", columns.join(", "));
        if payload.distinct {
            detail.push_str(" distinct");
        }
        self.describe_current(node, &detail);
    }

    fn visit_where_constraint(&mut self, node: &DataflowNode, payload: &WhereConstraintNode) {
        let filters = payload
            .where_specs
            .iter()
            .map(|spec| format!("\"{}\"", spec.where_sql))
            .collect::<Vec<_>>()
            .join(", ");
        let mut detail = format!("filters=[{filters}]");
        if payload.always_apply {
            detail.push_str(" always_apply");
        }
        self.describe_current(node, &detail);
    }

    fn visit_constrain_time_range(&mut self, node: &DataflowNode, payload: &ConstrainTimeRangeNode) {
        self.describe_current(node, &format!("range={}", payload.time_range));
    }

    fn visit_aggregate_metric_inputs(
        &mut self,
        node: &DataflowNode,
        payload: &AggregateMetricInputsNode,
    ) {
        self.describe_current(
            node,
            &format!("inputs=[{}]", comma_list(&payload.metric_input_specs)),
        );
    }

    fn visit_semi_additive_join(&mut self, node: &DataflowNode, payload: &SemiAdditiveJoinNode) {
        self.describe_current(
            node,
            &format!(
                "on={} choose={:?}",
                payload.time_dimension_spec, payload.agg_by_function,
            ),
        );
    }

    fn visit_compute_metrics(&mut self, node: &DataflowNode, payload: &ComputeMetricsNode) {
        self.describe_current(
            node,
            &format!("metrics=[{}]", comma_list(&payload.metric_specs)),
        );
    }

    fn visit_combine_aggregated_outputs(
        &mut self,
        node: &DataflowNode,
        _payload: &CombineAggregatedOutputsNode,
    ) {
        self.describe_current(node, "");
    }

    fn visit_window_reaggregation(
        &mut self,
        node: &DataflowNode,
        payload: &WindowReaggregationNode,
    ) {
        self.describe_current(
            node,
            &format!(
                "metric={} order_by={}",
                payload.metric_spec, payload.order_by_spec,
            ),
        );
    }

    fn visit_order_by_limit(&mut self, node: &DataflowNode, payload: &OrderByLimitNode) {
        let mut detail = format!("order_by=[{}]", comma_list(&payload.order_by_specs));
        if let Some(limit) = payload.limit {
            let _ = write!(detail, " limit={limit}");
        }
        self.describe_current(node, &detail);
    }

    fn visit_write_to_result_table(
        &mut self,
        node: &DataflowNode,
        _payload: &WriteToResultTableNode,
    ) {
        self.describe_current(node, "");
    }
}

impl fmt::Display for DataflowPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut describer = PlanDescriber::new();
        self.sink_node().accept(&mut describer);
        f.write_str(describer.out.trim_end())
    }
}
