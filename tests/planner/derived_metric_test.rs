//! Plan shapes for derived and ratio metrics: stacked compute nodes, input
//! branch combination, and offset placement around the aggregation.

use strata::builder::{DataflowPlanBuilder, OptimizationLevel};
use strata::dataflow::{
    AggregateMetricInputsNode, ComputeMetricsNode, DataflowPlan, JoinToTimeSpineNode, NodeKind,
    SqlJoinType, WhereConstraintNode,
};
use strata::manifest::SemanticManifestLookup;
use strata::spec::{
    MetricQuery, MetricTimeWindow, TimeDimensionSpec, TimeGranularity, METRIC_TIME,
};
use strata::testing::fixture_manifest;

fn count_kind(plan: &DataflowPlan, kind: &str) -> usize {
    plan.nodes()
        .iter()
        .filter(|node| node.kind_name() == kind)
        .count()
}

fn compute_nodes(plan: &DataflowPlan) -> Vec<ComputeMetricsNode> {
    plan.nodes()
        .into_iter()
        .filter_map(|node| match node.kind() {
            NodeKind::ComputeMetrics(payload) => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

fn aggregate_nodes(plan: &DataflowPlan) -> Vec<AggregateMetricInputsNode> {
    plan.nodes()
        .into_iter()
        .filter_map(|node| match node.kind() {
            NodeKind::AggregateMetricInputs(payload) => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

fn find_spine_join(plan: &DataflowPlan) -> JoinToTimeSpineNode {
    plan.nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::JoinToTimeSpine(payload) => Some(payload.clone()),
            _ => None,
        })
        .expect("offset metric should join the time spine")
}

#[test]
fn derived_metric_computes_over_its_input_metric() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder
        .build_plan(&MetricQuery::for_metrics(["booking_fees"]))
        .unwrap();

    assert_eq!(count_kind(&plan, "ComputeMetrics"), 2);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 0);
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);

    let NodeKind::WriteToResultTable(write) = plan.sink_node().kind() else {
        panic!("plan should end at a write");
    };
    let NodeKind::ComputeMetrics(outer) = write.parent.kind() else {
        panic!("write should sit on the derived compute");
    };
    assert_eq!(outer.metric_specs[0].element_name, "booking_fees");
    let NodeKind::ComputeMetrics(inner) = outer.parent.kind() else {
        panic!("derived compute should stack on its input compute");
    };
    assert_eq!(inner.metric_specs[0].element_name, "booking_value");
}

#[test]
fn ratio_inputs_collapse_onto_one_scan() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder
        .build_plan(&MetricQuery::for_metrics(["booking_value_per_booking"]))
        .unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 0);
    assert_eq!(count_kind(&plan, "AggregateMetricInputs"), 1);
    assert_eq!(count_kind(&plan, "ComputeMetrics"), 2);

    let inner = compute_nodes(&plan)
        .into_iter()
        .find(|compute| compute.metric_specs.len() == 2)
        .expect("numerator and denominator should share a compute after merging");
    let names: Vec<&str> = inner
        .metric_specs
        .iter()
        .map(|spec| spec.element_name.as_str())
        .collect();
    assert_eq!(names, vec!["booking_value", "bookings"]);
}

#[test]
fn coarse_offset_joins_the_spine_before_aggregation() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    // A one-month offset against day-grain output must shift the raw rows.
    let query = MetricQuery::for_metrics(["bookings_growth_mom"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "JoinToTimeSpine"), 1);
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 3);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 1);
    assert_eq!(
        plan.source_semantic_models().into_iter().collect::<Vec<_>>(),
        vec!["bookings_source".to_string()],
    );

    let spine_join = find_spine_join(&plan);
    assert_eq!(spine_join.join_type, SqlJoinType::Inner);
    assert_eq!(
        spine_join.offset_window,
        Some(MetricTimeWindow::new(1, TimeGranularity::Month)),
    );
    assert!(!matches!(
        spine_join.parent.kind(),
        NodeKind::AggregateMetricInputs(_),
    ));

    let aggregates = aggregate_nodes(&plan);
    let aliases: Vec<Option<&str>> = aggregates
        .iter()
        .map(|aggregate| aggregate.metric_input_specs[0].alias.as_deref())
        .collect();
    assert!(aliases.contains(&Some("bookings_bookings")));
    assert!(aliases.contains(&None));
    assert!(compute_nodes(&plan)
        .iter()
        .any(|compute| compute.metric_specs[0].alias.as_deref() == Some("bookings_last_month")));
}

#[test]
fn aligned_offset_joins_the_spine_after_aggregation() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    let query = MetricQuery::for_metrics(["bookings_growth_mom"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Month));
    let plan = builder.build_plan(&query).unwrap();

    let spine_join = find_spine_join(&plan);
    assert_eq!(spine_join.join_type, SqlJoinType::Inner);
    assert_eq!(
        spine_join.offset_window,
        Some(MetricTimeWindow::new(1, TimeGranularity::Month)),
    );
    assert!(spine_join.time_range_constraint.is_none());
    assert!(matches!(
        spine_join.parent.kind(),
        NodeKind::AggregateMetricInputs(_),
    ));
}

#[test]
fn offset_branch_defers_time_filters_past_the_spine_join() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    let query = MetricQuery::for_metrics(["bookings_growth_mom"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Month))
        .with_filter_sql("{{ TimeDimension('metric_time', 'month') }} >= '2020-01-01'")
        .unwrap();
    let plan = builder.build_plan(&query).unwrap();

    let deferred: Vec<WhereConstraintNode> = plan
        .nodes()
        .into_iter()
        .filter_map(|node| match node.kind() {
            NodeKind::WhereConstraint(payload) if payload.always_apply => Some(payload.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deferred.len(), 1);
    assert!(matches!(
        deferred[0].parent.kind(),
        NodeKind::JoinToTimeSpine(_),
    ));

    // The unshifted input applies the same filter in place.
    assert!(plan.nodes().iter().any(|node| matches!(
        node.kind(),
        NodeKind::WhereConstraint(payload) if !payload.always_apply
    )));
}
