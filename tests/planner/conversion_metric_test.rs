//! Plan shape for conversion metrics: the deduplicated base branch, the
//! unfiltered conversion branch, and the event-attribution join between them.

use chrono::NaiveDate;
use strata::builder::{DataflowPlanBuilder, OptimizationLevel};
use strata::dataflow::{
    DataflowPlan, JoinConversionEventsNode, NodeKind, GENERATED_UUID_COLUMN,
};
use strata::manifest::SemanticManifestLookup;
use strata::spec::{
    EntitySpec, MeasureSpec, MetricQuery, MetricTimeWindow, TimeDimensionSpec, TimeGranularity,
    TimeRangeConstraint, METRIC_TIME,
};
use strata::testing::fixture_manifest;

fn count_kind(plan: &DataflowPlan, kind: &str) -> usize {
    plan.nodes()
        .iter()
        .filter(|node| node.kind_name() == kind)
        .count()
}

fn find_event_join(plan: &DataflowPlan) -> JoinConversionEventsNode {
    plan.nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::JoinConversionEvents(payload) => Some(payload.clone()),
            _ => None,
        })
        .expect("conversion plan should join base and conversion events")
}

#[test]
fn conversion_metric_attributes_events_through_the_entity() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    let query = MetricQuery::for_metrics(["visit_buy_conversion_rate"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "JoinConversionEvents"), 1);
    assert_eq!(count_kind(&plan, "AddGeneratedUuidColumn"), 1);
    assert_eq!(count_kind(&plan, "AggregateMetricInputs"), 2);
    assert_eq!(count_kind(&plan, "ComputeMetrics"), 1);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 1);
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 3);
    assert_eq!(
        plan.source_semantic_models().into_iter().collect::<Vec<_>>(),
        vec!["buys_source".to_string(), "visits_source".to_string()],
    );

    let event_join = find_event_join(&plan);
    assert_eq!(event_join.entity_spec, EntitySpec::local("user"));
    assert_eq!(
        event_join.window,
        Some(MetricTimeWindow::new(7, TimeGranularity::Day)),
    );
    assert_eq!(
        event_join.base_time_dimension_spec,
        TimeDimensionSpec::local("ds", TimeGranularity::Day),
    );
    assert_eq!(
        event_join.conversion_time_dimension_spec,
        TimeDimensionSpec::local("ds", TimeGranularity::Day),
    );
    assert_eq!(
        event_join.unique_identifier_keys,
        vec![GENERATED_UUID_COLUMN.to_string()],
    );
    assert!(event_join.constant_properties.is_empty());
}

#[test]
fn base_events_are_keyed_and_conversion_events_keep_their_measure() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    let query = MetricQuery::for_metrics(["visit_buy_conversion_rate"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();
    let event_join = find_event_join(&plan);

    let NodeKind::AddGeneratedUuidColumn(keyed) = event_join.base_node.kind() else {
        panic!("base events should be keyed for deduplication");
    };
    let NodeKind::FilterElements(base_projection) = keyed.parent.kind() else {
        panic!("base events should be projected before keying");
    };
    assert!(base_projection.include_specs.measure_specs.is_empty());

    let NodeKind::FilterElements(conversion_projection) = event_join.conversion_node.kind() else {
        panic!("conversion events should be projected before the join");
    };
    assert_eq!(
        conversion_projection.include_specs.measure_specs,
        vec![MeasureSpec::new("buys")],
    );
}

#[test]
fn queried_time_range_constrains_the_attributed_conversions() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    let range = TimeRangeConstraint::new(
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
    );
    let query = MetricQuery::for_metrics(["visit_buy_conversion_rate"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day))
        .with_time_range(range);
    let plan = builder.build_plan(&query).unwrap();

    // Base event scan, aggregated-base scan and branch, and the attributed
    // conversions each carry the constraint; the conversion scan does not.
    assert_eq!(count_kind(&plan, "ConstrainTimeRange"), 4);
    assert!(plan.nodes().iter().any(|node| matches!(
        node.kind(),
        NodeKind::ConstrainTimeRange(constraint)
            if constraint.time_range == range
                && matches!(constraint.parent.kind(), NodeKind::JoinConversionEvents(_))
    )));
}
