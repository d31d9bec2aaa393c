//! Plan shapes for simple metrics: source selection, entity joins, measure
//! aliasing, semi-additive windows, and the post-aggregation spine join for
//! fill-nulls measures.

use strata::builder::DataflowPlanBuilder;
use strata::dataflow::{
    AggregateMetricInputsNode, DataflowPlan, JoinToTimeSpineNode, NodeKind, SemiAdditiveJoinNode,
    SqlJoinType,
};
use strata::manifest::{NonAdditiveWindowChoice, SemanticManifestLookup};
use strata::spec::{
    DimensionSpec, EntitySpec, MetricQuery, TimeDimensionSpec, TimeGranularity, METRIC_TIME,
};
use strata::testing::fixture_manifest;

fn count_kind(plan: &DataflowPlan, kind: &str) -> usize {
    plan.nodes()
        .iter()
        .filter(|node| node.kind_name() == kind)
        .count()
}

fn find_aggregate(plan: &DataflowPlan) -> AggregateMetricInputsNode {
    plan.nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::AggregateMetricInputs(payload) => Some(payload.clone()),
            _ => None,
        })
        .expect("plan should contain an aggregation")
}

#[test]
fn ungrouped_metric_aggregates_a_single_scan() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder
        .build_plan(&MetricQuery::for_metrics(["bookings"]))
        .unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);
    assert_eq!(count_kind(&plan, "JoinOnEntities"), 0);
    assert_eq!(count_kind(&plan, "MetricTimeTransform"), 0);
    assert_eq!(count_kind(&plan, "ComputeMetrics"), 1);

    let aggregate = find_aggregate(&plan);
    assert_eq!(aggregate.metric_input_specs.len(), 1);
    let input = &aggregate.metric_input_specs[0];
    assert_eq!(input.measure_spec.element_name, "bookings");
    assert!(input.alias.is_none());
    assert!(input.filter_specs.is_empty());
}

#[test]
fn grouped_metric_joins_the_dimension_model() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["bookings"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day))
        .group_by(DimensionSpec::with_links("country_latest", ["listing"]));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 2);
    assert_eq!(count_kind(&plan, "MetricTimeTransform"), 1);
    assert_eq!(count_kind(&plan, "JoinOnEntities"), 1);
    assert_eq!(
        plan.source_semantic_models().into_iter().collect::<Vec<_>>(),
        vec!["bookings_source".to_string(), "listings_source".to_string()],
    );

    let join = plan
        .nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::JoinOnEntities(payload) => Some(payload.clone()),
            _ => None,
        })
        .expect("grouping by a foreign dimension should join");
    assert_eq!(join.joins.len(), 1);
    assert_eq!(join.joins[0].join_type, SqlJoinType::LeftOuter);
    assert_eq!(
        join.joins[0]
            .join_on_entity
            .as_ref()
            .map(|entity| entity.element_name.as_str()),
        Some("listing"),
    );
}

#[test]
fn two_hop_dimension_routes_through_the_bridge_model() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["bookings"]).group_by(DimensionSpec::with_links(
        "home_state_latest",
        ["listing", "user"],
    ));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 3);
    assert_eq!(
        plan.source_semantic_models().into_iter().collect::<Vec<_>>(),
        vec![
            "bookings_source".to_string(),
            "listings_source".to_string(),
            "users_source".to_string(),
        ],
    );
}

#[test]
fn filtered_metric_aliases_its_aggregated_measure() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder
        .build_plan(&MetricQuery::for_metrics(["instant_bookings"]))
        .unwrap();

    let aggregate = find_aggregate(&plan);
    assert_eq!(aggregate.metric_input_specs.len(), 1);
    let input = &aggregate.metric_input_specs[0];
    assert_eq!(input.measure_spec.element_name, "bookings");
    assert_eq!(input.alias.as_deref(), Some("bookings_instant_bookings"));
    assert_eq!(input.filter_specs.len(), 1);
}

#[test]
fn fill_nulls_measure_joins_the_spine_after_aggregation() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["bookings_join_to_time_spine"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "JoinToTimeSpine"), 1);
    let spine_join: JoinToTimeSpineNode = plan
        .nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::JoinToTimeSpine(payload) => Some(payload.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(spine_join.join_type, SqlJoinType::LeftOuter);
    assert!(spine_join.offset_window.is_none());
    assert!(spine_join.offset_to_grain.is_none());
    assert!(matches!(
        spine_join.parent.kind(),
        NodeKind::AggregateMetricInputs(_),
    ));
    assert_eq!(
        spine_join.requested_agg_time_dimension_specs,
        vec![TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day)],
    );
}

#[test]
fn ungrouped_fill_nulls_measure_needs_no_spine() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder
        .build_plan(&MetricQuery::for_metrics(["bookings_join_to_time_spine"]))
        .unwrap();
    assert_eq!(count_kind(&plan, "JoinToTimeSpine"), 0);
}

fn find_semi_additive(plan: &DataflowPlan) -> SemiAdditiveJoinNode {
    plan.nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::SemiAdditiveJoin(payload) => Some(payload.clone()),
            _ => None,
        })
        .expect("plan should window the semi-additive measure")
}

#[test]
fn semi_additive_measure_windows_on_its_queried_grain() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["current_account_balance"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "SemiAdditiveJoin"), 1);
    let window = find_semi_additive(&plan);
    assert!(window.entity_specs.is_empty());
    assert_eq!(window.agg_by_function, NonAdditiveWindowChoice::Min);
    assert_eq!(
        window.time_dimension_spec,
        TimeDimensionSpec::local("ds", TimeGranularity::Day),
    );
    assert_eq!(
        window.queried_time_dimension_spec,
        Some(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day)),
    );
    assert!(matches!(window.parent.kind(), NodeKind::FilterElements(_)));
}

#[test]
fn grouped_semi_additive_measure_keeps_its_entity_grouping() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder
        .build_plan(&MetricQuery::for_metrics(["account_balance_by_user"]))
        .unwrap();

    let window = find_semi_additive(&plan);
    assert_eq!(window.entity_specs, vec![EntitySpec::local("user")]);
    assert_eq!(window.agg_by_function, NonAdditiveWindowChoice::Max);
    // Nothing time-like was queried, so no per-period collapse applies.
    assert!(window.queried_time_dimension_spec.is_none());
}
