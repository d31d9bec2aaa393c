//! Distinct-values plans: group-by-only queries that list the value
//! combinations of linkable elements without aggregating anything.

use strata::builder::{BuildError, DataflowPlanBuilder};
use strata::dataflow::{DataflowPlan, FilterElementsNode, NodeKind, SqlJoinType};
use strata::manifest::SemanticManifestLookup;
use strata::spec::{
    DimensionSpec, ExpandedGranularity, InstanceSpec, LinkableSpec, MetricQuery, OrderBySpec,
    TimeDimensionSpec, TimeGranularity, METRIC_TIME,
};
use strata::testing::fixture_manifest;

fn count_kind(plan: &DataflowPlan, kind: &str) -> usize {
    plan.nodes()
        .iter()
        .filter(|node| node.kind_name() == kind)
        .count()
}

fn find_projection(plan: &DataflowPlan) -> FilterElementsNode {
    plan.nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::FilterElements(payload) => Some(payload.clone()),
            _ => None,
        })
        .expect("distinct-values plan should project the queried elements")
}

#[test]
fn distinct_values_project_without_aggregating() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_group_by([LinkableSpec::from(DimensionSpec::with_links(
        "country_latest",
        ["listing"],
    ))]);
    let plan = builder.build_plan_for_distinct_values(&query).unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);
    assert_eq!(count_kind(&plan, "AggregateMetricInputs"), 0);
    assert_eq!(count_kind(&plan, "ComputeMetrics"), 0);

    let projection = find_projection(&plan);
    assert!(projection.distinct);
    assert!(projection.include_specs.measure_specs.is_empty());
    assert_eq!(
        projection.include_specs.linkable_specs.dimension_specs,
        vec![DimensionSpec::with_links("country_latest", ["listing"])],
    );
}

#[test]
fn metrics_are_rejected_from_the_distinct_values_path() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let err = builder
        .build_plan_for_distinct_values(&MetricQuery::for_metrics(["bookings"]))
        .unwrap_err();
    assert!(matches!(err, BuildError::MetricsInDistinctValuesQuery));
}

#[test]
fn filters_apply_before_the_distinct_projection() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_group_by([LinkableSpec::from(DimensionSpec::with_links(
        "country_latest",
        ["listing"],
    ))])
    .with_filter_sql("{{ Dimension('booking__is_instant') }}")
    .unwrap();
    let plan = builder.build_plan_for_distinct_values(&query).unwrap();

    let projection = find_projection(&plan);
    let NodeKind::WhereConstraint(constraint) = projection.parent.kind() else {
        panic!("the filter should run before the distinct projection");
    };
    assert!(!constraint.always_apply);
    assert!(matches!(
        constraint.parent.kind(),
        NodeKind::JoinOnEntities(_),
    ));

    // Either side of a full join may hold rows the other side lacks, so the
    // join runs unfiltered.
    let join = plan
        .nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::JoinOnEntities(payload) => Some(payload.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(join.joins[0].join_type, SqlJoinType::FullOuter);
    assert!(matches!(join.left.kind(), NodeKind::ReadSqlSource(_)));
}

#[test]
fn custom_grains_resolve_to_their_base_column() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_group_by([LinkableSpec::from(TimeDimensionSpec::new(
        METRIC_TIME,
        Vec::new(),
        ExpandedGranularity::custom("retail_month", TimeGranularity::Month),
    ))]);
    let plan = builder.build_plan_for_distinct_values(&query).unwrap();

    let projection = find_projection(&plan);
    assert_eq!(
        projection.include_specs.linkable_specs.time_dimension_specs,
        vec![TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Month)],
    );
}

#[test]
fn order_and_limit_shape_the_output() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let country = DimensionSpec::with_links("country_latest", ["listing"]);
    let query = MetricQuery::for_group_by([LinkableSpec::from(country.clone())])
        .order_by(OrderBySpec::asc(InstanceSpec::Linkable(LinkableSpec::from(
            country,
        ))))
        .with_limit(10);
    let plan = builder.build_plan_for_distinct_values(&query).unwrap();

    let NodeKind::WriteToResultTable(write) = plan.sink_node().kind() else {
        panic!("plan should end at a write");
    };
    let NodeKind::OrderByLimit(ordered) = write.parent.kind() else {
        panic!("order and limit should shape the written output");
    };
    assert_eq!(ordered.limit, Some(10));
    assert_eq!(ordered.order_by_specs.len(), 1);
    assert!(!ordered.order_by_specs[0].descending);
    assert!(matches!(ordered.parent.kind(), NodeKind::FilterElements(_)));
}
