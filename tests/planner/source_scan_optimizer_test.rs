//! End-to-end source scan merging: parallel metric branches over the same
//! model collapse onto one scan unless their aggregations differ.

use strata::builder::{DataflowPlanBuilder, OptimizationLevel};
use strata::dataflow::{DataflowPlan, NodeKind};
use strata::manifest::SemanticManifestLookup;
use strata::optimizer::{DataflowPlanOptimizer, SourceScanOptimizer};
use strata::spec::{MetricQuery, TimeDimensionSpec, TimeGranularity, METRIC_TIME};
use strata::testing::fixture_manifest;

fn count_kind(plan: &DataflowPlan, kind: &str) -> usize {
    plan.nodes()
        .iter()
        .filter(|node| node.kind_name() == kind)
        .count()
}

#[test]
fn metrics_grouped_by_time_share_one_transform() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["bookings", "booking_value"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);
    assert_eq!(count_kind(&plan, "MetricTimeTransform"), 1);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 0);
    assert_eq!(count_kind(&plan, "AggregateMetricInputs"), 1);

    let compute = plan
        .nodes()
        .into_iter()
        .find_map(|node| match node.kind() {
            NodeKind::ComputeMetrics(payload) => Some(payload.clone()),
            _ => None,
        })
        .unwrap();
    let names: Vec<&str> = compute
        .metric_specs
        .iter()
        .map(|spec| spec.element_name.as_str())
        .collect();
    assert_eq!(names, vec!["bookings", "booking_value"]);
}

#[test]
fn unoptimized_branches_each_scan_the_model() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    let query = MetricQuery::for_metrics(["bookings", "booking_value"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 2);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 1);
}

#[test]
fn aliased_aggregations_keep_their_branches_apart() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    // The offset branch renames its aggregated column, so the two bookings
    // aggregations cannot be merged even though they read the same model.
    let query = MetricQuery::for_metrics(["bookings_growth_mom"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 1);
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 3);
    assert_eq!(count_kind(&plan, "JoinToTimeSpine"), 1);
}

#[test]
fn constrained_metrics_keep_a_separate_scan() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    // instant_bookings filters its rows before aggregating, so its branch
    // cannot share a scan with the unfiltered bookings branch.
    let query = MetricQuery::for_metrics(["bookings", "instant_bookings"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();

    assert_eq!(count_kind(&plan, "ReadSqlSource"), 2);
    assert_eq!(count_kind(&plan, "CombineAggregatedOutputs"), 1);
}

#[test]
fn merging_is_idempotent() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["bookings", "booking_value", "max_booking_value"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day));
    let plan = builder.build_plan(&query).unwrap();
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);

    let rerun = SourceScanOptimizer.optimize(&plan).unwrap();
    assert!(plan.structurally_equivalent(&rerun));
}
