//! End-to-end predicate pushdown: categorical filters migrate to source
//! scans under the standard optimization level, time filters stay put, and
//! rewritten plans are stable under repeated optimization.

use strata::builder::{DataflowPlanBuilder, OptimizationLevel};
use strata::dataflow::{DataflowPlan, NodeKind, WhereConstraintNode};
use strata::manifest::SemanticManifestLookup;
use strata::optimizer::{DataflowPlanOptimizer, PredicatePushdownOptimizer};
use strata::spec::{DimensionSpec, MetricQuery, TimeDimensionSpec, TimeGranularity, METRIC_TIME};
use strata::testing::fixture_manifest;

fn where_constraints(plan: &DataflowPlan) -> Vec<WhereConstraintNode> {
    plan.nodes()
        .into_iter()
        .filter_map(|node| match node.kind() {
            NodeKind::WhereConstraint(payload) => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

fn filtered_query() -> MetricQuery {
    MetricQuery::for_metrics(["bookings"])
        .group_by(DimensionSpec::with_links("country_latest", ["listing"]))
        .with_filter_sql("{{ Dimension('booking__is_instant') }}")
        .unwrap()
}

#[test]
fn categorical_filters_migrate_to_the_scan() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder.build_plan(&filtered_query()).unwrap();

    let constraints = where_constraints(&plan);
    assert_eq!(constraints.len(), 1);
    assert!(!constraints[0].always_apply);
    assert!(matches!(
        constraints[0].parent.kind(),
        NodeKind::ReadSqlSource(_),
    ));
}

#[test]
fn unoptimized_plans_filter_at_both_levels() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);

    // The branch constraint and the recipe's scan-side copy both survive
    // when no optimizer runs.
    let plan = builder.build_plan(&filtered_query()).unwrap();
    assert_eq!(where_constraints(&plan).len(), 2);
}

#[test]
fn time_filters_stay_at_their_constraint_node() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let query = MetricQuery::for_metrics(["bookings"])
        .group_by(TimeDimensionSpec::local(METRIC_TIME, TimeGranularity::Day))
        .with_filter_sql("{{ TimeDimension('metric_time', 'day') }} >= '2020-01-01'")
        .unwrap();
    let plan = builder.build_plan(&query).unwrap();

    let constraints = where_constraints(&plan);
    assert_eq!(constraints.len(), 1);
    assert!(matches!(
        constraints[0].parent.kind(),
        NodeKind::MetricTimeTransform(_),
    ));
}

#[test]
fn optimized_plans_are_stable_under_reruns() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup).unwrap();

    let plan = builder.build_plan(&filtered_query()).unwrap();
    let optimizer = PredicatePushdownOptimizer::new(&lookup);
    let rerun = optimizer.optimize(&plan).unwrap();
    assert!(plan.structurally_equivalent(&rerun));
}
