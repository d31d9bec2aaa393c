//! Build cache behavior: metric subtrees and source recipes reused within
//! and across builds, and invalidation when branch state changes.

use strata::builder::{BuildCaches, DataflowPlanBuilder, OptimizationLevel};
use strata::dataflow::DataflowPlan;
use strata::manifest::SemanticManifestLookup;
use strata::spec::MetricQuery;
use strata::testing::fixture_manifest;

fn count_kind(plan: &DataflowPlan, kind: &str) -> usize {
    plan.nodes()
        .iter()
        .filter(|node| node.kind_name() == kind)
        .count()
}

#[test]
fn metric_subtrees_are_reused_within_a_build() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);
    let mut caches = BuildCaches::new();

    // booking_fees derives from booking_value, which is also queried
    // directly; the derived branch reuses the finished subtree.
    let query = MetricQuery::for_metrics(["booking_value", "booking_fees"]);
    let plan = builder.build_plan_with_caches(&query, &mut caches).unwrap();

    let stats = caches.stats();
    assert_eq!(stats.metric_output_builds, 2);
    assert_eq!(stats.metric_output_cache_hits, 1);
    assert_eq!(stats.source_recipe_searches, 1);
    assert_eq!(stats.source_recipe_cache_hits, 0);

    // The shared subtree is one set of nodes, not a copy per consumer.
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);
    assert_eq!(count_kind(&plan, "ComputeMetrics"), 2);
}

#[test]
fn measure_recipes_are_shared_across_metrics() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);
    let mut caches = BuildCaches::new();

    // Two metrics over the same measure with identical requirements share
    // one recipe search.
    let query = MetricQuery::for_metrics(["bookings", "bookings_join_to_time_spine"]);
    let plan = builder.build_plan_with_caches(&query, &mut caches).unwrap();

    let stats = caches.stats();
    assert_eq!(stats.metric_output_builds, 2);
    assert_eq!(stats.metric_output_cache_hits, 0);
    assert_eq!(stats.source_recipe_searches, 1);
    assert_eq!(stats.source_recipe_cache_hits, 1);
    assert_eq!(count_kind(&plan, "ReadSqlSource"), 1);
}

#[test]
fn repeated_builds_hit_the_metric_cache() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);
    let mut caches = BuildCaches::new();

    let query = MetricQuery::for_metrics(["bookings"]);
    let first = builder.build_plan_with_caches(&query, &mut caches).unwrap();
    let second = builder.build_plan_with_caches(&query, &mut caches).unwrap();

    let stats = caches.stats();
    assert_eq!(stats.metric_output_builds, 1);
    assert_eq!(stats.metric_output_cache_hits, 1);
    assert_eq!(stats.source_recipe_searches, 1);
    assert!(first.structurally_equivalent(&second));
}

#[test]
fn changed_filters_rebuild_instead_of_reusing() {
    let manifest = fixture_manifest();
    let lookup = SemanticManifestLookup::new(&manifest).unwrap();
    let builder = DataflowPlanBuilder::new(&lookup)
        .unwrap()
        .with_optimization_level(OptimizationLevel::None);
    let mut caches = BuildCaches::new();

    let plain = MetricQuery::for_metrics(["bookings"]);
    builder.build_plan_with_caches(&plain, &mut caches).unwrap();

    let filtered = MetricQuery::for_metrics(["bookings"])
        .with_filter_sql("{{ Dimension('booking__is_instant') }}")
        .unwrap();
    builder.build_plan_with_caches(&filtered, &mut caches).unwrap();

    let stats = caches.stats();
    assert_eq!(stats.metric_output_builds, 2);
    assert_eq!(stats.metric_output_cache_hits, 0);
    assert_eq!(stats.source_recipe_searches, 2);
    assert_eq!(stats.source_recipe_cache_hits, 0);
}
