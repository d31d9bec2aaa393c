//! Per-build memoization.
//!
//! Both caches live for a single plan build. Recipe searches and metric
//! output nodes recur heavily across sibling metrics and derived-metric
//! branches; cache hits return clones of the already-built `Arc` chains, so
//! branches built from the same parameters share nodes outright.

use std::collections::HashMap;

use crate::dataflow::DataflowNodeRef;
use crate::optimizer::PredicatePushdownState;
use crate::spec::{LinkableSpecSet, MetricSpec, TimeRangeConstraint, WhereFilterSpec};

use super::recipe::{SourceNodeRecipe, SourceRecipeParams};

/// Cache key for one metric branch build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricOutputParams {
    pub metric_spec: MetricSpec,
    pub queried_linkable_specs: LinkableSpecSet,
    pub where_filter_specs: Vec<WhereFilterSpec>,
    pub time_range_constraint: Option<TimeRangeConstraint>,
    pub predicate_pushdown_state: PredicatePushdownState,
    pub for_group_by_source_node: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildCacheStats {
    /// Fresh recipe searches (cache misses).
    pub source_recipe_searches: usize,
    pub source_recipe_cache_hits: usize,
    /// Fresh metric branch builds (cache misses).
    pub metric_output_builds: usize,
    pub metric_output_cache_hits: usize,
}

#[derive(Debug, Default)]
pub struct BuildCaches {
    source_recipe_cache: HashMap<SourceRecipeParams, Option<SourceNodeRecipe>>,
    metric_output_cache: HashMap<MetricOutputParams, DataflowNodeRef>,
    stats: BuildCacheStats,
}

impl BuildCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BuildCacheStats {
        self.stats
    }

    /// `None` recipes are cached too: a failed search for the same params
    /// would fail the same way.
    pub fn cached_source_recipe(
        &mut self,
        params: &SourceRecipeParams,
    ) -> Option<Option<SourceNodeRecipe>> {
        match self.source_recipe_cache.get(params) {
            Some(entry) => {
                self.stats.source_recipe_cache_hits += 1;
                Some(entry.clone())
            }
            None => {
                self.stats.source_recipe_searches += 1;
                None
            }
        }
    }

    pub fn store_source_recipe(
        &mut self,
        params: SourceRecipeParams,
        recipe: Option<SourceNodeRecipe>,
    ) {
        self.source_recipe_cache.insert(params, recipe);
    }

    pub fn cached_metric_output(
        &mut self,
        params: &MetricOutputParams,
    ) -> Option<DataflowNodeRef> {
        match self.metric_output_cache.get(params) {
            Some(node) => {
                self.stats.metric_output_cache_hits += 1;
                Some(node.clone())
            }
            None => {
                self.stats.metric_output_builds += 1;
                None
            }
        }
    }

    pub fn store_metric_output(&mut self, params: MetricOutputParams, node: DataflowNodeRef) {
        self.metric_output_cache.insert(params, node);
    }
}
