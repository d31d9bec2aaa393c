//! Assembles dataflow plans from metric queries.
//!
//! The builder resolves every queried metric against the semantic manifest,
//! searches the source node set for scans able to provide the queried
//! elements, and wires complete node chains from table reads up to the
//! terminal write. Construction is cached at two levels: source recipes,
//! keyed by what a scan must provide, and finished metric subtrees, keyed by
//! the metric plus its branch state. Finished plans run through the standard
//! optimizer pass unless the caller opts out.

pub mod cache;
pub mod evaluator;
pub mod recipe;
pub mod source_nodes;

use thiserror::Error;

use crate::dataflow::{
    AddGeneratedUuidColumnNode, AggregateMetricInputsNode, CombineAggregatedOutputsNode,
    ComputeMetricsNode, ConstrainTimeRangeNode, DataflowNode, DataflowNodeRef, DataflowPlan,
    FilterElementsNode, JoinConversionEventsNode, JoinOverTimeRangeNode, JoinToTimeSpineNode,
    NodeIdAllocator, NodeKind, OrderByLimitNode, SemiAdditiveJoinNode, SqlJoinType,
    WhereConstraintNode, WindowReaggregationNode, WriteToResultTableNode, GENERATED_UUID_COLUMN,
};
use crate::manifest::{
    CumulativeTypeParams, ManifestError, Metric, MetricInputMeasure, MetricType,
    NonAdditiveDimensionParams, NonAdditiveWindowChoice, SemanticManifestLookup, SemanticModel,
};
use crate::optimizer::{
    DataflowPlanOptimizer, PredicatePushdownOptimizer, PredicatePushdownState, SourceScanOptimizer,
};
use crate::spec::{
    DimensionSpec, EntitySpec, FilterParseError, InstanceSpecSet, LinkableSpec, LinkableSpecSet,
    MeasureSpec, MetricInputSpec, MetricQuery, MetricSpec, MetricTimeWindow, TimeDimensionSpec,
    TimeGranularity, TimeRangeConstraint, WhereFilterSpec, METRIC_TIME,
};

use recipe::instantiate_template;

pub use cache::{BuildCacheStats, BuildCaches, MetricOutputParams};
pub use evaluator::{JoinLinkableInstanceSet, NodeEvaluation, NodeEvaluator};
pub use recipe::{rewrite_custom_grains, SourceNodeRecipe, SourceRecipeFinder, SourceRecipeParams};
pub use source_nodes::{SourceNodeCandidate, SourceNodeSet};

fn format_spec_list(specs: &[LinkableSpec]) -> String {
    specs
        .iter()
        .map(LinkableSpec::qualified_name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures raised while assembling a plan.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No source node, alone or joined, provides every required element.
    /// Carries the full requirement so callers can report what was asked for.
    #[error(
        "unable to satisfy the query; no source node combination provides: {}",
        format_spec_list(.required_specs)
    )]
    UnableToSatisfyQuery { required_specs: Vec<LinkableSpec> },

    #[error("manifest configuration: {0}")]
    Manifest(#[from] ManifestError),

    #[error("filter template: {0}")]
    Filter(#[from] FilterParseError),

    #[error("query has no metrics; group-by-only queries take the distinct-values path")]
    NoMetricsInQuery,

    #[error("distinct-values queries cannot carry metrics")]
    MetricsInDistinctValuesQuery,

    #[error("no time spine covers granularity '{0}'")]
    NoTimeSpineForGranularity(TimeGranularity),
}

/// How aggressively built plans are rewritten before they are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptimizationLevel {
    /// Return plans exactly as constructed.
    None,
    /// Predicate pushdown followed by source scan merging.
    #[default]
    Standard,
}

/// Build state scoped to one branch of the metric tree. Children of an offset
/// metric get a stripped copy; everyone else inherits the parent's.
#[derive(Debug, Clone)]
struct BranchContext {
    queried_linkable_specs: LinkableSpecSet,
    where_filter_specs: Vec<WhereFilterSpec>,
    time_range_constraint: Option<TimeRangeConstraint>,
    pushdown_state: PredicatePushdownState,
    for_group_by_source_node: bool,
}

impl BranchContext {
    fn cache_key(&self, metric_spec: &MetricSpec) -> MetricOutputParams {
        MetricOutputParams {
            metric_spec: metric_spec.clone(),
            queried_linkable_specs: self.queried_linkable_specs.clone(),
            where_filter_specs: self.where_filter_specs.clone(),
            time_range_constraint: self.time_range_constraint,
            predicate_pushdown_state: self.pushdown_state.clone(),
            for_group_by_source_node: self.for_group_by_source_node,
        }
    }
}

/// Resolved semi-additive aggregation parameters for one measure.
struct SemiAdditiveDescription {
    entity_specs: Vec<EntitySpec>,
    time_dimension_spec: TimeDimensionSpec,
    agg_by_function: NonAdditiveWindowChoice,
    queried_time_dimension_spec: Option<TimeDimensionSpec>,
}

/// Per-measure compute description: which filters the branch applies, what
/// range the scan reads, and where the time-spine join lands relative to
/// aggregation.
struct SimpleMetricRecipe {
    branch_filters: Vec<WhereFilterSpec>,
    queried_agg_time_specs: Vec<TimeDimensionSpec>,
    spine_time_specs: Vec<TimeDimensionSpec>,
    smallest_queried_grain: Option<TimeGranularity>,
    has_offset: bool,
    offset_join_before: bool,
    offset_join_after: bool,
    fill_join_after: bool,
    scan_range: Option<TimeRangeConstraint>,
}

impl SimpleMetricRecipe {
    fn derive(
        metric: &Metric,
        metric_spec: &MetricSpec,
        input_measure: &MetricInputMeasure,
        cumulative: Option<&CumulativeTypeParams>,
        context: &BranchContext,
        agg_time_spec: &TimeDimensionSpec,
        rewritten_queried: &LinkableSpecSet,
    ) -> Result<Self, BuildError> {
        let mut branch_filters = context.where_filter_specs.clone();
        branch_filters.extend(metric_spec.filter_specs.iter().cloned());
        if let Some(template) = &metric.filter {
            branch_filters.push(WhereFilterSpec::parse(template)?);
        }
        if let Some(template) = &input_measure.filter {
            branch_filters.push(WhereFilterSpec::parse(template)?);
        }
        let branch_filters = dedupe_filters(branch_filters);

        let queried_agg_time_specs: Vec<TimeDimensionSpec> = rewritten_queried
            .time_dimension_specs
            .iter()
            .filter(|spec| {
                spec.entity_links.is_empty()
                    && (spec.element_name == METRIC_TIME
                        || spec.element_name == agg_time_spec.element_name)
            })
            .cloned()
            .collect();
        let spine_time_specs: Vec<TimeDimensionSpec> = queried_agg_time_specs
            .iter()
            .filter(|spec| spec.date_part.is_none())
            .cloned()
            .collect();
        let smallest_queried_grain = queried_agg_time_specs
            .iter()
            .map(TimeDimensionSpec::base_granularity)
            .min();

        let has_offset = metric_spec.has_offset();
        // A coarse offset must shift before aggregation or the finer queried
        // periods all collapse onto the shifted coarse boundary.
        let offset_join_before = has_offset
            && !spine_time_specs.is_empty()
            && match (metric_spec.offset_granularity(), smallest_queried_grain) {
                (Some(offset_grain), Some(queried_grain)) => {
                    offset_grain.is_coarser_than(queried_grain)
                }
                _ => false,
            };
        let offset_join_after = has_offset && !spine_time_specs.is_empty() && !offset_join_before;
        let fill_join_after =
            input_measure.join_to_timespine && !spine_time_specs.is_empty() && !offset_join_after;

        let original_range = context.time_range_constraint;
        let scan_range = match cumulative {
            Some(params) => match (&params.window, params.grain_to_date) {
                (Some(window), _) => original_range.map(|range| range.expand_for_window(window)),
                (None, Some(grain)) => {
                    original_range.map(|range| range.expand_to_period_begin(grain))
                }
                // Accumulation over all time reads unconstrained history.
                (None, None) => None,
            },
            None => original_range,
        };

        Ok(Self {
            branch_filters,
            queried_agg_time_specs,
            spine_time_specs,
            smallest_queried_grain,
            has_offset,
            offset_join_before,
            offset_join_after,
            fill_join_after,
            scan_range,
        })
    }
}

fn dedupe_filters(filters: Vec<WhereFilterSpec>) -> Vec<WhereFilterSpec> {
    let mut out: Vec<WhereFilterSpec> = Vec::with_capacity(filters.len());
    for filter in filters {
        if !out.contains(&filter) {
            out.push(filter);
        }
    }
    out
}

/// Split filters into those referencing a time dimension and the rest.
fn partition_time_referencing(
    filters: Vec<WhereFilterSpec>,
) -> (Vec<WhereFilterSpec>, Vec<WhereFilterSpec>) {
    filters
        .into_iter()
        .partition(|filter| !filter.linkable_spec_set.time_dimension_specs.is_empty())
}

fn required_measure(metric: &Metric) -> Result<&MetricInputMeasure, ManifestError> {
    metric
        .type_params
        .measure
        .as_ref()
        .ok_or_else(|| ManifestError::MissingTypeParams {
            metric: metric.name.clone(),
            params: "measure",
        })
}

/// Builds optimized dataflow plans for metric queries against one manifest.
pub struct DataflowPlanBuilder<'a> {
    manifest_lookup: &'a SemanticManifestLookup<'a>,
    source_node_set: SourceNodeSet,
    optimization_level: OptimizationLevel,
}

impl<'a> DataflowPlanBuilder<'a> {
    pub fn new(manifest_lookup: &'a SemanticManifestLookup<'a>) -> Result<Self, BuildError> {
        // Template ids come from a throwaway allocator; recipes re-instantiate
        // every chain with the build's own allocator before placement.
        let mut template_ids = NodeIdAllocator::new();
        Ok(Self {
            manifest_lookup,
            source_node_set: SourceNodeSet::from_manifest(manifest_lookup, &mut template_ids)?,
            optimization_level: OptimizationLevel::default(),
        })
    }

    pub fn with_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn source_node_set(&self) -> &SourceNodeSet {
        &self.source_node_set
    }

    /// Build a plan answering `query`, with fresh caches.
    pub fn build_plan(&self, query: &MetricQuery) -> Result<DataflowPlan, BuildError> {
        let mut caches = BuildCaches::new();
        self.build_plan_with_caches(query, &mut caches)
    }

    /// Build a plan answering `query`, reusing recipes and metric subtrees
    /// already in `caches`.
    pub fn build_plan_with_caches(
        &self,
        query: &MetricQuery,
        caches: &mut BuildCaches,
    ) -> Result<DataflowPlan, BuildError> {
        if !query.has_metrics() {
            return Err(BuildError::NoMetricsInQuery);
        }
        let mut ids = NodeIdAllocator::new();
        let context = BranchContext {
            queried_linkable_specs: query.linkable_spec_set(),
            where_filter_specs: query.where_filter_specs.clone(),
            time_range_constraint: query.time_range_constraint,
            pushdown_state: PredicatePushdownState::new(
                query.time_range_constraint,
                query.where_filter_specs.clone(),
            ),
            for_group_by_source_node: false,
        };

        let mut outputs = Vec::with_capacity(query.metric_specs.len());
        for metric_spec in &query.metric_specs {
            outputs.push(self.build_metric_output(metric_spec, &context, caches, &mut ids)?);
        }
        let mut sink = self.combine_outputs(outputs, &mut ids);

        if !query.order_by_specs.is_empty() || query.limit.is_some() {
            sink = DataflowNode::new(
                NodeKind::OrderByLimit(OrderByLimitNode {
                    parent: sink,
                    order_by_specs: query.order_by_specs.clone(),
                    limit: query.limit,
                }),
                &mut ids,
            );
        }
        sink = DataflowNode::new(
            NodeKind::WriteToResultTable(WriteToResultTableNode { parent: sink }),
            &mut ids,
        );

        let stats = caches.stats();
        tracing::debug!(
            recipe_searches = stats.source_recipe_searches,
            recipe_hits = stats.source_recipe_cache_hits,
            metric_builds = stats.metric_output_builds,
            metric_hits = stats.metric_output_cache_hits,
            "metric subtrees assembled"
        );
        Ok(self.optimize(DataflowPlan::new(sink)))
    }

    /// Build a plan listing the distinct value combinations of the queried
    /// group-by elements. Custom grains are resolved to their base columns
    /// before the scan, so the distinct set is taken over base values.
    pub fn build_plan_for_distinct_values(
        &self,
        query: &MetricQuery,
    ) -> Result<DataflowPlan, BuildError> {
        if query.has_metrics() {
            return Err(BuildError::MetricsInDistinctValuesQuery);
        }
        let mut caches = BuildCaches::new();
        let mut ids = NodeIdAllocator::new();

        let mut required = query.linkable_spec_set();
        for filter in &query.where_filter_specs {
            required = required.merge(&filter.linkable_spec_set);
        }
        let required = rewrite_custom_grains(self.manifest_lookup, &required.dedupe());
        let queried = rewrite_custom_grains(self.manifest_lookup, &query.linkable_spec_set());

        let recipe_params = SourceRecipeParams {
            linkable_spec_set: required.clone(),
            measure_names: Vec::new(),
            predicate_pushdown_state: PredicatePushdownState::new(
                query.time_range_constraint,
                query.where_filter_specs.clone(),
            ),
            default_join_type: SqlJoinType::FullOuter,
        };
        let recipe = self
            .find_source_node_recipe(&recipe_params, &mut caches, &mut ids)?
            .ok_or_else(|| BuildError::UnableToSatisfyQuery {
                required_specs: required.as_specs(),
            })?;

        let mut output = recipe.join_output_node(&mut ids);
        if !query.where_filter_specs.is_empty() {
            output = DataflowNode::new(
                NodeKind::WhereConstraint(WhereConstraintNode {
                    parent: output,
                    where_specs: query.where_filter_specs.clone(),
                    always_apply: false,
                }),
                &mut ids,
            );
        }
        if let Some(range) = query.time_range_constraint {
            output = DataflowNode::new(
                NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                    parent: output,
                    time_range: range,
                }),
                &mut ids,
            );
        }
        output = DataflowNode::new(
            NodeKind::FilterElements(FilterElementsNode {
                parent: output,
                include_specs: InstanceSpecSet::from_linkable(queried),
                distinct: true,
            }),
            &mut ids,
        );
        if !query.order_by_specs.is_empty() || query.limit.is_some() {
            output = DataflowNode::new(
                NodeKind::OrderByLimit(OrderByLimitNode {
                    parent: output,
                    order_by_specs: query.order_by_specs.clone(),
                    limit: query.limit,
                }),
                &mut ids,
            );
        }
        output = DataflowNode::new(
            NodeKind::WriteToResultTable(WriteToResultTableNode { parent: output }),
            &mut ids,
        );
        Ok(self.optimize(DataflowPlan::new(output)))
    }

    /// Find a way to source `params`, consulting the cache first. Failed
    /// searches are cached alongside successful ones.
    pub fn find_source_node_recipe(
        &self,
        params: &SourceRecipeParams,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<Option<SourceNodeRecipe>, BuildError> {
        if let Some(cached) = caches.cached_source_recipe(params) {
            return Ok(cached);
        }
        let finder = SourceRecipeFinder::new(self.manifest_lookup, &self.source_node_set);
        let recipe = finder.find(params, ids)?;
        caches.store_source_recipe(params.clone(), recipe.clone());
        Ok(recipe)
    }

    /// Run the configured optimizer sequence. An optimizer failure keeps the
    /// plan from the previous stage rather than failing the build.
    fn optimize(&self, mut plan: DataflowPlan) -> DataflowPlan {
        let optimizers: Vec<Box<dyn DataflowPlanOptimizer + '_>> = match self.optimization_level {
            OptimizationLevel::None => Vec::new(),
            OptimizationLevel::Standard => vec![
                Box::new(PredicatePushdownOptimizer::new(self.manifest_lookup)),
                Box::new(SourceScanOptimizer),
            ],
        };
        for optimizer in optimizers {
            match optimizer.optimize(&plan) {
                Ok(optimized) => plan = optimized,
                Err(error) => {
                    tracing::warn!(
                        optimizer = optimizer.name(),
                        %error,
                        "plan optimization failed; keeping the unoptimized plan"
                    );
                }
            }
        }
        plan
    }

    fn build_metric_output(
        &self,
        metric_spec: &MetricSpec,
        context: &BranchContext,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let cache_key = context.cache_key(metric_spec);
        if let Some(node) = caches.cached_metric_output(&cache_key) {
            return Ok(node);
        }
        let metric = self
            .manifest_lookup
            .metric_lookup()
            .metric(&metric_spec.element_name)?;
        let output = match metric.metric_type {
            MetricType::Simple => {
                self.build_simple_metric_output(metric, metric_spec, context, caches, ids)?
            }
            MetricType::Cumulative => {
                self.build_cumulative_metric_output(metric, metric_spec, context, caches, ids)?
            }
            MetricType::Ratio | MetricType::Derived => {
                self.build_derived_metric_output(metric, metric_spec, context, caches, ids)?
            }
            MetricType::Conversion => {
                self.build_conversion_metric_output(metric, metric_spec, context, caches, ids)?
            }
        };
        caches.store_metric_output(cache_key, output.clone());
        Ok(output)
    }

    fn build_simple_metric_output(
        &self,
        metric: &Metric,
        metric_spec: &MetricSpec,
        context: &BranchContext,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let input_measure = required_measure(metric)?;
        let aggregated = self.build_aggregated_measure(
            metric,
            metric_spec,
            input_measure,
            None,
            context,
            caches,
            ids,
        )?;
        Ok(self.compute_metrics(aggregated, metric_spec, context, ids))
    }

    fn build_cumulative_metric_output(
        &self,
        metric: &Metric,
        metric_spec: &MetricSpec,
        context: &BranchContext,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let cumulative_params = metric
            .type_params
            .cumulative_type_params
            .as_ref()
            .ok_or_else(|| ManifestError::MissingTypeParams {
                metric: metric.name.clone(),
                params: "cumulative_type_params",
            })?;
        let input_measure = required_measure(metric)?;
        let min_grain = self
            .manifest_lookup
            .metric_lookup()
            .min_queryable_granularity(&metric.name, self.manifest_lookup.model_lookup())?;

        let queried_metric_time: Vec<TimeDimensionSpec> = context
            .queried_linkable_specs
            .time_dimension_specs
            .iter()
            .filter(|spec| {
                spec.entity_links.is_empty()
                    && spec.element_name == METRIC_TIME
                    && spec.date_part.is_none()
            })
            .cloned()
            .collect();
        let needs_reaggregation = queried_metric_time
            .iter()
            .map(TimeDimensionSpec::base_granularity)
            .min()
            .map(|grain| grain.is_coarser_than(min_grain))
            .unwrap_or(false);

        if !needs_reaggregation {
            let aggregated = self.build_aggregated_measure(
                metric,
                metric_spec,
                input_measure,
                Some(cumulative_params),
                context,
                caches,
                ids,
            )?;
            return Ok(self.compute_metrics(aggregated, metric_spec, context, ids));
        }

        // Accumulate at the finest queryable grain, then collapse each queried
        // period onto its chosen row.
        let mut fine_specs = context.queried_linkable_specs.clone();
        for spec in &mut fine_specs.time_dimension_specs {
            if spec.entity_links.is_empty()
                && spec.element_name == METRIC_TIME
                && spec.date_part.is_none()
            {
                *spec = spec.clone().with_base_granularity(min_grain);
            }
        }
        let fine_context = BranchContext {
            queried_linkable_specs: fine_specs.dedupe(),
            ..context.clone()
        };
        let aggregated = self.build_aggregated_measure(
            metric,
            metric_spec,
            input_measure,
            Some(cumulative_params),
            &fine_context,
            caches,
            ids,
        )?;
        let computed = self.compute_metrics(aggregated, metric_spec, &fine_context, ids);

        let mut partition_by = LinkableSpecSet::default();
        for dimension in &context.queried_linkable_specs.dimension_specs {
            partition_by.add(LinkableSpec::from(dimension.clone()));
        }
        for entity in &context.queried_linkable_specs.entity_specs {
            partition_by.add(LinkableSpec::from(entity.clone()));
        }
        for spec in &context.queried_linkable_specs.time_dimension_specs {
            let plain_metric_time = spec.entity_links.is_empty()
                && spec.element_name == METRIC_TIME
                && spec.date_part.is_none();
            if !plain_metric_time {
                partition_by.add(LinkableSpec::from(spec.clone()));
            }
        }
        for spec in &queried_metric_time {
            partition_by.add(LinkableSpec::from(spec.clone()));
        }

        Ok(DataflowNode::new(
            NodeKind::WindowReaggregation(WindowReaggregationNode {
                parent: computed,
                metric_spec: metric_spec.clone(),
                order_by_spec: TimeDimensionSpec::local(METRIC_TIME, min_grain),
                partition_by_specs: partition_by.dedupe(),
            }),
            ids,
        ))
    }

    fn build_derived_metric_output(
        &self,
        metric: &Metric,
        metric_spec: &MetricSpec,
        context: &BranchContext,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let inputs = metric.input_metrics();
        if inputs.is_empty() {
            let params = match metric.metric_type {
                MetricType::Ratio => "numerator and denominator",
                _ => "metrics",
            };
            return Err(BuildError::Manifest(ManifestError::MissingTypeParams {
                metric: metric.name.clone(),
                params,
            }));
        }

        let parent_offset = metric_spec.has_offset();
        // An offset on the derived metric shifts its finished inputs onto the
        // time spine afterwards; constraints wait for the shifted times.
        let child_context = if parent_offset {
            BranchContext {
                queried_linkable_specs: context.queried_linkable_specs.clone(),
                where_filter_specs: Vec::new(),
                time_range_constraint: None,
                pushdown_state: PredicatePushdownState::disabled(),
                for_group_by_source_node: context.for_group_by_source_node,
            }
        } else {
            context.clone()
        };

        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let mut child_filters = Vec::new();
            if let Some(template) = &input.filter {
                child_filters.push(WhereFilterSpec::parse(template)?);
            }
            if !parent_offset {
                for filter in &metric_spec.filter_specs {
                    if !child_filters.contains(filter) {
                        child_filters.push(filter.clone());
                    }
                }
                if let Some(template) = &metric.filter {
                    let parsed = WhereFilterSpec::parse(template)?;
                    if !child_filters.contains(&parsed) {
                        child_filters.push(parsed);
                    }
                }
            }

            let mut child_spec = MetricSpec::from_name(&input.name);
            if !child_filters.is_empty() {
                child_spec = child_spec.with_filters(child_filters);
            }
            if let Some(alias) = &input.alias {
                child_spec = child_spec.with_alias(alias.clone());
            }
            if let Some(window) = &input.offset_window {
                child_spec = child_spec.with_offset_window(window.clone());
            }
            if let Some(grain) = input.offset_to_grain {
                child_spec = child_spec.with_offset_to_grain(grain);
            }

            // An offset input handles its own constraint placement; pushing
            // query predicates into its scans would filter pre-shift rows.
            let input_context = if !parent_offset && child_spec.has_offset() {
                BranchContext {
                    pushdown_state: PredicatePushdownState::disabled(),
                    ..child_context.clone()
                }
            } else {
                child_context.clone()
            };
            outputs.push(self.build_metric_output(&child_spec, &input_context, caches, ids)?);
        }

        let mut output = self.combine_outputs(outputs, ids);

        if parent_offset {
            let spine_time_specs: Vec<TimeDimensionSpec> = context
                .queried_linkable_specs
                .time_dimension_specs
                .iter()
                .filter(|spec| {
                    spec.entity_links.is_empty()
                        && spec.element_name == METRIC_TIME
                        && spec.date_part.is_none()
                })
                .cloned()
                .collect();
            if !spine_time_specs.is_empty() {
                output = self.join_to_time_spine(
                    output,
                    &spine_time_specs,
                    SqlJoinType::Inner,
                    metric_spec.offset_window.clone(),
                    metric_spec.offset_to_grain,
                    context.time_range_constraint,
                    ids,
                )?;
            }
            let mut deferred = context.where_filter_specs.clone();
            deferred.extend(metric_spec.filter_specs.iter().cloned());
            if let Some(template) = &metric.filter {
                deferred.push(WhereFilterSpec::parse(template)?);
            }
            let deferred = dedupe_filters(deferred);
            if !deferred.is_empty() {
                output = DataflowNode::new(
                    NodeKind::WhereConstraint(WhereConstraintNode {
                        parent: output,
                        where_specs: deferred,
                        always_apply: true,
                    }),
                    ids,
                );
            }
            if let Some(range) = context.time_range_constraint {
                output = DataflowNode::new(
                    NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                        parent: output,
                        time_range: range,
                    }),
                    ids,
                );
            }
        }

        Ok(self.compute_metrics(output, metric_spec, context, ids))
    }

    fn build_conversion_metric_output(
        &self,
        metric: &Metric,
        metric_spec: &MetricSpec,
        context: &BranchContext,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let conversion_params = metric
            .type_params
            .conversion_type_params
            .as_ref()
            .ok_or_else(|| ManifestError::MissingTypeParams {
                metric: metric.name.clone(),
                params: "conversion_type_params",
            })?;
        let base_measure = &conversion_params.base_measure;
        let conversion_measure = &conversion_params.conversion_measure;
        let entity_spec = EntitySpec::local(&conversion_params.entity);

        let models = self.manifest_lookup.model_lookup();
        let base_time_spec = models.agg_time_dimension_spec(&base_measure.name)?;
        let conversion_time_spec = models.agg_time_dimension_spec(&conversion_measure.name)?;

        let rewritten_queried =
            rewrite_custom_grains(self.manifest_lookup, &context.queried_linkable_specs);

        let mut branch_filters = context.where_filter_specs.clone();
        branch_filters.extend(metric_spec.filter_specs.iter().cloned());
        if let Some(template) = &metric.filter {
            branch_filters.push(WhereFilterSpec::parse(template)?);
        }
        if let Some(template) = &base_measure.filter {
            branch_filters.push(WhereFilterSpec::parse(template)?);
        }
        let branch_filters = dedupe_filters(branch_filters);

        // Base events carry the queried elements plus everything the event
        // join matches on.
        let mut base_required = rewritten_queried.clone();
        base_required.add(LinkableSpec::from(entity_spec.clone()));
        base_required.add(LinkableSpec::from(base_time_spec.clone()));
        for property in &conversion_params.constant_properties {
            base_required.add(LinkableSpec::from(DimensionSpec::local(
                &property.base_property,
            )));
        }
        for filter in &branch_filters {
            base_required = base_required.merge(&filter.linkable_spec_set);
        }
        let base_required = base_required.dedupe();

        let base_recipe_params = SourceRecipeParams {
            linkable_spec_set: base_required.clone(),
            measure_names: vec![base_measure.name.clone()],
            predicate_pushdown_state: context.pushdown_state.clone(),
            default_join_type: SqlJoinType::LeftOuter,
        };
        let base_recipe = self
            .find_source_node_recipe(&base_recipe_params, caches, ids)?
            .ok_or_else(|| BuildError::UnableToSatisfyQuery {
                required_specs: base_required.as_specs(),
            })?;
        let mut base_node = base_recipe.join_output_node(ids);
        if !branch_filters.is_empty() {
            base_node = DataflowNode::new(
                NodeKind::WhereConstraint(WhereConstraintNode {
                    parent: base_node,
                    where_specs: branch_filters.clone(),
                    always_apply: false,
                }),
                ids,
            );
        }
        base_node = DataflowNode::new(
            NodeKind::FilterElements(FilterElementsNode {
                parent: base_node,
                include_specs: InstanceSpecSet::from_linkable(base_required),
                distinct: false,
            }),
            ids,
        );
        base_node = DataflowNode::new(
            NodeKind::AddGeneratedUuidColumn(AddGeneratedUuidColumnNode { parent: base_node }),
            ids,
        );

        // Filtering conversion events would change which conversions
        // attribute, so nothing is pushed into that scan.
        let mut conversion_required = LinkableSpecSet::default();
        conversion_required.add(LinkableSpec::from(entity_spec.clone()));
        conversion_required.add(LinkableSpec::from(conversion_time_spec.clone()));
        for property in &conversion_params.constant_properties {
            conversion_required.add(LinkableSpec::from(DimensionSpec::local(
                &property.conversion_property,
            )));
        }
        let conversion_required = conversion_required.dedupe();

        let conversion_recipe_params = SourceRecipeParams {
            linkable_spec_set: conversion_required.clone(),
            measure_names: vec![conversion_measure.name.clone()],
            predicate_pushdown_state: PredicatePushdownState::disabled(),
            default_join_type: SqlJoinType::LeftOuter,
        };
        let conversion_recipe = self
            .find_source_node_recipe(&conversion_recipe_params, caches, ids)?
            .ok_or_else(|| BuildError::UnableToSatisfyQuery {
                required_specs: conversion_required.as_specs(),
            })?;
        let mut conversion_node = conversion_recipe.join_output_node(ids);
        conversion_node = DataflowNode::new(
            NodeKind::FilterElements(FilterElementsNode {
                parent: conversion_node,
                include_specs: InstanceSpecSet::from_linkable(conversion_required)
                    .with_measures(vec![MeasureSpec::new(conversion_measure.name.clone())]),
                distinct: false,
            }),
            ids,
        );

        let joined = DataflowNode::new(
            NodeKind::JoinConversionEvents(JoinConversionEventsNode {
                base_node,
                conversion_node,
                entity_spec: entity_spec.clone(),
                window: conversion_params.window.clone(),
                base_time_dimension_spec: base_time_spec.clone(),
                conversion_time_dimension_spec: conversion_time_spec.clone(),
                unique_identifier_keys: vec![GENERATED_UUID_COLUMN.to_string()],
                constant_properties: conversion_params.constant_properties.clone(),
            }),
            ids,
        );

        // The base measure aggregates from its own plain recipe; only the
        // attributed conversions flow through the event join.
        let aggregated_base = self.build_aggregated_measure(
            metric,
            metric_spec,
            base_measure,
            None,
            context,
            caches,
            ids,
        )?;

        let mut conversion_branch = joined;
        let queried_time_matches_base = rewritten_queried.time_dimension_specs.iter().any(|spec| {
            spec.entity_links.is_empty()
                && (spec.element_name == METRIC_TIME
                    || spec.element_name == base_time_spec.element_name)
        });
        if queried_time_matches_base {
            if let Some(range) = context.time_range_constraint {
                conversion_branch = DataflowNode::new(
                    NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                        parent: conversion_branch,
                        time_range: range,
                    }),
                    ids,
                );
            }
        }
        conversion_branch = DataflowNode::new(
            NodeKind::FilterElements(FilterElementsNode {
                parent: conversion_branch,
                include_specs: InstanceSpecSet::from_linkable(rewritten_queried)
                    .with_measures(vec![MeasureSpec::new(conversion_measure.name.clone())]),
                distinct: false,
            }),
            ids,
        );
        let mut conversion_input =
            MetricInputSpec::unconstrained(MeasureSpec::new(conversion_measure.name.clone()));
        if !branch_filters.is_empty() {
            conversion_input = conversion_input.with_filters(branch_filters);
        }
        if let Some(alias) = &conversion_measure.alias {
            conversion_input = conversion_input.with_alias(alias.clone());
        }
        conversion_branch = DataflowNode::new(
            NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
                parent: conversion_branch,
                metric_input_specs: vec![conversion_input],
            }),
            ids,
        );

        let combined = self.combine_outputs(vec![aggregated_base, conversion_branch], ids);
        Ok(self.compute_metrics(combined, metric_spec, context, ids))
    }

    /// Build the full chain for one aggregated measure: source recipe, time
    /// joins, constraints, element filtering, aggregation, and the post
    /// aggregation spine join when one applies.
    #[allow(clippy::too_many_arguments)]
    fn build_aggregated_measure(
        &self,
        metric: &Metric,
        metric_spec: &MetricSpec,
        input_measure: &MetricInputMeasure,
        cumulative: Option<&CumulativeTypeParams>,
        context: &BranchContext,
        caches: &mut BuildCaches,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let measure_name = input_measure.name.clone();
        let models = self.manifest_lookup.model_lookup();
        let model = models.model_for_measure(&measure_name)?;
        let measure_def = model
            .measure(&measure_name)
            .ok_or_else(|| ManifestError::UnknownMeasure(measure_name.clone()))?;
        let agg_time_spec = models.agg_time_dimension_spec(&measure_name)?;

        let rewritten_queried =
            rewrite_custom_grains(self.manifest_lookup, &context.queried_linkable_specs);
        let SimpleMetricRecipe {
            branch_filters,
            queried_agg_time_specs,
            spine_time_specs,
            smallest_queried_grain,
            has_offset,
            offset_join_before,
            offset_join_after,
            fill_join_after,
            scan_range,
        } = SimpleMetricRecipe::derive(
            metric,
            metric_spec,
            input_measure,
            cumulative,
            context,
            &agg_time_spec,
            &rewritten_queried,
        )?;

        let original_range = context.time_range_constraint;
        let search_state = match (scan_range, original_range) {
            (Some(scan), Some(original)) if scan != original => {
                context.pushdown_state.with_time_range_constraint(scan)
            }
            (None, Some(_)) => context.pushdown_state.without_time_range_constraint(),
            _ => context.pushdown_state.clone(),
        };

        let semi_additive = match &measure_def.non_additive_dimension {
            Some(params) => Some(self.semi_additive_description(
                model,
                &measure_name,
                params,
                &queried_agg_time_specs,
            )?),
            None => None,
        };
        let mut semi_additive_extras = LinkableSpecSet::default();
        if let Some(description) = &semi_additive {
            for entity in &description.entity_specs {
                semi_additive_extras.add(LinkableSpec::from(entity.clone()));
            }
            semi_additive_extras.add(LinkableSpec::from(description.time_dimension_spec.clone()));
        }

        let mut required = rewritten_queried.clone();
        for filter in &branch_filters {
            required = required.merge(&filter.linkable_spec_set);
        }
        let required = required.merge(&semi_additive_extras).dedupe();

        let recipe_params = SourceRecipeParams {
            linkable_spec_set: required.clone(),
            measure_names: vec![measure_name.clone()],
            predicate_pushdown_state: search_state,
            default_join_type: SqlJoinType::LeftOuter,
        };
        let recipe = self
            .find_source_node_recipe(&recipe_params, caches, ids)?
            .ok_or_else(|| BuildError::UnableToSatisfyQuery {
                required_specs: required.as_specs(),
            })?;
        let mut output = recipe.join_output_node(ids);

        if let Some(params) = cumulative {
            if !queried_agg_time_specs.is_empty() {
                let spine_grain = smallest_queried_grain
                    .unwrap_or_else(|| agg_time_spec.base_granularity());
                let time_spine_node = self.instantiated_time_spine_node(spine_grain, ids)?;
                output = DataflowNode::new(
                    NodeKind::JoinOverTimeRange(JoinOverTimeRangeNode {
                        parent: output,
                        time_spine_node,
                        queried_agg_time_dimension_specs: queried_agg_time_specs.clone(),
                        window: params.window.clone(),
                        grain_to_date: params.grain_to_date,
                        time_range_constraint: scan_range,
                    }),
                    ids,
                );
            }
        }

        if offset_join_before {
            output = self.join_to_time_spine(
                output,
                &spine_time_specs,
                SqlJoinType::Inner,
                metric_spec.offset_window.clone(),
                metric_spec.offset_to_grain,
                None,
                ids,
            )?;
        }

        // With the offset join after aggregation, filters naming time
        // dimensions must wait for the shifted times.
        let (deferred_filters, immediate_filters) = if offset_join_after {
            partition_time_referencing(branch_filters.clone())
        } else {
            (Vec::new(), branch_filters.clone())
        };
        if !immediate_filters.is_empty() {
            output = DataflowNode::new(
                NodeKind::WhereConstraint(WhereConstraintNode {
                    parent: output,
                    where_specs: immediate_filters,
                    always_apply: false,
                }),
                ids,
            );
        }
        if !queried_agg_time_specs.is_empty() && !offset_join_after {
            if let Some(range) = scan_range {
                output = DataflowNode::new(
                    NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                        parent: output,
                        time_range: range,
                    }),
                    ids,
                );
            }
        }

        let projected = rewritten_queried.merge(&semi_additive_extras).dedupe();
        output = DataflowNode::new(
            NodeKind::FilterElements(FilterElementsNode {
                parent: output,
                include_specs: InstanceSpecSet::from_linkable(projected)
                    .with_measures(vec![MeasureSpec::new(measure_name.clone())]),
                distinct: false,
            }),
            ids,
        );

        if let Some(description) = semi_additive {
            output = DataflowNode::new(
                NodeKind::SemiAdditiveJoin(SemiAdditiveJoinNode {
                    parent: output,
                    entity_specs: description.entity_specs,
                    time_dimension_spec: description.time_dimension_spec,
                    agg_by_function: description.agg_by_function,
                    queried_time_dimension_spec: description.queried_time_dimension_spec,
                }),
                ids,
            );
        }

        let mut input_spec = MetricInputSpec::unconstrained(MeasureSpec::new(measure_name.clone()));
        if !branch_filters.is_empty() {
            input_spec = input_spec.with_filters(branch_filters);
        }
        // A metric-level constraint or offset makes this aggregation differ
        // from the plain measure, so the output needs its own name. Query
        // filters apply to every branch equally and need none.
        let constrains_measure = metric.filter.is_some()
            || input_measure.filter.is_some()
            || !metric_spec.filter_specs.is_empty()
            || has_offset;
        if let Some(alias) = &input_measure.alias {
            input_spec = input_spec.with_alias(alias.clone());
        } else if constrains_measure {
            input_spec = input_spec.with_alias(format!("{measure_name}_{}", metric.name));
        }
        output = DataflowNode::new(
            NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
                parent: output,
                metric_input_specs: vec![input_spec],
            }),
            ids,
        );

        if offset_join_after {
            output = self.join_to_time_spine(
                output,
                &spine_time_specs,
                SqlJoinType::Inner,
                metric_spec.offset_window.clone(),
                metric_spec.offset_to_grain,
                original_range,
                ids,
            )?;
            if !deferred_filters.is_empty() {
                output = DataflowNode::new(
                    NodeKind::WhereConstraint(WhereConstraintNode {
                        parent: output,
                        where_specs: deferred_filters,
                        always_apply: true,
                    }),
                    ids,
                );
            }
        } else if fill_join_after {
            output = self.join_to_time_spine(
                output,
                &spine_time_specs,
                SqlJoinType::LeftOuter,
                None,
                None,
                original_range,
                ids,
            )?;
        }

        // An expanded or removed scan range read extra history for the
        // accumulation; the requested window comes back after aggregation.
        if cumulative.is_some() {
            if let Some(range) = original_range {
                if scan_range != Some(range) {
                    output = DataflowNode::new(
                        NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                            parent: output,
                            time_range: range,
                        }),
                        ids,
                    );
                }
            }
        }

        Ok(output)
    }

    fn semi_additive_description(
        &self,
        model: &SemanticModel,
        measure_name: &str,
        params: &NonAdditiveDimensionParams,
        queried_agg_time_specs: &[TimeDimensionSpec],
    ) -> Result<SemiAdditiveDescription, BuildError> {
        let granularity = model
            .dimension(&params.name)
            .and_then(|dimension| dimension.time_granularity())
            .ok_or_else(|| ManifestError::NonAdditiveDimensionNotTime {
                measure: measure_name.to_string(),
                dimension: params.name.clone(),
            })?;
        let queried_time_dimension_spec = queried_agg_time_specs
            .iter()
            .filter(|spec| spec.date_part.is_none())
            .min_by_key(|spec| spec.base_granularity())
            .cloned();
        Ok(SemiAdditiveDescription {
            entity_specs: params
                .window_groupings
                .iter()
                .map(|grouping| EntitySpec::local(grouping))
                .collect(),
            time_dimension_spec: TimeDimensionSpec::local(&params.name, granularity),
            agg_by_function: params.window_choice,
            queried_time_dimension_spec,
        })
    }

    fn instantiated_time_spine_node(
        &self,
        granularity: TimeGranularity,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let template = self
            .source_node_set
            .time_spine_node_for(granularity)
            .ok_or(BuildError::NoTimeSpineForGranularity(granularity))?;
        Ok(instantiate_template(template, ids))
    }

    #[allow(clippy::too_many_arguments)]
    fn join_to_time_spine(
        &self,
        parent: DataflowNodeRef,
        requested_specs: &[TimeDimensionSpec],
        join_type: SqlJoinType,
        offset_window: Option<MetricTimeWindow>,
        offset_to_grain: Option<TimeGranularity>,
        time_range_constraint: Option<TimeRangeConstraint>,
        ids: &mut NodeIdAllocator,
    ) -> Result<DataflowNodeRef, BuildError> {
        let finest = requested_specs
            .iter()
            .map(TimeDimensionSpec::base_granularity)
            .min()
            .unwrap_or(TimeGranularity::Day);
        let time_spine_node = self.instantiated_time_spine_node(finest, ids)?;
        Ok(DataflowNode::new(
            NodeKind::JoinToTimeSpine(JoinToTimeSpineNode {
                parent,
                time_spine_node,
                requested_agg_time_dimension_specs: requested_specs.to_vec(),
                join_type,
                offset_window,
                offset_to_grain,
                time_range_constraint,
            }),
            ids,
        ))
    }

    fn compute_metrics(
        &self,
        parent: DataflowNodeRef,
        metric_spec: &MetricSpec,
        context: &BranchContext,
        ids: &mut NodeIdAllocator,
    ) -> DataflowNodeRef {
        DataflowNode::new(
            NodeKind::ComputeMetrics(ComputeMetricsNode {
                parent,
                metric_specs: vec![metric_spec.clone()],
                aggregated_to_elements: context
                    .queried_linkable_specs
                    .as_specs()
                    .into_iter()
                    .collect(),
                for_group_by_source_node: context.for_group_by_source_node,
            }),
            ids,
        )
    }

    fn combine_outputs(
        &self,
        mut outputs: Vec<DataflowNodeRef>,
        ids: &mut NodeIdAllocator,
    ) -> DataflowNodeRef {
        if outputs.len() == 1 {
            return outputs.remove(0);
        }
        DataflowNode::new(
            NodeKind::CombineAggregatedOutputs(CombineAggregatedOutputsNode { parents: outputs }),
            ids,
        )
    }
}
