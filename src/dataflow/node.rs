//! Typed dataflow nodes.
//!
//! A node owns `Arc` handles to its parents, so a plan is just a handle to
//! its sink. Nodes are immutable once built; rewrites allocate replacement
//! nodes with fresh ids via [`NodeIdAllocator`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::manifest::{ConstantPropertyInput, NonAdditiveWindowChoice};
use crate::spec::{
    DimensionSpec, EntitySpec, InstanceSpecSet, LinkableSpec, LinkableSpecSet, MetricInputSpec,
    MetricSpec, MetricTimeWindow, OrderBySpec, TimeDimensionSpec, TimeGranularity,
    TimeRangeConstraint, WhereFilterSpec,
};

pub type DataflowNodeRef = Arc<DataflowNode>;

/// Column name injected by [`AddGeneratedUuidColumnNode`] and joined on by
/// [`JoinConversionEventsNode`].
pub const GENERATED_UUID_COLUMN: &str = "generated_uuid";

/// Identifier of a node within a plan, unique per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    prefix: &'static str,
    sequence: u64,
}

impl NodeId {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix, self.sequence)
    }
}

/// Monotonic id source shared across every node built in one pass.
///
/// Optimizers seed a fresh allocator past the plan's highest sequence so
/// replacement nodes never collide with surviving ones.
#[derive(Debug, Default)]
pub struct NodeIdAllocator {
    next_sequence: u64,
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_after(max_sequence: u64) -> Self {
        Self {
            next_sequence: max_sequence + 1,
        }
    }

    fn allocate(&mut self, prefix: &'static str) -> NodeId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        NodeId { prefix, sequence }
    }
}

/// SQL join flavors a plan can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlJoinType {
    Inner,
    LeftOuter,
    FullOuter,
    CrossJoin,
}

impl fmt::Display for SqlJoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
            Self::FullOuter => "FULL OUTER JOIN",
            Self::CrossJoin => "CROSS JOIN",
        })
    }
}

/// What a [`ReadSqlSourceNode`] scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSource {
    SemanticModel { model_name: String, table: String },
    TimeSpine {
        table: String,
        base_column: String,
        base_granularity: TimeGranularity,
    },
}

impl SqlSource {
    pub fn semantic_model_name(&self) -> Option<&str> {
        match self {
            Self::SemanticModel { model_name, .. } => Some(model_name),
            Self::TimeSpine { .. } => None,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::SemanticModel { table, .. } | Self::TimeSpine { table, .. } => table,
        }
    }
}

/// One right-hand side of a [`JoinOnEntitiesNode`].
///
/// `join_on_entity: None` means no equi-join key; the join renders as a
/// cross join.
#[derive(Debug, Clone)]
pub struct JoinDescription {
    pub join_node: DataflowNodeRef,
    pub join_on_entity: Option<EntitySpec>,
    pub join_type: SqlJoinType,
    pub join_on_partition_dimensions: Vec<DimensionSpec>,
    pub join_on_partition_time_dimensions: Vec<TimeDimensionSpec>,
    pub validity_window: Option<ValidityWindowJoinDescription>,
}

impl JoinDescription {
    /// Field equality ignoring the joined node itself.
    fn payload_matches(&self, other: &Self) -> bool {
        self.join_on_entity == other.join_on_entity
            && self.join_type == other.join_type
            && self.join_on_partition_dimensions == other.join_on_partition_dimensions
            && self.join_on_partition_time_dimensions == other.join_on_partition_time_dimensions
            && self.validity_window == other.validity_window
    }
}

/// Bounds a join against a slowly-changing model to the rows whose validity
/// window covers the joined time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityWindowJoinDescription {
    pub window_start: TimeDimensionSpec,
    pub window_end: TimeDimensionSpec,
}

#[derive(Debug, Clone)]
pub struct ReadSqlSourceNode {
    pub source: SqlSource,
}

/// Aliases one aggregation time dimension of the parent scan to the
/// metric-agnostic `metric_time` element.
#[derive(Debug, Clone)]
pub struct MetricTimeTransformNode {
    pub parent: DataflowNodeRef,
    pub aggregation_time_dimension: String,
}

#[derive(Debug, Clone)]
pub struct JoinOnEntitiesNode {
    pub left: DataflowNodeRef,
    pub joins: Vec<JoinDescription>,
}

/// Joins each input row to every time-spine row inside its trailing
/// accumulation window, so downstream aggregation sums over the window.
#[derive(Debug, Clone)]
pub struct JoinOverTimeRangeNode {
    pub parent: DataflowNodeRef,
    pub time_spine_node: DataflowNodeRef,
    pub queried_agg_time_dimension_specs: Vec<TimeDimensionSpec>,
    pub window: Option<MetricTimeWindow>,
    pub grain_to_date: Option<TimeGranularity>,
    pub time_range_constraint: Option<TimeRangeConstraint>,
}

/// Joins rows to the time spine, either to shift them by an offset or to
/// fill gaps so every spine period appears in the output.
#[derive(Debug, Clone)]
pub struct JoinToTimeSpineNode {
    pub parent: DataflowNodeRef,
    pub time_spine_node: DataflowNodeRef,
    pub requested_agg_time_dimension_specs: Vec<TimeDimensionSpec>,
    pub join_type: SqlJoinType,
    pub offset_window: Option<MetricTimeWindow>,
    pub offset_to_grain: Option<TimeGranularity>,
    pub time_range_constraint: Option<TimeRangeConstraint>,
}

/// Attributes conversion events to base events sharing an entity, within an
/// optional window, deduplicating on the generated row identifier.
#[derive(Debug, Clone)]
pub struct JoinConversionEventsNode {
    pub base_node: DataflowNodeRef,
    pub conversion_node: DataflowNodeRef,
    pub entity_spec: EntitySpec,
    pub window: Option<MetricTimeWindow>,
    pub base_time_dimension_spec: TimeDimensionSpec,
    pub conversion_time_dimension_spec: TimeDimensionSpec,
    pub unique_identifier_keys: Vec<String>,
    pub constant_properties: Vec<ConstantPropertyInput>,
}

#[derive(Debug, Clone)]
pub struct AddGeneratedUuidColumnNode {
    pub parent: DataflowNodeRef,
}

/// Projects a subset of the parent's columns, optionally deduplicating rows.
#[derive(Debug, Clone)]
pub struct FilterElementsNode {
    pub parent: DataflowNodeRef,
    pub include_specs: InstanceSpecSet,
    pub distinct: bool,
}

/// Applies rendered where-filters.
///
/// `always_apply` marks filters that must run here even if the predicate
/// pushdown pass also applied them further down, as with filters evaluated
/// after an offset join shifts `metric_time`.
#[derive(Debug, Clone)]
pub struct WhereConstraintNode {
    pub parent: DataflowNodeRef,
    pub where_specs: Vec<WhereFilterSpec>,
    pub always_apply: bool,
}

#[derive(Debug, Clone)]
pub struct ConstrainTimeRangeNode {
    pub parent: DataflowNodeRef,
    pub time_range: TimeRangeConstraint,
}

#[derive(Debug, Clone)]
pub struct AggregateMetricInputsNode {
    pub parent: DataflowNodeRef,
    pub metric_input_specs: Vec<MetricInputSpec>,
}

/// Restricts a non-additive measure to one row per entity grouping, chosen
/// by min or max of the named time dimension.
#[derive(Debug, Clone)]
pub struct SemiAdditiveJoinNode {
    pub parent: DataflowNodeRef,
    pub entity_specs: Vec<EntitySpec>,
    pub time_dimension_spec: TimeDimensionSpec,
    pub agg_by_function: NonAdditiveWindowChoice,
    pub queried_time_dimension_spec: Option<TimeDimensionSpec>,
}

/// Evaluates metric expressions over aggregated inputs.
///
/// `aggregated_to_elements` records the grouping the parent aggregation
/// produced; combining two of these nodes is only valid when the groupings
/// match.
#[derive(Debug, Clone)]
pub struct ComputeMetricsNode {
    pub parent: DataflowNodeRef,
    pub metric_specs: Vec<MetricSpec>,
    pub aggregated_to_elements: BTreeSet<LinkableSpec>,
    pub for_group_by_source_node: bool,
}

/// Full-outer joins sibling metric branches on their shared group-by
/// columns, coalescing the keys.
#[derive(Debug, Clone)]
pub struct CombineAggregatedOutputsNode {
    pub parents: Vec<DataflowNodeRef>,
}

/// Re-aggregates a cumulative metric computed at its minimum grain up to the
/// coarser queried grain.
#[derive(Debug, Clone)]
pub struct WindowReaggregationNode {
    pub parent: DataflowNodeRef,
    pub metric_spec: MetricSpec,
    pub order_by_spec: TimeDimensionSpec,
    pub partition_by_specs: LinkableSpecSet,
}

#[derive(Debug, Clone)]
pub struct OrderByLimitNode {
    pub parent: DataflowNodeRef,
    pub order_by_specs: Vec<OrderBySpec>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct WriteToResultTableNode {
    pub parent: DataflowNodeRef,
}

/// The closed set of operators a dataflow plan is made of.
#[derive(Debug, Clone)]
pub enum NodeKind {
    ReadSqlSource(ReadSqlSourceNode),
    MetricTimeTransform(MetricTimeTransformNode),
    JoinOnEntities(JoinOnEntitiesNode),
    JoinOverTimeRange(JoinOverTimeRangeNode),
    JoinToTimeSpine(JoinToTimeSpineNode),
    JoinConversionEvents(JoinConversionEventsNode),
    AddGeneratedUuidColumn(AddGeneratedUuidColumnNode),
    FilterElements(FilterElementsNode),
    WhereConstraint(WhereConstraintNode),
    ConstrainTimeRange(ConstrainTimeRangeNode),
    AggregateMetricInputs(AggregateMetricInputsNode),
    SemiAdditiveJoin(SemiAdditiveJoinNode),
    ComputeMetrics(ComputeMetricsNode),
    CombineAggregatedOutputs(CombineAggregatedOutputsNode),
    WindowReaggregation(WindowReaggregationNode),
    OrderByLimit(OrderByLimitNode),
    WriteToResultTable(WriteToResultTableNode),
}

impl NodeKind {
    fn id_prefix(&self) -> &'static str {
        match self {
            Self::ReadSqlSource(_) => "rss",
            Self::MetricTimeTransform(_) => "mtt",
            Self::JoinOnEntities(_) => "jse",
            Self::JoinOverTimeRange(_) => "jotr",
            Self::JoinToTimeSpine(_) => "jts",
            Self::JoinConversionEvents(_) => "jce",
            Self::AddGeneratedUuidColumn(_) => "guc",
            Self::FilterElements(_) => "fe",
            Self::WhereConstraint(_) => "wc",
            Self::ConstrainTimeRange(_) => "ctr",
            Self::AggregateMetricInputs(_) => "am",
            Self::SemiAdditiveJoin(_) => "saj",
            Self::ComputeMetrics(_) => "cm",
            Self::CombineAggregatedOutputs(_) => "cao",
            Self::WindowReaggregation(_) => "wra",
            Self::OrderByLimit(_) => "obl",
            Self::WriteToResultTable(_) => "wrt",
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ReadSqlSource(_) => "ReadSqlSource",
            Self::MetricTimeTransform(_) => "MetricTimeTransform",
            Self::JoinOnEntities(_) => "JoinOnEntities",
            Self::JoinOverTimeRange(_) => "JoinOverTimeRange",
            Self::JoinToTimeSpine(_) => "JoinToTimeSpine",
            Self::JoinConversionEvents(_) => "JoinConversionEvents",
            Self::AddGeneratedUuidColumn(_) => "AddGeneratedUuidColumn",
            Self::FilterElements(_) => "FilterElements",
            Self::WhereConstraint(_) => "WhereConstraint",
            Self::ConstrainTimeRange(_) => "ConstrainTimeRange",
            Self::AggregateMetricInputs(_) => "AggregateMetricInputs",
            Self::SemiAdditiveJoin(_) => "SemiAdditiveJoin",
            Self::ComputeMetrics(_) => "ComputeMetrics",
            Self::CombineAggregatedOutputs(_) => "CombineAggregatedOutputs",
            Self::WindowReaggregation(_) => "WindowReaggregation",
            Self::OrderByLimit(_) => "OrderByLimit",
            Self::WriteToResultTable(_) => "WriteToResultTable",
        }
    }
}

/// One operator in a dataflow plan.
#[derive(Debug)]
pub struct DataflowNode {
    id: NodeId,
    kind: NodeKind,
}

impl DataflowNode {
    pub fn new(kind: NodeKind, ids: &mut NodeIdAllocator) -> DataflowNodeRef {
        if let NodeKind::JoinOnEntities(payload) = &kind {
            for join in &payload.joins {
                debug_assert!(
                    join.join_on_entity.is_some() || join.join_type == SqlJoinType::CrossJoin,
                    "entity-less join targets must be cross joins"
                );
            }
        }
        let id = ids.allocate(kind.id_prefix());
        Arc::new(Self { id, kind })
    }

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.kind_name()
    }

    /// Parents in a fixed order per kind. Joins list the left (or base)
    /// input first.
    pub fn parent_nodes(&self) -> Vec<DataflowNodeRef> {
        match &self.kind {
            NodeKind::ReadSqlSource(_) => Vec::new(),
            NodeKind::MetricTimeTransform(node) => vec![node.parent.clone()],
            NodeKind::JoinOnEntities(node) => {
                let mut parents = Vec::with_capacity(node.joins.len() + 1);
                parents.push(node.left.clone());
                parents.extend(node.joins.iter().map(|join| join.join_node.clone()));
                parents
            }
            NodeKind::JoinOverTimeRange(node) => {
                vec![node.parent.clone(), node.time_spine_node.clone()]
            }
            NodeKind::JoinToTimeSpine(node) => {
                vec![node.parent.clone(), node.time_spine_node.clone()]
            }
            NodeKind::JoinConversionEvents(node) => {
                vec![node.base_node.clone(), node.conversion_node.clone()]
            }
            NodeKind::AddGeneratedUuidColumn(node) => vec![node.parent.clone()],
            NodeKind::FilterElements(node) => vec![node.parent.clone()],
            NodeKind::WhereConstraint(node) => vec![node.parent.clone()],
            NodeKind::ConstrainTimeRange(node) => vec![node.parent.clone()],
            NodeKind::AggregateMetricInputs(node) => vec![node.parent.clone()],
            NodeKind::SemiAdditiveJoin(node) => vec![node.parent.clone()],
            NodeKind::ComputeMetrics(node) => vec![node.parent.clone()],
            NodeKind::CombineAggregatedOutputs(node) => node.parents.clone(),
            NodeKind::WindowReaggregation(node) => vec![node.parent.clone()],
            NodeKind::OrderByLimit(node) => vec![node.parent.clone()],
            NodeKind::WriteToResultTable(node) => vec![node.parent.clone()],
        }
    }

    /// Whether two nodes perform the same operation with the same parameters,
    /// ignoring node ids and which concrete parents they point at.
    pub fn functionally_identical(&self, other: &DataflowNode) -> bool {
        use NodeKind::*;
        match (&self.kind, &other.kind) {
            (ReadSqlSource(a), ReadSqlSource(b)) => a.source == b.source,
            (MetricTimeTransform(a), MetricTimeTransform(b)) => {
                a.aggregation_time_dimension == b.aggregation_time_dimension
            }
            (JoinOnEntities(a), JoinOnEntities(b)) => {
                a.joins.len() == b.joins.len()
                    && a.joins
                        .iter()
                        .zip(&b.joins)
                        .all(|(left, right)| left.payload_matches(right))
            }
            (JoinOverTimeRange(a), JoinOverTimeRange(b)) => {
                a.queried_agg_time_dimension_specs == b.queried_agg_time_dimension_specs
                    && a.window == b.window
                    && a.grain_to_date == b.grain_to_date
                    && a.time_range_constraint == b.time_range_constraint
            }
            (JoinToTimeSpine(a), JoinToTimeSpine(b)) => {
                a.requested_agg_time_dimension_specs == b.requested_agg_time_dimension_specs
                    && a.join_type == b.join_type
                    && a.offset_window == b.offset_window
                    && a.offset_to_grain == b.offset_to_grain
                    && a.time_range_constraint == b.time_range_constraint
            }
            (JoinConversionEvents(a), JoinConversionEvents(b)) => {
                a.entity_spec == b.entity_spec
                    && a.window == b.window
                    && a.base_time_dimension_spec == b.base_time_dimension_spec
                    && a.conversion_time_dimension_spec == b.conversion_time_dimension_spec
                    && a.unique_identifier_keys == b.unique_identifier_keys
                    && a.constant_properties == b.constant_properties
            }
            (AddGeneratedUuidColumn(_), AddGeneratedUuidColumn(_)) => true,
            (FilterElements(a), FilterElements(b)) => {
                a.include_specs == b.include_specs && a.distinct == b.distinct
            }
            (WhereConstraint(a), WhereConstraint(b)) => {
                a.where_specs == b.where_specs && a.always_apply == b.always_apply
            }
            (ConstrainTimeRange(a), ConstrainTimeRange(b)) => a.time_range == b.time_range,
            (AggregateMetricInputs(a), AggregateMetricInputs(b)) => {
                a.metric_input_specs == b.metric_input_specs
            }
            (SemiAdditiveJoin(a), SemiAdditiveJoin(b)) => {
                a.entity_specs == b.entity_specs
                    && a.time_dimension_spec == b.time_dimension_spec
                    && a.agg_by_function == b.agg_by_function
                    && a.queried_time_dimension_spec == b.queried_time_dimension_spec
            }
            (ComputeMetrics(a), ComputeMetrics(b)) => {
                a.metric_specs == b.metric_specs
                    && a.aggregated_to_elements == b.aggregated_to_elements
                    && a.for_group_by_source_node == b.for_group_by_source_node
            }
            (CombineAggregatedOutputs(a), CombineAggregatedOutputs(b)) => {
                a.parents.len() == b.parents.len()
            }
            (WindowReaggregation(a), WindowReaggregation(b)) => {
                a.metric_spec == b.metric_spec
                    && a.order_by_spec == b.order_by_spec
                    && a.partition_by_specs == b.partition_by_specs
            }
            (OrderByLimit(a), OrderByLimit(b)) => {
                a.order_by_specs == b.order_by_specs && a.limit == b.limit
            }
            (WriteToResultTable(_), WriteToResultTable(_)) => true,
            _ => false,
        }
    }

    /// A copy of this node pointed at different parents, with a fresh id.
    ///
    /// Panics if the parent count does not match the node's arity; callers
    /// rewriting a plan must preserve its shape.
    pub fn with_new_parents(
        &self,
        new_parents: &[DataflowNodeRef],
        ids: &mut NodeIdAllocator,
    ) -> DataflowNodeRef {
        fn sole(parents: &[DataflowNodeRef], kind: &str) -> DataflowNodeRef {
            assert!(
                parents.len() == 1,
                "{kind} takes exactly one parent, got {}",
                parents.len(),
            );
            parents[0].clone()
        }
        fn pair(parents: &[DataflowNodeRef], kind: &str) -> (DataflowNodeRef, DataflowNodeRef) {
            assert!(
                parents.len() == 2,
                "{kind} takes exactly two parents, got {}",
                parents.len(),
            );
            (parents[0].clone(), parents[1].clone())
        }

        let kind = match &self.kind {
            NodeKind::ReadSqlSource(node) => {
                assert!(
                    new_parents.is_empty(),
                    "ReadSqlSource takes no parents, got {}",
                    new_parents.len(),
                );
                NodeKind::ReadSqlSource(node.clone())
            }
            NodeKind::MetricTimeTransform(node) => {
                NodeKind::MetricTimeTransform(MetricTimeTransformNode {
                    parent: sole(new_parents, "MetricTimeTransform"),
                    aggregation_time_dimension: node.aggregation_time_dimension.clone(),
                })
            }
            NodeKind::JoinOnEntities(node) => {
                assert!(
                    new_parents.len() == node.joins.len() + 1,
                    "JoinOnEntities takes {} parents, got {}",
                    node.joins.len() + 1,
                    new_parents.len(),
                );
                let joins = node
                    .joins
                    .iter()
                    .zip(&new_parents[1..])
                    .map(|(join, parent)| JoinDescription {
                        join_node: parent.clone(),
                        ..join.clone()
                    })
                    .collect();
                NodeKind::JoinOnEntities(JoinOnEntitiesNode {
                    left: new_parents[0].clone(),
                    joins,
                })
            }
            NodeKind::JoinOverTimeRange(node) => {
                let (parent, time_spine_node) = pair(new_parents, "JoinOverTimeRange");
                NodeKind::JoinOverTimeRange(JoinOverTimeRangeNode {
                    parent,
                    time_spine_node,
                    ..node.clone()
                })
            }
            NodeKind::JoinToTimeSpine(node) => {
                let (parent, time_spine_node) = pair(new_parents, "JoinToTimeSpine");
                NodeKind::JoinToTimeSpine(JoinToTimeSpineNode {
                    parent,
                    time_spine_node,
                    ..node.clone()
                })
            }
            NodeKind::JoinConversionEvents(node) => {
                let (base_node, conversion_node) = pair(new_parents, "JoinConversionEvents");
                NodeKind::JoinConversionEvents(JoinConversionEventsNode {
                    base_node,
                    conversion_node,
                    ..node.clone()
                })
            }
            NodeKind::AddGeneratedUuidColumn(_) => {
                NodeKind::AddGeneratedUuidColumn(AddGeneratedUuidColumnNode {
                    parent: sole(new_parents, "AddGeneratedUuidColumn"),
                })
            }
            NodeKind::FilterElements(node) => NodeKind::FilterElements(FilterElementsNode {
                parent: sole(new_parents, "FilterElements"),
                ..node.clone()
            }),
            NodeKind::WhereConstraint(node) => NodeKind::WhereConstraint(WhereConstraintNode {
                parent: sole(new_parents, "WhereConstraint"),
                ..node.clone()
            }),
            NodeKind::ConstrainTimeRange(node) => {
                NodeKind::ConstrainTimeRange(ConstrainTimeRangeNode {
                    parent: sole(new_parents, "ConstrainTimeRange"),
                    ..node.clone()
                })
            }
            NodeKind::AggregateMetricInputs(node) => {
                NodeKind::AggregateMetricInputs(AggregateMetricInputsNode {
                    parent: sole(new_parents, "AggregateMetricInputs"),
                    ..node.clone()
                })
            }
            NodeKind::SemiAdditiveJoin(node) => NodeKind::SemiAdditiveJoin(SemiAdditiveJoinNode {
                parent: sole(new_parents, "SemiAdditiveJoin"),
                ..node.clone()
            }),
            NodeKind::ComputeMetrics(node) => NodeKind::ComputeMetrics(ComputeMetricsNode {
                parent: sole(new_parents, "ComputeMetrics"),
                ..node.clone()
            }),
            NodeKind::CombineAggregatedOutputs(node) => {
                assert!(
                    new_parents.len() == node.parents.len(),
                    "CombineAggregatedOutputs takes {} parents, got {}",
                    node.parents.len(),
                    new_parents.len(),
                );
                NodeKind::CombineAggregatedOutputs(CombineAggregatedOutputsNode {
                    parents: new_parents.to_vec(),
                })
            }
            NodeKind::WindowReaggregation(node) => {
                NodeKind::WindowReaggregation(WindowReaggregationNode {
                    parent: sole(new_parents, "WindowReaggregation"),
                    ..node.clone()
                })
            }
            NodeKind::OrderByLimit(node) => NodeKind::OrderByLimit(OrderByLimitNode {
                parent: sole(new_parents, "OrderByLimit"),
                ..node.clone()
            }),
            NodeKind::WriteToResultTable(_) => {
                NodeKind::WriteToResultTable(WriteToResultTableNode {
                    parent: sole(new_parents, "WriteToResultTable"),
                })
            }
        };
        Self::new(kind, ids)
    }
}
