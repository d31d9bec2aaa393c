//! The dataflow plan: an immutable DAG of typed operator nodes describing a
//! metric query, ready for conversion to engine-specific SQL.

pub mod display;
pub mod node;
pub mod plan;
pub mod visitor;

pub use node::{
    AddGeneratedUuidColumnNode, AggregateMetricInputsNode, CombineAggregatedOutputsNode,
    ComputeMetricsNode, ConstrainTimeRangeNode, DataflowNode, DataflowNodeRef, FilterElementsNode,
    JoinConversionEventsNode, JoinDescription, JoinOnEntitiesNode, JoinOverTimeRangeNode,
    JoinToTimeSpineNode, MetricTimeTransformNode, NodeId, NodeIdAllocator, NodeKind,
    OrderByLimitNode, ReadSqlSourceNode, SemiAdditiveJoinNode, SqlJoinType, SqlSource,
    ValidityWindowJoinDescription, WhereConstraintNode, WindowReaggregationNode,
    WriteToResultTableNode, GENERATED_UUID_COLUMN,
};
pub use plan::DataflowPlan;
pub use visitor::DataflowNodeVisitor;
