//! A built plan: a handle to the sink of a node DAG.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::node::{DataflowNode, DataflowNodeRef, NodeKind};

/// An executable description of a query, rooted at its terminal write node.
#[derive(Debug, Clone)]
pub struct DataflowPlan {
    sink: DataflowNodeRef,
}

impl DataflowPlan {
    pub fn new(sink: DataflowNodeRef) -> Self {
        Self { sink }
    }

    pub fn sink_node(&self) -> &DataflowNodeRef {
        &self.sink
    }

    /// Every node reachable from the sink, each listed once even when
    /// branches share it.
    pub fn nodes(&self) -> Vec<DataflowNodeRef> {
        let mut seen: HashSet<*const DataflowNode> = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self.sink.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(Arc::as_ptr(&node)) {
                continue;
            }
            let parents = node.parent_nodes();
            out.push(node);
            for parent in parents.into_iter().rev() {
                stack.push(parent);
            }
        }
        out
    }

    /// Names of the semantic models this plan scans.
    pub fn source_semantic_models(&self) -> BTreeSet<String> {
        self.nodes()
            .iter()
            .filter_map(|node| match node.kind() {
                NodeKind::ReadSqlSource(read) => {
                    read.source.semantic_model_name().map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }

    /// Highest id sequence present in the plan, used to seed allocators for
    /// rewrites.
    pub fn max_node_sequence(&self) -> u64 {
        self.nodes()
            .iter()
            .map(|node| node.node_id().sequence())
            .max()
            .unwrap_or(0)
    }

    /// Whether two plans describe the same computation: node ids may differ,
    /// but shape and per-node parameters must match.
    pub fn structurally_equivalent(&self, other: &DataflowPlan) -> bool {
        let mut memo = HashMap::new();
        nodes_equivalent(&self.sink, &other.sink, &mut memo)
    }
}

type EquivalenceMemo = HashMap<(*const DataflowNode, *const DataflowNode), bool>;

fn nodes_equivalent(
    a: &DataflowNodeRef,
    b: &DataflowNodeRef,
    memo: &mut EquivalenceMemo,
) -> bool {
    let key = (Arc::as_ptr(a), Arc::as_ptr(b));
    if let Some(&known) = memo.get(&key) {
        return known;
    }
    let a_parents = a.parent_nodes();
    let b_parents = b.parent_nodes();
    let equivalent = a.functionally_identical(b)
        && a_parents.len() == b_parents.len()
        && a_parents
            .iter()
            .zip(&b_parents)
            .all(|(a_parent, b_parent)| nodes_equivalent(a_parent, b_parent, memo));
    memo.insert(key, equivalent);
    equivalent
}
