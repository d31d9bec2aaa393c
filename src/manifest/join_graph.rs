//! Entity-link graph over semantic models.
//!
//! Nodes are semantic models; an edge `A -> B` labeled with entity `e` means
//! a row set rooted at `A` can be joined to `B` using `e`, because `A`
//! carries the entity and `B` is keyed on it (primary, unique, or natural).
//! The source-node evaluator walks this graph to find join targets and to
//! discover the intermediate models that bridge multi-hop group-bys.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

use super::semantic_model::{EntityType, SemanticModel};

/// One joinable link between two semantic models.
#[derive(Debug, Clone)]
pub struct EntityLinkEdge {
    pub entity_name: String,
    pub target_entity_type: EntityType,
}

#[derive(Debug, Clone, Default)]
pub struct EntityLinkGraph {
    graph: DiGraph<String, EntityLinkEdge>,
    model_index: HashMap<String, NodeIndex>,
}

impl EntityLinkGraph {
    pub fn from_models(models: &[SemanticModel]) -> Self {
        let mut graph = DiGraph::new();
        let mut model_index = HashMap::new();

        for model in models {
            let index = graph.add_node(model.name.clone());
            model_index.insert(model.name.clone(), index);
        }

        for from in models {
            for to in models {
                if from.name == to.name {
                    continue;
                }
                for entity in &from.entities {
                    let Some(target_entity) = to.entity(&entity.name) else {
                        continue;
                    };
                    if !target_entity.entity_type.is_join_key() {
                        continue;
                    }
                    graph.add_edge(
                        model_index[&from.name],
                        model_index[&to.name],
                        EntityLinkEdge {
                            entity_name: entity.name.clone(),
                            target_entity_type: target_entity.entity_type,
                        },
                    );
                }
            }
        }

        Self { graph, model_index }
    }

    pub fn model_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Models reachable from `from_model` in one join on `entity`, in edge
    /// insertion order.
    pub fn join_targets_from(&self, from_model: &str, entity: &str) -> Vec<&str> {
        let Some(&from_index) = self.model_index.get(from_model) else {
            return Vec::new();
        };
        let mut targets: Vec<&str> = Vec::new();
        for edge in self.graph.edges(from_index) {
            if edge.weight().entity_name == entity {
                let target = self.graph[edge.target()].as_str();
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    pub fn has_join_edge(&self, from_model: &str, entity: &str, to_model: &str) -> bool {
        self.join_targets_from(from_model, entity)
            .contains(&to_model)
    }

    /// The entity type on the target side of a join edge, used to decide
    /// whether a join needs a validity window.
    pub fn target_entity_type(
        &self,
        from_model: &str,
        entity: &str,
        to_model: &str,
    ) -> Option<EntityType> {
        let from_index = *self.model_index.get(from_model)?;
        let to_index = *self.model_index.get(to_model)?;
        self.graph
            .edges_connecting(from_index, to_index)
            .find(|edge| edge.weight().entity_name == entity)
            .map(|edge| edge.weight().target_entity_type)
    }
}
