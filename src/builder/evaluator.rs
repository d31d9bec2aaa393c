//! Evaluates a candidate source against a set of required linkable specs.
//!
//! The evaluation splits the requirement into what the candidate provides
//! locally, what it can reach by joining other models through the entity
//! link graph, and what no join path provides. The recipe search ranks
//! candidates by the join count of their evaluations.

use crate::dataflow::{
    DataflowNode, DataflowNodeRef, JoinDescription, JoinOnEntitiesNode, NodeIdAllocator, NodeKind,
    SqlJoinType, ValidityWindowJoinDescription,
};
use crate::manifest::{ManifestError, SemanticManifestLookup};
use crate::spec::{EntitySpec, LinkableSpec, LinkableSpecSet, TimeDimensionSpec, TimeGranularity};

use super::source_nodes::{SourceNodeCandidate, SourceNodeSet};

/// A joinable node together with the required specs it would satisfy.
#[derive(Debug, Clone)]
pub struct JoinLinkableInstanceSet {
    pub node: DataflowNodeRef,
    pub satisfiable_linkable_specs: LinkableSpecSet,
}

/// How one candidate fares against a requirement.
#[derive(Debug, Clone)]
pub struct NodeEvaluation {
    pub local_linkable_specs: LinkableSpecSet,
    /// Aligned with `join_targets`: entry `i` describes what join `i`
    /// contributes.
    pub join_linkable_instances: Vec<JoinLinkableInstanceSet>,
    pub join_targets: Vec<JoinDescription>,
    pub unjoinable_linkable_specs: Vec<LinkableSpec>,
}

impl NodeEvaluation {
    pub fn join_count(&self) -> usize {
        self.join_targets.len()
    }

    pub fn is_fully_satisfied(&self) -> bool {
        self.unjoinable_linkable_specs.is_empty()
    }
}

pub struct NodeEvaluator<'a> {
    lookup: &'a SemanticManifestLookup<'a>,
    source_nodes: &'a SourceNodeSet,
    default_join_type: SqlJoinType,
}

impl<'a> NodeEvaluator<'a> {
    pub fn new(
        lookup: &'a SemanticManifestLookup<'a>,
        source_nodes: &'a SourceNodeSet,
        default_join_type: SqlJoinType,
    ) -> Self {
        Self {
            lookup,
            source_nodes,
            default_join_type,
        }
    }

    pub fn evaluate(
        &self,
        candidate: &SourceNodeCandidate,
        required_specs: &LinkableSpecSet,
        ids: &mut NodeIdAllocator,
    ) -> Result<NodeEvaluation, ManifestError> {
        let local_linkable_specs = required_specs.intersection(&candidate.linkable_specs);
        let remaining = required_specs.difference(&candidate.linkable_specs);

        let mut unjoinable: Vec<LinkableSpec> = Vec::new();
        let mut groups: Vec<(String, Vec<LinkableSpec>)> = Vec::new();
        for spec in remaining.as_specs() {
            match spec.entity_links().first() {
                // A linkless element missing from the scan has no join path.
                None => unjoinable.push(spec),
                Some(entity) => match groups.iter_mut().find(|(name, _)| name == entity) {
                    Some((_, specs)) => specs.push(spec),
                    None => groups.push((entity.clone(), vec![spec])),
                },
            }
        }

        let Some(left_model) = candidate.semantic_model.as_deref() else {
            for (_, specs) in groups {
                unjoinable.extend(specs);
            }
            return Ok(NodeEvaluation {
                local_linkable_specs,
                join_linkable_instances: Vec::new(),
                join_targets: Vec::new(),
                unjoinable_linkable_specs: unjoinable,
            });
        };

        let mut join_linkable_instances = Vec::new();
        let mut join_targets = Vec::new();

        for (entity, specs) in groups {
            let leftover = self.evaluate_entity_group(
                left_model,
                &entity,
                specs,
                &mut join_linkable_instances,
                &mut join_targets,
                ids,
            )?;
            unjoinable.extend(leftover);
        }

        Ok(NodeEvaluation {
            local_linkable_specs,
            join_linkable_instances,
            join_targets,
            unjoinable_linkable_specs: unjoinable,
        })
    }

    /// Satisfy one first-link group with joins out of `left_model`, returning
    /// the specs no target or bridge path covers.
    fn evaluate_entity_group(
        &self,
        left_model: &str,
        entity: &str,
        specs: Vec<LinkableSpec>,
        join_linkable_instances: &mut Vec<JoinLinkableInstanceSet>,
        join_targets: &mut Vec<JoinDescription>,
        ids: &mut NodeIdAllocator,
    ) -> Result<Vec<LinkableSpec>, ManifestError> {
        let target_names = self
            .lookup
            .join_graph()
            .join_targets_from(left_model, entity);

        let mut uncovered = specs;

        // Prefer a single target covering the whole group.
        for target_name in &target_names {
            let Some(target) = self.source_nodes.read_candidate_for_model(target_name) else {
                continue;
            };
            if uncovered.iter().all(|spec| provides(target, spec)) {
                join_linkable_instances.push(JoinLinkableInstanceSet {
                    node: target.node.clone(),
                    satisfiable_linkable_specs: LinkableSpecSet::from_specs(uncovered.clone()),
                });
                join_targets.push(self.join_description(
                    left_model,
                    target_name,
                    entity,
                    target.node.clone(),
                )?);
                return Ok(Vec::new());
            }
        }

        // Otherwise take targets greedily by coverage, first listed wins ties.
        let mut used: Vec<&str> = Vec::new();
        loop {
            let mut best: Option<(&str, Vec<LinkableSpec>)> = None;
            for target_name in &target_names {
                if used.contains(target_name) {
                    continue;
                }
                let Some(target) = self.source_nodes.read_candidate_for_model(target_name) else {
                    continue;
                };
                let covered: Vec<LinkableSpec> = uncovered
                    .iter()
                    .filter(|spec| provides(target, spec))
                    .cloned()
                    .collect();
                if covered.is_empty() {
                    continue;
                }
                if best
                    .as_ref()
                    .map(|(_, existing)| covered.len() > existing.len())
                    .unwrap_or(true)
                {
                    best = Some((*target_name, covered));
                }
            }
            let Some((target_name, covered)) = best else {
                break;
            };
            used.push(target_name);
            uncovered.retain(|spec| !covered.contains(spec));
            let target = self
                .source_nodes
                .read_candidate_for_model(target_name)
                .ok_or_else(|| ManifestError::UnknownSemanticModel(target_name.to_string()))?;
            join_linkable_instances.push(JoinLinkableInstanceSet {
                node: target.node.clone(),
                satisfiable_linkable_specs: LinkableSpecSet::from_specs(covered),
            });
            join_targets.push(self.join_description(
                left_model,
                target_name,
                entity,
                target.node.clone(),
            )?);
            if uncovered.is_empty() {
                return Ok(Vec::new());
            }
        }

        // Two-link leftovers may still be reachable through a bridge model.
        let (two_link, mut unjoinable): (Vec<_>, Vec<_>) = uncovered
            .into_iter()
            .partition(|spec| spec.entity_links().len() == 2);
        if !two_link.is_empty() {
            match self.synthesize_bridge_join(left_model, entity, &two_link, ids)? {
                Some((instance, join)) => {
                    join_linkable_instances.push(instance);
                    join_targets.push(join);
                }
                None => unjoinable.extend(two_link),
            }
        }
        Ok(unjoinable)
    }

    /// Build a bridge-and-terminal join subtree covering all of `specs`, each
    /// of which links through `entity` and then one further entity.
    fn synthesize_bridge_join(
        &self,
        left_model: &str,
        entity: &str,
        specs: &[LinkableSpec],
        ids: &mut NodeIdAllocator,
    ) -> Result<Option<(JoinLinkableInstanceSet, JoinDescription)>, ManifestError> {
        let graph = self.lookup.join_graph();
        for bridge_name in graph.join_targets_from(left_model, entity) {
            let Some(bridge) = self.source_nodes.read_candidate_for_model(bridge_name) else {
                continue;
            };
            let second_links: Vec<&str> = {
                let mut links = Vec::new();
                for spec in specs {
                    let link = spec.entity_links()[1].as_str();
                    if !links.contains(&link) {
                        links.push(link);
                    }
                }
                links
            };

            // Every second-hop entity must resolve to a terminal that covers
            // its specs; collect the inner joins as we go.
            let mut inner_joins = Vec::with_capacity(second_links.len());
            let mut all_covered = true;
            for second_entity in second_links {
                let stripped: Vec<LinkableSpec> = specs
                    .iter()
                    .filter(|spec| spec.entity_links()[1] == second_entity)
                    .map(LinkableSpec::without_first_link)
                    .collect();
                let terminal = graph
                    .join_targets_from(bridge_name, second_entity)
                    .into_iter()
                    .find_map(|terminal_name| {
                        self.source_nodes
                            .read_candidate_for_model(terminal_name)
                            .filter(|terminal| {
                                stripped.iter().all(|spec| terminal.linkable_specs.contains(spec))
                            })
                            .map(|terminal| (terminal_name, terminal))
                    });
                match terminal {
                    Some((terminal_name, terminal)) => inner_joins.push(self.join_description(
                        bridge_name,
                        terminal_name,
                        second_entity,
                        terminal.node.clone(),
                    )?),
                    None => {
                        all_covered = false;
                        break;
                    }
                }
            }
            if !all_covered {
                continue;
            }

            let bridge_join_node = DataflowNode::new(
                NodeKind::JoinOnEntities(JoinOnEntitiesNode {
                    left: bridge.node.clone(),
                    joins: inner_joins,
                }),
                ids,
            );
            let instance = JoinLinkableInstanceSet {
                node: bridge_join_node.clone(),
                satisfiable_linkable_specs: LinkableSpecSet::from_specs(specs.to_vec()),
            };
            let join = self.join_description(left_model, bridge_name, entity, bridge_join_node)?;
            return Ok(Some((instance, join)));
        }
        Ok(None)
    }

    fn join_description(
        &self,
        left_model: &str,
        target_model: &str,
        entity: &str,
        join_node: DataflowNodeRef,
    ) -> Result<JoinDescription, ManifestError> {
        let models = self.lookup.model_lookup();
        let (left_dimensions, left_time_dimensions) = models.partition_specs(left_model)?;
        let (target_dimensions, target_time_dimensions) = models.partition_specs(target_model)?;

        let join_on_partition_dimensions = left_dimensions
            .into_iter()
            .filter(|dimension| {
                target_dimensions
                    .iter()
                    .any(|target| target.element_name == dimension.element_name)
            })
            .collect();
        let join_on_partition_time_dimensions = left_time_dimensions
            .into_iter()
            .filter(|dimension| {
                target_time_dimensions
                    .iter()
                    .any(|target| target.element_name == dimension.element_name)
            })
            .collect();

        let validity_window = models
            .model(target_model)?
            .validity_window_dimensions()
            .map(|(start, end)| ValidityWindowJoinDescription {
                window_start: TimeDimensionSpec::local(
                    &start.name,
                    start.time_granularity().unwrap_or(TimeGranularity::Day),
                ),
                window_end: TimeDimensionSpec::local(
                    &end.name,
                    end.time_granularity().unwrap_or(TimeGranularity::Day),
                ),
            });

        Ok(JoinDescription {
            join_node,
            join_on_entity: Some(EntitySpec::local(entity)),
            join_type: self.default_join_type,
            join_on_partition_dimensions,
            join_on_partition_time_dimensions,
            validity_window,
        })
    }
}

fn provides(candidate: &SourceNodeCandidate, spec: &LinkableSpec) -> bool {
    candidate.linkable_specs.contains(&spec.without_first_link())
}
