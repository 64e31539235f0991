//! Execution graph built from workflow data.
//!
//! The graph is a petgraph `DiGraph` over node ids with a side map for O(1)
//! lookup. Building the graph performs the execute-time structural checks:
//! non-empty node set, edges referencing known nodes, acyclicity.

use crate::definition::WorkflowData;
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The dependency graph for one execution.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
    nodes: HashMap<NodeId, Node>,
}

impl ExecutionGraph {
    /// Builds the execution graph from workflow data.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Empty` for a node-less workflow,
    /// `GraphError::UnknownNode` when an edge references a missing node, and
    /// `GraphError::CycleDetected` when the graph is not a DAG.
    pub fn build(data: &WorkflowData) -> Result<Self, GraphError> {
        if data.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut nodes = HashMap::new();

        for node in &data.nodes {
            let idx = graph.add_node(node.id.clone());
            index.insert(node.id.clone(), idx);
            nodes.insert(node.id.clone(), node.clone());
        }

        for edge in &data.edges {
            let source = index.get(&edge.source).ok_or_else(|| GraphError::UnknownNode {
                edge_id: edge.id.to_string(),
                node_id: edge.source.clone(),
            })?;
            let target = index.get(&edge.target).ok_or_else(|| GraphError::UnknownNode {
                edge_id: edge.id.to_string(),
                node_id: edge.target.clone(),
            })?;
            graph.add_edge(*source, *target, ());
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(GraphError::CycleDetected);
        }

        Ok(Self {
            graph,
            index,
            nodes,
        })
    }

    /// Returns the node definition for an id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns nodes with no incoming edges (entry points).
    #[must_use]
    pub fn entry_points(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect()
    }

    /// Returns the direct predecessors (dependencies) of a node.
    #[must_use]
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Returns the direct successors (dependents) of a node.
    #[must_use]
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect()
    }

    /// Iterates all node ids in the graph.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;

    fn data(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowData {
        WorkflowData::new(nodes, edges)
    }

    #[test]
    fn empty_workflow_rejected() {
        let result = ExecutionGraph::build(&data(vec![], vec![]));
        assert_eq!(result.unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn unknown_edge_target_rejected() {
        let result = ExecutionGraph::build(&data(
            vec![Node::trigger("a")],
            vec![Edge::new("e1", "a", "ghost")],
        ));
        match result.unwrap_err() {
            GraphError::UnknownNode { edge_id, node_id } => {
                assert_eq!(edge_id, "e1");
                assert_eq!(node_id.as_str(), "ghost");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cycle_rejected() {
        let result = ExecutionGraph::build(&data(
            vec![Node::trigger("a"), Node::agent("b", "data_processor"), Node::agent("c", "data_processor")],
            vec![
                Edge::new("e1", "a", "b"),
                Edge::new("e2", "b", "c"),
                Edge::new("e3", "c", "a"),
            ],
        ));
        assert_eq!(result.unwrap_err(), GraphError::CycleDetected);
    }

    #[test]
    fn single_node_graph() {
        let graph = ExecutionGraph::build(&data(vec![Node::trigger("only")], vec![])).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.entry_points(), vec![NodeId::from("only")]);
        assert!(graph.dependencies(&NodeId::from("only")).is_empty());
    }

    #[test]
    fn diamond_adjacency() {
        let graph = ExecutionGraph::build(&data(
            vec![
                Node::trigger("a"),
                Node::agent("b", "data_processor"),
                Node::agent("c", "data_processor"),
                Node::agent("d", "data_processor"),
            ],
            vec![
                Edge::new("e1", "a", "b"),
                Edge::new("e2", "a", "c"),
                Edge::new("e3", "b", "d"),
                Edge::new("e4", "c", "d"),
            ],
        ))
        .unwrap();

        assert_eq!(graph.entry_points(), vec![NodeId::from("a")]);

        let mut deps = graph.dependencies(&NodeId::from("d"));
        deps.sort();
        assert_eq!(deps, vec![NodeId::from("b"), NodeId::from("c")]);

        let mut dependents = graph.dependents(&NodeId::from("a"));
        dependents.sort();
        assert_eq!(dependents, vec![NodeId::from("b"), NodeId::from("c")]);
    }
}
