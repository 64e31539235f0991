//! Ready-set tracking for the dispatch loop.
//!
//! The tracker holds the shrinking dependency graph of one run:
//! - Completed nodes are removed, unblocking their dependents
//! - Failed nodes receive a self-edge so they never become ready and keep
//!   blocking everything downstream
//! - A node is ready when it has zero incoming edges and is not executing
//! - The run is over when nothing is ready and nothing is executing

use crate::graph::ExecutionGraph;
use crate::node::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// Tracks which nodes of a run still need to execute.
#[derive(Debug, Clone)]
pub struct ReadyTracker {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
    executing: HashSet<NodeId>,
    failed: HashSet<NodeId>,
}

impl ReadyTracker {
    /// Creates a tracker covering every node of the execution graph.
    #[must_use]
    pub fn from_graph(execution_graph: &ExecutionGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node_id in execution_graph.node_ids() {
            let idx = graph.add_node(node_id.clone());
            index.insert(node_id.clone(), idx);
        }

        for node_id in execution_graph.node_ids() {
            let source = index[node_id];
            for dependent in execution_graph.dependents(node_id) {
                let target = index[&dependent];
                graph.add_edge(source, target, ());
            }
        }

        Self {
            graph,
            index,
            executing: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    /// Marks a node as dispatched.
    pub fn mark_executing(&mut self, node_id: &NodeId) {
        if self.index.contains_key(node_id) {
            self.executing.insert(node_id.clone());
        }
    }

    /// Marks a node as completed, removing it and unblocking dependents.
    pub fn mark_completed(&mut self, node_id: &NodeId) {
        self.executing.remove(node_id);
        if let Some(idx) = self.index.remove(node_id) {
            self.graph.remove_node(idx);
            // Removal invalidates petgraph indices
            self.rebuild_index();
        }
    }

    /// Marks a node as failed; a self-edge keeps it and its downstream blocked.
    pub fn mark_failed(&mut self, node_id: &NodeId) {
        self.executing.remove(node_id);
        if let Some(&idx) = self.index.get(node_id) {
            self.graph.add_edge(idx, idx, ());
            self.failed.insert(node_id.clone());
        }
    }

    /// Returns nodes with zero pending predecessors that are not executing.
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| {
                let node_id = self.graph.node_weight(idx)?;
                if self.executing.contains(node_id) {
                    return None;
                }
                Some(node_id.clone())
            })
            .collect()
    }

    /// Returns true when nothing is ready and nothing is executing.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.executing.is_empty() && self.ready_nodes().is_empty()
    }

    /// Returns true if any node failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Number of nodes not yet completed (executing, blocked, or failed).
    #[must_use]
    pub fn remaining_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns nodes that never ran because a failed node sits upstream.
    #[must_use]
    pub fn blocked_nodes(&self) -> Vec<NodeId> {
        let mut blocked = HashSet::new();

        for failed_id in &self.failed {
            let Some(&start) = self.index.get(failed_id) else {
                continue;
            };
            let mut to_visit = vec![start];
            while let Some(idx) = to_visit.pop() {
                for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                    let target = edge.target();
                    if target == idx {
                        continue; // self-edge on the failed node
                    }
                    if let Some(target_id) = self.graph.node_weight(target)
                        && !self.failed.contains(target_id)
                        && blocked.insert(target_id.clone())
                    {
                        to_visit.push(target);
                    }
                }
            }
        }

        blocked.into_iter().collect()
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for idx in self.graph.node_indices() {
            if let Some(node_id) = self.graph.node_weight(idx) {
                self.index.insert(node_id.clone(), idx);
            }
        }
    }
}
