//! Per-execution context: the variable scope and prior node results.
//!
//! The context is owned exclusively by the engine's dispatch loop. Node
//! tasks receive immutable snapshots built at dispatch time; merges happen
//! after task join, so a successor always observes every predecessor's
//! variables without locking.

use crate::agent::AgentInput;
use crate::node::{Node, NodeId};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Mutable state of one run, confined to the dispatcher.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    variables: Map<String, JsonValue>,
    node_results: HashMap<NodeId, JsonValue>,
}

impl ExecutionContext {
    /// Seeds the context from the workflow's initial variables and the
    /// run's input data (input data wins on key collisions).
    #[must_use]
    pub fn new(initial_variables: &Map<String, JsonValue>, input_data: &JsonValue) -> Self {
        let mut variables = initial_variables.clone();
        if let Some(input) = input_data.as_object() {
            for (key, value) in input {
                variables.insert(key.clone(), value.clone());
            }
        }
        Self {
            variables,
            node_results: HashMap::new(),
        }
    }

    /// Returns the current variable scope.
    #[must_use]
    pub fn variables(&self) -> &Map<String, JsonValue> {
        &self.variables
    }

    /// Merges an agent's returned variables into the scope.
    pub fn merge_variables(&mut self, variables: Map<String, JsonValue>) {
        for (key, value) in variables {
            self.variables.insert(key, value);
        }
    }

    /// Records a node's result value.
    pub fn record_result(&mut self, node_id: NodeId, result: JsonValue) {
        self.node_results.insert(node_id, result);
    }

    /// Returns a node's recorded result.
    #[must_use]
    pub fn result(&self, node_id: &NodeId) -> Option<&JsonValue> {
        self.node_results.get(node_id)
    }

    /// Returns all node results keyed by node id.
    #[must_use]
    pub fn results_map(&self) -> Map<String, JsonValue> {
        self.node_results
            .iter()
            .map(|(id, value)| (id.to_string(), value.clone()))
            .collect()
    }

    /// Builds the input object for a node about to be dispatched.
    ///
    /// The input contains a snapshot of the variable scope, every prior node
    /// result, and the node's resolved input mapping: string values starting
    /// with `$` are replaced by the named variable (unknown names are
    /// dropped), everything else is copied verbatim.
    #[must_use]
    pub fn prepare_input(&self, node: &Node) -> AgentInput {
        let mut input = AgentInput::new(self.variables.clone(), self.results_map());

        if let Some(mapping) = node.data.effective_input_mapping() {
            for (key, value) in mapping {
                match value.as_str() {
                    Some(reference) if reference.starts_with('$') => {
                        let name = &reference[1..];
                        if let Some(resolved) = self.variables.get(name) {
                            input.insert(key.clone(), resolved.clone());
                        }
                    }
                    _ => input.insert(key.clone(), value.clone()),
                }
            }
        }

        input
    }
}
