//! Pre-flight workflow validation.
//!
//! Runs against the raw workflow JSON (the designer may submit graphs that
//! do not survive a typed parse, and those are exactly the ones that need
//! diagnostics). Errors make the workflow unexecutable; warnings do not.

use crate::agent::BUILTIN_AGENT_KINDS;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

const VALID_NODE_KINDS: [&str; 4] = ["agent", "condition", "trigger", "action"];

const SUPPORTED_LANGUAGES: [&str; 6] =
    ["python", "javascript", "typescript", "java", "cpp", "csharp"];

const SUPPORTED_PROCESSOR_OPERATIONS: [&str; 10] = [
    "filter",
    "sort",
    "group_by",
    "aggregate",
    "transform",
    "join",
    "pivot",
    "clean",
    "sample",
    "statistics",
];

/// The result of validating a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when no errors were found.
    pub is_valid: bool,
    /// Blocking problems.
    pub errors: Vec<String>,
    /// Non-blocking problems.
    pub warnings: Vec<String>,
    /// Errors grouped by node id.
    pub node_errors: HashMap<String, Vec<String>>,
    /// Errors grouped by edge id.
    pub edge_errors: HashMap<String, Vec<String>>,
    /// Improvement suggestions.
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    fn node_error(&mut self, node_id: &str, message: String) {
        self.errors.push(message.clone());
        self.node_errors
            .entry(node_id.to_string())
            .or_default()
            .push(message);
    }

    fn edge_error(&mut self, edge_id: &str, message: String) {
        self.errors.push(message.clone());
        self.edge_errors
            .entry(edge_id.to_string())
            .or_default()
            .push(message);
    }
}

/// Validates a workflow graph submitted as raw JSON.
#[must_use]
pub fn validate_workflow(workflow_data: &JsonValue) -> ValidationReport {
    let mut report = ValidationReport::default();

    let nodes: Vec<&JsonValue> = workflow_data
        .get("nodes")
        .and_then(JsonValue::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    let edges: Vec<&JsonValue> = workflow_data
        .get("edges")
        .and_then(JsonValue::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();

    check_basic_structure(&nodes, &edges, &mut report);
    if !nodes.is_empty() {
        check_nodes(&nodes, &mut report);
        check_edges(&nodes, &edges, &mut report);
        check_workflow_logic(&nodes, &edges, &mut report);
        check_acyclic(&nodes, &edges, &mut report);
        check_agent_configs(&nodes, &mut report);
        generate_recommendations(&nodes, &mut report);
    }

    report.is_valid = report.errors.is_empty();
    report
}

fn node_id_of(node: &JsonValue) -> &str {
    node.get("id").and_then(JsonValue::as_str).unwrap_or("<missing>")
}

fn edge_id_of(edge: &JsonValue) -> &str {
    edge.get("id").and_then(JsonValue::as_str).unwrap_or("<missing>")
}

fn node_kind_of(node: &JsonValue) -> Option<&str> {
    node.get("kind")
        .or_else(|| node.get("type"))
        .and_then(JsonValue::as_str)
}

fn agent_kind_of(node: &JsonValue) -> Option<&str> {
    let data = node.get("data")?;
    data.get("agent_kind")
        .or_else(|| data.get("agentType"))
        .and_then(JsonValue::as_str)
}

fn config_of(node: &JsonValue) -> Option<&JsonValue> {
    node.get("data")?.get("config")
}

fn check_basic_structure(nodes: &[&JsonValue], edges: &[&JsonValue], report: &mut ValidationReport) {
    if nodes.is_empty() {
        report
            .errors
            .push("Workflow must contain at least one node".to_string());
        return;
    }

    if nodes.len() > 100 {
        report.warnings.push(
            "Workflow has many nodes - consider breaking into smaller workflows".to_string(),
        );
    }

    if nodes.len() > 1 {
        let connected: HashSet<&str> = edges
            .iter()
            .flat_map(|e| {
                e.get("source")
                    .and_then(JsonValue::as_str)
                    .into_iter()
                    .chain(e.get("target").and_then(JsonValue::as_str))
            })
            .collect();

        let orphaned: Vec<&str> = nodes
            .iter()
            .map(|n| node_id_of(n))
            .filter(|id| !connected.contains(id))
            .collect();

        if !orphaned.is_empty() {
            report
                .warnings
                .push(format!("Orphaned nodes found: {orphaned:?}"));
        }
    }
}

fn check_nodes(nodes: &[&JsonValue], report: &mut ValidationReport) {
    let mut seen_ids = HashSet::new();

    for node in nodes {
        let node_id = node_id_of(node).to_string();

        if !seen_ids.insert(node_id.clone()) {
            report.node_error(&node_id, format!("Duplicate node ID: {node_id}"));
        }

        for field in ["id", "position", "data"] {
            if node.get(field).is_none() {
                report.node_error(
                    &node_id,
                    format!("Node {node_id} missing required field: {field}"),
                );
            }
        }

        match node_kind_of(node) {
            Some(kind) if VALID_NODE_KINDS.contains(&kind) => {}
            Some(kind) => {
                report.node_error(&node_id, format!("Node {node_id} has invalid type: {kind}"));
            }
            None => {
                report.node_error(&node_id, format!("Node {node_id} missing required field: kind"));
            }
        }

        if node_kind_of(node) == Some("agent") {
            match agent_kind_of(node) {
                None => {
                    report.node_error(&node_id, format!("Agent node {node_id} missing agent_kind"));
                }
                Some(kind) if !BUILTIN_AGENT_KINDS.contains(&kind) => {
                    report.warnings.push(format!(
                        "Agent node {node_id} has unknown agent type: {kind}"
                    ));
                }
                Some(_) => {}
            }
        }

        let has_label = node
            .get("data")
            .and_then(|d| d.get("label"))
            .and_then(JsonValue::as_str)
            .is_some_and(|l| !l.is_empty());
        if !has_label {
            report
                .warnings
                .push(format!("Node {node_id} missing recommended field: label"));
        }
    }
}

fn check_edges(nodes: &[&JsonValue], edges: &[&JsonValue], report: &mut ValidationReport) {
    let node_ids: HashSet<&str> = nodes.iter().map(|n| node_id_of(n)).collect();
    let mut seen_ids = HashSet::new();

    for edge in edges {
        let edge_id = edge_id_of(edge).to_string();

        if !seen_ids.insert(edge_id.clone()) {
            report.edge_error(&edge_id, format!("Duplicate edge ID: {edge_id}"));
        }

        for field in ["id", "source", "target"] {
            if edge.get(field).is_none() {
                report.edge_error(
                    &edge_id,
                    format!("Edge {edge_id} missing required field: {field}"),
                );
            }
        }

        if let Some(source) = edge.get("source").and_then(JsonValue::as_str)
            && !node_ids.contains(source)
        {
            report.edge_error(
                &edge_id,
                format!("Edge {edge_id} references non-existent source node: {source}"),
            );
        }

        if let Some(target) = edge.get("target").and_then(JsonValue::as_str)
            && !node_ids.contains(target)
        {
            report.edge_error(
                &edge_id,
                format!("Edge {edge_id} references non-existent target node: {target}"),
            );
        }
    }
}

fn check_workflow_logic(nodes: &[&JsonValue], edges: &[&JsonValue], report: &mut ValidationReport) {
    let targets: HashSet<&str> = edges
        .iter()
        .filter_map(|e| e.get("target").and_then(JsonValue::as_str))
        .collect();
    let sources: HashSet<&str> = edges
        .iter()
        .filter_map(|e| e.get("source").and_then(JsonValue::as_str))
        .collect();

    if !nodes.iter().any(|n| !targets.contains(node_id_of(n))) {
        report
            .warnings
            .push("No entry points found - workflow may not be executable".to_string());
    }

    if !nodes.iter().any(|n| !sources.contains(node_id_of(n))) {
        report
            .warnings
            .push("No exit points found - workflow may not complete".to_string());
    }

    if !nodes.iter().any(|n| node_kind_of(n) == Some("trigger")) {
        report
            .warnings
            .push("No trigger nodes found - workflow may not start automatically".to_string());
    }
}

fn check_acyclic(nodes: &[&JsonValue], edges: &[&JsonValue], report: &mut ValidationReport) {
    let mut adjacency: HashMap<&str, Vec<&str>> =
        nodes.iter().map(|n| (node_id_of(n), Vec::new())).collect();

    for edge in edges {
        let (Some(source), Some(target)) = (
            edge.get("source").and_then(JsonValue::as_str),
            edge.get("target").and_then(JsonValue::as_str),
        ) else {
            continue;
        };
        if adjacency.contains_key(target)
            && let Some(neighbours) = adjacency.get_mut(source)
        {
            neighbours.push(target);
        }
    }

    // Iterative DFS with an explicit recursion stack
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    for &start in adjacency.keys() {
        if visited.contains(start) {
            continue;
        }

        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        on_stack.insert(start);
        visited.insert(start);

        while let Some(&(node, next)) = stack.last() {
            let neighbours = &adjacency[node];
            if next < neighbours.len() {
                stack.last_mut().expect("non-empty stack").1 += 1;
                let neighbour = neighbours[next];
                if on_stack.contains(neighbour) {
                    report
                        .errors
                        .push("Workflow contains cycles - this is not allowed".to_string());
                    return;
                }
                if visited.insert(neighbour) {
                    on_stack.insert(neighbour);
                    stack.push((neighbour, 0));
                }
            } else {
                on_stack.remove(node);
                stack.pop();
            }
        }
    }
}

fn check_agent_configs(nodes: &[&JsonValue], report: &mut ValidationReport) {
    for node in nodes {
        if node_kind_of(node) != Some("agent") {
            continue;
        }
        let node_id = node_id_of(node);
        let Some(agent_kind) = agent_kind_of(node) else {
            continue;
        };
        let Some(config) = config_of(node) else {
            continue;
        };

        match agent_kind {
            "llm_text_generator" => {
                if let Some(temp) = config.get("temperature") {
                    let in_range = temp.as_f64().is_some_and(|t| (0.0..=2.0).contains(&t));
                    if !in_range {
                        report.warnings.push(format!(
                            "Node {node_id}: temperature should be between 0 and 2"
                        ));
                    }
                }
                if let Some(tokens) = config.get("max_tokens") {
                    let in_range = tokens.as_i64().is_some_and(|t| (1..=4000).contains(&t));
                    if !in_range {
                        report.warnings.push(format!(
                            "Node {node_id}: max_tokens should be between 1 and 4000"
                        ));
                    }
                }
            }
            "api_caller" => {
                if let Some(timeout) = config.get("timeout_seconds").or_else(|| config.get("timeout")) {
                    let in_range = timeout.as_f64().is_some_and(|t| (1.0..=300.0).contains(&t));
                    if !in_range {
                        report.warnings.push(format!(
                            "Node {node_id}: timeout should be between 1 and 300 seconds"
                        ));
                    }
                }
                if let Some(retries) = config.get("retries") {
                    let in_range = retries.as_i64().is_some_and(|r| (0..=10).contains(&r));
                    if !in_range {
                        report.warnings.push(format!(
                            "Node {node_id}: retries should be between 0 and 10"
                        ));
                    }
                }
            }
            "data_processor" => {
                if let Some(operation) = config.get("operation").and_then(JsonValue::as_str)
                    && !SUPPORTED_PROCESSOR_OPERATIONS.contains(&operation)
                {
                    report
                        .warnings
                        .push(format!("Node {node_id}: unknown operation '{operation}'"));
                }
            }
            "code_analyzer" => {
                if let Some(language) = config.get("language").and_then(JsonValue::as_str)
                    && !SUPPORTED_LANGUAGES.contains(&language)
                {
                    report
                        .warnings
                        .push(format!("Node {node_id}: unsupported language '{language}'"));
                }
            }
            _ => {}
        }
    }
}

fn generate_recommendations(nodes: &[&JsonValue], report: &mut ValidationReport) {
    if nodes.len() > 20 {
        report.recommendations.push(
            "Consider breaking this workflow into smaller, more manageable pieces".to_string(),
        );
    }

    let unlabeled = nodes.iter().any(|n| {
        !n.get("data")
            .and_then(|d| d.get("label"))
            .and_then(JsonValue::as_str)
            .is_some_and(|l| !l.is_empty())
    });
    if unlabeled {
        report
            .recommendations
            .push("Add descriptive labels to all nodes for better clarity".to_string());
    }

    let label_contains = |node: &JsonValue, needle: &str| {
        node.get("data")
            .and_then(|d| d.get("label"))
            .and_then(JsonValue::as_str)
            .is_some_and(|l| l.to_lowercase().contains(needle))
    };

    let has_error_handling = nodes
        .iter()
        .any(|n| node_kind_of(n) == Some("condition") && label_contains(n, "error"));
    if !has_error_handling && nodes.len() > 5 {
        report
            .recommendations
            .push("Consider adding error handling nodes for better reliability".to_string());
    }

    let has_monitoring = nodes
        .iter()
        .any(|n| node_kind_of(n) == Some("action") && label_contains(n, "log"));
    if !has_monitoring {
        report
            .recommendations
            .push("Consider adding logging/monitoring nodes for better observability".to_string());
    }
}
