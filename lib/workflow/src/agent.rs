//! The agent contract the engine dispatches against.
//!
//! The engine never links against agent implementations. It hands a kind
//! string, a config map, and an [`AgentInput`] to an [`AgentInvoker`] and
//! gets back an [`AgentOutcome`] or a typed failure. The registry in the
//! agents crate is the production invoker; tests use mocks.

use crate::error::InvokeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio_util::sync::CancellationToken;

/// The built-in agent kinds, shared by the registry and the validator.
pub const BUILTIN_AGENT_KINDS: [&str; 7] = [
    "llm_text_generator",
    "data_processor",
    "api_caller",
    "code_analyzer",
    "file_handler",
    "email_sender",
    "database_query",
];

/// The input object handed to one node's agent.
///
/// A flat map containing `variables`, `previous_results`, and every resolved
/// input-mapping entry at the top level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentInput {
    values: Map<String, JsonValue>,
}

impl AgentInput {
    /// Builds an input from the execution's variable scope and prior results.
    #[must_use]
    pub fn new(variables: Map<String, JsonValue>, previous_results: Map<String, JsonValue>) -> Self {
        let mut values = Map::new();
        values.insert("variables".to_string(), JsonValue::Object(variables));
        values.insert(
            "previous_results".to_string(),
            JsonValue::Object(previous_results),
        );
        Self { values }
    }

    /// Builds an input from a raw map (used by agent-level tests).
    #[must_use]
    pub fn from_map(values: Map<String, JsonValue>) -> Self {
        Self { values }
    }

    /// Inserts a top-level entry (resolved input mapping).
    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        self.values.insert(key.into(), value);
    }

    /// Looks up a top-level entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Looks up a top-level string entry.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(JsonValue::as_str)
    }

    /// Returns the variable scope snapshot.
    #[must_use]
    pub fn variables(&self) -> Option<&Map<String, JsonValue>> {
        self.values.get("variables").and_then(JsonValue::as_object)
    }

    /// Returns the whole input as a JSON value.
    #[must_use]
    pub fn as_value(&self) -> JsonValue {
        JsonValue::Object(self.values.clone())
    }

    /// Consumes the input, returning the underlying map.
    #[must_use]
    pub fn into_map(self) -> Map<String, JsonValue> {
        self.values
    }
}

/// Timing and bookkeeping every agent run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// When the agent started.
    pub started_at: DateTime<Utc>,
    /// When the agent finished.
    pub completed_at: DateTime<Utc>,
    /// Agent-specific extras (status codes, row counts, ...).
    #[serde(default)]
    pub extra: Map<String, JsonValue>,
}

impl AgentMetadata {
    /// Creates metadata spanning from `started_at` to now.
    #[must_use]
    pub fn spanning(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            completed_at: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Adds an extra entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Duration of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// A successful agent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// The agent's primary result.
    pub output: JsonValue,
    /// Variables merged into the execution scope (may be empty).
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
    /// Timing and bookkeeping.
    pub metadata: AgentMetadata,
}

impl AgentOutcome {
    /// Creates an outcome with empty variables.
    #[must_use]
    pub fn new(output: JsonValue, started_at: DateTime<Utc>) -> Self {
        Self {
            output,
            variables: Map::new(),
            metadata: AgentMetadata::spanning(started_at),
        }
    }

    /// Sets the variables map.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, JsonValue>) -> Self {
        self.variables = variables;
        self
    }
}

/// Dispatches one agent invocation.
///
/// Implemented by the agent registry; the engine only sees this trait.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Invokes the agent registered under `kind`.
    async fn invoke(
        &self,
        kind: &str,
        config: &JsonValue,
        input: AgentInput,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, InvokeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_input_layout() {
        let mut variables = Map::new();
        variables.insert("count".to_string(), JsonValue::from(3));
        let mut input = AgentInput::new(variables, Map::new());
        input.insert("url", JsonValue::from("https://example.com"));

        assert_eq!(input.get_str("url"), Some("https://example.com"));
        assert_eq!(
            input.variables().and_then(|v| v.get("count")),
            Some(&JsonValue::from(3))
        );

        let value = input.as_value();
        assert!(value.get("previous_results").is_some());
    }

    #[test]
    fn metadata_duration_is_non_negative() {
        let metadata = AgentMetadata::spanning(Utc::now());
        assert!(metadata.duration_ms() >= 0);
    }

    #[test]
    fn outcome_serde_roundtrip() {
        let outcome = AgentOutcome::new(serde_json::json!({"ok": true}), Utc::now())
            .with_variables(Map::from_iter([(
                "api_response".to_string(),
                JsonValue::from(200),
            )]));

        let json = serde_json::to_string(&outcome).expect("serialize");
        let parsed: AgentOutcome = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.output, outcome.output);
        assert_eq!(parsed.variables, outcome.variables);
    }

    #[test]
    fn builtin_kind_list_is_complete() {
        assert_eq!(BUILTIN_AGENT_KINDS.len(), 7);
        assert!(BUILTIN_AGENT_KINDS.contains(&"api_caller"));
        assert!(BUILTIN_AGENT_KINDS.contains(&"email_sender"));
    }
}
