//! LLM text generator agent.
//!
//! Renders the configured `input_template` against the input object and
//! delegates generation to an [`LlmBackend`](crate::llm::LlmBackend).
//! Optional `variable_extraction` regexes pull variables out of the
//! generated text.

use crate::llm::{LlmBackend, LlmRequest};
use crate::registry::Agent;
use agentflow_workflow::agent::{AgentInput, AgentMetadata, AgentOutcome};
use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The text generator agent.
pub struct TextGeneratorAgent {
    backend: Arc<dyn LlmBackend>,
}

impl TextGeneratorAgent {
    /// Creates the agent over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

/// Substitutes `{name}` placeholders from the input's top-level entries.
///
/// A placeholder with no matching entry is an input error, matching
/// strict template rendering.
fn render_template(template: &str, input: &AgentInput) -> Result<String, AgentFailure> {
    static PLACEHOLDER: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder"));

    let mut missing = None;
    let rendered = pattern.replace_all(template, |captures: &regex::Captures<'_>| {
        let name = &captures[1];
        match input.get(name) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(AgentFailure::InvalidInput {
            message: format!("template references missing input field: {name}"),
        });
    }
    Ok(rendered.to_string())
}

fn extract_variables(text: &str, config: &JsonValue) -> Map<String, JsonValue> {
    let mut variables = Map::new();
    let Some(patterns) = config
        .get("variable_extraction")
        .and_then(JsonValue::as_object)
    else {
        return variables;
    };

    for (name, raw) in patterns {
        let Some(raw) = raw.as_str() else { continue };
        let Ok(pattern) = Regex::new(raw) else {
            tracing::warn!(variable = name.as_str(), "invalid extraction pattern");
            continue;
        };
        if let Some(captures) = pattern.captures(text) {
            let value = captures
                .get(1)
                .or_else(|| captures.get(0))
                .map(|m| m.as_str())
                .unwrap_or_default();
            variables.insert(name.clone(), json!(value));
        }
    }
    variables
}

#[async_trait]
impl Agent for TextGeneratorAgent {
    async fn run(
        &self,
        config: &JsonValue,
        input: AgentInput,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure> {
        let started_at = Utc::now();

        let template = config
            .get("input_template")
            .and_then(JsonValue::as_str)
            .unwrap_or("{prompt}");
        let prompt = render_template(template, &input)?;

        if cancel.is_cancelled() {
            return Err(AgentFailure::Cancelled);
        }

        let request = LlmRequest {
            prompt,
            system: config
                .get("system_prompt")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string),
            model: config
                .get("model")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string),
            temperature: config.get("temperature").and_then(JsonValue::as_f64),
            max_tokens: Some(
                config
                    .get("max_tokens")
                    .and_then(JsonValue::as_u64)
                    .unwrap_or(1000) as u32,
            ),
        };

        let response = self.backend.generate(&request).await?;
        let variables = extract_variables(&response.content, config);

        let output = json!({
            "generated_text": response.content,
            "model": response.model,
            "usage": response.usage,
        });

        Ok(AgentOutcome {
            output,
            variables,
            metadata: AgentMetadata::spanning(started_at)
                .with_extra("model", json!(response.model)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedBackend;

    fn input_with(entries: &[(&str, JsonValue)]) -> AgentInput {
        let mut input = AgentInput::default();
        for (key, value) in entries {
            input.insert(*key, value.clone());
        }
        input
    }

    #[tokio::test]
    async fn renders_template_and_generates() {
        let agent = TextGeneratorAgent::new(Arc::new(CannedBackend::new("Generated summary.")));
        let outcome = agent
            .run(
                &json!({"input_template": "Summarise: {topic}", "max_tokens": 100}),
                input_with(&[("topic", json!("workflow engines"))]),
                &CancellationToken::new(),
            )
            .await
            .expect("generation succeeds");

        assert_eq!(outcome.output["generated_text"], json!("Generated summary."));
        assert!(outcome.metadata.extra.contains_key("model"));
    }

    #[tokio::test]
    async fn missing_template_field_is_invalid_input() {
        let agent = TextGeneratorAgent::new(Arc::new(CannedBackend::new("x")));
        let result = agent
            .run(
                &json!({"input_template": "{prompt}"}),
                AgentInput::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AgentFailure::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn extracts_variables_from_generated_text() {
        let agent = TextGeneratorAgent::new(Arc::new(CannedBackend::new(
            "Verdict: approved. Confidence: 87%",
        )));
        let outcome = agent
            .run(
                &json!({
                    "input_template": "{prompt}",
                    "variable_extraction": {
                        "verdict": r"Verdict: (\w+)",
                        "confidence": r"Confidence: (\d+)%"
                    }
                }),
                input_with(&[("prompt", json!("judge this"))]),
                &CancellationToken::new(),
            )
            .await
            .expect("generation succeeds");

        assert_eq!(outcome.variables["verdict"], json!("approved"));
        assert_eq!(outcome.variables["confidence"], json!("87"));
    }

    #[test]
    fn template_renders_non_string_values() {
        let rendered = render_template(
            "count is {count}",
            &input_with(&[("count", json!(7))]),
        )
        .expect("render");
        assert_eq!(rendered, "count is 7");
    }
}
