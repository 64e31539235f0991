//! LLM backend abstraction.
//!
//! One trait, one production implementation speaking the OpenAI-compatible
//! chat-completions wire format, and a canned backend for tests.

use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A single-shot generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The rendered prompt.
    pub prompt: String,
    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Model override; the backend default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Creates a request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

/// A generation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub content: String,
    /// Model that produced the response.
    pub model: String,
    /// Token accounting.
    #[serde(default)]
    pub usage: TokenUsage,
}

/// The interface every LLM provider implements.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a completion for the request.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, AgentFailure>;
}

/// Production backend for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiCompatibleBackend {
    /// Creates a backend against `base_url` (no trailing slash).
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, AgentFailure> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut http_request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentFailure::Timeout { seconds: 0 }
            } else {
                AgentFailure::Transport {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AgentFailure::Auth {
                message: format!("llm endpoint returned {status}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentFailure::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| AgentFailure::BadResponse {
                message: e.to_string(),
            })?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentFailure::BadResponse {
                message: "response missing choices[0].message.content".to_string(),
            })?
            .to_string();

        let usage = payload
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: payload["model"].as_str().unwrap_or(&model).to_string(),
            usage,
        })
    }
}

/// Test backend returning a fixed string.
pub struct CannedBackend {
    content: String,
}

impl CannedBackend {
    /// Creates a backend that always answers with `content`.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for CannedBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, AgentFailure> {
        Ok(LlmResponse {
            content: self.content.clone(),
            model: request.model.clone().unwrap_or_else(|| "canned".to_string()),
            usage: TokenUsage {
                prompt_tokens: request.prompt.len() as u32 / 4,
                completion_tokens: self.content.len() as u32 / 4,
                total_tokens: (request.prompt.len() + self.content.len()) as u32 / 4,
            },
        })
    }
}
