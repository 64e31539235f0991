//! The agent registry.
//!
//! A fixed (but extendable) table mapping agent-kind names to display
//! metadata, JSON schemas, and the implementation handle. The registry is
//! read-only after initialisation and is the production implementation of
//! the engine's `AgentInvoker` seam.

use crate::api_caller::ApiCallerAgent;
use crate::code_analyzer::CodeAnalyzerAgent;
use crate::data_processor::DataProcessorAgent;
use crate::database_query::DatabaseQueryAgent;
use crate::email_sender::{EmailSenderAgent, MailTransport, SmtpMailer};
use crate::file_handler::FileHandlerAgent;
use crate::llm::{LlmBackend, OpenAiCompatibleBackend};
use crate::text_generator::TextGeneratorAgent;
use agentflow_workflow::agent::{AgentInput, AgentInvoker, AgentOutcome};
use agentflow_workflow::error::{AgentFailure, InvokeError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One agent implementation.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Runs the agent with a declarative config and an input object.
    ///
    /// Implementations check `cancel` at their suspension points and abort
    /// with `AgentFailure::Cancelled` when it fires; in-flight I/O such as
    /// an SMTP send or a database statement completes first.
    async fn run(
        &self,
        config: &JsonValue,
        input: AgentInput,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure>;
}

/// Registry entry: metadata, schemas, and the implementation handle.
#[derive(Clone)]
pub struct AgentDescriptor {
    /// Agent kind name (registry key).
    pub kind: String,
    /// Human-readable name.
    pub display_name: String,
    /// Short description.
    pub description: String,
    /// Marketplace category.
    pub category: String,
    /// JSON schema of the input object.
    pub input_schema: JsonValue,
    /// JSON schema of the output object.
    pub output_schema: JsonValue,
    /// JSON schema of the config map.
    pub config_schema: JsonValue,
    handler: Arc<dyn Agent>,
}

impl AgentDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        handler: Arc<dyn Agent>,
    ) -> Self {
        Self {
            kind: kind.into(),
            display_name: display_name.into(),
            description: description.into(),
            category: category.into(),
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            config_schema: json!({"type": "object"}),
            handler,
        }
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }

    /// Sets the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: JsonValue) -> Self {
        self.output_schema = schema;
        self
    }

    /// Sets the config schema.
    #[must_use]
    pub fn with_config_schema(mut self, schema: JsonValue) -> Self {
        self.config_schema = schema;
        self
    }
}

/// Serializable descriptor view for API clients (no handler).
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    /// Agent kind name.
    pub kind: String,
    /// Human-readable name.
    pub display_name: String,
    /// Short description.
    pub description: String,
    /// Marketplace category.
    pub category: String,
    /// JSON schema of the input object.
    pub input_schema: JsonValue,
    /// JSON schema of the output object.
    pub output_schema: JsonValue,
    /// JSON schema of the config map.
    pub config_schema: JsonValue,
}

/// External services the built-in agents depend on.
pub struct BuiltinServices {
    /// LLM backend for the text generator.
    pub llm: Arc<dyn LlmBackend>,
    /// SMTP transport for the email sender.
    pub mail: Arc<dyn MailTransport>,
}

impl BuiltinServices {
    /// Production services: OpenAI-compatible LLM endpoint + real SMTP.
    #[must_use]
    pub fn production(
        llm_base_url: impl Into<String>,
        llm_api_key: Option<String>,
        llm_model: impl Into<String>,
    ) -> Self {
        Self {
            llm: Arc::new(OpenAiCompatibleBackend::new(
                llm_base_url,
                llm_api_key,
                llm_model,
            )),
            mail: Arc::new(SmtpMailer::new()),
        }
    }
}

/// Name→implementation table for agent dispatch.
pub struct AgentRegistry {
    agents: HashMap<String, AgentDescriptor>,
    default_timeout: Duration,
}

impl AgentRegistry {
    /// Creates an empty registry with the given default per-agent timeout.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            agents: HashMap::new(),
            default_timeout,
        }
    }

    /// Creates a registry pre-loaded with the seven built-in agents.
    #[must_use]
    pub fn with_builtins(default_timeout: Duration, services: BuiltinServices) -> Self {
        let mut registry = Self::new(default_timeout);

        registry.register(
            AgentDescriptor::new(
                "llm_text_generator",
                "LLM Text Generator",
                "Generates text using large language models",
                "llm",
                Arc::new(TextGeneratorAgent::new(services.llm)),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "Input prompt"}
                },
                "required": ["prompt"]
            }))
            .with_output_schema(json!({
                "type": "object",
                "properties": {
                    "generated_text": {"type": "string"}
                }
            }))
            .with_config_schema(json!({
                "type": "object",
                "properties": {
                    "model": {"type": "string"},
                    "temperature": {"type": "number", "default": 0.7},
                    "max_tokens": {"type": "integer", "default": 1000},
                    "input_template": {"type": "string", "default": "{prompt}"}
                }
            })),
        );

        registry.register(
            AgentDescriptor::new(
                "data_processor",
                "Data Processor",
                "Processes and transforms data",
                "data",
                Arc::new(DataProcessorAgent::new()),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "data": {"description": "Input data"},
                    "operation": {"type": "string", "description": "Processing operation"},
                    "parameters": {"type": "object"}
                },
                "required": ["data", "operation"]
            })),
        );

        registry.register(
            AgentDescriptor::new(
                "api_caller",
                "API Caller",
                "Makes HTTP API calls and processes responses",
                "integration",
                Arc::new(ApiCallerAgent::new()),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "API endpoint URL"},
                    "method": {"type": "string", "default": "GET"},
                    "headers": {"type": "object", "default": {}},
                    "data": {"type": "object", "default": {}},
                    "params": {"type": "object", "default": {}}
                },
                "required": ["url"]
            }))
            .with_config_schema(json!({
                "type": "object",
                "properties": {
                    "timeout_seconds": {"type": "integer", "default": 30},
                    "retries": {"type": "integer", "default": 3},
                    "retry_delay_seconds": {"type": "integer", "default": 1}
                }
            })),
        );

        registry.register(
            AgentDescriptor::new(
                "code_analyzer",
                "Code Analyzer",
                "Analyzes code quality, security, and best practices",
                "analysis",
                Arc::new(CodeAnalyzerAgent::new()),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Code to analyze"},
                    "language": {"type": "string", "default": "python"}
                },
                "required": ["code"]
            }))
            .with_output_schema(json!({
                "type": "object",
                "properties": {
                    "analysis": {"type": "object"},
                    "summary": {"type": "string"},
                    "recommendations": {"type": "array"}
                }
            })),
        );

        registry.register(
            AgentDescriptor::new(
                "file_handler",
                "File Handler",
                "Handles file operations and management",
                "utility",
                Arc::new(FileHandlerAgent::new()),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "description": "File operation"},
                    "file_path": {"type": "string"},
                    "content": {},
                    "parameters": {"type": "object"}
                },
                "required": ["operation"]
            }))
            .with_config_schema(json!({
                "type": "object",
                "properties": {
                    "max_file_size": {"type": "integer", "default": 10_485_760}
                }
            })),
        );

        registry.register(
            AgentDescriptor::new(
                "email_sender",
                "Email Sender",
                "Sends emails with various configurations",
                "communication",
                Arc::new(EmailSenderAgent::new(services.mail)),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "to": {"type": "array"},
                    "cc": {"type": "array"},
                    "bcc": {"type": "array"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"},
                    "html_body": {"type": "string"},
                    "attachments": {"type": "array"}
                },
                "required": ["to", "subject"]
            }))
            .with_config_schema(json!({
                "type": "object",
                "properties": {
                    "smtp_server": {"type": "string", "default": "smtp.gmail.com"},
                    "smtp_port": {"type": "integer", "default": 587},
                    "username": {"type": "string"},
                    "password": {"type": "string"},
                    "use_tls": {"type": "boolean", "default": true},
                    "use_ssl": {"type": "boolean", "default": false}
                }
            })),
        );

        registry.register(
            AgentDescriptor::new(
                "database_query",
                "Database Query",
                "Executes database operations and queries",
                "data",
                Arc::new(DatabaseQueryAgent::new()),
            )
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "default": "query"},
                    "query": {"type": "string", "description": "SQL text"},
                    "parameters": {"type": "object"}
                },
                "required": ["query"]
            }))
            .with_config_schema(json!({
                "type": "object",
                "properties": {
                    "db_type": {"type": "string", "default": "sqlite"},
                    "connection_string": {"type": "string"},
                    "host": {"type": "string", "default": "localhost"},
                    "port": {"type": "integer", "default": 5432},
                    "database": {"type": "string"},
                    "username": {"type": "string"},
                    "password": {"type": "string"}
                }
            })),
        );

        registry
    }

    /// Registers (or replaces) an agent.
    pub fn register(&mut self, descriptor: AgentDescriptor) {
        self.agents.insert(descriptor.kind.clone(), descriptor);
    }

    /// Looks up a descriptor by kind.
    #[must_use]
    pub fn descriptor(&self, kind: &str) -> Option<&AgentDescriptor> {
        self.agents.get(kind)
    }

    /// Returns true if the kind is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.agents.contains_key(kind)
    }

    /// Serializable catalog for API clients, sorted by kind.
    #[must_use]
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self
            .agents
            .values()
            .map(|d| CatalogEntry {
                kind: d.kind.clone(),
                display_name: d.display_name.clone(),
                description: d.description.clone(),
                category: d.category.clone(),
                input_schema: d.input_schema.clone(),
                output_schema: d.output_schema.clone(),
                config_schema: d.config_schema.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.kind.cmp(&b.kind));
        entries
    }
}

#[async_trait]
impl AgentInvoker for AgentRegistry {
    async fn invoke(
        &self,
        kind: &str,
        config: &JsonValue,
        input: AgentInput,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, InvokeError> {
        let descriptor = self.agents.get(kind).ok_or_else(|| InvokeError::UnknownAgent {
            kind: kind.to_string(),
        })?;

        tracing::info!(agent = kind, "executing agent");

        if cancel.is_cancelled() {
            return Err(AgentFailure::Cancelled.into());
        }

        match tokio::time::timeout(self.default_timeout, descriptor.handler.run(config, input, cancel))
            .await
        {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(failure)) => {
                tracing::error!(agent = kind, error = %failure, "agent failed");
                Err(failure.into())
            }
            Err(_) => {
                tracing::error!(agent = kind, timeout_s = self.default_timeout.as_secs(), "agent timed out");
                Err(AgentFailure::Timeout {
                    seconds: self.default_timeout.as_secs(),
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_workflow::BUILTIN_AGENT_KINDS;
    use chrono::Utc;

    struct SleepyAgent;

    #[async_trait]
    impl Agent for SleepyAgent {
        async fn run(
            &self,
            _config: &JsonValue,
            _input: AgentInput,
            cancel: &CancellationToken,
        ) -> Result<AgentOutcome, AgentFailure> {
            tokio::select! {
                () = cancel.cancelled() => Err(AgentFailure::Cancelled),
                () = tokio::time::sleep(Duration::from_secs(60)) => {
                    Ok(AgentOutcome::new(json!("done"), Utc::now()))
                }
            }
        }
    }

    fn test_registry() -> AgentRegistry {
        let services = BuiltinServices {
            llm: Arc::new(crate::llm::CannedBackend::new("canned output")),
            mail: Arc::new(crate::email_sender::RecordingTransport::default()),
        };
        AgentRegistry::with_builtins(Duration::from_secs(300), services)
    }

    #[test]
    fn builtins_cover_all_seven_kinds() {
        let registry = test_registry();
        for kind in BUILTIN_AGENT_KINDS {
            assert!(registry.contains(kind), "missing builtin {kind}");
        }
        assert_eq!(registry.catalog().len(), 7);
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let registry = test_registry();
        let result = registry
            .invoke(
                "mystery_agent",
                &json!({}),
                AgentInput::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(InvokeError::UnknownAgent { .. })));
    }

    #[tokio::test]
    async fn registry_enforces_default_timeout() {
        let mut registry = AgentRegistry::new(Duration::from_millis(50));
        registry.register(AgentDescriptor::new(
            "sleepy",
            "Sleepy",
            "sleeps",
            "test",
            Arc::new(SleepyAgent),
        ));

        let result = registry
            .invoke("sleepy", &json!({}), AgentInput::default(), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(InvokeError::Agent(AgentFailure::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn registry_observes_cancellation() {
        let mut registry = AgentRegistry::new(Duration::from_secs(300));
        registry.register(AgentDescriptor::new(
            "sleepy",
            "Sleepy",
            "sleeps",
            "test",
            Arc::new(SleepyAgent),
        ));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = registry
            .invoke("sleepy", &json!({}), AgentInput::default(), &cancel)
            .await;
        assert!(matches!(
            result,
            Err(InvokeError::Agent(AgentFailure::Cancelled))
        ));
    }

    #[test]
    fn catalog_is_sorted_and_serializable() {
        let registry = test_registry();
        let catalog = registry.catalog();
        let kinds: Vec<&str> = catalog.iter().map(|e| e.kind.as_str()).collect();
        let mut sorted = kinds.clone();
        sorted.sort_unstable();
        assert_eq!(kinds, sorted);

        let json = serde_json::to_value(&catalog).expect("serialize catalog");
        assert!(json.as_array().is_some());
    }
}
