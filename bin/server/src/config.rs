//! Centralized server configuration.
//!
//! Loaded from environment variables via the `config` crate with a `__`
//! separator: flat names map to top-level fields
//! (`MAX_CONCURRENT_EXECUTIONS`, `EXECUTION_TIMEOUT_SECONDS`,
//! `DATABASE_URL`), grouped names map to nested structs (`JWT__SECRET`,
//! `LLM__BASE_URL`, `WS__HEARTBEAT_INTERVAL`, `SMTP__HOST`).

use serde::Deserialize;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL connection URL; absent means the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Listen address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Admission cap for concurrent executions.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Wall-clock cap per execution, in seconds.
    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,

    /// Default per-agent cap, in seconds.
    #[serde(default = "default_agent_timeout_seconds")]
    pub agent_timeout_seconds: u64,

    /// Default retry count for agents that retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default retry base delay, in seconds.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// WebSocket configuration.
    #[serde(default)]
    pub ws: WsConfig,

    /// JWT configuration.
    #[serde(default)]
    pub jwt: JwtConfig,

    /// LLM backend configuration.
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_concurrent_executions() -> usize {
    100
}

fn default_execution_timeout_seconds() -> u64 {
    3600
}

fn default_agent_timeout_seconds() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

/// WebSocket tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Seconds of silence before a connection is considered dead.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Maximum simultaneous connections per user.
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_max_connections_per_user() -> usize {
    5
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            max_connections_per_user: default_max_connections_per_user(),
        }
    }
}

/// JWT verification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret.
    #[serde(default = "default_jwt_secret")]
    pub secret: String,

    /// Signing algorithm name.
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// Access token lifetime, in minutes.
    #[serde(default = "default_access_token_expire_minutes")]
    pub access_token_expire_minutes: i64,

    /// Refresh token lifetime, in days.
    #[serde(default = "default_refresh_token_expire_days")]
    pub refresh_token_expire_days: i64,
}

fn default_jwt_secret() -> String {
    "agentflow-dev-secret-change-in-production".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_access_token_expire_minutes() -> i64 {
    30
}

fn default_refresh_token_expire_days() -> i64 {
    7
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            algorithm: default_jwt_algorithm(),
            access_token_expire_minutes: default_access_token_expire_minutes(),
            refresh_token_expire_days: default_refresh_token_expire_days(),
        }
    }
}

/// LLM backend settings for the text generator agent.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key, if the endpoint requires one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default model.
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a present variable fails to parse.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_defaults_match_documented_values() {
        let config: ServerConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.max_concurrent_executions, 100);
        assert_eq!(config.execution_timeout_seconds, 3600);
        assert_eq!(config.agent_timeout_seconds, 300);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_seconds, 5);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn ws_and_jwt_defaults() {
        let ws = WsConfig::default();
        assert_eq!(ws.heartbeat_interval, 30);
        assert_eq!(ws.connection_timeout, 60);
        assert_eq!(ws.max_connections_per_user, 5);

        let jwt = JwtConfig::default();
        assert_eq!(jwt.algorithm, "HS256");
        assert_eq!(jwt.access_token_expire_minutes, 30);
        assert_eq!(jwt.refresh_token_expire_days, 7);
    }
}
