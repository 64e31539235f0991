//! HTTP caller agent.
//!
//! Makes an HTTP request with retries and exponential backoff, decodes the
//! response by content type, and applies optional post-processing
//! (field extraction, transforms, validation).
//!
//! Retry policy: only transport-level errors (connect/read/timeout) are
//! retried. An HTTP error status is returned as a *successful* response
//! object with `success: false`; callers inspect the status themselves.

use crate::registry::Agent;
use agentflow_workflow::agent::{AgentInput, AgentMetadata, AgentOutcome};
use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::{Map, Value as JsonValue, json};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The HTTP caller agent.
pub struct ApiCallerAgent {
    client: reqwest::Client,
}

struct CallConfig {
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl CallConfig {
    fn from_value(config: &JsonValue) -> Self {
        let timeout_seconds = config
            .get("timeout_seconds")
            .or_else(|| config.get("timeout"))
            .and_then(JsonValue::as_u64)
            .unwrap_or(30);
        let retries = config
            .get("retries")
            .and_then(JsonValue::as_u64)
            .unwrap_or(3) as u32;
        let retry_delay_seconds = config
            .get("retry_delay_seconds")
            .or_else(|| config.get("retry_delay"))
            .and_then(JsonValue::as_u64)
            .unwrap_or(1);
        Self {
            timeout: Duration::from_secs(timeout_seconds),
            retries,
            retry_delay: Duration::from_secs(retry_delay_seconds),
        }
    }
}

impl ApiCallerAgent {
    /// Creates the agent with a shared HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn request_with_retries(
        &self,
        config: &CallConfig,
        method: &reqwest::Method,
        url: &str,
        headers: &Map<String, JsonValue>,
        body: Option<&JsonValue>,
        params: &Map<String, JsonValue>,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, AgentFailure> {
        let mut last_error = AgentFailure::Transport {
            message: "no attempt made".to_string(),
        };

        for attempt in 0..=config.retries {
            if cancel.is_cancelled() {
                return Err(AgentFailure::Cancelled);
            }

            match self
                .attempt(config, method, url, headers, body, params)
                .await
            {
                Ok(response) => return Ok(response),
                Err(error @ (AgentFailure::Transport { .. } | AgentFailure::Timeout { .. })) => {
                    tracing::warn!(url, attempt = attempt + 1, error = %error, "api call attempt failed");
                    last_error = error;
                }
                // Non-transport failures (e.g. undecodable JSON) are final
                Err(error) => return Err(error),
            }

            if attempt < config.retries {
                let backoff = config.retry_delay * 2u32.pow(attempt);
                tokio::select! {
                    () = cancel.cancelled() => return Err(AgentFailure::Cancelled),
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        config: &CallConfig,
        method: &reqwest::Method,
        url: &str,
        headers: &Map<String, JsonValue>,
        body: Option<&JsonValue>,
        params: &Map<String, JsonValue>,
    ) -> Result<JsonValue, AgentFailure> {
        let started = Instant::now();

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(config.timeout);

        for (name, value) in headers {
            let rendered = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            request = request.header(name, rendered);
        }

        if !params.is_empty() {
            let query: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    let rendered = match v.as_str() {
                        Some(s) => s.to_string(),
                        None => v.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect();
            request = request.query(&query);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentFailure::Timeout {
                    seconds: config.timeout.as_secs(),
                }
            } else {
                AgentFailure::Transport {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let response_headers: Map<String, JsonValue> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    JsonValue::from(value.to_str().unwrap_or_default()),
                )
            })
            .collect();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let bytes = response.bytes().await.map_err(|e| AgentFailure::Transport {
            message: e.to_string(),
        })?;

        let data = decode_body(&content_type, &bytes)?;
        let response_time = started.elapsed().as_secs_f64();

        Ok(json!({
            "status_code": status,
            "data": data,
            "headers": response_headers,
            "response_time": response_time,
            "success": status < 400,
        }))
    }
}

impl Default for ApiCallerAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_body(content_type: &str, bytes: &[u8]) -> Result<JsonValue, AgentFailure> {
    if content_type.contains("application/json") {
        serde_json::from_slice(bytes).map_err(|e| AgentFailure::BadResponse {
            message: format!("undecodable json body: {e}"),
        })
    } else if content_type.contains("text/") {
        Ok(JsonValue::from(String::from_utf8_lossy(bytes).to_string()))
    } else {
        Ok(JsonValue::from(BASE64.encode(bytes)))
    }
}

/// Applies extract/transform/validate post-processing to a raw response.
fn process_response(response: &JsonValue, processing: Option<&JsonValue>) -> JsonValue {
    let mut result = json!({
        "status_code": response.get("status_code").cloned().unwrap_or(JsonValue::Null),
        "success": response.get("success").cloned().unwrap_or(JsonValue::from(false)),
        "data": response.get("data").cloned().unwrap_or(JsonValue::Null),
        "headers": response.get("headers").cloned().unwrap_or_else(|| json!({})),
        "response_time": response.get("response_time").cloned().unwrap_or(JsonValue::Null),
    });

    let Some(processing) = processing else {
        return result;
    };
    let data = response.get("data");

    if let Some(fields) = processing.get("extract_fields").and_then(JsonValue::as_array)
        && let Some(object) = data.and_then(JsonValue::as_object)
    {
        let mut extracted = Map::new();
        for field in fields.iter().filter_map(JsonValue::as_str) {
            if let Some(value) = object.get(field) {
                extracted.insert(field.to_string(), value.clone());
            }
        }
        result["extracted"] = JsonValue::Object(extracted);
    }

    if let Some(transform) = processing.get("transform") {
        result["transformed"] = apply_transformations(data, transform);
    }

    if let Some(validation) = processing.get("validation") {
        result["validation"] = validate_response(data, validation);
    }

    result
}

fn apply_transformations(data: Option<&JsonValue>, transform: &JsonValue) -> JsonValue {
    let Some(object) = data.and_then(JsonValue::as_object) else {
        return data.cloned().unwrap_or(JsonValue::Null);
    };
    let mut transformed = object.clone();

    if let Some(mapping) = transform.get("field_mapping").and_then(JsonValue::as_object) {
        for (old_field, new_field) in mapping {
            if let (Some(value), Some(new_name)) =
                (transformed.remove(old_field), new_field.as_str())
            {
                transformed.insert(new_name.to_string(), value);
            }
        }
    }

    if let Some(transforms) = transform.get("value_transforms").and_then(JsonValue::as_object) {
        for (field, spec) in transforms {
            let Some(current) = transformed.get(field) else {
                continue;
            };
            let rendered = match current.as_str() {
                Some(s) => s.to_string(),
                None => current.to_string(),
            };
            let replacement = match spec.get("type").and_then(JsonValue::as_str) {
                Some("uppercase") => Some(rendered.to_uppercase()),
                Some("lowercase") => Some(rendered.to_lowercase()),
                Some("format") => {
                    let template = spec
                        .get("params")
                        .and_then(|p| p.get("template"))
                        .and_then(JsonValue::as_str)
                        .unwrap_or("{value}");
                    Some(template.replace("{value}", &rendered))
                }
                _ => None,
            };
            if let Some(value) = replacement {
                transformed.insert(field.clone(), JsonValue::from(value));
            }
        }
    }

    JsonValue::Object(transformed)
}

fn validate_response(data: Option<&JsonValue>, validation: &JsonValue) -> JsonValue {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let Some(data) = data.filter(|d| !d.is_null()) else {
        return json!({"valid": false, "errors": ["No data received"], "warnings": []});
    };

    if let Some(object) = data.as_object() {
        if let Some(required) = validation.get("required_fields").and_then(JsonValue::as_array) {
            for field in required.iter().filter_map(JsonValue::as_str) {
                if !object.contains_key(field) {
                    errors.push(format!("Required field missing: {field}"));
                }
            }
        }

        if let Some(types) = validation.get("type_validation").and_then(JsonValue::as_object) {
            for (field, expected) in types {
                let (Some(value), Some(expected)) = (object.get(field), expected.as_str()) else {
                    continue;
                };
                let actual = json_type_name(value);
                if actual != expected {
                    warnings.push(format!("Field {field} expected {expected}, got {actual}"));
                }
            }
        }

        if let Some(ranges) = validation.get("range_validation").and_then(JsonValue::as_object) {
            for (field, range) in ranges {
                let Some(value) = object.get(field).and_then(JsonValue::as_f64) else {
                    continue;
                };
                if let Some(min) = range.get("min").and_then(JsonValue::as_f64)
                    && value < min
                {
                    warnings.push(format!("Field {field} value {value} below minimum {min}"));
                }
                if let Some(max) = range.get("max").and_then(JsonValue::as_f64)
                    && value > max
                {
                    warnings.push(format!("Field {field} value {value} above maximum {max}"));
                }
            }
        }
    }

    json!({"valid": errors.is_empty(), "errors": errors, "warnings": warnings})
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_f64() => "number",
        JsonValue::Number(_) => "integer",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[async_trait]
impl Agent for ApiCallerAgent {
    async fn run(
        &self,
        config: &JsonValue,
        input: AgentInput,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure> {
        let started_at = Utc::now();
        let call_config = CallConfig::from_value(config);

        let url = input
            .get_str("url")
            .ok_or_else(|| AgentFailure::InvalidInput {
                message: "URL is required for API calls".to_string(),
            })?
            .to_string();

        let method_name = input.get_str("method").unwrap_or("GET").to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            AgentFailure::InvalidInput {
                message: format!("invalid HTTP method: {method_name}"),
            }
        })?;

        let headers = input
            .get("headers")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        let params = input
            .get("params")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        // GET and DELETE never carry a body; any provided data is dropped
        let body = if method == reqwest::Method::GET || method == reqwest::Method::DELETE {
            None
        } else {
            input.get("data").filter(|d| !d.is_null()).cloned()
        };

        tracing::info!(%method_name, url, "making api call");

        let response = self
            .request_with_retries(
                &call_config,
                &method,
                &url,
                &headers,
                body.as_ref(),
                &params,
                cancel,
            )
            .await?;

        let processed = process_response(&response, input.get("processing"));

        let status_code = response.get("status_code").cloned().unwrap_or(JsonValue::Null);
        let mut variables = Map::new();
        variables.insert("api_response".to_string(), processed.clone());
        variables.insert("status_code".to_string(), status_code.clone());
        variables.insert(
            "response_data".to_string(),
            response.get("data").cloned().unwrap_or(JsonValue::Null),
        );

        let metadata = AgentMetadata::spanning(started_at)
            .with_extra("url", JsonValue::from(url))
            .with_extra("method", JsonValue::from(method_name))
            .with_extra("status_code", status_code)
            .with_extra(
                "response_time",
                response.get("response_time").cloned().unwrap_or(JsonValue::Null),
            );

        Ok(AgentOutcome {
            output: processed,
            variables,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn input_with(entries: &[(&str, JsonValue)]) -> AgentInput {
        let mut input = AgentInput::default();
        for (key, value) in entries {
            input.insert(*key, value.clone());
        }
        input
    }

    #[tokio::test]
    async fn get_decodes_json_response() {
        let base = serve(Router::new().route(
            "/data",
            get(|| async { axum::Json(json!({"k": 5, "name": "ok"})) }),
        ))
        .await;

        let agent = ApiCallerAgent::new();
        let outcome = agent
            .run(
                &json!({}),
                input_with(&[("url", json!(format!("{base}/data")))]),
                &CancellationToken::new(),
            )
            .await
            .expect("call succeeds");

        assert_eq!(outcome.output["status_code"], json!(200));
        assert_eq!(outcome.output["success"], json!(true));
        assert_eq!(outcome.output["data"]["k"], json!(5));
        assert_eq!(outcome.variables["status_code"], json!(200));
        assert_eq!(outcome.variables["response_data"]["name"], json!("ok"));
    }

    #[tokio::test]
    async fn http_error_status_is_surfaced_not_raised() {
        let base = serve(Router::new().route(
            "/missing",
            get(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    axum::Json(json!({"detail": "nope"})),
                )
            }),
        ))
        .await;

        let agent = ApiCallerAgent::new();
        let outcome = agent
            .run(
                &json!({}),
                input_with(&[("url", json!(format!("{base}/missing")))]),
                &CancellationToken::new(),
            )
            .await
            .expect("4xx is a successful call");

        assert_eq!(outcome.output["status_code"], json!(404));
        assert_eq!(outcome.output["success"], json!(false));
    }

    #[tokio::test]
    async fn transport_errors_exhaust_retries() {
        let agent = ApiCallerAgent::new();
        // Nothing listens on this port
        let result = agent
            .run(
                &json!({"retries": 1, "retry_delay_seconds": 0}),
                input_with(&[("url", json!("http://127.0.0.1:1/unreachable"))]),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AgentFailure::Transport { .. })));
    }

    #[tokio::test]
    async fn missing_url_is_invalid_input() {
        let agent = ApiCallerAgent::new();
        let result = agent
            .run(&json!({}), AgentInput::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AgentFailure::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn extract_and_transform_post_processing() {
        let base = serve(Router::new().route(
            "/user",
            get(|| async { axum::Json(json!({"name": "ada", "role": "admin", "age": 36})) }),
        ))
        .await;

        let agent = ApiCallerAgent::new();
        let outcome = agent
            .run(
                &json!({}),
                input_with(&[
                    ("url", json!(format!("{base}/user"))),
                    (
                        "processing",
                        json!({
                            "extract_fields": ["name", "age"],
                            "transform": {
                                "field_mapping": {"role": "title"},
                                "value_transforms": {"name": {"type": "uppercase"}}
                            },
                            "validation": {
                                "required_fields": ["name", "missing_field"],
                                "range_validation": {"age": {"min": 18, "max": 30}}
                            }
                        }),
                    ),
                ]),
                &CancellationToken::new(),
            )
            .await
            .expect("call succeeds");

        assert_eq!(outcome.output["extracted"]["name"], json!("ada"));
        assert_eq!(outcome.output["extracted"]["age"], json!(36));
        assert_eq!(outcome.output["transformed"]["title"], json!("admin"));
        assert_eq!(outcome.output["transformed"]["name"], json!("ADA"));
        assert_eq!(outcome.output["validation"]["valid"], json!(false));
        let warnings = outcome.output["validation"]["warnings"]
            .as_array()
            .expect("warnings");
        assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("above maximum")));
    }

    #[test]
    fn type_names_match_schema_vocabulary() {
        assert_eq!(json_type_name(&json!("x")), "string");
        assert_eq!(json_type_name(&json!(1)), "integer");
        assert_eq!(json_type_name(&json!(1.5)), "number");
        assert_eq!(json_type_name(&json!([1])), "array");
    }

    #[test]
    fn validation_with_no_data_is_invalid() {
        let report = validate_response(None, &json!({"required_fields": ["x"]}));
        assert_eq!(report["valid"], json!(false));
    }
}
