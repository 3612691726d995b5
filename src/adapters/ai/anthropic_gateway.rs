//! Anthropic Gateway - Implementation of ModelGateway for Anthropic's Messages API.
//!
//! # Configuration
//!
//! ```ignore
//! let config = AnthropicGatewayConfig::new(api_key)
//!     .with_model("claude-sonnet-4-20250514")
//!     .with_max_tokens(1024);
//!
//! let gateway = AnthropicGateway::new(config)?;
//! ```
//!
//! # Prompt layout
//!
//! The system prompt carries the mentor role and the output JSON schema.
//! The single user turn carries the context bundle as YAML and, on retry,
//! the corrective instruction. The text the model returns is handed back
//! untouched as [`RawOutput::Text`]; decoding it is the validator's job.
//!
//! The gateway never retries. Retry policy belongs to the caller.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::mentor::{ContextBundle, CorrectiveInstruction, OutputSchema, RawOutput};
use crate::ports::{GatewayError, GatewayInfo, ModelGateway};

/// Anthropic API version header value.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

const MENTOR_ROLE: &str = "You are a supportive personal mentor. You know the user's \
self-assessment, the recent conversation, their current daily plan and their long-term \
projection. Answer the user's latest message with practical, encouraging guidance. Only \
propose plan or projection changes when the conversation calls for them.";

/// Configuration for the Anthropic gateway.
#[derive(Debug, Clone)]
pub struct AnthropicGatewayConfig {
    /// API key for authentication.
    api_key: Secret<String>,
    /// Model to use (e.g., "claude-sonnet-4-20250514").
    pub model: String,
    /// Base URL for the API (default: https://api.anthropic.com).
    pub base_url: String,
    /// HTTP request timeout.
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl AnthropicGatewayConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::from_secret(Secret::new(api_key.into()))
    }

    /// Creates a new configuration from an already-wrapped key.
    pub fn from_secret(api_key: Secret<String>) -> Self {
        Self {
            api_key,
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 1024,
            temperature: None,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Exposes the API key (for making requests).
    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Anthropic Messages API gateway.
pub struct AnthropicGateway {
    config: AnthropicGatewayConfig,
    client: Client,
}

impl AnthropicGateway {
    /// Creates a new gateway with the given configuration.
    pub fn new(config: AnthropicGatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Builds the messages endpoint URL.
    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// Builds the request body for one generation.
    fn build_request(
        &self,
        bundle: &ContextBundle,
        schema: &OutputSchema,
        corrective: Option<&CorrectiveInstruction>,
    ) -> Result<AnthropicRequest, GatewayError> {
        let schema_text = serde_json::to_string_pretty(&schema.describe())
            .map_err(|e| GatewayError::unavailable(format!("Failed to render schema: {}", e)))?;
        let context = bundle
            .render_yaml()
            .map_err(|e| GatewayError::unavailable(format!("Failed to render context: {}", e)))?;

        let system = format!(
            "{}\n\nRespond with exactly one JSON object and nothing else. \
             It must satisfy this JSON schema:\n{}",
            MENTOR_ROLE, schema_text
        );

        let mut content = format!(
            "Context for this turn:\n```yaml\n{}```\n\nThe user's latest message is `user_message` above.",
            context
        );
        if let Some(corrective) = corrective {
            content.push_str("\n\n");
            content.push_str(corrective.as_str());
        }

        Ok(AnthropicRequest {
            model: self.config.model.clone(),
            system,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        })
    }

    /// Sends a request.
    async fn send_request(&self, request: &AnthropicRequest) -> Result<Response, GatewayError> {
        self.client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key())
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::timeout(self.config.timeout)
                } else if e.is_connect() {
                    GatewayError::unavailable(format!("Connection failed: {}", e))
                } else {
                    GatewayError::unavailable(e.to_string())
                }
            })
    }

    /// Parses the response body into raw model text.
    async fn parse_response(&self, response: Response) -> Result<RawOutput, GatewayError> {
        let status = response.status();
        let retry_after = parse_retry_after_header(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::unavailable(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(map_error_status(status, retry_after, &body, self.config.timeout));
        }

        extract_text(&body)
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn generate(
        &self,
        bundle: &ContextBundle,
        schema: &OutputSchema,
        corrective: Option<&CorrectiveInstruction>,
    ) -> Result<RawOutput, GatewayError> {
        let request = self.build_request(bundle, schema, corrective)?;
        tracing::debug!(
            model = %self.config.model,
            corrective = corrective.is_some(),
            "Sending mentor request to Anthropic"
        );
        let response = self.send_request(&request).await?;
        self.parse_response(response).await
    }

    fn gateway_info(&self) -> GatewayInfo {
        GatewayInfo::new("anthropic", &self.config.model)
    }
}

/// Maps a non-success status to a gateway error.
///
/// Upstream timeouts report the client timeout that was in force.
fn map_error_status(
    status: StatusCode,
    retry_after: Option<u32>,
    body: &str,
    timeout: Duration,
) -> GatewayError {
    match status.as_u16() {
        429 => GatewayError::rate_limited(retry_after.or_else(|| parse_retry_after_body(body))),
        401 | 403 => GatewayError::unavailable(format!("Authentication failed ({})", status)),
        408 | 504 => {
            tracing::debug!(status = %status, "Upstream timeout");
            GatewayError::timeout(timeout)
        }
        _ => GatewayError::unavailable(format!("Unexpected status {}: {}", status, body)),
    }
}

/// Reads a `retry-after` header given in whole seconds.
fn parse_retry_after_header(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok())
}

/// Looks for "try again in Ns" in an error body.
fn parse_retry_after_body(body: &str) -> Option<u32> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = parsed.get("error")?.get("message")?.as_str()?;
    let idx = message.find("try again in ")?;
    let rest = &message[idx + "try again in ".len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Joins the text blocks of a Messages API response.
fn extract_text(body: &str) -> Result<RawOutput, GatewayError> {
    let response: AnthropicResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::malformed(body, format!("Failed to parse response: {}", e)))?;

    let text = response
        .content
        .into_iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(GatewayError::malformed(body, "response contained no text content"));
    }

    Ok(RawOutput::Text(text))
}

// ════════════════════════════════════════════════════════════════════════════
// Anthropic API types
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    system: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}
