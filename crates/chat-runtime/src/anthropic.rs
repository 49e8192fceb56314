//! Anthropic Messages API Provider
//!
//! Native tool support: tool calls arrive as `tool_use` blocks and results go
//! back as `tool_result` blocks inside a user message, correlated by
//! `tool_use_id`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use chat_core::{
    message::{ContentPart, Message, Role},
    provider::{GenerationOptions, LlmProvider, ProviderInfo, ProviderResponse, TokenUsage},
    retry::RetryPolicy,
    tool::ToolDefinition,
    ChatError, Result,
};

use crate::http;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_API_URL.into(),
            timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            config,
        })
    }

    /// Build the request body.
    ///
    /// System messages found in the history are appended to the system
    /// prompt; `tool` messages become user messages of `tool_result` blocks.
    fn build_request(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> AnthropicRequest {
        let mut system: Vec<String> = system_prompt.map(str::to_string).into_iter().collect();
        let mut messages = Vec::with_capacity(history.len());

        for msg in history {
            let role = match msg.role() {
                Role::System => {
                    system.push(msg.text());
                    continue;
                }
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            // The API rejects empty text blocks and empty content arrays
            let content: Vec<AnthropicBlock> = msg
                .parts()
                .iter()
                .filter(|p| !matches!(p, ContentPart::Text { text } if text.is_empty()))
                .map(Self::convert_part)
                .collect();
            if content.is_empty() {
                continue;
            }
            messages.push(AnthropicMessage {
                role: role.into(),
                content,
            });
        }

        AnthropicRequest {
            model: options.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            max_tokens: options.max_tokens,
            temperature: Some(options.temperature),
            top_p: options.top_p,
            stop_sequences: (!options.stop_sequences.is_empty())
                .then(|| options.stop_sequences.clone()),
            tools: (!tools.is_empty()).then(|| Self::convert_tools(tools)),
        }
    }

    fn convert_part(part: &ContentPart) -> AnthropicBlock {
        match part {
            ContentPart::Text { text } => AnthropicBlock::Text { text: text.clone() },
            ContentPart::ToolUse { id, name, input } => AnthropicBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: Value::Object(input.clone()),
            },
            ContentPart::ToolResult {
                call_id,
                content,
                is_error,
            } => AnthropicBlock::ToolResult {
                tool_use_id: call_id.clone(),
                content: content.to_text(),
                is_error: is_error.then_some(true),
            },
        }
    }

    /// Convert tools to Anthropic format
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    /// Parse a response into canonical form
    fn parse_response(response: AnthropicResponse) -> Result<ProviderResponse> {
        let mut parts = Vec::with_capacity(response.content.len());
        for block in response.content {
            match block {
                AnthropicBlock::Text { text } => {
                    if !text.is_empty() {
                        parts.push(ContentPart::Text { text });
                    }
                }
                AnthropicBlock::ToolUse { id, name, input } => {
                    parts.push(ContentPart::ToolUse {
                        input: object_input(&name, input)?,
                        id,
                        name,
                    });
                }
                AnthropicBlock::ToolResult { .. } => {
                    return Err(ChatError::MalformedResponse(
                        "anthropic response contains a tool_result block".into(),
                    ));
                }
                AnthropicBlock::Other => {}
            }
        }

        let usage = TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens);
        ProviderResponse::from_parts(
            parts,
            response.stop_reason.as_deref() == Some("tool_use"),
            response.model,
            Some(usage),
        )
    }

    async fn post(&self, request: &AnthropicRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(http::transport)?;
        http::read_body("anthropic", response).await
    }
}

/// Tool input must be a JSON object
pub(crate) fn object_input(tool: &str, input: Value) -> Result<Map<String, Value>> {
    match input {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ChatError::MalformedResponse(format!(
            "arguments for tool '{}' are not an object: {}",
            tool, other
        ))),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "anthropic".into(),
            model: self.config.model.clone(),
            native_tool_results: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        // No cheap unauthenticated endpoint; a configured key is the best we can check
        Ok(!self.config.api_key.is_empty())
    }

    async fn send(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<ProviderResponse> {
        let request = self.build_request(history, system_prompt, tools, options);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Sending anthropic request"
        );

        let body = self
            .config
            .retry
            .run("anthropic", || self.post(&request))
            .await?;
        let response: AnthropicResponse = http::decode("anthropic", &body)?;
        Self::parse_response(response)
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Block kinds we don't model (thinking, ...)
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
