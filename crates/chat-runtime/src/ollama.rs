//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference.
//!
//! Tool calling is prompt-based: tool definitions are rendered into the
//! system prompt and the model answers with fenced blocks such as
//!
//! ````text
//! ```tool
//! {"id": "call_1", "name": "read_doc", "input": {"doc_name": "report.pdf"}}
//! ```
//! ````
//!
//! Tool results go back folded into a user turn.

use async_trait::async_trait;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage, MessageRole},
    models::ModelOptions,
    Ollama,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use chat_core::{
    message::{ContentPart, Message, Role},
    provider::{fold_tool_message, GenerationOptions, LlmProvider, ProviderInfo, ProviderResponse},
    retry::RetryPolicy,
    tool::ToolDefinition,
    ChatError, Result,
};

const TOOL_FENCE: &str = "```tool";
const FENCE_END: &str = "```";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    pub model: String,

    pub retry: RetryPolicy,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: "llama3.1".into(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.host)
            .map_err(|e| ChatError::Config(format!("invalid Ollama host '{}': {}", config.host, e)))?;
        if url.cannot_be_a_base() {
            return Err(ChatError::Config(format!(
                "Ollama host '{}' cannot carry a port",
                config.host
            )));
        }
        Ok(Self {
            client: Ollama::builder()
                .host(config.host.clone())
                .port(config.port)
                .build(),
            config,
        })
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    /// Convert canonical messages to Ollama format
    fn convert_messages(
        history: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
    ) -> Vec<ChatMessage> {
        let mut system: Vec<String> = system_prompt.map(str::to_string).into_iter().collect();
        if !tools.is_empty() {
            system.push(render_tool_prompt(tools));
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system.is_empty() {
            messages.push(ChatMessage::new(MessageRole::System, system.join("\n\n")));
        }
        for m in history {
            let converted = match m.role() {
                Role::System => ChatMessage::new(MessageRole::System, m.text()),
                Role::User => ChatMessage::new(MessageRole::User, m.text()),
                Role::Assistant => ChatMessage::new(MessageRole::Assistant, render_assistant(m)),
                // No tool role for prompt-based calling; results appear as user context
                Role::Tool => ChatMessage::new(
                    MessageRole::User,
                    fold_tool_message(m).unwrap_or_default(),
                ),
            };
            messages.push(converted);
        }
        messages
    }

    /// Build Ollama model options
    fn build_options(opts: &GenerationOptions) -> ModelOptions {
        let mut options = ModelOptions::default()
            .temperature(opts.temperature)
            .num_predict(opts.max_tokens as i32);
        if let Some(top_p) = opts.top_p {
            options = options.top_p(top_p);
        }
        if !opts.stop_sequences.is_empty() {
            options = options.stop(opts.stop_sequences.clone());
        }
        options
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<String> {
        let request = ChatMessageRequest::new(model.to_string(), messages.to_vec())
            .options(Self::build_options(options));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| ChatError::Transport(format!("ollama: {}", e)))?;
        Ok(response.message.content)
    }
}

/// Render the tool catalogue and calling convention for the system prompt
pub fn render_tool_prompt(tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(
        "You can call tools. To call one, reply with a fenced block per call:\n\
         ```tool\n\
         {\"id\": \"<unique id>\", \"name\": \"<tool name>\", \"input\": {<arguments>}}\n\
         ```\n\
         Results come back as a JSON array of {\"tool_call_id\", \"result\", \"is_error\"} records.\n\n\
         Available tools:\n",
    );
    for tool in tools {
        prompt.push_str(&format!(
            "- {}: {}\n  input schema: {}\n",
            tool.name, tool.description, tool.input_schema
        ));
    }
    prompt
}

/// Re-render an assistant turn the way the model originally produced it
fn render_assistant(message: &Message) -> String {
    let mut blocks = Vec::new();
    for part in message.parts() {
        match part {
            ContentPart::Text { text } => blocks.push(text.clone()),
            ContentPart::ToolUse { id, name, input } => {
                let call = serde_json::json!({ "id": id, "name": name, "input": input });
                blocks.push(format!("{}\n{}\n{}", TOOL_FENCE, call, FENCE_END));
            }
            ContentPart::ToolResult { .. } => {}
        }
    }
    blocks.join("\n")
}

#[derive(Debug, Deserialize)]
struct PromptToolCall {
    id: Option<String>,
    name: String,
    #[serde(default, alias = "arguments")]
    input: Value,
}

/// Split a reply into text and tool-use parts.
///
/// A call without an id gets a generated `call_<uuid>` one. An unterminated
/// fence or a block that is not a JSON call is a malformed response.
pub fn parse_tool_blocks(reply: &str) -> Result<Vec<ContentPart>> {
    let mut parts = Vec::new();
    let mut rest = reply;

    while let Some(start) = rest.find(TOOL_FENCE) {
        push_text(&mut parts, &rest[..start]);

        let body_start = start + TOOL_FENCE.len();
        let body_len = rest[body_start..].find(FENCE_END).ok_or_else(|| {
            ChatError::MalformedResponse("unterminated tool block in ollama reply".into())
        })?;
        let body = rest[body_start..body_start + body_len].trim();

        let call: PromptToolCall = serde_json::from_str(body).map_err(|e| {
            ChatError::MalformedResponse(format!("invalid tool block in ollama reply: {}", e))
        })?;
        let input: Map<String, Value> = crate::anthropic::object_input(&call.name, call.input)?;
        let id = call
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
        parts.push(ContentPart::ToolUse {
            id,
            name: call.name,
            input,
        });

        rest = &rest[body_start + body_len + FENCE_END.len()..];
    }
    push_text(&mut parts, rest);
    Ok(parts)
}

fn push_text(parts: &mut Vec<ContentPart>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        parts.push(ContentPart::text(text));
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".into(),
            model: self.config.model.clone(),
            native_tool_results: false,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn send(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<ProviderResponse> {
        let model = options.model.clone().unwrap_or_else(|| self.config.model.clone());
        let messages = Self::convert_messages(history, system_prompt, tools);
        tracing::debug!(%model, messages = messages.len(), tools = tools.len(), "Sending ollama chat");

        let reply = self
            .config
            .retry
            .run("ollama", || self.chat(&model, &messages, options))
            .await?;

        // Without tools the reply is plain text even if it contains a tool fence
        let parts = if tools.is_empty() {
            let mut parts = Vec::new();
            push_text(&mut parts, &reply);
            parts
        } else {
            parse_tool_blocks(&reply)?
        };
        ProviderResponse::from_parts(parts, false, model, None)
    }
}
