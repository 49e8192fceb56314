//! LLM Provider Strategy Pattern
//!
//! Defines the adapter contract every model backend implements. An adapter
//! turns the canonical history into its wire format and the wire response back
//! into one canonical assistant [`Message`] plus a normalized [`StopSignal`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_core::provider::{GenerationOptions, LlmProvider};
//!
//! let response = provider
//!     .send(conversation.messages(), Some("Be brief."), registry.definitions(), &options)
//!     .await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ChatError, Result};
use crate::message::{ContentPart, Message, Role};
use crate::tool::{ToolDefinition, ToolResult};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model override; adapters fall back to their configured model
    #[serde(default)]
    pub model: Option<String>,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default)]
    pub top_p: Option<f32>,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f32 { 1.0 }
fn default_max_tokens() -> u32 { 8000 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// Why the model stopped, normalized across vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSignal {
    /// The reply is final text
    FinishedWithText,
    /// The reply asks for tool invocations
    RequestedToolUse,
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One model reply in canonical form
#[derive(Clone, Debug)]
pub struct ProviderResponse {
    /// Assistant message, validated
    pub message: Message,

    /// Normalized termination signal
    pub stop: StopSignal,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// Build a response from parsed parts and the vendor's own stop verdict.
    ///
    /// Any tool-use part makes the signal `RequestedToolUse`, since every
    /// call must be answered before the next model call. A vendor claiming
    /// tool use without any tool-use part is malformed. An empty reply
    /// becomes a single empty text part.
    pub fn from_parts(
        mut parts: Vec<ContentPart>,
        vendor_says_tool_use: bool,
        model: impl Into<String>,
        usage: Option<TokenUsage>,
    ) -> Result<Self> {
        if parts.is_empty() && !vendor_says_tool_use {
            parts.push(ContentPart::text(""));
        }
        let message = Message::assistant_with_parts(parts)?;
        let stop = match (message.has_tool_calls(), vendor_says_tool_use) {
            (true, _) => StopSignal::RequestedToolUse,
            (false, false) => StopSignal::FinishedWithText,
            (false, true) => {
                return Err(ChatError::MalformedResponse(
                    "stop reason is tool use but the response has no tool calls".into(),
                ));
            }
        };
        Ok(Self {
            message,
            stop,
            model: model.into(),
            usage,
        })
    }
}

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "anthropic", "groq")
    pub name: String,

    /// Default model used when options don't name one
    pub model: String,

    /// Whether tool results travel in a native wire role
    pub native_tool_results: bool,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider information and capabilities
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is reachable and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Send the history and return the next assistant turn.
    ///
    /// Fails with `Transport`, `RateLimited` or `MalformedResponse`.
    async fn send(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> Result<ProviderResponse>;
}

/// Serialize tool results for backends without a tool-result role.
///
/// All results of one turn are folded into a single JSON array of
/// `{"tool_call_id", "result", "is_error"}` records, in call order. The id
/// is the only correlation the model gets.
pub fn fold_tool_results(results: &[ToolResult]) -> String {
    let records: Vec<_> = results
        .iter()
        .map(|r| {
            json!({
                "tool_call_id": r.call_id,
                "result": r.content.to_value(),
                "is_error": r.is_error,
            })
        })
        .collect();
    serde_json::Value::Array(records).to_string()
}

/// Flatten a `tool` message into the synthesized user text that replaces it
pub fn fold_tool_message(message: &Message) -> Option<String> {
    (message.role() == Role::Tool).then(|| fold_tool_results(&message.results()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn tool_use(id: &str) -> ContentPart {
        ContentPart::ToolUse {
            id: id.into(),
            name: "read_doc".into(),
            input: Map::new(),
        }
    }

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.temperature, 1.0);
        assert_eq!(opts.max_tokens, 8000);
        assert!(opts.model.is_none());
    }

    #[test]
    fn test_stop_signal_reconciliation() {
        let text_only = ProviderResponse::from_parts(vec![ContentPart::text("hi")], false, "m", None)
            .unwrap();
        assert_eq!(text_only.stop, StopSignal::FinishedWithText);

        // Tool calls win over a vendor reason like "stop"
        let tools = ProviderResponse::from_parts(vec![tool_use("c1")], false, "m", None).unwrap();
        assert_eq!(tools.stop, StopSignal::RequestedToolUse);

        let bogus = ProviderResponse::from_parts(vec![ContentPart::text("hi")], true, "m", None);
        assert!(matches!(bogus, Err(ChatError::MalformedResponse(_))));

        let dup = ProviderResponse::from_parts(vec![tool_use("c1"), tool_use("c1")], true, "m", None);
        assert!(matches!(dup, Err(ChatError::MalformedResponse(_))));
    }

    #[test]
    fn test_empty_reply_is_one_text_part() {
        let empty = ProviderResponse::from_parts(Vec::new(), false, "m", None).unwrap();
        assert_eq!(empty.stop, StopSignal::FinishedWithText);
        assert_eq!(empty.message.parts(), &[ContentPart::text("")]);
        assert_eq!(empty.message.text(), "");

        let claims_tools = ProviderResponse::from_parts(Vec::new(), true, "m", None);
        assert!(matches!(claims_tools, Err(ChatError::MalformedResponse(_))));
    }

    #[test]
    fn test_fold_tool_results() {
        let folded = fold_tool_results(&[
            ToolResult::success("c1", "report text"),
            ToolResult::failure("c2", "tool not found"),
        ]);
        let parsed: Value = serde_json::from_str(&folded).unwrap();
        assert_eq!(
            parsed,
            json!([
                {"tool_call_id": "c1", "result": "report text", "is_error": false},
                {"tool_call_id": "c2", "result": "tool not found", "is_error": true}
            ])
        );
    }

    #[test]
    fn test_fold_only_tool_messages() {
        assert!(fold_tool_message(&Message::user("hi")).is_none());
        let msg = Message::tool_results(vec![ToolResult::success("c1", "x")]);
        assert!(fold_tool_message(&msg).unwrap().contains("\"c1\""));
    }
}
