//! Conversation Messages
//!
//! Provider-independent message format. Every adapter translates to and from
//! these types; nothing vendor-specific is stored here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChatError, Result};
use crate::tool::{ToolCall, ToolResult};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool results for the preceding assistant turn
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Payload of a tool result: plain text or structured data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    Text(String),
    Json(Value),
}

impl ToolContent {
    /// Render for wire formats that only carry text
    pub fn to_text(&self) -> String {
        match self {
            ToolContent::Text(text) => text.clone(),
            ToolContent::Json(value) => value.to_string(),
        }
    }

    /// Structured form, with text wrapped as a JSON string
    pub fn to_value(&self) -> Value {
        match self {
            ToolContent::Text(text) => Value::String(text.clone()),
            ToolContent::Json(value) => value.clone(),
        }
    }
}

impl From<String> for ToolContent {
    fn from(text: String) -> Self {
        ToolContent::Text(text)
    }
}

impl From<&str> for ToolContent {
    fn from(text: &str) -> Self {
        ToolContent::Text(text.to_string())
    }
}

impl From<Value> for ToolContent {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => ToolContent::Text(text),
            other => ToolContent::Json(other),
        }
    }
}

/// One part of a message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        call_id: String,
        content: ToolContent,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

impl From<ToolCall> for ContentPart {
    fn from(call: ToolCall) -> Self {
        ContentPart::ToolUse {
            id: call.id,
            name: call.name,
            input: call.input,
        }
    }
}

impl From<ToolResult> for ContentPart {
    fn from(result: ToolResult) -> Self {
        ContentPart::ToolResult {
            call_id: result.call_id,
            content: result.content,
            is_error: result.is_error,
        }
    }
}

/// A single message in a conversation.
///
/// Parts always satisfy the role invariants: `tool` carries only tool
/// results, `assistant` mixes text and tool uses with unique ids, `user` and
/// `system` carry only text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    role: Role,
    parts: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    parts: Vec<ContentPart>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ChatError;

    fn try_from(raw: RawMessage) -> Result<Self> {
        Message::new(raw.role, raw.parts)
    }
}

impl Message {
    /// Create a message, validating the parts against the role
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Result<Self> {
        let message = Self { role, parts };
        message.validate()?;
        Ok(message)
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Create a text-only assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Create an assistant message from parsed parts.
    ///
    /// Fails with `MalformedResponse` on duplicate tool-use ids or on parts an
    /// assistant may not carry.
    pub fn assistant_with_parts(parts: Vec<ContentPart>) -> Result<Self> {
        Self::new(Role::Assistant, parts)
    }

    /// Create a tool message carrying results in the given order
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            parts: results.into_iter().map(ContentPart::from).collect(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls in the order the provider reported them
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Tool results carried by this message
    pub fn results(&self) -> Vec<ToolResult> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    call_id,
                    content,
                    is_error,
                } => Some(ToolResult {
                    call_id: call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::ToolUse { .. }))
    }

    /// Check the role invariants
    pub fn validate(&self) -> Result<()> {
        match self.role {
            Role::Tool => {
                if let Some(part) = self
                    .parts
                    .iter()
                    .find(|p| !matches!(p, ContentPart::ToolResult { .. }))
                {
                    return Err(ChatError::InvalidConversation(format!(
                        "tool message may only carry tool results, found {:?}",
                        part
                    )));
                }
            }
            Role::Assistant => {
                let mut seen = HashSet::new();
                for part in &self.parts {
                    match part {
                        ContentPart::Text { .. } => {}
                        ContentPart::ToolUse { id, .. } => {
                            if !seen.insert(id.as_str()) {
                                return Err(ChatError::MalformedResponse(format!(
                                    "duplicate tool call id '{}'",
                                    id
                                )));
                            }
                        }
                        ContentPart::ToolResult { .. } => {
                            return Err(ChatError::MalformedResponse(
                                "assistant message carries a tool result".into(),
                            ));
                        }
                    }
                }
            }
            Role::User | Role::System => {
                if self
                    .parts
                    .iter()
                    .any(|p| !matches!(p, ContentPart::Text { .. }))
                {
                    return Err(ChatError::InvalidConversation(format!(
                        "{} message may only carry text",
                        self.role
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Ordered message log of one chat session.
///
/// Appends are checked so that every tool call of an assistant turn is
/// answered by exactly one result before anything else is appended.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message
    pub fn append_user(&mut self, text: impl Into<String>) -> Result<()> {
        self.ensure_no_pending("user message")?;
        self.messages.push(Message::user(text));
        Ok(())
    }

    /// Append an assistant message
    pub fn append_assistant(&mut self, message: Message) -> Result<()> {
        if message.role() != Role::Assistant {
            return Err(ChatError::InvalidConversation(format!(
                "expected assistant message, got {}",
                message.role()
            )));
        }
        self.ensure_no_pending("assistant message")?;
        message.validate()?;
        self.messages.push(message);
        Ok(())
    }

    /// Append the results answering the outstanding tool calls.
    ///
    /// The call-id sets must match exactly; order is kept as given.
    pub fn append_tool_results(&mut self, results: Vec<ToolResult>) -> Result<()> {
        let pending = self.pending_tool_calls();
        if pending.is_empty() {
            return Err(ChatError::InvalidConversation(
                "no outstanding tool calls to answer".into(),
            ));
        }

        let expected: HashSet<&str> = pending.iter().map(|c| c.id.as_str()).collect();
        let mut answered = HashSet::new();
        for result in &results {
            if !expected.contains(result.call_id.as_str()) {
                return Err(ChatError::InvalidConversation(format!(
                    "result for unknown call id '{}'",
                    result.call_id
                )));
            }
            if !answered.insert(result.call_id.as_str()) {
                return Err(ChatError::InvalidConversation(format!(
                    "call id '{}' answered twice",
                    result.call_id
                )));
            }
        }
        if answered.len() != expected.len() {
            let missing: Vec<&str> = expected.difference(&answered).copied().collect();
            return Err(ChatError::InvalidConversation(format!(
                "missing results for call ids {:?}",
                missing
            )));
        }

        self.messages.push(Message::tool_results(results));
        Ok(())
    }

    /// Tool calls of the last message that have not been answered yet
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        match self.messages.last() {
            Some(last) if last.role() == Role::Assistant => last.tool_calls(),
            _ => Vec::new(),
        }
    }

    fn ensure_no_pending(&self, what: &str) -> Result<()> {
        let pending = self.pending_tool_calls();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(ChatError::InvalidConversation(format!(
                "cannot append {} while {} tool call(s) are unanswered",
                what,
                pending.len()
            )))
        }
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop everything after the first `len` messages
    pub(crate) fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
