//! Tool System
//!
//! Tools are registered at runtime with a definition (shown to the model) and
//! a handler (what runs when the model calls it). Handlers usually forward to
//! an external [`ToolExecutor`]; in-process closures work too.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{ChatError, Result, ToolError};
use crate::message::ToolContent;

/// Tool definition advertised to the model.
///
/// `input_schema` is opaque: adapters pass it through without looking inside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON schema of the input object
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool call request from the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-issued call identifier, kept verbatim
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Result of executing one tool call, correlated by `call_id`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: ToolContent,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<ToolContent>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: impl Into<ToolContent>) -> Self {
        Self {
            call_id: call_id.into(),
            content: error.into(),
            is_error: true,
        }
    }

    /// Result fed back when the model names a tool nobody registered
    pub fn not_found(call_id: impl Into<String>) -> Self {
        Self::failure(call_id, ToolError::NotFound.to_string())
    }
}

/// What a handler or executor produced
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub content: ToolContent,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<ToolContent>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<ToolContent>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Executes one registered tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the model-supplied input
    async fn call(&self, input: Map<String, Value>) -> std::result::Result<ToolOutcome, ToolError>;

    /// Whether an in-flight call may simply be dropped on cancellation.
    ///
    /// Non-cancellable handlers are driven on their own task and left to
    /// finish; their results are discarded.
    fn cancellable(&self) -> bool {
        true
    }
}

/// External tool-execution collaborator: named capabilities behind some
/// request/response channel (a local process, a network service, ...)
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> std::result::Result<ToolOutcome, ToolError>;
}

/// Handler forwarding one tool name to an executor
struct ExecutorHandler {
    executor: Arc<dyn ToolExecutor>,
    tool_name: String,
}

#[async_trait]
impl ToolHandler for ExecutorHandler {
    async fn call(&self, input: Map<String, Value>) -> std::result::Result<ToolOutcome, ToolError> {
        self.executor
            .invoke(&self.tool_name, Value::Object(input))
            .await
    }
}

/// Route a registered tool to an external executor
pub fn executor_handler(
    executor: Arc<dyn ToolExecutor>,
    tool_name: impl Into<String>,
) -> Arc<dyn ToolHandler> {
    Arc::new(ExecutorHandler {
        executor,
        tool_name: tool_name.into(),
    })
}

struct FnHandler<F> {
    f: F,
    cancellable: bool,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ToolOutcome, ToolError>> + Send,
{
    async fn call(&self, input: Map<String, Value>) -> std::result::Result<ToolOutcome, ToolError> {
        (self.f)(input).await
    }

    fn cancellable(&self) -> bool {
        self.cancellable
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ToolOutcome, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler { f, cancellable: true })
}

/// Like [`handler_fn`], for side-effecting tools that must not be interrupted
pub fn uncancellable_handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ToolOutcome, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler { f, cancellable: false })
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names are unique
    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Result<()> {
        if self.handlers.contains_key(&definition.name) {
            return Err(ChatError::DuplicateTool(definition.name));
        }
        tracing::debug!(tool = %definition.name, "Registered tool");
        self.handlers.insert(definition.name.clone(), handler);
        self.definitions.push(definition);
        Ok(())
    }

    /// Get a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Get a definition by name
    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Execute one tool call.
    ///
    /// Never fails: unknown tools and handler errors come back as
    /// error-flagged results so the model can react to them.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(handler) = self.get(&call.name) else {
            tracing::warn!(tool = %call.name, call_id = %call.id, "Model called unknown tool");
            return ToolResult::not_found(&call.id);
        };

        tracing::debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        match handler.call(call.input.clone()).await {
            Ok(outcome) => ToolResult {
                call_id: call.id.clone(),
                content: outcome.content,
                is_error: outcome.is_error,
            },
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool failed");
                ToolResult::failure(&call.id, e.to_string())
            }
        }
    }

    /// Get tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
