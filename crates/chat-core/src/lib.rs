//! # chat-core
//!
//! Canonical conversation model, provider adapter contract and the
//! tool-calling turn loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Turn Loop  │  │  ToolDispatcher  │  │  LlmProvider    │  │
//! │  │ (state mc.) │──│  (ToolRegistry)  │──│  (Adapter)      │  │
//! │  └─────────────┘  └──────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets the orchestrator work with Anthropic,
//! OpenAI-compatible or Ollama backends without knowing their wire formats.

pub mod dispatch;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod session;
pub mod tool;

pub use dispatch::ToolDispatcher;
pub use error::{ChatError, Result, ToolError};
pub use message::{ContentPart, Conversation, Message, Role, ToolContent};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SessionConfig, TurnState};
pub use provider::{GenerationOptions, LlmProvider, ProviderResponse, StopSignal};
pub use retry::RetryPolicy;
pub use session::{Session, SessionId};
pub use tool::{
    executor_handler, handler_fn, ToolCall, ToolDefinition, ToolExecutor, ToolHandler,
    ToolOutcome, ToolRegistry, ToolResult,
};
