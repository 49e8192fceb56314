//! # chat-runtime
//!
//! Model backends and tool transports for chat-core.
//!
//! ## Providers
//!
//! - **Anthropic**: Messages API with native tool_use / tool_result blocks
//! - **OpenAI-compatible**: Groq (default) or any `/chat/completions` endpoint
//! - **Ollama** (feature `ollama`, on by default): local inference with
//!   prompt-based tool calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_runtime::{build_provider, McpClient, McpServerConfig, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_env()?;
//! let docs = McpClient::connect(McpServerConfig::parse("uv run mcp_server.py")?).await?;
//! let mut tools = ToolRegistry::new();
//! docs.register_tools(&mut tools).await?;
//!
//! let mut chat = Orchestrator::builder()
//!     .provider(build_provider(&config.provider)?)
//!     .config(config.session)
//!     .tools(tools)
//!     .build()?;
//! let answer = chat.run_turn("What's in report.pdf?").await?;
//! ```

pub mod anthropic;
pub mod config;
mod http;
pub mod mcp;
pub mod openai_compat;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use config::{build_provider, ProviderConfig, ProviderKind, RuntimeConfig};
pub use mcp::{McpClient, McpError, McpServerConfig, McpTool};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider, ToolResultEncoding};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

// Re-export core types for convenience
pub use chat_core::{
    ChatError, LlmProvider, Message, Orchestrator, Result, Role, Session, SessionConfig,
    ToolRegistry,
};
