//! Conversation Orchestrator
//!
//! Runs the turn loop: the model answers, asks for tools, sees their results
//! and answers again until it produces final text.
//!
//! ```text
//! Idle ──user text──▶ AwaitingModel ──FinishedWithText──▶ Done
//!                        ▲      │
//!                        │      └──RequestedToolUse──▶ HasToolCalls
//!                        │                                  │
//!                        └──────── results appended ◀── ExecutingTools
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatch::{ToolDispatcher, DEFAULT_MAX_CONCURRENT_TOOLS};
use crate::error::{ChatError, Result};
use crate::message::Conversation;
use crate::provider::{GenerationOptions, LlmProvider, ProviderInfo, ProviderResponse, StopSignal};
use crate::session::Session;
use crate::tool::{ToolDefinition, ToolHandler, ToolRegistry};

/// Per-session settings
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// System prompt sent with every model call
    pub system_prompt: Option<String>,

    /// Maximum model calls within one user turn
    pub max_turns: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// How many tool calls of one turn may run at once
    pub max_concurrent_tools: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_turns: 10,
            generation: GenerationOptions::default(),
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
        }
    }
}

/// Where the turn loop currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingModel,
    HasToolCalls,
    ExecutingTools,
    Done,
}

/// Drives one chat session against one provider
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    dispatcher: ToolDispatcher,
    config: SessionConfig,
    session: Session,
    state: TurnState,
}

impl Orchestrator {
    /// Create a new orchestrator with an empty session
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(tools, config.max_concurrent_tools);
        let session = Session::new();
        tracing::info!(
            session = %session.id,
            provider = %provider.info().name,
            tools = dispatcher.registry().len(),
            "Session started"
        );
        Self {
            provider,
            dispatcher,
            config,
            session,
            state: TurnState::Idle,
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run one user turn to completion and return the final assistant text
    pub async fn run_turn(&mut self, user_text: &str) -> Result<String> {
        self.run_turn_with_cancel(user_text, &CancellationToken::new())
            .await
    }

    /// Like [`run_turn`](Self::run_turn), aborting when `cancel` fires.
    ///
    /// A failed or cancelled turn leaves the conversation as it was before
    /// the turn started.
    pub async fn run_turn_with_cancel(
        &mut self,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let checkpoint = self.session.conversation.len();

        match self.drive(user_text, cancel).await {
            Ok(text) => {
                self.session.turns += 1;
                self.session.touch();
                Ok(text)
            }
            Err(e) => {
                tracing::warn!(
                    session = %self.session.id,
                    state = ?self.state,
                    error = %e,
                    "Turn failed, rolling back"
                );
                self.session.conversation.truncate(checkpoint);
                self.state = TurnState::Idle;
                Err(e)
            }
        }
    }

    async fn drive(&mut self, user_text: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        self.session.conversation.append_user(user_text)?;
        self.state = TurnState::AwaitingModel;

        let mut model_turns = 0;
        loop {
            if model_turns >= self.config.max_turns {
                return Err(ChatError::ToolLoopExceeded(self.config.max_turns));
            }
            model_turns += 1;

            let response = self.call_model(cancel).await?;
            let ProviderResponse {
                message,
                stop,
                model,
                usage,
            } = response;
            tracing::debug!(
                session = %self.session.id,
                model = %model,
                turn = model_turns,
                stop = ?stop,
                usage = ?usage,
                "Model replied"
            );

            let calls = message.tool_calls();
            let text = message.text();
            self.session.conversation.append_assistant(message)?;

            match stop {
                StopSignal::FinishedWithText => {
                    self.state = TurnState::Done;
                    return Ok(text);
                }
                StopSignal::RequestedToolUse => {
                    self.state = TurnState::HasToolCalls;
                    tracing::debug!(
                        session = %self.session.id,
                        calls = calls.len(),
                        tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "Model requested tools"
                    );

                    self.state = TurnState::ExecutingTools;
                    let results = self.dispatcher.dispatch_all(calls, cancel).await?;
                    self.session.conversation.append_tool_results(results)?;
                    self.state = TurnState::AwaitingModel;
                }
            }
        }
    }

    async fn call_model(&self, cancel: &CancellationToken) -> Result<ProviderResponse> {
        let send = self.provider.send(
            self.session.conversation.messages(),
            self.config.system_prompt.as_deref(),
            self.dispatcher.registry().definitions(),
            &self.config.generation,
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            response = send => response,
        }
    }

    /// Start over with an empty conversation
    pub fn reset(&mut self) {
        self.session = Session::new();
        self.state = TurnState::Idle;
        tracing::info!(session = %self.session.id, "Session reset");
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn conversation(&self) -> &Conversation {
        &self.session.conversation
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }

    /// Get configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn provider_info(&self) -> ProviderInfo {
        self.provider.info()
    }
}

/// Builder for an [`Orchestrator`]
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    pending: Vec<(ToolDefinition, Arc<dyn ToolHandler>)>,
    config: SessionConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            pending: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Add one tool; name clashes surface from [`build`](Self::build)
    pub fn tool(mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        self.pending.push((definition, handler));
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_turns(mut self, max: usize) -> Self {
        self.config.max_turns = max;
        self
    }

    pub fn build(mut self) -> Result<Orchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| ChatError::Config("Provider is required".into()))?;

        for (definition, handler) in self.pending {
            self.tools.register(definition, handler)?;
        }

        Ok(Orchestrator::new(provider, Arc::new(self.tools), self.config))
    }
}
