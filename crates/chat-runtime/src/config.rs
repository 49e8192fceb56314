//! Environment configuration
//!
//! Mirrors the variables the chat app has always read (`MODEL_PROVIDER`,
//! `CLAUDE_MODEL`, `GROQ_API_KEY`, ...). Adapters never read the
//! environment themselves; everything flows through [`ProviderConfig`].

use std::str::FromStr;
use std::sync::Arc;

use chat_core::{ChatError, LlmProvider, Result, RetryPolicy, SessionConfig};

use crate::anthropic::{AnthropicConfig, AnthropicProvider};
use crate::openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};

/// Which backend to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    Groq,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            other => Err(ChatError::Config(format!(
                "MODEL_PROVIDER must be one of claude, groq, ollama (got '{}')",
                other
            ))),
        }
    }
}

/// Everything needed to build one adapter
#[derive(Clone, Debug)]
pub enum ProviderConfig {
    Claude(AnthropicConfig),
    Groq(OpenAiCompatConfig),
    #[cfg(feature = "ollama")]
    Ollama(crate::ollama::OllamaConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Claude(_) => ProviderKind::Claude,
            Self::Groq(_) => ProviderKind::Groq,
            #[cfg(feature = "ollama")]
            Self::Ollama(_) => ProviderKind::Ollama,
        }
    }
}

/// Provider plus session settings
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,
    pub session: SessionConfig,
}

impl RuntimeConfig {
    /// Read the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| ChatError::Config(format!("{} must be set", key)))
        };

        let retry = match get("CHAT_MAX_RETRIES") {
            Some(v) => RetryPolicy::default().with_max_retries(parse("CHAT_MAX_RETRIES", &v)?),
            None => RetryPolicy::default(),
        };

        let kind = match get("MODEL_PROVIDER") {
            Some(v) => v.parse()?,
            None => ProviderKind::Claude,
        };

        let provider = match kind {
            ProviderKind::Claude => {
                let mut config = AnthropicConfig::new(require("ANTHROPIC_API_KEY")?, require("CLAUDE_MODEL")?);
                config.retry = retry;
                ProviderConfig::Claude(config)
            }
            ProviderKind::Groq => {
                let mut config = OpenAiCompatConfig::groq(require("GROQ_API_KEY")?, require("GROQ_MODEL")?);
                config.retry = retry;
                ProviderConfig::Groq(config)
            }
            #[cfg(feature = "ollama")]
            ProviderKind::Ollama => {
                let mut config = crate::ollama::OllamaConfig::default();
                if let Some(host) = get("OLLAMA_HOST") {
                    config.host = host;
                }
                if let Some(port) = get("OLLAMA_PORT") {
                    config.port = parse("OLLAMA_PORT", &port)?;
                }
                if let Some(model) = get("OLLAMA_MODEL") {
                    config.model = model;
                }
                config.retry = retry;
                ProviderConfig::Ollama(config)
            }
            #[cfg(not(feature = "ollama"))]
            ProviderKind::Ollama => {
                return Err(ChatError::Config(
                    "this build does not include the ollama provider".into(),
                ));
            }
        };

        let mut session = SessionConfig::default();
        if let Some(v) = get("CHAT_MAX_TURNS") {
            session.max_turns = parse("CHAT_MAX_TURNS", &v)?;
        }
        if let Some(v) = get("CHAT_TEMPERATURE") {
            session.generation.temperature = parse("CHAT_TEMPERATURE", &v)?;
        }
        session.system_prompt = get("CHAT_SYSTEM_PROMPT");

        Ok(Self { provider, session })
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ChatError::Config(format!("{} has an invalid value '{}'", key, value)))
}

/// Build the adapter described by `config`
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config {
        ProviderConfig::Claude(c) => Arc::new(AnthropicProvider::new(c.clone())?),
        ProviderConfig::Groq(c) => Arc::new(OpenAiCompatProvider::new(c.clone())?),
        #[cfg(feature = "ollama")]
        ProviderConfig::Ollama(c) => Arc::new(crate::ollama::OllamaProvider::from_config(c.clone())?),
    };
    tracing::info!(provider = %provider.info().name, model = %provider.info().model, "Model provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_claude() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("CLAUDE_MODEL", "claude-sonnet-4-0"),
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
        ]))
        .unwrap();

        match &config.provider {
            ProviderConfig::Claude(c) => {
                assert_eq!(c.model, "claude-sonnet-4-0");
                assert_eq!(c.api_key, "sk-ant-test");
            }
            other => panic!("expected claude, got {:?}", other),
        }
        assert_eq!(config.session.max_turns, 10);
        assert!(config.session.system_prompt.is_none());
    }

    #[test]
    fn test_missing_key_names_variable() {
        let err = RuntimeConfig::from_lookup(lookup(&[("CLAUDE_MODEL", "claude-sonnet-4-0")])).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));

        let err = RuntimeConfig::from_lookup(lookup(&[
            ("MODEL_PROVIDER", "groq"),
            ("GROQ_API_KEY", ""),
            ("GROQ_MODEL", "llama-3.3-70b-versatile"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_groq_and_session_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("MODEL_PROVIDER", "Groq"),
            ("GROQ_API_KEY", "gsk-test"),
            ("GROQ_MODEL", "llama-3.3-70b-versatile"),
            ("CHAT_MAX_TURNS", "4"),
            ("CHAT_MAX_RETRIES", "0"),
            ("CHAT_TEMPERATURE", "0.2"),
            ("CHAT_SYSTEM_PROMPT", "Answer from the documents."),
        ]))
        .unwrap();

        assert_eq!(config.provider.kind(), ProviderKind::Groq);
        if let ProviderConfig::Groq(c) = &config.provider {
            assert_eq!(c.retry.max_retries, 0);
            assert_eq!(c.base_url, crate::openai_compat::GROQ_API_URL);
        }
        assert_eq!(config.session.max_turns, 4);
        assert!((config.session.generation.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.session.system_prompt.as_deref(), Some("Answer from the documents."));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("MODEL_PROVIDER", "gemini")])).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));

        let err = RuntimeConfig::from_lookup(lookup(&[
            ("CLAUDE_MODEL", "m"),
            ("ANTHROPIC_API_KEY", "k"),
            ("CHAT_MAX_TURNS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CHAT_MAX_TURNS"));
    }

    #[cfg(feature = "ollama")]
    #[test]
    fn test_ollama_defaults_and_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("MODEL_PROVIDER", "ollama"),
            ("OLLAMA_PORT", "11500"),
        ]))
        .unwrap();
        match config.provider {
            ProviderConfig::Ollama(c) => {
                assert_eq!(c.host, "http://localhost");
                assert_eq!(c.port, 11500);
            }
            other => panic!("expected ollama, got {:?}", other),
        }
    }

    #[test]
    fn test_build_provider() {
        let config = ProviderConfig::Groq(OpenAiCompatConfig::groq("gsk-test", "llama"));
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.info().name, "groq");
        assert!(!provider.info().native_tool_results);
    }
}
