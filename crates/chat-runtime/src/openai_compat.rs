//! OpenAI-compatible chat completions Provider
//!
//! Covers Groq, OpenAI and anything else speaking `/chat/completions`.
//! Tool call arguments travel as a JSON-encoded string and must be decoded
//! into an object before they reach a handler.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use chat_core::{
    message::{ContentPart, Message, Role},
    provider::{
        fold_tool_message, GenerationOptions, LlmProvider, ProviderInfo, ProviderResponse,
        TokenUsage,
    },
    retry::RetryPolicy,
    tool::ToolDefinition,
    ChatError, Result,
};

use crate::http;

pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// How tool results are sent back to the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolResultEncoding {
    /// One user message holding a JSON array of `{tool_call_id, result}` records
    FoldedUserTurn,
    /// One `tool` role message per result, keyed by `tool_call_id`
    NativeToolRole,
}

/// OpenAI-compatible provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiCompatConfig {
    /// Name reported in logs and errors
    pub name: String,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub encoding: ToolResultEncoding,
    pub retry: RetryPolicy,
}

impl OpenAiCompatConfig {
    /// Groq preset. Tool results are folded into user turns.
    pub fn groq(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "groq".into(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GROQ_API_URL.into(),
            timeout_secs: 120,
            encoding: ToolResultEncoding::FoldedUserTurn,
            retry: RetryPolicy::default(),
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "openai".into(),
            base_url: OPENAI_API_URL.into(),
            encoding: ToolResultEncoding::NativeToolRole,
            ..Self::groq(api_key, model)
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_encoding(mut self, encoding: ToolResultEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

pub struct OpenAiCompatProvider {
    client: Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            config,
        })
    }

    fn build_request(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        options: &GenerationOptions,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = system_prompt {
            messages.push(WireMessage::text("system", system));
        }
        for msg in history {
            self.convert_message(msg, &mut messages);
        }

        ChatRequest {
            model: options.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages,
            temperature: options.temperature,
            max_tokens: Some(options.max_tokens),
            top_p: options.top_p,
            stop: (!options.stop_sequences.is_empty()).then(|| options.stop_sequences.clone()),
            tools: (!tools.is_empty()).then(|| tools.iter().map(WireTool::from).collect()),
        }
    }

    fn convert_message(&self, msg: &Message, out: &mut Vec<WireMessage>) {
        match msg.role() {
            Role::System => out.push(WireMessage::text("system", msg.text())),
            Role::User => out.push(WireMessage::text("user", msg.text())),
            Role::Assistant => {
                let tool_calls: Vec<WireToolCall> = msg
                    .tool_calls()
                    .into_iter()
                    .map(|call| WireToolCall {
                        id: call.id,
                        kind: "function".into(),
                        function: WireFunctionCall {
                            name: call.name,
                            arguments: Value::Object(call.input).to_string(),
                        },
                    })
                    .collect();
                let text = msg.text();
                if text.is_empty() && tool_calls.is_empty() {
                    return;
                }
                out.push(WireMessage {
                    role: "assistant".into(),
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                });
            }
            Role::Tool => match self.config.encoding {
                ToolResultEncoding::FoldedUserTurn => {
                    if let Some(folded) = fold_tool_message(msg) {
                        out.push(WireMessage::text("user", folded));
                    }
                }
                ToolResultEncoding::NativeToolRole => {
                    for result in msg.results() {
                        out.push(WireMessage {
                            role: "tool".into(),
                            content: Some(result.content.to_text()),
                            tool_calls: None,
                            tool_call_id: Some(result.call_id),
                        });
                    }
                }
            },
        }
    }

    fn parse_response(response: ChatResponse) -> Result<ProviderResponse> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ChatError::MalformedResponse("response contains no choices".into())
        })?;

        let mut parts = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            parts.push(ContentPart::Text { text });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let input = parse_arguments(&call.function.name, &call.function.arguments)?;
            parts.push(ContentPart::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }

        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        ProviderResponse::from_parts(
            parts,
            choice.finish_reason.as_deref() == Some("tool_calls"),
            response.model,
            usage,
        )
    }

    async fn post(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(http::transport)?;
        http::read_body(&self.config.name, response).await
    }
}

/// Decode a JSON-string argument payload into an object
fn parse_arguments(tool: &str, arguments: &str) -> Result<Map<String, Value>> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_json::from_str(arguments).map_err(|e| {
        ChatError::MalformedResponse(format!("arguments for tool '{}' are not JSON: {}", tool, e))
    })?;
    crate::anthropic::object_input(tool, value)
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            native_tool_results: self.config.encoding == ToolResultEncoding::NativeToolRole,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;
        match response {
            Ok(r) => Ok(r.status().is_success()),
            Err(e) => {
                tracing::warn!(provider = %self.config.name, error = %e, "Health check failed");
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
        let request = self.build_request(history, system_prompt, tools, options);
        tracing::debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Sending chat completion request"
        );

        let body = self
            .config
            .retry
            .run(&self.config.name, || self.post(&request))
            .await?;
        let response: ChatResponse = http::decode(&self.config.name, &body)?;
        Self::parse_response(response)
    }
}

// Chat completions wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for WireTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.input_schema.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::provider::StopSignal;
    use chat_core::tool::ToolResult;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn groq(base_url: &str) -> OpenAiCompatProvider {
        let mut config = OpenAiCompatConfig::groq("gsk-test", "llama-test").with_base_url(base_url);
        config.retry = RetryPolicy::none();
        OpenAiCompatProvider::new(config).unwrap()
    }

    fn tool_round() -> Vec<Message> {
        let mut a = Map::new();
        a.insert("doc_name".into(), json!("report.pdf"));
        let mut b = Map::new();
        b.insert("doc_name".into(), json!("plan.md"));
        vec![
            Message::user("Compare report.pdf and plan.md"),
            Message::assistant_with_parts(vec![
                ContentPart::ToolUse { id: "c1".into(), name: "read_doc".into(), input: a },
                ContentPart::ToolUse { id: "c2".into(), name: "read_doc".into(), input: b },
            ])
            .unwrap(),
            Message::tool_results(vec![
                ToolResult::success("c1", "condenser tower"),
                ToolResult::failure("c2", "tool not found"),
            ]),
        ]
    }

    #[test]
    fn test_folded_encoding() {
        let p = groq("http://unused");
        let request = p.build_request(&tool_round(), Some("Be brief."), &[], &GenerationOptions::default());
        let body = serde_json::to_value(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(messages[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            messages[2]["tool_calls"][1]["function"]["arguments"],
            r#"{"doc_name":"plan.md"}"#
        );

        assert_eq!(messages[3]["role"], "user");
        let folded: Value = serde_json::from_str(messages[3]["content"].as_str().unwrap()).unwrap();
        assert_eq!(folded[0]["tool_call_id"], "c1");
        assert_eq!(folded[0]["result"], "condenser tower");
        assert_eq!(folded[1]["tool_call_id"], "c2");
        assert_eq!(folded[1]["is_error"], true);
        assert_eq!(body["temperature"], 1.0);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_native_tool_role_encoding() {
        let config = OpenAiCompatConfig::openai("sk-test", "gpt-test");
        let p = OpenAiCompatProvider::new(config).unwrap();
        assert!(p.info().native_tool_results);

        let request = p.build_request(&tool_round(), None, &[], &GenerationOptions::default());
        let body = serde_json::to_value(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "c1");
        assert_eq!(messages[3]["tool_call_id"], "c2");
    }

    #[test]
    fn test_tools_and_stop_sequences() {
        let p = groq("http://unused");
        let schema = json!({"type": "object", "properties": {}});
        let tools = vec![ToolDefinition::new("list_docs", "List docs", schema.clone())];
        let options = GenerationOptions {
            stop_sequences: vec!["</answer>".into()],
            ..Default::default()
        };
        let request = p.build_request(&[Message::user("hi")], None, &tools, &options);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["stop"], json!(["</answer>"]));
        assert_eq!(body["tools"][0]["function"]["parameters"], schema);
    }

    #[test]
    fn test_parse_tool_calls() {
        let raw = json!({
            "model": "llama-test",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_a", "type": "function",
                         "function": {"name": "read_doc", "arguments": "{\"doc_name\":\"report.pdf\"}"}},
                        {"id": "call_b", "type": "function",
                         "function": {"name": "list_docs", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        });
        let parsed = OpenAiCompatProvider::parse_response(serde_json::from_value(raw).unwrap()).unwrap();

        assert_eq!(parsed.stop, StopSignal::RequestedToolUse);
        let calls = parsed.message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].input["doc_name"], "report.pdf");
        assert!(calls[1].input.is_empty());
    }

    #[test]
    fn test_empty_reply_is_not_sent_back_empty() {
        let raw = json!({
            "model": "llama-test",
            "choices": [{"message": {"role": "assistant", "content": ""}, "finish_reason": "stop"}]
        });
        let parsed = OpenAiCompatProvider::parse_response(serde_json::from_value(raw).unwrap()).unwrap();
        assert_eq!(parsed.stop, StopSignal::FinishedWithText);
        assert_eq!(parsed.message.parts(), &[ContentPart::text("")]);

        let p = groq("http://unused");
        let history = vec![Message::user("Hi"), parsed.message, Message::user("Still there?")];
        let request = p.build_request(&history, None, &[], &GenerationOptions::default());
        let body = serde_json::to_value(&request).unwrap();
        let roles: Vec<_> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["user", "user"]);
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        let bad_args = json!({
            "model": "m",
            "choices": [{
                "message": {"content": null, "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "read_doc", "arguments": "[1,2]"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        });
        assert!(matches!(
            OpenAiCompatProvider::parse_response(serde_json::from_value(bad_args).unwrap()),
            Err(ChatError::MalformedResponse(_))
        ));

        let no_choices = json!({"model": "m", "choices": []});
        assert!(matches!(
            OpenAiCompatProvider::parse_response(serde_json::from_value(no_choices).unwrap()),
            Err(ChatError::MalformedResponse(_))
        ));

        let claims_tools = json!({
            "model": "m",
            "choices": [{"message": {"content": "hmm"}, "finish_reason": "tool_calls"}]
        });
        assert!(matches!(
            OpenAiCompatProvider::parse_response(serde_json::from_value(claims_tools).unwrap()),
            Err(ChatError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_send_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama-test",
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let response = groq(&server.uri())
            .send(&[Message::user("Hi")], None, &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(response.message.text(), "Hello!");
        assert_eq!(response.stop, StopSignal::FinishedWithText);
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama-test",
                "choices": [{"message": {"content": "recovered"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let mut config = OpenAiCompatConfig::groq("gsk-test", "llama-test").with_base_url(server.uri());
        config.retry = RetryPolicy {
            max_retries: 1,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
        };
        let response = OpenAiCompatProvider::new(config)
            .unwrap()
            .send(&[Message::user("Hi")], None, &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(response.message.text(), "recovered");
    }
}
