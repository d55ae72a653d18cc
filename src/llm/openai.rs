//! OpenAI-compatible chat-completion client (OpenAI, Azure OpenAI, Ollama,
//! vLLM, LiteLLM proxies, ...).

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::llm::error::LlmError;
use crate::llm::{
    ChatMessage, Completion, CompletionProvider, CompletionRequest, Role, TokenUsage, ToolCall,
};

/// Public OpenAI endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Parameters the provider may drop when a model rejects them.
const DROPPABLE_PARAMS: [&str; 5] = [
    "temperature",
    "top_p",
    "max_tokens",
    "max_completion_tokens",
    "parallel_tool_calls",
];

#[allow(clippy::expect_used)]
static UNSUPPORTED_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Unsupported (?:parameter|value): '([A-Za-z_]+)'")
        .expect("unsupported-parameter pattern is valid")
});

/// Connection and sampling settings.
#[derive(Clone)]
pub struct OpenAiSettings {
    /// Model name. `azure/<deployment>` selects the Azure deployment API;
    /// an `openai/` prefix is stripped.
    pub model: String,
    /// API base URL; defaults to [`DEFAULT_API_BASE`].
    pub api_base: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Azure `api-version` query value.
    pub api_version: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling, sent only when set.
    pub top_p: Option<f32>,
    /// Response token limit.
    pub max_tokens: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Allow the model to request several tool calls per turn.
    pub parallel_tool_calls: bool,
    /// Retries for rate limits, server errors and connection failures.
    pub num_retries: u32,
}

impl OpenAiSettings {
    /// Settings for `model` with the tool defaults.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_base: None,
            api_key: None,
            api_version: None,
            temperature: 0.0,
            top_p: None,
            max_tokens: 8192,
            timeout: Duration::from_secs(180),
            parallel_tool_calls: true,
            num_retries: 5,
        }
    }
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .field("num_retries", &self.num_retries)
            .finish()
    }
}

#[derive(Deserialize, Debug)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Where and how requests are sent.
enum Endpoint {
    /// `<base>/v1/chat/completions`, bearer auth.
    OpenAi { url: Url },
    /// `<base>/openai/deployments/<deployment>/chat/completions`, `api-key`
    /// header.
    Azure { url: Url },
}

/// [`CompletionProvider`] for the OpenAI chat-completions wire format.
pub struct OpenAiCompatibleProvider {
    client: Client,
    settings: OpenAiSettings,
    model: String,
    endpoint: Endpoint,
    retry_base_delay: Duration,
}

impl OpenAiCompatibleProvider {
    /// Creates the provider.
    ///
    /// Fails with [`LlmError::ApiKeyNotFound`] when the hosted OpenAI or
    /// Azure endpoints are used without a key. Self-hosted endpoints may run
    /// without one.
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let api_key = settings.api_key.as_deref().filter(|k| !k.trim().is_empty());
        let api_base = settings
            .api_base
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(DEFAULT_API_BASE);
        let base = Url::parse(api_base.trim_end_matches('/'))
            .with_context(|| format!("Invalid LLM API base URL '{api_base}'"))?;

        let (model, endpoint) = if let Some(deployment) = settings.model.strip_prefix("azure/") {
            if api_key.is_none() {
                return Err(LlmError::ApiKeyNotFound.into());
            }
            let mut url = append_path(
                &base,
                &["openai", "deployments", deployment, "chat", "completions"],
            );
            if let Some(ref version) = settings.api_version {
                url.query_pairs_mut().append_pair("api-version", version);
            }
            (deployment.to_string(), Endpoint::Azure { url })
        } else {
            if api_key.is_none() && base.as_str().starts_with(DEFAULT_API_BASE) {
                return Err(LlmError::ApiKeyNotFound.into());
            }
            let model = settings
                .model
                .strip_prefix("openai/")
                .unwrap_or(&settings.model)
                .to_string();
            let url = append_path(&base, &["v1", "chat", "completions"]);
            (model, Endpoint::OpenAi { url })
        };

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            settings,
            model,
            endpoint,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    /// Overrides the first retry delay; later retries double it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Reasoning families reject sampling parameters and `max_tokens`.
    fn is_reasoning_model(&self) -> bool {
        ["gpt-5", "o1", "o3", "o4"]
            .iter()
            .any(|family| self.model.starts_with(family))
    }

    fn post(&self) -> RequestBuilder {
        match self.endpoint {
            Endpoint::OpenAi { ref url } => {
                let builder = self.client.post(url.clone());
                match self.settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            }
            Endpoint::Azure { ref url } => {
                let builder = self.client.post(url.clone());
                match self.settings.api_key {
                    Some(ref key) => builder.header("api-key", key),
                    None => builder,
                }
            }
        }
    }

    /// Builds the request body, leaving out every parameter in `dropped`.
    fn build_body(&self, request: &CompletionRequest, dropped: &BTreeSet<String>) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.model));
        body.insert(
            "messages".to_string(),
            Value::Array(request.messages.iter().map(message_to_json).collect()),
        );

        let reasoning = self.is_reasoning_model();
        let mut params: Vec<(&str, Value)> = Vec::new();
        if !reasoning {
            params.push(("temperature", json!(self.settings.temperature)));
            if let Some(top_p) = self.settings.top_p {
                params.push(("top_p", json!(top_p)));
            }
        }
        let token_key = if reasoning || dropped.contains("max_tokens") {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        params.push((token_key, json!(self.settings.max_tokens)));

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".to_string(), Value::Array(tools));
            params.push(("parallel_tool_calls", json!(self.settings.parallel_tool_calls)));
        }

        for (key, value) in params {
            if !dropped.contains(key) {
                body.insert(key.to_string(), value);
            }
        }
        Value::Object(body)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }

    async fn backoff(&self, attempt: u32, reason: &str) {
        let delay = self.retry_delay(attempt);
        warn!(
            attempt,
            max_retries = self.settings.num_retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying LLM request: {reason}"
        );
        tokio::time::sleep(delay).await;
    }
}

fn append_path(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn message_to_json(message: &ChatMessage) -> Value {
    let mut object = Map::new();
    object.insert("role".to_string(), json!(message.role.as_str()));
    match message.role {
        Role::Assistant => {
            object.insert("content".to_string(), json!(message.content));
            if !message.tool_calls.is_empty() {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": call.arguments },
                        })
                    })
                    .collect();
                object.insert("tool_calls".to_string(), Value::Array(calls));
            }
        }
        Role::Tool => {
            object.insert("tool_call_id".to_string(), json!(message.tool_call_id));
            object.insert(
                "content".to_string(),
                json!(message.content.as_deref().unwrap_or_default()),
            );
        }
        Role::System | Role::User => {
            object.insert(
                "content".to_string(),
                json!(message.content.as_deref().unwrap_or_default()),
            );
        }
    }
    Value::Object(object)
}

/// Extracts the parameter a 400 response complains about.
fn unsupported_parameter(error_body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(error_body) {
        let error = &value["error"];
        let code = error["code"].as_str().unwrap_or_default();
        if code.starts_with("unsupported") {
            if let Some(param) = error["param"].as_str() {
                return Some(param.to_string());
            }
        }
    }
    UNSUPPORTED_PARAM
        .captures(error_body)
        .map(|caps| caps[1].to_string())
}

fn parse_response(response: ChatResponse) -> Result<Completion> {
    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponseFormat("No choices in response".to_string()))?;

    debug!(
        model = ?response.model,
        finish_reason = ?choice.finish_reason,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "Received completion"
    );

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    Ok(Completion {
        text: choice.message.content.filter(|text| !text.is_empty()),
        tool_calls,
        usage,
    })
}

impl CompletionProvider for OpenAiCompatibleProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BoxFuture<'a, Result<Completion>> {
        Box::pin(async move {
            let mut dropped = BTreeSet::new();
            let mut attempt = 0_u32;

            loop {
                let body = self.build_body(request, &dropped);
                debug!(
                    model = %self.model,
                    message_count = request.messages.len(),
                    tool_count = request.tools.len(),
                    dropped = ?dropped,
                    "Sending completion request"
                );

                let response = match self.post().json(&body).send().await {
                    Ok(response) => response,
                    Err(e)
                        if (e.is_connect() || e.is_timeout())
                            && attempt < self.settings.num_retries =>
                    {
                        attempt += 1;
                        self.backoff(attempt, &e.to_string()).await;
                        continue;
                    }
                    Err(e) => return Err(LlmError::NetworkError(e.to_string()).into()),
                };

                let status = response.status();
                if status.is_success() {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| LlmError::InvalidResponseFormat(e.to_string()))?;
                    return parse_response(parsed);
                }

                let error_text = response.text().await.unwrap_or_else(|e| {
                    debug!("Failed to read error response body: {e}");
                    String::new()
                });

                if status == StatusCode::BAD_REQUEST {
                    if let Some(param) = unsupported_parameter(&error_text) {
                        if DROPPABLE_PARAMS.contains(&param.as_str()) && !dropped.contains(&param) {
                            info!(
                                model = %self.model,
                                parameter = %param,
                                "Dropping unsupported parameter"
                            );
                            dropped.insert(param);
                            continue;
                        }
                    }
                }

                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < self.settings.num_retries {
                    attempt += 1;
                    self.backoff(attempt, &format!("HTTP {status}")).await;
                    continue;
                }

                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(LlmError::RateLimitExceeded.into());
                }
                return Err(
                    LlmError::ApiRequestFailed(format!("HTTP {status}: {error_text}")).into(),
                );
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(model: &str, base: &str) -> OpenAiSettings {
        OpenAiSettings {
            api_base: Some(base.to_string()),
            api_key: Some("sk-test".to_string()),
            ..OpenAiSettings::new(model)
        }
    }

    fn provider(model: &str, base: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(settings(model, base))
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    fn text_response(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o",
            "choices": [{
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        }))
    }

    fn simple_request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            tools: Vec::new(),
        }
    }

    async fn bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    #[test]
    fn hosted_openai_requires_key() {
        let err = OpenAiCompatibleProvider::new(OpenAiSettings::new("gpt-4o"))
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<LlmError>(), Some(LlmError::ApiKeyNotFound)));

        // Self-hosted endpoints may not need a key.
        let local = OpenAiCompatibleProvider::new(OpenAiSettings {
            api_base: Some("http://localhost:11434".to_string()),
            ..OpenAiSettings::new("openai/llama3")
        })
        .unwrap();
        assert_eq!(local.model(), "llama3");
    }

    #[test]
    fn unsupported_parameter_detection() {
        let body = r#"{"error":{"message":"Unsupported parameter: 'max_tokens' is not supported with this model. Use 'max_completion_tokens' instead.","type":"invalid_request_error","param":"max_tokens","code":"unsupported_parameter"}}"#;
        assert_eq!(unsupported_parameter(body).as_deref(), Some("max_tokens"));
        assert_eq!(
            unsupported_parameter("Unsupported value: 'temperature' does not support 0.0")
                .as_deref(),
            Some("temperature")
        );
        assert_eq!(unsupported_parameter("model not found"), None);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let provider = OpenAiCompatibleProvider::new(settings("gpt-4o", "http://localhost:1"))
            .unwrap()
            .with_retry_delay(Duration::from_secs(1));
        assert_eq!(provider.retry_delay(1), Duration::from_secs(1));
        assert_eq!(provider.retry_delay(3), Duration::from_secs(4));
        assert_eq!(provider.retry_delay(10), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn sends_defaults_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(text_response("hello"))
            .mount(&server)
            .await;

        let completion = provider("gpt-4o", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap();
        assert_eq!(completion.text.as_deref(), Some("hello"));
        assert_eq!(completion.usage.input_tokens, 12);
        assert_eq!(completion.usage.output_tokens, 3);

        let sent = &bodies(&server).await[0];
        assert_eq!(sent["model"], "gpt-4o");
        assert_eq!(sent["temperature"], 0.0);
        assert_eq!(sent["max_tokens"], 8192);
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][1]["content"], "hi");
        assert!(sent.get("tools").is_none());
        assert!(sent.get("parallel_tool_calls").is_none());
    }

    #[tokio::test]
    async fn reasoning_models_skip_sampling_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(text_response("ok"))
            .mount(&server)
            .await;

        provider("o3-mini", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap();

        let sent = &bodies(&server).await[0];
        assert!(sent.get("temperature").is_none());
        assert!(sent.get("max_tokens").is_none());
        assert_eq!(sent["max_completion_tokens"], 8192);
    }

    #[tokio::test]
    async fn drops_parameter_named_in_bad_request_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Unsupported value: 'temperature' does not support 0.0 with this model.",
                    "param": "temperature",
                    "code": "unsupported_value"
                }
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(text_response("done"))
            .mount(&server)
            .await;

        let completion = provider("gpt-4.1", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap();
        assert_eq!(completion.text.as_deref(), Some("done"));

        let sent = bodies(&server).await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["temperature"], 0.0);
        assert!(sent[1].get("temperature").is_none());
        assert_eq!(sent[1]["max_tokens"], 8192);
    }

    #[tokio::test]
    async fn dropping_max_tokens_switches_to_max_completion_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "Unsupported parameter: 'max_tokens' is not supported with this model.",
            ))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(text_response("done"))
            .mount(&server)
            .await;

        provider("gpt-4.1", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap();

        let sent = bodies(&server).await;
        assert!(sent[1].get("max_tokens").is_none());
        assert_eq!(sent[1]["max_completion_tokens"], 8192);
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(text_response("finally"))
            .mount(&server)
            .await;

        let completion = provider("gpt-4o", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap();
        assert_eq!(completion.text.as_deref(), Some("finally"));
        assert_eq!(bodies(&server).await.len(), 3);
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(6)
            .mount(&server)
            .await;

        let err = provider("gpt-4o", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<LlmError>(), Some(LlmError::RateLimitExceeded)));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider("gpt-4o", &server.uri())
            .complete(&simple_request())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<LlmError>(), Some(LlmError::ApiRequestFailed(_))));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn tool_calls_round_trip_through_the_conversation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "read_file",
                                "arguments": "{\"path\":\"README.md\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let provider = provider("gpt-4o", &server.uri());
        let mut request = CompletionRequest {
            messages: vec![ChatMessage::user("analyze")],
            tools: vec![ToolDefinition {
                name: "read_file".to_string(),
                description: "Read a file".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } }
                }),
            }],
        };
        let completion = provider.complete(&request).await.unwrap();
        assert!(completion.text.is_none());
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "read_file");

        request.messages.push(completion.to_message());
        request
            .messages
            .push(ChatMessage::tool_result("call_1", "# Readme"));
        provider.complete(&request).await.unwrap();

        let sent = bodies(&server).await;
        assert_eq!(sent[0]["tools"][0]["function"]["name"], "read_file");
        assert_eq!(sent[0]["parallel_tool_calls"], true);
        let followup = &sent[1]["messages"];
        assert_eq!(followup[1]["role"], "assistant");
        assert!(followup[1]["content"].is_null());
        assert_eq!(followup[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(followup[2]["role"], "tool");
        assert_eq!(followup[2]["tool_call_id"], "call_1");
        assert_eq!(followup[2]["content"], "# Readme");
    }

    #[tokio::test]
    async fn azure_deployments_use_api_key_header_and_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-41/chat/completions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "sk-test"))
            .respond_with(text_response("azure"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new(OpenAiSettings {
            api_version: Some("2024-06-01".to_string()),
            ..settings("azure/gpt-41", &server.uri())
        })
        .unwrap();
        assert_eq!(provider.model(), "gpt-41");
        let completion = provider.complete(&simple_request()).await.unwrap();
        assert_eq!(completion.text.as_deref(), Some("azure"));
    }
}
