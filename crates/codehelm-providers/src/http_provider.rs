//! Generic HTTP-based LLM provider for OpenAI-compatible APIs.
//!
//! Talks to any `/chat/completions` endpoint (OpenAI, DeepSeek, OpenRouter,
//! vLLM, Ollama, …). Requests ask for SSE streaming; servers that ignore
//! the flag and answer with plain JSON are handled too.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use codehelm_core::config::ProviderConfig;
use codehelm_core::types::{ChatCompletionRequest, ChatCompletionResponse, StreamEvent};

use crate::sse::SseDecoder;
use crate::traits::{LlmProvider, LlmRequest};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A streaming LLM provider that talks to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key for Bearer authentication.
    api_key: String,
    default_model: String,
    /// Host part of the base URL, used as the display name.
    display_name: String,
    /// Extra headers to send with each request.
    extra_headers: HeaderMap,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new HttpProvider from the provider config section.
    pub fn new(config: &ProviderConfig, model: &str) -> anyhow::Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        let display_name = reqwest::Url::parse(&api_base)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| "openai-compatible".to_string());

        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: model.to_string(),
            display_name,
            extra_headers,
        })
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    async fn run(&self, request: LlmRequest, events: &mpsc::Sender<StreamEvent>) -> Result<(), StreamEvent> {
        debug!(
            provider = %self.display_name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, |t| t.len()),
            "Calling LLM"
        );

        let has_tools = request.tools.is_some();
        let body = ChatCompletionRequest {
            model: request.model,
            messages: request.messages,
            tools: request.tools,
            tool_choice: has_tools.then(|| "auto".to_string()),
            max_tokens: Some(request.config.max_tokens),
            temperature: Some(request.config.temperature),
            stream: true,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = %self.display_name, error = %e, "HTTP request failed");
                StreamEvent::Error {
                    message: format!("Error calling LLM: {e}"),
                    retryable: true,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(
                provider = %self.display_name,
                status = %status,
                body = %error_text,
                "API error"
            );
            return Err(StreamEvent::Error {
                message: format!("Error calling LLM: {status} — {error_text}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));

        if !is_sse {
            return self.forward_json(response, events).await;
        }

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StreamEvent::Error {
                message: format!("Stream interrupted: {e}"),
                retryable: true,
            })?;
            for event in decoder.push(&chunk) {
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
            if decoder.is_done() {
                break;
            }
        }

        for event in decoder.finish() {
            if events.send(event).await.is_err() {
                break;
            }
        }
        debug!(provider = %self.display_name, "LLM stream finished");
        Ok(())
    }

    /// Translate a non-streaming JSON response into the same event sequence.
    async fn forward_json(
        &self,
        response: reqwest::Response,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), StreamEvent> {
        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                error!(provider = %self.display_name, error = %e, "Failed to parse LLM response");
                StreamEvent::Error {
                    message: format!("Error parsing LLM response: {e}"),
                    retryable: false,
                }
            })?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(StreamEvent::Error {
                message: "LLM response contained no choices".to_string(),
                retryable: true,
            });
        };

        let mut out = Vec::new();
        if let Some(reasoning) = choice.message.reasoning_content.filter(|r| !r.is_empty()) {
            out.push(StreamEvent::ReasoningDelta(reasoning));
        }
        if let Some(text) = choice.message.content.clone().filter(|t| !t.is_empty()) {
            out.push(StreamEvent::TextDelta(text));
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            out.push(StreamEvent::ToolCall(call));
        }
        out.push(StreamEvent::Done {
            content: choice.message.content,
            usage: parsed.usage,
        });

        for event in out {
            if events.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn stream_chat(&self, request: LlmRequest, events: mpsc::Sender<StreamEvent>) {
        if let Err(terminal) = self.run(request, &events).await {
            let _ = events.send(terminal).await;
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build an HttpProvider from the loaded configuration.
pub fn create_provider(config: &codehelm_core::config::Config) -> anyhow::Result<HttpProvider> {
    debug!(
        model = %config.agent.model,
        api_base = config.provider.api_base.as_deref().unwrap_or("default"),
        "Creating LLM provider"
    );
    HttpProvider::new(&config.provider, &config.agent.model)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LlmRequestConfig;
    use codehelm_core::types::{Message, ToolDefinition};
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            extra_headers: None,
        }
    }

    fn request(tools: Option<Vec<ToolDefinition>>) -> LlmRequest {
        LlmRequest {
            messages: vec![Message::system("You are Codehelm."), Message::user("Hello")],
            tools,
            model: "gpt-4o".into(),
            config: LlmRequestConfig::default(),
        }
    }

    async fn collect(provider: &HttpProvider, req: LlmRequest) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        provider.stream_chat(req, tx).await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url_trailing_slash() {
        let config = make_config("key", Some("https://api.openai.com/v1/"));
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();
        assert_eq!(
            provider.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_default_api_base_and_display_name() {
        let provider = HttpProvider::new(&make_config("key", None), "gpt-4o").unwrap();
        assert_eq!(provider.api_base, DEFAULT_API_BASE);
        assert_eq!(provider.display_name(), "api.openai.com");
    }

    #[test]
    fn test_is_configured_requires_key() {
        let provider = HttpProvider::new(&make_config("", None), "gpt-4o").unwrap();
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_extra_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-App-Code".to_string(), "my-app-code".to_string());
        let config = ProviderConfig {
            api_key: "key".to_string(),
            api_base: None,
            extra_headers: Some(headers),
        };
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();
        assert!(provider.extra_headers.contains_key("x-app-code"));
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_stream_sse_text_and_tool_call() {
        let mock_server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Let me look.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"list_directory\",\"arguments\":\"{\\\"path\\\":\\\".\\\"}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let provider =
            HttpProvider::new(&make_config("test-key-123", Some(&mock_server.uri())), "gpt-4o")
                .unwrap();
        let events = collect(&provider, request(None)).await;

        assert_eq!(events[0], StreamEvent::TextDelta("Let me look.".into()));
        match &events[1] {
            StreamEvent::ToolCall(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.function.name, "list_directory");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done { content: Some(c), .. }) if c == "Let me look."
        ));
    }

    #[tokio::test]
    async fn test_plain_json_response_is_translated() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-tools",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc123",
                            "type": "function",
                            "function": {
                                "name": "search_files",
                                "arguments": "{\"pattern\": \"fn main\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {
                    "prompt_tokens": 20,
                    "completion_tokens": 15,
                    "total_tokens": 35
                }
            })))
            .mount(&mock_server)
            .await;

        let provider =
            HttpProvider::new(&make_config("key", Some(&mock_server.uri())), "gpt-4o").unwrap();
        let tool_def = ToolDefinition::new(
            "search_files",
            "Search the workspace",
            serde_json::json!({"type": "object", "properties": {"pattern": {"type": "string"}}}),
        );
        let events = collect(&provider, request(Some(vec![tool_def]))).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::ToolCall(c) if c.id == "call_abc123"));
        assert!(matches!(
            &events[1],
            StreamEvent::Done { usage: Some(u), .. } if u.total_tokens == 35
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .mount(&mock_server)
            .await;

        let provider =
            HttpProvider::new(&make_config("key", Some(&mock_server.uri())), "gpt-4o").unwrap();
        let events = collect(&provider, request(None)).await;

        match events.as_slice() {
            [StreamEvent::Error { message, retryable }] => {
                assert!(message.contains("429"));
                assert!(*retryable);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retryable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .mount(&mock_server)
            .await;

        let provider =
            HttpProvider::new(&make_config("key", Some(&mock_server.uri())), "gpt-4o").unwrap();
        let events = collect(&provider, request(None)).await;

        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Error { retryable: false, .. }]
        ));
    }

    #[tokio::test]
    async fn test_network_error_is_reported() {
        // Point to a port that's not listening
        let provider =
            HttpProvider::new(&make_config("key", Some("http://127.0.0.1:1")), "gpt-4o").unwrap();
        let events = collect(&provider, request(None)).await;

        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Error { message, retryable: true }] if message.contains("Error calling LLM")
        ));
    }
}
