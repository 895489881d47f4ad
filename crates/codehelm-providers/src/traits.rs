//! LLM Provider trait — the streaming contract the orchestrator drives.
//!
//! A provider pushes `StreamEvent`s into an mpsc channel: any number of
//! text/reasoning deltas and complete tool calls, then exactly one terminal
//! `Done` or `Error`. Cancellation is the caller's business: dropping the
//! `stream_chat` future stops the request.

use async_trait::async_trait;
use tokio::sync::mpsc;

use codehelm_core::types::{Message, StreamEvent, ToolDefinition};

/// Configuration passed to each LLM call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// One LLM round trip.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    /// `None` when tools are described in the prompt instead.
    pub tools: Option<Vec<ToolDefinition>>,
    pub model: String,
    pub config: LlmRequestConfig,
}

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream one chat completion into `events`.
    ///
    /// Failures are reported as a terminal `StreamEvent::Error`, never as a
    /// panic or a silently closed channel.
    async fn stream_chat(&self, request: LlmRequest, events: mpsc::Sender<StreamEvent>);

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool {
        true
    }

    /// Run a request to completion and return the final text.
    async fn complete(&self, request: LlmRequest) -> anyhow::Result<String> {
        let (tx, mut rx) = mpsc::channel(64);
        let collect = async move {
            let mut text = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta(delta) => text.push_str(&delta),
                    StreamEvent::Done { content, .. } => {
                        if text.is_empty() {
                            text = content.unwrap_or_default();
                        }
                        return Ok(text);
                    }
                    StreamEvent::Error { message, .. } => anyhow::bail!(message),
                    StreamEvent::ReasoningDelta(_) | StreamEvent::ToolCall(_) => {}
                }
            }
            anyhow::bail!("stream closed before completion")
        };
        let ((), result) = tokio::join!(self.stream_chat(request, tx), collect);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Vec<StreamEvent>);

    #[async_trait]
    impl LlmProvider for Canned {
        async fn stream_chat(&self, _request: LlmRequest, events: mpsc::Sender<StreamEvent>) {
            for ev in self.0.clone() {
                let _ = events.send(ev).await;
            }
        }

        fn default_model(&self) -> &str {
            "canned"
        }

        fn display_name(&self) -> &str {
            "Canned"
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            messages: vec![Message::user("hi")],
            tools: None,
            model: "canned".into(),
            config: LlmRequestConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_complete_joins_deltas() {
        let provider = Canned(vec![
            StreamEvent::TextDelta("Hel".into()),
            StreamEvent::TextDelta("lo".into()),
            StreamEvent::Done { content: None, usage: None },
        ]);
        assert_eq!(provider.complete(request()).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_complete_uses_final_content_without_deltas() {
        let provider = Canned(vec![StreamEvent::Done {
            content: Some("whole".into()),
            usage: None,
        }]);
        assert_eq!(provider.complete(request()).await.unwrap(), "whole");
    }

    #[tokio::test]
    async fn test_complete_surfaces_errors() {
        let provider = Canned(vec![StreamEvent::Error {
            message: "rate limited".into(),
            retryable: true,
        }]);
        let err = provider.complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_complete_rejects_truncated_stream() {
        let provider = Canned(vec![StreamEvent::TextDelta("partial".into())]);
        assert!(provider.complete(request()).await.is_err());
    }
}
