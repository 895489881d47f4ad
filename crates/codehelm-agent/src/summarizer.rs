//! Summarizers used by the context compressor.
//!
//! A summarizer turns a run of older messages into one structured text
//! block. `LlmSummarizer` asks the configured provider; the
//! `ExtractiveSummarizer` is deterministic and is the fallback when the
//! LLM call fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use codehelm_core::run::CompressionLevel;
use codehelm_core::types::Message;
use codehelm_core::utils::truncate_string;
use codehelm_providers::{LlmProvider, LlmRequest, LlmRequestConfig};

use crate::loop_detector::key_argument;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages`; `level` says how terse to be.
    async fn summarize(&self, messages: &[Message], level: CompressionLevel) -> anyhow::Result<String>;

    fn name(&self) -> &str;
}

/// Per-message excerpt length in the transcript sent for summarization.
fn excerpt_len(level: CompressionLevel) -> usize {
    match level {
        CompressionLevel::None | CompressionLevel::Light => 2_000,
        CompressionLevel::Moderate => 1_000,
        CompressionLevel::Aggressive => 400,
    }
}

fn render_transcript(messages: &[Message], level: CompressionLevel) -> String {
    let limit = excerpt_len(level);
    let mut out = String::new();
    for msg in messages {
        let text = msg.text();
        if !text.is_empty() {
            out.push_str(&format!("[{}] {}\n", msg.role(), truncate_string(text, limit)));
        }
        for call in msg.tool_calls() {
            out.push_str(&format!(
                "[tool call] {}({})\n",
                call.function.name,
                truncate_string(&call.function.arguments, 200)
            ));
        }
    }
    out
}

// ─────────────────────────────────────────────
// LLM summarizer
// ─────────────────────────────────────────────

const SUMMARY_SYSTEM_PROMPT: &str = "You compress coding-agent conversations. \
Write a summary with exactly these sections:\n\
## Files changed\n## Decisions\n## Open threads\n\
Use short bullet points. Keep file paths, identifiers and error messages verbatim. \
Do not invent anything that is not in the transcript.";

pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message], level: CompressionLevel) -> anyhow::Result<String> {
        let brevity = match level {
            CompressionLevel::Aggressive => "Be extremely brief: at most 10 bullets in total.",
            CompressionLevel::Moderate => "Be concise.",
            _ => "Be thorough but skip small talk.",
        };
        let request = LlmRequest {
            messages: vec![
                Message::system(SUMMARY_SYSTEM_PROMPT),
                Message::user(format!(
                    "{brevity}\n\nTranscript:\n{}",
                    render_transcript(messages, level)
                )),
            ],
            tools: None,
            model: self.model.clone(),
            config: LlmRequestConfig {
                max_tokens: 1024,
                temperature: 0.0,
            },
        };
        debug!(messages = messages.len(), level = ?level, "requesting LLM summary");
        let summary = self.provider.complete(request).await?;
        if summary.trim().is_empty() {
            anyhow::bail!("summarizer returned an empty summary");
        }
        Ok(summary.trim().to_string())
    }

    fn name(&self) -> &str {
        "llm"
    }
}

// ─────────────────────────────────────────────
// Extractive summarizer
// ─────────────────────────────────────────────

/// Deterministic summary built from message structure alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, messages: &[Message], level: CompressionLevel) -> anyhow::Result<String> {
        let mut files: Vec<String> = Vec::new();
        let mut tools: BTreeMap<String, usize> = BTreeMap::new();
        let mut requests: Vec<String> = Vec::new();
        let mut conclusion: Option<&str> = None;

        for msg in messages {
            match msg {
                Message::User { content } if !content.starts_with("<tool_result") => {
                    requests.push(truncate_string(content.trim(), 200));
                }
                Message::Assistant { content, .. } => {
                    for call in msg.tool_calls() {
                        *tools.entry(call.function.name.clone()).or_default() += 1;
                        let args = serde_json::from_str(&call.function.arguments)
                            .unwrap_or(serde_json::Value::Null);
                        if let Some(target) = key_argument(&args) {
                            if !files.contains(&target) {
                                files.push(target);
                            }
                        }
                    }
                    if let Some(text) = content.as_deref().filter(|t| !t.trim().is_empty()) {
                        conclusion = Some(text);
                    }
                }
                _ => {}
            }
        }

        let mut out = String::from("## Files changed\n");
        if files.is_empty() {
            out.push_str("- none\n");
        }
        for f in &files {
            out.push_str(&format!("- {f}\n"));
        }

        out.push_str("## Decisions\n");
        if tools.is_empty() {
            out.push_str("- no tools used\n");
        } else {
            let used: Vec<String> = tools.iter().map(|(name, n)| format!("{name} x{n}")).collect();
            out.push_str(&format!("- tools used: {}\n", used.join(", ")));
        }
        let keep = if level >= CompressionLevel::Aggressive { 2 } else { 5 };
        let skip = requests.len().saturating_sub(keep);
        for req in requests.iter().skip(skip) {
            out.push_str(&format!("- user asked: {req}\n"));
        }

        out.push_str("## Open threads\n");
        match conclusion {
            Some(text) => out.push_str(&format!("- last assistant note: {}\n", truncate_string(text.trim(), 300))),
            None => out.push_str("- none recorded\n"),
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "extractive"
    }
}
