//! Context compressor — keeps the running conversation under a token budget.
//!
//! History is split at an exchange boundary: the last N user turns (and
//! everything after them) stay verbatim, everything before is replaced by
//! a single marked summary message. When there are too few user turns,
//! as in a long tool loop from one request, the split falls between
//! assistant rounds instead and the latest request is kept verbatim. A
//! previous summary is never fed back to the summarizer; new material is
//! summarized on its own and appended.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use codehelm_core::config::CompressionConfig;
use codehelm_core::run::CompressionLevel;
use codehelm_core::types::Message;

use crate::summarizer::{ExtractiveSummarizer, Summarizer};

/// First line of every summary message.
pub const SUMMARY_MARKER: &str = "[Conversation summary: earlier turns condensed]";

/// Fixed per-message cost for role and framing.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Result of the latest compression pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompressionState {
    pub estimated_tokens: usize,
    pub level: CompressionLevel,
    /// Index of the first message kept verbatim.
    pub boundary: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionOutcome {
    pub state: CompressionState,
    pub tokens_before: usize,
    /// Whether the history was rewritten.
    pub applied: bool,
}

pub fn is_summary(msg: &Message) -> bool {
    matches!(msg, Message::System { content } if content.starts_with(SUMMARY_MARKER))
}

/// User messages that open an exchange (inline tool results do not).
fn starts_exchange(msg: &Message) -> bool {
    matches!(msg, Message::User { content } if !content.starts_with("<tool_result"))
}

pub struct ContextCompressor {
    config: CompressionConfig,
    summarizer: Arc<dyn Summarizer>,
    /// Longest wait for the summarizer before the extractive fallback.
    summary_timeout: Option<Duration>,
}

impl ContextCompressor {
    pub fn new(config: CompressionConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            summarizer,
            summary_timeout: None,
        }
    }

    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout = Some(timeout);
        self
    }

    // ── Estimation ──

    /// Character heuristic: `ceil(chars / chars_per_token)` plus overhead.
    pub fn estimate_message_tokens(&self, msg: &Message) -> usize {
        let mut chars = msg.text().chars().count();
        if let Message::Assistant {
            reasoning_content: Some(reasoning),
            ..
        } = msg
        {
            chars += reasoning.chars().count();
        }
        for call in msg.tool_calls() {
            chars += call.function.name.chars().count() + call.function.arguments.chars().count();
        }
        chars.div_ceil(self.config.chars_per_token.max(1)) + MESSAGE_OVERHEAD_TOKENS
    }

    pub fn estimate_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message_tokens(m)).sum()
    }

    /// Level chosen by how far `tokens` is over the threshold.
    pub fn level_for(&self, tokens: usize) -> CompressionLevel {
        let threshold = self.config.threshold_tokens.max(1);
        if !self.config.enabled || tokens <= threshold {
            return CompressionLevel::None;
        }
        let ratio = tokens as f64 / threshold as f64;
        if ratio <= 1.5 {
            CompressionLevel::Light
        } else if ratio <= 2.0 {
            CompressionLevel::Moderate
        } else {
            CompressionLevel::Aggressive
        }
    }

    /// Index where the verbatim tail starts.
    ///
    /// Never lands between an assistant turn and its tool results: both
    /// exchange starts and round starts sit before an assistant message's
    /// results.
    pub fn boundary(&self, messages: &[Message]) -> usize {
        let keep = self.config.keep_recent_exchanges.max(1);
        let starts: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| starts_exchange(m))
            .map(|(i, _)| i)
            .collect();
        if starts.len() > keep {
            return starts[starts.len() - keep];
        }

        // Too few exchanges: count assistant rounds after the latest request.
        let from = starts.last().map_or(0, |i| i + 1);
        let rounds: Vec<usize> = messages
            .iter()
            .enumerate()
            .skip(from)
            .filter(|(_, m)| matches!(m, Message::Assistant { .. }))
            .map(|(i, _)| i)
            .collect();
        if rounds.len() > keep {
            return rounds[rounds.len() - keep];
        }
        messages.iter().take_while(|m| is_summary(m)).count()
    }

    pub fn state(&self, messages: &[Message]) -> CompressionState {
        let tokens = self.estimate_tokens(messages);
        CompressionState {
            estimated_tokens: tokens,
            level: self.level_for(tokens),
            boundary: self.boundary(messages),
        }
    }

    // ── Compression ──

    /// Compress `messages` in place if they are over budget.
    pub async fn compress(&self, messages: &mut Vec<Message>) -> CompressionOutcome {
        let before = self.state(messages);
        let unchanged = CompressionOutcome {
            state: before.clone(),
            tokens_before: before.estimated_tokens,
            applied: false,
        };
        if before.level == CompressionLevel::None {
            return unchanged;
        }

        let boundary = before.boundary;
        // A split inside the latest exchange keeps its request verbatim.
        let pinned = messages
            .iter()
            .rposition(starts_exchange)
            .filter(|&i| i < boundary);
        let previous: Vec<&Message> = messages[..boundary].iter().filter(|m| is_summary(m)).collect();
        let fresh: Vec<Message> = messages[..boundary]
            .iter()
            .enumerate()
            .filter(|(i, m)| !is_summary(m) && Some(*i) != pinned)
            .map(|(_, m)| m.clone())
            .collect();
        if fresh.is_empty() {
            return unchanged;
        }

        let summary = match self.summarize(&fresh, before.level).await {
            Ok(s) => s,
            Err(e) => {
                warn!(summarizer = self.summarizer.name(), error = %e, "summarizer failed; using extractive summary");
                ExtractiveSummarizer
                    .summarize(&fresh, before.level)
                    .await
                    .unwrap_or_default()
            }
        };

        let mut body: Vec<String> = previous
            .iter()
            .map(|m| m.text().trim_start_matches(SUMMARY_MARKER).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        body.push(summary.trim().to_string());
        let summary_msg = Message::system(format!("{SUMMARY_MARKER}\n{}", body.join("\n\n")));

        let tail = messages.split_off(boundary);
        let request = pinned.map(|i| messages[i].clone());
        messages.clear();
        messages.push(summary_msg);
        messages.extend(request);
        messages.extend(tail);

        let after = CompressionState {
            estimated_tokens: self.estimate_tokens(messages),
            level: before.level,
            boundary: 1,
        };
        info!(
            level = ?after.level,
            summarized = fresh.len(),
            tokens_before = before.estimated_tokens,
            tokens_after = after.estimated_tokens,
            "context compressed"
        );
        CompressionOutcome {
            state: after,
            tokens_before: before.estimated_tokens,
            applied: true,
        }
    }

    async fn summarize(&self, fresh: &[Message], level: CompressionLevel) -> anyhow::Result<String> {
        match self.summary_timeout {
            Some(limit) => tokio::time::timeout(limit, self.summarizer.summarize(fresh, level))
                .await
                .map_err(|_| anyhow::anyhow!("summary timed out after {}s", limit.as_secs()))?,
            None => self.summarizer.summarize(fresh, level).await,
        }
    }
}
