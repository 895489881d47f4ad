//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentSettings`, `ProviderConfig`, `AutoApproveConfig`,
//! `LoopDetectionConfig`, `CompressionConfig`, `ToolsConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.codehelm/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentSettings,
    pub provider: ProviderConfig,
    pub approval: AutoApproveConfig,
    pub loop_detection: LoopDetectionConfig,
    pub compression: CompressionConfig,
    pub tools: ToolsConfig,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// How tool calls travel between the model and the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallFormat {
    /// Provider-native function calling.
    #[default]
    Native,
    /// Tagged `<tool_call>` blocks embedded in the text stream.
    Inline,
}

/// Orchestrator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Default workspace directory.
    pub workspace: String,
    /// LLM model identifier.
    pub model: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Maximum LLM rounds that may request tools in one run.
    pub max_tool_rounds: u32,
    /// Upper bound on a single LLM round trip.
    pub request_timeout_secs: u64,
    /// Retries for a failed LLM round when the failure is retryable.
    pub llm_max_retries: u32,
    pub tool_call_format: ToolCallFormat,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            workspace: ".".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 8192,
            temperature: 0.2,
            max_tool_rounds: 15,
            request_timeout_secs: 120,
            llm_max_retries: 2,
            tool_call_format: ToolCallFormat::Native,
        }
    }
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// Configuration for the LLM endpoint (API key, base URL, headers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Custom API base URL (defaults to the OpenAI endpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Approval
// ─────────────────────────────────────────────

/// Per-category auto-approval switches. `true` skips the approval prompt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoApproveConfig {
    pub edits: bool,
    pub terminal: bool,
    pub dangerous: bool,
}

impl AutoApproveConfig {
    /// Auto-approve everything (the CLI's `--yes`).
    pub fn all() -> Self {
        Self {
            edits: true,
            terminal: true,
            dangerous: true,
        }
    }
}

// ─────────────────────────────────────────────
// Loop detection
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopDetectionConfig {
    pub enabled: bool,
    /// Prior matching calls that constitute a loop.
    pub threshold: usize,
    /// Size of the rolling signature history.
    pub window_size: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 2,
            window_size: 20,
        }
    }
}

// ─────────────────────────────────────────────
// Context compression
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Estimated tokens above which older turns are summarized.
    pub threshold_tokens: usize,
    /// User/assistant exchanges kept verbatim at the tail.
    pub keep_recent_exchanges: usize,
    /// Divisor of the character-based token heuristic.
    pub chars_per_token: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_tokens: 24_000,
            keep_recent_exchanges: 3,
            chars_per_token: 4,
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Timeout for tools that do not declare one.
    pub default_timeout_secs: u64,
    /// Transient-failure retries for tools that do not declare a count.
    pub default_max_retries: u32,
    /// Restrict file tools to the workspace directory.
    pub restrict_to_workspace: bool,
    pub exec_timeout_secs: u64,
    /// File checkpoints kept for `/undo`; the oldest are dropped first.
    pub max_checkpoints: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            default_max_retries: 1,
            restrict_to_workspace: true,
            exec_timeout_secs: 60,
            max_checkpoints: 50,
        }
    }
}
