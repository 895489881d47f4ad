//! Classified error types shared across the workspace.
//!
//! Tool implementations and application glue use `anyhow`; these enums are
//! the points where the orchestrator needs to *branch* on what went wrong.

use std::fmt;

use thiserror::Error;

/// One schema violation, addressed by a JSON-pointer-like field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldIssue {
    /// Path to the offending field (`"path"`, `"edits[2].line"`, or `""` for the root).
    pub path: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a single tool call failed.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Invalid arguments for '{tool}': {}", join_issues(.issues))]
    Validation { tool: String, issues: Vec<FieldIssue> },

    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Checkpoint before '{tool}' failed: {reason}")]
    Checkpoint { tool: String, reason: String },
}

impl ToolError {
    /// Whether the executor may transparently re-run the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

/// Errors returned by `Agent::send` before a run starts.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("A run is already in progress")]
    RunInProgress,

    #[error("LLM provider '{0}' has no credentials configured")]
    NotConfigured(String),
}

/// Errors raised by the approval gate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("Approval for '{pending}' is already outstanding")]
    SlotOccupied { pending: String },
}

/// Errors raised while persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_field() {
        let err = ToolError::Validation {
            tool: "edit_file".into(),
            issues: vec![
                FieldIssue::new("path", "missing required field"),
                FieldIssue::new("old_text", "expected string, got number"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("edit_file"));
        assert!(msg.contains("path: missing required field"));
        assert!(msg.contains("old_text: expected string, got number"));
    }

    #[test]
    fn test_root_issue_has_no_path_prefix() {
        let issue = FieldIssue::new("", "arguments must be an object");
        assert_eq!(issue.to_string(), "arguments must be an object");
    }

    #[test]
    fn test_only_timeouts_are_transient() {
        assert!(ToolError::Timeout { tool: "t".into(), secs: 1 }.is_transient());
        assert!(!ToolError::NotFound("t".into()).is_transient());
        assert!(!ToolError::Checkpoint {
            tool: "t".into(),
            reason: "disk full".into()
        }
        .is_transient());
    }
}
