//! Tool metadata — category, approval requirement, timeout, retry policy.

use std::time::Duration;

use codehelm_core::run::ApprovalType;

/// Tools that change the workspace even when their category says otherwise.
pub const MUTATING_TOOLS: &[&str] = &["edit_file", "write_file", "run_command"];

/// Closed set of tool categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    Read,
    Write,
    Terminal,
    Search,
    Lsp,
}

impl ToolCategory {
    /// Read/search/lsp tools may run concurrently with each other.
    pub fn is_parallel_safe(&self) -> bool {
        match self {
            ToolCategory::Read | ToolCategory::Search | ToolCategory::Lsp => true,
            ToolCategory::Write | ToolCategory::Terminal => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Write => "write",
            ToolCategory::Terminal => "terminal",
            ToolCategory::Search => "search",
            ToolCategory::Lsp => "lsp",
        }
    }
}

/// Transient-failure policy for one tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// `false` means a failure ends the run instead of going back to the LLM.
    pub retryable: bool,
    /// Re-runs after a timeout before giving up.
    pub max_retries: u32,
}

/// Resolved, immutable view of a registered tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolMetadata {
    pub name: String,
    pub category: ToolCategory,
    pub approval: ApprovalType,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub mutating: bool,
}

impl ToolMetadata {
    /// Whether this tool may be dispatched alongside other parallel-safe tools.
    pub fn is_parallel_safe(&self) -> bool {
        self.category.is_parallel_safe() && !self.mutating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_safe_categories() {
        assert!(ToolCategory::Read.is_parallel_safe());
        assert!(ToolCategory::Search.is_parallel_safe());
        assert!(ToolCategory::Lsp.is_parallel_safe());
        assert!(!ToolCategory::Write.is_parallel_safe());
        assert!(!ToolCategory::Terminal.is_parallel_safe());
    }

    #[test]
    fn test_mutating_overrides_category() {
        let meta = ToolMetadata {
            name: "write_file".into(),
            category: ToolCategory::Read,
            approval: ApprovalType::Edits,
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                retryable: true,
                max_retries: 0,
            },
            mutating: true,
        };
        assert!(!meta.is_parallel_safe());
    }
}
