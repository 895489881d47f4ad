//! Tool trait — the abstract interface every agent tool must implement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use codehelm_core::error::FieldIssue;
use codehelm_core::run::ApprovalType;
use codehelm_core::types::ToolDefinition;
use codehelm_core::utils::normalize_path;

use super::metadata::ToolCategory;

// ─────────────────────────────────────────────
// Execution context
// ─────────────────────────────────────────────

/// Where and on whose behalf a tool runs.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Workspace root; relative paths resolve against it.
    pub workspace: PathBuf,
    /// Id of the assistant turn that requested the call.
    pub turn_id: String,
    /// Refuse paths that escape `workspace`.
    pub restrict_to_workspace: bool,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>, turn_id: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            turn_id: turn_id.into(),
            restrict_to_workspace: true,
        }
    }

    pub fn with_restriction(mut self, restrict: bool) -> Self {
        self.restrict_to_workspace = restrict;
        self
    }

    fn workspace_root(&self) -> PathBuf {
        self.workspace
            .canonicalize()
            .unwrap_or_else(|_| normalize_path(&self.workspace))
    }

    /// Resolve a user-supplied path against the workspace.
    ///
    /// Returns `Err` if restriction is on and the path lands outside the
    /// workspace (after `..` folding and symlink resolution).
    pub fn resolve_path(&self, raw: &str) -> anyhow::Result<PathBuf> {
        let root = self.workspace_root();
        let expanded = codehelm_core::utils::expand_home(raw);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        };
        let resolved = canonicalize_lenient(&normalize_path(&joined));

        if self.restrict_to_workspace && !resolved.starts_with(&root) {
            anyhow::bail!(
                "Access denied: path '{}' is outside the workspace '{}'",
                resolved.display(),
                root.display()
            );
        }
        Ok(resolved)
    }

    /// Display a path relative to the workspace when possible.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.workspace_root())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

/// Canonicalize if the path exists; otherwise canonicalize the parent so
/// files that are about to be created still resolve through symlinks.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => canonicalize_lenient(parent).join(name),
        _ => path.to_path_buf(),
    }
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The registry consults the metadata methods on every policy lookup;
/// the executor dispatches calls via `execute()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the LLM to call this tool (e.g. `"read_file"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    fn category(&self) -> ToolCategory;

    /// Consent required before this tool runs.
    fn approval(&self) -> ApprovalType {
        ApprovalType::None
    }

    /// Consent required for one specific call. Tools override this to
    /// escalate risky arguments (e.g. destructive shell commands).
    fn approval_for(&self, _params: &HashMap<String, Value>) -> ApprovalType {
        self.approval()
    }

    /// Argument checks beyond the schema, run during validation and so
    /// before any approval prompt.
    fn check_arguments(&self, _params: &HashMap<String, Value>) -> Vec<FieldIssue> {
        Vec::new()
    }

    /// `None` falls back to the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// `None` falls back to the registry default.
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// Whether a failure may be handed back to the LLM.
    fn retryable(&self) -> bool {
        true
    }

    /// Execute the tool with validated arguments.
    ///
    /// Returns the tool output as a string (the LLM reads this).
    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String>;

    /// Build the `ToolDefinition` sent to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required `String` param, returning a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional `String` param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Extract an optional boolean param (defaults to `false` if absent).
pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string_present_and_missing() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!("src/main.rs"));
        assert_eq!(require_string(&params, "path").unwrap(), "src/main.rs");
        assert!(require_string(&params, "other").is_err());
    }

    #[test]
    fn test_require_string_wrong_type() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!(42));
        assert!(require_string(&params, "path").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let mut params = HashMap::new();
        params.insert("count".into(), json!(5));
        params.insert("force".into(), json!(true));
        assert_eq!(optional_i64(&params, "count"), Some(5));
        assert!(optional_bool(&params, "force"));
        assert!(!optional_bool(&params, "missing"));
        assert_eq!(optional_string(&params, "missing"), None);
    }

    #[test]
    fn test_resolve_relative_path_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "turn-1");
        let resolved = ctx.resolve_path("src/new.rs").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("src/new.rs"));
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "turn-1");
        let err = ctx.resolve_path("../outside.txt").unwrap_err();
        assert!(err.to_string().contains("outside the workspace"));
    }

    #[test]
    fn test_resolve_unrestricted_allows_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "turn-1").with_restriction(false);
        assert!(ctx.resolve_path("/etc/hostname").is_ok());
    }

    #[test]
    fn test_display_path_is_workspace_relative() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "turn-1");
        let p = ctx.resolve_path("a/b.txt").unwrap();
        assert_eq!(ctx.display_path(&p), "a/b.txt");
    }

    #[tokio::test]
    async fn test_to_definition_default() {
        struct DummyTool;

        #[async_trait]
        impl Tool for DummyTool {
            fn name(&self) -> &str { "dummy" }
            fn description(&self) -> &str { "A test tool" }
            fn parameters(&self) -> Value {
                json!({
                    "type": "object",
                    "properties": { "msg": { "type": "string" } },
                    "required": ["msg"]
                })
            }
            fn category(&self) -> ToolCategory { ToolCategory::Read }
            async fn execute(&self, _params: HashMap<String, Value>, _ctx: &ToolContext) -> anyhow::Result<String> {
                Ok("ok".into())
            }
        }

        let def = DummyTool.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
        assert_eq!(DummyTool.approval(), ApprovalType::None);
        assert!(DummyTool.retryable());
    }
}
