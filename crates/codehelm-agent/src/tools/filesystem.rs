//! Filesystem tools — read, write, edit, list directory.
//!
//! Paths resolve against the run's workspace (`ToolContext`); when the
//! context is restricted, anything outside it is refused.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use codehelm_core::run::ApprovalType;

use super::base::{optional_i64, require_string, Tool, ToolContext};
use super::metadata::ToolCategory;

/// Largest file `read_file` returns in full (characters).
const MAX_READ_CHARS: usize = 100_000;

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

/// Reads a file, optionally a line window of it.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Optionally pass `start_line` (1-based) and \
         `line_count` to read a window of a large file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace root"
                },
                "start_line": { "type": "integer", "minimum": 1 },
                "line_count": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let path = ctx.resolve_path(&path_str)?;

        if !path.exists() {
            anyhow::bail!("File not found: {}", ctx.display_path(&path));
        }
        if !path.is_file() {
            anyhow::bail!("Not a file: {}", ctx.display_path(&path));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", ctx.display_path(&path)))?;

        let start = optional_i64(&params, "start_line");
        let count = optional_i64(&params, "line_count");
        if start.is_none() && count.is_none() {
            if content.chars().count() > MAX_READ_CHARS {
                let head: String = content.chars().take(MAX_READ_CHARS).collect();
                return Ok(format!(
                    "{head}\n... (truncated; use start_line/line_count to read the rest)"
                ));
            }
            return Ok(content);
        }

        let skip = start.unwrap_or(1).max(1) as usize - 1;
        let take = count.map(|c| c.max(1) as usize).unwrap_or(usize::MAX);
        let window: Vec<String> = content
            .lines()
            .enumerate()
            .skip(skip)
            .take(take)
            .map(|(i, line)| format!("{:>5} | {line}", i + 1))
            .collect();
        if window.is_empty() {
            anyhow::bail!(
                "start_line {} is past the end of {} ({} lines)",
                skip + 1,
                ctx.display_path(&path),
                content.lines().count()
            );
        }
        Ok(window.join("\n"))
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

/// Creates or overwrites a file with the given content.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if it doesn't exist or overwriting if it does. \
         Parent directories are created automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path for the file, relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    fn approval(&self) -> ApprovalType {
        ApprovalType::Edits
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let path = ctx.resolve_path(&path_str)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                anyhow::anyhow!("Failed to create directory {}: {e}", parent.display())
            })?;
        }

        let bytes = content.len();
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", ctx.display_path(&path)))?;
        Ok(format!(
            "Successfully wrote {bytes} bytes to {}",
            ctx.display_path(&path)
        ))
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

/// Replaces a text snippet within a file.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing `old_text` with `new_text`. `old_text` must match \
         exactly once unless `replace_all` is true; include surrounding context to make it unique."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "old_text": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Exact text to find"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": { "type": "boolean" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    fn approval(&self) -> ApprovalType {
        ApprovalType::Edits
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        let replace_all = params
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let path = ctx.resolve_path(&path_str)?;
        let shown = ctx.display_path(&path);

        if !path.is_file() {
            anyhow::bail!("File not found: {shown}");
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {shown}: {e}"))?;

        let count = content.matches(&old_text).count();
        if count == 0 {
            anyhow::bail!("old_text not found in {shown}");
        }
        if count > 1 && !replace_all {
            anyhow::bail!(
                "old_text appears {count} times in {shown}; add context to make it unique or set replace_all"
            );
        }

        let updated = if replace_all {
            content.replace(&old_text, &new_text)
        } else {
            content.replacen(&old_text, &new_text, 1)
        };
        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {shown}: {e}"))?;

        Ok(format!("Successfully edited {shown} ({count} replacement(s))"))
    }
}

// ─────────────────────────────────────────────
// ListDirectoryTool
// ─────────────────────────────────────────────

/// Lists the contents of a directory.
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a directory. Directories are marked with a trailing `/`."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (defaults to the workspace root)"
                }
            },
            "required": []
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let path_str = params
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let path = ctx.resolve_path(&path_str)?;

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", ctx.display_path(&path));
        }

        let mut dir_entries: Vec<_> = std::fs::read_dir(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read directory {}: {e}", path.display()))?
            .filter_map(|e| e.ok())
            .collect();
        dir_entries.sort_by_key(|e| e.file_name());

        let entries: Vec<String> = dir_entries
            .iter()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if is_dir {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();

        if entries.is_empty() {
            Ok("(empty directory)".into())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(dir.path(), "turn-test")
    }

    // ── ReadFileTool ──

    #[tokio::test]
    async fn test_read_file_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "Hello, Codehelm!").unwrap();

        let result = ReadFileTool
            .execute(make_params(&[("path", json!("hello.txt"))]), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(result, "Hello, Codehelm!");
    }

    #[tokio::test]
    async fn test_read_file_line_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\nfour").unwrap();

        let result = ReadFileTool
            .execute(
                make_params(&[
                    ("path", json!("f.txt")),
                    ("start_line", json!(2)),
                    ("line_count", json!(2)),
                ]),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(result, "    2 | two\n    3 | three");
    }

    #[tokio::test]
    async fn test_read_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(make_params(&[("path", json!("missing.txt"))]), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_read_outside_workspace_denied() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(make_params(&[("path", json!("../../etc/passwd"))]), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    // ── WriteFileTool ──

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let result = WriteFileTool
            .execute(
                make_params(&[("path", json!("a/b/c.txt")), ("content", json!("deep"))]),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert!(result.contains("4 bytes"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(),
            "deep"
        );
    }

    // ── EditFileTool ──

    #[tokio::test]
    async fn test_edit_replaces_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Helo world\n").unwrap();

        EditFileTool
            .execute(
                make_params(&[
                    ("path", json!("README.md")),
                    ("old_text", json!("Helo")),
                    ("new_text", json!("Hello")),
                ]),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "# Hello world\n"
        );
    }

    #[tokio::test]
    async fn test_edit_ambiguous_match_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.rs"), "a a").unwrap();

        let err = EditFileTool
            .execute(
                make_params(&[
                    ("path", json!("x.rs")),
                    ("old_text", json!("a")),
                    ("new_text", json!("b")),
                ]),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("appears 2 times"));
    }

    #[tokio::test]
    async fn test_edit_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.rs"), "a a").unwrap();

        EditFileTool
            .execute(
                make_params(&[
                    ("path", json!("x.rs")),
                    ("old_text", json!("a")),
                    ("new_text", json!("b")),
                    ("replace_all", json!(true)),
                ]),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("x.rs")).unwrap(), "b b");
    }

    // ── ListDirectoryTool ──

    #[tokio::test]
    async fn test_list_directory_marks_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();

        let result = ListDirectoryTool
            .execute(HashMap::new(), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(result, "Cargo.toml\nsrc/");
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = ListDirectoryTool
            .execute(make_params(&[("path", json!("."))]), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(result, "(empty directory)");
    }

    #[test]
    fn test_categories_and_approval() {
        assert_eq!(ReadFileTool.category(), ToolCategory::Read);
        assert_eq!(ListDirectoryTool.approval(), ApprovalType::None);
        assert_eq!(WriteFileTool.approval(), ApprovalType::Edits);
        assert_eq!(EditFileTool.category(), ToolCategory::Write);
    }
}
