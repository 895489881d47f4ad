//! Workspace search — regex over file contents.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::{DirEntry, WalkDir};

use super::base::{optional_bool, optional_i64, optional_string, require_string, Tool, ToolContext};
use super::metadata::ToolCategory;

const DEFAULT_MAX_RESULTS: usize = 100;

/// Files above this size are skipped (bytes).
const MAX_FILE_BYTES: u64 = 1_000_000;

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "dist", "build"];

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Searches file contents with a regular expression.
pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents in the workspace with a regular expression. \
         Returns `path:line: text` for each match."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (defaults to the workspace root)"
                },
                "file_extension": {
                    "type": "string",
                    "description": "Only search files with this extension, e.g. `rs`"
                },
                "case_sensitive": { "type": "boolean" },
                "max_results": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let root = ctx.resolve_path(&optional_string(&params, "path").unwrap_or_else(|| ".".into()))?;
        let extension = optional_string(&params, "file_extension")
            .map(|e| e.trim_start_matches('.').to_string());
        let max_results = optional_i64(&params, "max_results")
            .map(|n| n.max(1) as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let regex = RegexBuilder::new(&query)
            .case_insensitive(!optional_bool(&params, "case_sensitive"))
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid regex '{query}': {e}"))?;

        let ctx = ctx.clone();
        // Walking a large tree is blocking work.
        tokio::task::spawn_blocking(move || {
            let mut hits = Vec::new();
            let mut truncated = false;

            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_skipped_dir(e));

            'files: for entry in walker.filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(ext) = &extension {
                    if entry.path().extension().and_then(|e| e.to_str()) != Some(ext.as_str()) {
                        continue;
                    }
                }
                if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                    continue;
                }
                // Binary and non-UTF-8 files fail here and are skipped.
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                for (idx, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        if hits.len() >= max_results {
                            truncated = true;
                            break 'files;
                        }
                        hits.push(format!(
                            "{}:{}: {}",
                            ctx.display_path(entry.path()),
                            idx + 1,
                            line.trim()
                        ));
                    }
                }
            }

            if hits.is_empty() {
                return Ok(format!("No matches for '{query}'"));
            }
            let mut out = hits.join("\n");
            if truncated {
                out.push_str(&format!("\n... (stopped after {max_results} matches)"));
            }
            Ok(out)
        })
        .await
        .map_err(|e| anyhow::anyhow!("search task failed: {e}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {\n    println!(\"hi\");\n}\n").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn helper() {}\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "fn in prose\n").unwrap();
        std::fs::write(dir.path().join("target/gen.rs"), "fn generated() {}\n").unwrap();
        dir
    }

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_search_finds_matches_and_skips_target() {
        let dir = setup();
        let ctx = ToolContext::new(dir.path(), "t");
        let out = SearchFilesTool
            .execute(params(&[("query", json!(r"fn \w+\("))]), &ctx)
            .await
            .unwrap();
        assert!(out.contains("src/main.rs:1: fn main() {"));
        assert!(out.contains("src/lib.rs:1: pub fn helper() {}"));
        assert!(!out.contains("generated"));
    }

    #[tokio::test]
    async fn test_search_extension_filter() {
        let dir = setup();
        let ctx = ToolContext::new(dir.path(), "t");
        let out = SearchFilesTool
            .execute(
                params(&[("query", json!("fn")), ("file_extension", json!("md"))]),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out, "notes.md:1: fn in prose");
    }

    #[tokio::test]
    async fn test_search_max_results() {
        let dir = setup();
        let ctx = ToolContext::new(dir.path(), "t");
        let out = SearchFilesTool
            .execute(
                params(&[("query", json!("fn")), ("max_results", json!(1))]),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.contains("stopped after 1 matches"));
    }

    #[tokio::test]
    async fn test_search_no_matches() {
        let dir = setup();
        let ctx = ToolContext::new(dir.path(), "t");
        let out = SearchFilesTool
            .execute(params(&[("query", json!("zzz_nothing"))]), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("No matches"));
    }

    #[tokio::test]
    async fn test_invalid_regex_is_error() {
        let dir = setup();
        let ctx = ToolContext::new(dir.path(), "t");
        let err = SearchFilesTool
            .execute(params(&[("query", json!("(unclosed"))]), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid regex"));
    }
}
