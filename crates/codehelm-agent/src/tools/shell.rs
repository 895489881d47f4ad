//! Shell tool — run commands in a subprocess inside the workspace.
//!
//! Three tiers of command: hard-denied patterns are refused at validation
//! time, risky patterns need `dangerous` approval, everything else
//! `terminal`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use codehelm_core::error::FieldIssue;
use codehelm_core::run::ApprovalType;

use super::base::{optional_string, require_string, Tool, ToolContext};
use super::metadata::ToolCategory;

/// Maximum output length before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Commands that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\s+/(\s|$)",
    r"\brm\s+-[rf]{1,2}\s+~",
    r"\b(mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

/// Commands allowed only with `dangerous` approval.
const RISKY_PATTERNS: &[&str] = &[
    r"\brm\s+-[a-z]*[rf]",
    r"\bgit\s+(push|reset\s+--hard|clean\s+-[a-z]*f)",
    r"\bsudo\b",
    r"\bchmod\s+-R\b",
    r"\b(curl|wget)\b.*\|\s*(sh|bash)\b",
    r"\b(npm|cargo|pip)\s+publish\b",
];

const BLOCKED: &str = "Command blocked by safety guard (dangerous pattern detected)";

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

// ─────────────────────────────────────────────
// RunCommandTool
// ─────────────────────────────────────────────

/// Execute shell commands in a subprocess.
pub struct RunCommandTool {
    /// Command timeout; the executor's bound sits above this.
    timeout: Duration,
    deny_regexes: Vec<Regex>,
    risky_regexes: Vec<Regex>,
}

impl RunCommandTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            deny_regexes: compile(DENY_PATTERNS),
            risky_regexes: compile(RISKY_PATTERNS),
        }
    }

    fn is_denied(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        self.deny_regexes.iter().any(|re| re.is_match(&lower))
    }

    /// Returns a reason if the command is blocked.
    fn guard_command(&self, command: &str, restrict: bool) -> Option<String> {
        if self.is_denied(command) {
            warn!(command = command, "command blocked by safety guard");
            return Some(BLOCKED.into());
        }

        if restrict && (command.contains("../") || command.contains("..\\")) {
            return Some("Command blocked: path traversal (../) is not allowed in the workspace".into());
        }

        None
    }

    fn is_risky(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        self.risky_regexes.iter().any(|re| re.is_match(&lower))
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new(60)
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output. \
         Use this for builds, tests, git, or any CLI tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The shell command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory relative to the workspace root"
                }
            },
            "required": ["command"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Terminal
    }

    fn approval(&self) -> ApprovalType {
        ApprovalType::Terminal
    }

    fn approval_for(&self, params: &HashMap<String, Value>) -> ApprovalType {
        match params.get("command").and_then(|v| v.as_str()) {
            Some(cmd) if self.is_risky(cmd) => ApprovalType::Dangerous,
            _ => ApprovalType::Terminal,
        }
    }

    fn check_arguments(&self, params: &HashMap<String, Value>) -> Vec<FieldIssue> {
        match params.get("command").and_then(Value::as_str) {
            Some(cmd) if self.is_denied(cmd) => {
                warn!(command = cmd, "command refused during validation");
                vec![FieldIssue::new("command", BLOCKED)]
            }
            _ => Vec::new(),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        // Leave headroom so the tool reports its own timeout first.
        Some(self.timeout + Duration::from_secs(5))
    }

    fn max_retries(&self) -> Option<u32> {
        Some(0)
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = match optional_string(&params, "cwd") {
            Some(dir) => ctx.resolve_path(&dir)?,
            None => ctx.resolve_path(".")?,
        };

        if let Some(reason) = self.guard_command(&command, ctx.restrict_to_workspace) {
            anyhow::bail!(reason);
        }

        info!(command = %command, cwd = %cwd.display(), "executing shell command");

        let child = Command::new(if cfg!(target_os = "windows") { "cmd" } else { "sh" })
            .args(if cfg!(target_os = "windows") {
                vec!["/C", &command]
            } else {
                vec!["-c", &command]
            })
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn command: {e}"))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => anyhow::bail!("Command failed: {e}"),
            Err(_) => anyhow::bail!(
                "Command timed out after {} seconds",
                self.timeout.as_secs()
            ),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout);
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        if code != 0 {
            parts.push(format!("Exit code: {code}"));
        }

        let combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        let total = combined.chars().count();
        if total > MAX_OUTPUT_LEN {
            let head: String = combined.chars().take(MAX_OUTPUT_LEN).collect();
            return Ok(format!(
                "{head}\n... (truncated, {} more chars)",
                total - MAX_OUTPUT_LEN
            ));
        }
        Ok(combined)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_run_echo() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "t");
        let result = RunCommandTool::new(10)
            .execute(make_params(&[("command", "echo hello")]), &ctx)
            .await
            .unwrap();
        assert!(result.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "t");
        let result = RunCommandTool::new(10)
            .execute(make_params(&[("command", "exit 42")]), &ctx)
            .await
            .unwrap();
        assert!(result.contains("Exit code: 42"));
    }

    #[tokio::test]
    async fn test_run_timeout_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "t");
        let err = RunCommandTool::new(1)
            .execute(make_params(&[("command", "sleep 30")]), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_blocked_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path(), "t");
        let err = RunCommandTool::default()
            .execute(make_params(&[("command", "rm -rf /")]), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("safety guard"));
    }

    #[test]
    fn test_denied_command_fails_argument_check() {
        let tool = RunCommandTool::default();
        let issues = tool.check_arguments(&make_params(&[("command", "rm -rf /")]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "command");
        assert!(tool.check_arguments(&make_params(&[("command", "rm -rf target")])).is_empty());
    }

    #[test]
    fn test_guard_blocks_fork_bomb_and_shutdown() {
        let tool = RunCommandTool::default();
        assert!(tool.guard_command(":() { :|:& };:", false).is_some());
        assert!(tool.guard_command("sudo shutdown -h now", false).is_some());
    }

    #[test]
    fn test_guard_allows_safe_commands() {
        let tool = RunCommandTool::default();
        assert!(tool.guard_command("ls -la", true).is_none());
        assert!(tool.guard_command("cargo test", true).is_none());
        assert!(tool.guard_command("rm -rf target", true).is_none());
    }

    #[test]
    fn test_guard_blocks_traversal_when_restricted() {
        let tool = RunCommandTool::default();
        let reason = tool.guard_command("cat ../../../etc/passwd", true).unwrap();
        assert!(reason.contains("path traversal"));
        assert!(tool.guard_command("cat ../x", false).is_none());
    }

    #[test]
    fn test_risky_commands_escalate_approval() {
        let tool = RunCommandTool::default();
        assert_eq!(
            tool.approval_for(&make_params(&[("command", "cargo build")])),
            ApprovalType::Terminal
        );
        assert_eq!(
            tool.approval_for(&make_params(&[("command", "rm -rf target")])),
            ApprovalType::Dangerous
        );
        assert_eq!(
            tool.approval_for(&make_params(&[("command", "git push origin main")])),
            ApprovalType::Dangerous
        );
    }
}
