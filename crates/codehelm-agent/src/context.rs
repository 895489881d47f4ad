//! Context builder — constructs the system prompt for a run.
//!
//! Identity, workspace and date, mode rules, workspace bootstrap files,
//! the caller's own system prompt and, for models without native function
//! calling, the inline tool-call instructions and catalogue.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use codehelm_core::types::ToolDefinition;

/// Files injected into the system prompt when present in the workspace root.
const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "CODEHELM.md"];

/// Bootstrap files larger than this are truncated (characters).
const MAX_BOOTSTRAP_CHARS: usize = 20_000;

// ─────────────────────────────────────────────
// Mode
// ─────────────────────────────────────────────

/// What a run is allowed to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Every registered tool is offered.
    #[default]
    Agent,
    /// Read-only tools only; the workspace must not change.
    Ask,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Agent => "agent",
            AgentMode::Ask => "ask",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(AgentMode::Agent),
            "ask" => Ok(AgentMode::Ask),
            other => Err(format!("unknown mode '{other}' (expected 'agent' or 'ask')")),
        }
    }
}

// ─────────────────────────────────────────────
// Inline tool instructions
// ─────────────────────────────────────────────

/// Instructions and tool catalogue for the tagged-text calling format.
pub fn build_tool_call_instructions(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "# Tool calling\n\n\
         To call a tool, write a block in exactly this format:\n\n\
         <tool_call>\n\
         <function=TOOL_NAME>\n\
         <parameter=PARAM_NAME>value</parameter>\n\
         </function>\n\
         </tool_call>\n\n\
         Rules:\n\
         - One <parameter> tag per argument. Objects and arrays are written as JSON.\n\
         - You may emit several <tool_call> blocks in one reply; they run in order.\n\
         - After your tool calls, stop and wait. Results arrive in <tool_result> blocks.\n\
         - When the task is complete, answer without any <tool_call> block.\n\n\
         ## Available tools\n",
    );

    for tool in tools {
        let f = &tool.function;
        out.push_str(&format!("\n### {}\n{}\n", f.name, f.description));
        let required: Vec<&str> = f.parameters["required"]
            .as_array()
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(props) = f.parameters["properties"].as_object() {
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for name in names {
                let prop = &props[name];
                let ty = prop["type"].as_str().unwrap_or("any");
                let marker = if required.contains(&name.as_str()) { " (required)" } else { "" };
                let desc = prop["description"].as_str().unwrap_or("");
                out.push_str(&format!("- `{name}` ({ty}){marker}: {desc}\n"));
            }
        }
    }
    out
}

// ─────────────────────────────────────────────
// Context builder
// ─────────────────────────────────────────────

/// Builds the system prompt for one run.
pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            agent_name: "Codehelm".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Assemble the full system prompt.
    ///
    /// `inline_tools` is set when tools are described in the prompt
    /// rather than passed to the provider.
    pub fn build_system_prompt(
        &self,
        mode: AgentMode,
        custom: Option<&str>,
        inline_tools: Option<&[ToolDefinition]>,
    ) -> String {
        let mut parts = vec![self.build_identity(), mode_rules(mode).to_string()];

        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if !path.is_file() {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                debug!(file = filename, "loaded bootstrap file");
                let content = codehelm_core::utils::truncate_string(&content, MAX_BOOTSTRAP_CHARS);
                parts.push(format!("## {filename}\n\n{content}"));
            }
        }

        if let Some(custom) = custom.map(str::trim).filter(|c| !c.is_empty()) {
            parts.push(format!("# Instructions\n\n{custom}"));
        }

        if let Some(tools) = inline_tools {
            parts.push(build_tool_call_instructions(tools));
        }

        parts.join("\n\n---\n\n")
    }

    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M UTC");
        format!(
            "# Identity\n\n\
             You are **{name}**, a coding agent working inside the user's project.\n\n\
             - **Date/time**: {now}\n\
             - **Platform**: {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             Use tools to inspect the project before changing it. Prefer small, \
             targeted edits. Never guess file contents; read them.",
            name = self.agent_name,
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            workspace = self.workspace.display(),
        )
    }
}

fn mode_rules(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Agent => {
            "# Mode: agent\n\n\
             You may read, edit and create files and run commands. Some actions \
             need the user's approval; if a call is rejected, do not retry it \
             unchanged, adjust or ask."
        }
        AgentMode::Ask => {
            "# Mode: ask\n\n\
             Answer questions about the project. You may only read and search; \
             do not modify the workspace or run commands."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs() -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path"},
                    "start_line": {"type": "integer"}
                },
                "required": ["path"]
            }),
        )]
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("ASK".parse::<AgentMode>().unwrap(), AgentMode::Ask);
        assert_eq!(AgentMode::Agent.to_string(), "agent");
        assert!("write".parse::<AgentMode>().is_err());
    }

    #[test]
    fn test_tool_instructions_list_params() {
        let text = build_tool_call_instructions(&defs());
        assert!(text.contains("<function=TOOL_NAME>"));
        assert!(text.contains("### read_file"));
        assert!(text.contains("- `path` (string) (required): File path"));
        assert!(text.contains("- `start_line` (integer): "));
    }

    #[test]
    fn test_system_prompt_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Run `cargo fmt` before finishing.").unwrap();
        let builder = ContextBuilder::new(dir.path());

        let prompt = builder.build_system_prompt(AgentMode::Ask, Some("Be brief."), None);
        assert!(prompt.contains("# Identity"));
        assert!(prompt.contains(&dir.path().display().to_string()));
        assert!(prompt.contains("# Mode: ask"));
        assert!(prompt.contains("Run `cargo fmt` before finishing."));
        assert!(prompt.contains("# Instructions\n\nBe brief."));
        assert!(!prompt.contains("# Tool calling"));

        let inline = builder.build_system_prompt(AgentMode::Agent, None, Some(&defs()));
        assert!(inline.contains("# Tool calling"));
        assert!(!inline.contains("# Instructions"));
    }
}
