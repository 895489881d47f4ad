//! Tool Registry — the single source of truth for tool metadata.
//!
//! Constructed explicitly and handed to the orchestrator; there is no
//! global instance. The registry validates arguments and answers policy
//! questions (approval, timeout, retries, parallelism); it does not run
//! tools itself, that is the executor's job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use codehelm_core::config::ToolsConfig;
use codehelm_core::error::ToolError;
use codehelm_core::run::ApprovalType;
use codehelm_core::types::ToolDefinition;

use super::base::Tool;
use super::metadata::{RetryConfig, ToolCategory, ToolMetadata, MUTATING_TOOLS};
use super::schema::validate_value;

/// Fallbacks for tools that do not declare their own policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolDefaults {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 1,
        }
    }
}

impl From<&ToolsConfig> for ToolDefaults {
    fn from(cfg: &ToolsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.default_timeout_secs),
            max_retries: cfg.default_max_retries,
        }
    }
}

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Stores tools keyed by name.
///
/// Owns `Arc<dyn Tool>` so tools can be shared across concurrent executions.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    defaults: ToolDefaults,
}

impl ToolRegistry {
    /// Create an empty registry with built-in defaults.
    pub fn new() -> Self {
        Self::with_defaults(ToolDefaults::default())
    }

    pub fn with_defaults(defaults: ToolDefaults) -> Self {
        Self {
            tools: HashMap::new(),
            defaults,
        }
    }

    /// Register a tool. Re-registering a name replaces the old tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool re-registered; replacing previous definition");
        } else {
            info!(tool = %name, category = tool.category().as_str(), "registered tool");
        }
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    // ── Validation ──

    /// Validate raw arguments against the tool's schema.
    ///
    /// On success returns the argument map. On failure lists every
    /// violation with its field path.
    pub fn validate(&self, name: &str, args: &Value) -> Result<HashMap<String, Value>, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let mut issues = Vec::new();
        validate_value(args, &tool.parameters(), "", &mut issues);
        if !issues.is_empty() {
            return Err(ToolError::Validation {
                tool: name.to_string(),
                issues,
            });
        }

        match args {
            Value::Object(map) => {
                let params: HashMap<String, Value> = map.clone().into_iter().collect();
                let issues = tool.check_arguments(&params);
                if !issues.is_empty() {
                    return Err(ToolError::Validation {
                        tool: name.to_string(),
                        issues,
                    });
                }
                Ok(params)
            }
            // Schemas always describe objects; anything else is already
            // reported above, but keep this total.
            other => Err(ToolError::Validation {
                tool: name.to_string(),
                issues: vec![codehelm_core::error::FieldIssue::new(
                    "",
                    format!("arguments must be an object, got {}", super::schema::json_type_name(other)),
                )],
            }),
        }
    }

    // ── Policy lookups ──

    /// Approval required for a call. Unknown tools need none (they fail
    /// validation before reaching the gate).
    pub fn get_approval_type(&self, name: &str, args: &HashMap<String, Value>) -> ApprovalType {
        self.tools
            .get(name)
            .map(|t| t.approval_for(args))
            .unwrap_or(ApprovalType::None)
    }

    pub fn get_timeout(&self, name: &str) -> Duration {
        self.tools
            .get(name)
            .and_then(|t| t.timeout())
            .unwrap_or(self.defaults.timeout)
    }

    pub fn get_retry_config(&self, name: &str) -> RetryConfig {
        match self.tools.get(name) {
            Some(t) => RetryConfig {
                retryable: t.retryable(),
                max_retries: t.max_retries().unwrap_or(self.defaults.max_retries),
            },
            None => RetryConfig {
                retryable: true,
                max_retries: self.defaults.max_retries,
            },
        }
    }

    /// Write-category tools and the enumerated mutating tools.
    pub fn is_mutating(&self, name: &str) -> bool {
        MUTATING_TOOLS.contains(&name)
            || self
                .tools
                .get(name)
                .is_some_and(|t| t.category() == ToolCategory::Write)
    }

    /// Whether a call may be dispatched concurrently with its neighbours.
    pub fn is_parallel_safe(&self, name: &str) -> bool {
        !self.is_mutating(name)
            && self
                .tools
                .get(name)
                .is_some_and(|t| t.category().is_parallel_safe())
    }

    /// Fully resolved metadata for one tool.
    pub fn metadata(&self, name: &str) -> Option<ToolMetadata> {
        let tool = self.tools.get(name)?;
        Some(ToolMetadata {
            name: name.to_string(),
            category: tool.category(),
            approval: tool.approval(),
            timeout: self.get_timeout(name),
            retry: self.get_retry_config(name),
            mutating: self.is_mutating(name),
        })
    }

    // ── LLM-facing definitions ──

    /// Get the LLM-facing definitions for all registered tools.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.definitions_where(|_| true)
    }

    /// Definitions of tools that cannot change the workspace.
    pub fn read_only_definitions(&self) -> Vec<ToolDefinition> {
        self.definitions_where(|name| self.is_parallel_safe(name))
    }

    fn definitions_where(&self, keep: impl Fn(&str) -> bool) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .filter(|(name, _)| keep(name))
            .map(|(_, t)| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
