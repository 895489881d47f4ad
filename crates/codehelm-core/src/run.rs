//! Run-state vocabulary shared by the orchestrator and its observers.
//!
//! A `ToolCallRecord` is created when the LLM emits a call and mutated in
//! place as it moves through approval and execution. Observers only ever
//! see cloned snapshots.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Approval
// ─────────────────────────────────────────────

/// Which user consent a tool call needs before it may run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalType {
    #[default]
    None,
    Edits,
    Terminal,
    Dangerous,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::None => "none",
            ApprovalType::Edits => "edits",
            ApprovalType::Terminal => "terminal",
            ApprovalType::Dangerous => "dangerous",
        }
    }
}

impl std::fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────
// Tool call records
// ─────────────────────────────────────────────

/// Lifecycle of one tool call:
/// `pending → running → {success | error | rejected | awaiting}`,
/// with `awaiting → running` on approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Awaiting,
    Running,
    Success,
    Error,
    Rejected,
}

impl ToolCallStatus {
    /// Whether the call has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallStatus::Success | ToolCallStatus::Error | ToolCallStatus::Rejected
        )
    }
}

/// Reason attached to every call still in flight when a run is aborted.
pub const ABORTED_BY_USER: &str = "aborted by user";

/// One tool invocation within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub approval: ApprovalType,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            approval: ApprovalType::None,
        }
    }

    pub fn await_approval(&mut self, approval: ApprovalType) {
        self.approval = approval;
        self.status = ToolCallStatus::Awaiting;
    }

    pub fn start(&mut self) {
        self.status = ToolCallStatus::Running;
    }

    pub fn succeed(&mut self, result: impl Into<String>) {
        self.status = ToolCallStatus::Success;
        self.result = Some(result.into());
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ToolCallStatus::Error;
        self.error = Some(error.into());
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = ToolCallStatus::Rejected;
        self.error = Some(reason.into());
    }

    /// Move a non-terminal call to `error` with the abort reason.
    ///
    /// Returns `true` if the record changed.
    pub fn abort(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.fail(ABORTED_BY_USER);
        true
    }

    /// The text fed back to the LLM for this call.
    pub fn outcome_text(&self) -> String {
        match self.status {
            ToolCallStatus::Success => self.result.clone().unwrap_or_default(),
            ToolCallStatus::Rejected => format!(
                "Tool call '{}' was rejected by the user{}",
                self.name,
                self.error
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            ),
            _ => format!("Error: {}", self.error.as_deref().unwrap_or("unknown failure")),
        }
    }
}

// ─────────────────────────────────────────────
// Compression level
// ─────────────────────────────────────────────

/// How hard the compressor squeezed the history; ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    #[default]
    None,
    Light,
    Moderate,
    Aggressive,
}

// ─────────────────────────────────────────────
// Run outcome
// ─────────────────────────────────────────────

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The LLM answered without requesting more tools.
    Completed,
    Aborted,
    LoopDetected { reason: String },
    MaxRoundsReached { limit: u32 },
    Failed { reason: String },
}

impl RunOutcome {
    /// User-facing one-line description.
    pub fn describe(&self) -> String {
        match self {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Aborted => ABORTED_BY_USER.to_string(),
            RunOutcome::LoopDetected { reason } => format!("loop detected: {reason}"),
            RunOutcome::MaxRoundsReached { limit } => {
                format!("maximum tool call limit reached ({limit} rounds)")
            }
            RunOutcome::Failed { reason } => format!("failed: {reason}"),
        }
    }
}
