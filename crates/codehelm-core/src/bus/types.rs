//! Bus event types — everything a UI needs to render one run.

use serde::Serialize;

use crate::run::{ApprovalType, CompressionLevel, RunOutcome, ToolCallRecord};

/// One observable step of an orchestrated run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted {
        run_id: String,
        mode: String,
    },
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    /// Snapshot of a tool call after any status change.
    ToolCallUpdated {
        call: ToolCallRecord,
    },
    /// An inline call still being streamed; arguments are best-effort.
    ToolCallStreaming {
        id: String,
        name: String,
        arguments: serde_json::Value,
        streaming: bool,
    },
    ApprovalRequested {
        tool_call_id: String,
        tool: String,
        approval: ApprovalType,
        arguments: serde_json::Value,
    },
    ApprovalResolved {
        tool_call_id: String,
        approved: bool,
    },
    CompressionApplied {
        level: CompressionLevel,
        tokens_before: usize,
        tokens_after: usize,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    /// Emitted exactly once per run, after cleanup.
    RunFinished {
        run_id: String,
        outcome: RunOutcome,
    },
}

impl AgentEvent {
    pub fn warning(message: impl Into<String>) -> Self {
        AgentEvent::Warning {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
        }
    }
}
