//! Codehelm Agent — the orchestration engine behind a coding agent.
//!
//! This crate contains:
//! - **tools**: Tool trait, registry with schema validation, built-in tools
//! - **parser**: incremental parser for `<tool_call>` blocks in streamed text
//! - **approval**: single-slot gate for user decisions
//! - **executor**: timeout, retry and checkpointing around one tool call
//! - **loop_detector**: repeated-call and cycle detection
//! - **compressor** / **summarizer**: keeping the history under budget
//! - **orchestrator**: the `Agent` driving LLM ↔ tool rounds

pub mod approval;
pub mod checkpoint;
pub mod compressor;
pub mod context;
pub mod executor;
pub mod loop_detector;
pub mod orchestrator;
pub mod parser;
pub mod summarizer;
pub mod tools;

pub use approval::ApprovalGate;
pub use checkpoint::{CheckpointService, InMemoryCheckpointStore};
pub use compressor::ContextCompressor;
pub use context::{AgentMode, ContextBuilder};
pub use orchestrator::{Agent, RunReport};
pub use tools::{builtin_registry, Tool, ToolRegistry};
