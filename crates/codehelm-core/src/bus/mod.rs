//! Agent event bus — how the orchestrator tells observers what is happening.

pub mod queue;
pub mod types;

pub use queue::EventBus;
pub use types::AgentEvent;
