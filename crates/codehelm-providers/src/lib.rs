//! LLM provider layer for Codehelm.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — streaming trait every backend implements
//! - [`sse`] — decoder for OpenAI-style server-sent-event chunks
//! - [`http_provider::HttpProvider`] — generic OpenAI-compatible HTTP client

pub mod http_provider;
pub mod sse;
pub mod traits;

// Re-export main types for convenience
pub use http_provider::{create_provider, HttpProvider};
pub use traits::{LlmProvider, LlmRequest, LlmRequestConfig};
