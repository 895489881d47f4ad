//! Codehelm Core — shared types, event bus, configuration, and error types.
//!
//! This crate has no knowledge of tools or providers; it defines the
//! vocabulary the agent, provider, and CLI crates speak to each other.

pub mod bus;
pub mod config;
pub mod error;
pub mod run;
pub mod types;
pub mod utils;
