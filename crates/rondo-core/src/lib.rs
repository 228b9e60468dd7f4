//! Core types for the Rondo conversation orchestration engine.
//!
//! This crate provides the provider-agnostic foundations shared by the
//! engine crate and by front ends embedding it:
//!
//! - [`Message`] / [`Conversation`] — canonical conversation state.
//! - [`ToolCall`] / [`ToolResult`] / [`ToolRegistry`] — the tool
//!   invocation contract consumed by the round orchestrator.
//! - [`EngineError`] — the error taxonomy driving retry classification.
//!
//! Nothing in this crate touches the network; vendor wire formats live
//! in `rondo-engine`.

/// Error taxonomy and classification.
pub mod error;
/// Canonical message model and append-only conversation history.
pub mod message;
/// Tool invocation contract and registry.
pub mod tool;

pub use error::{EngineError, EngineResult, ErrorClass, FailureStage, RoundFailure, ToolError};
pub use message::{ContentPart, Conversation, MemoryInjector, Message, Role};
pub use tool::{Tool, ToolCall, ToolDescriptor, ToolRegistry, ToolResult};
