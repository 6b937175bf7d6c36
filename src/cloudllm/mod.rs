// src/cloudllm/mod.rs

pub mod agent_loop;
pub mod client;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod message;
pub mod pruner;
pub mod rag;
pub mod state;
pub mod tool;
pub mod tools;
pub mod trace;

// Re-export the central types so callers mostly work through
// `cloudllm::{AgentLoop, AgentState, Message, ...}` rather than reaching
// into each submodule.
pub use agent_loop::{AgentLoop, HandoffTarget};
pub use client::{Completion, CompletionOptions, LLMClient, Reasoning, StreamedChunk};
pub use error::AgentError;
pub use event::{AgentEvent, EventSink};
pub use message::{Conversation, Message, ToolCall};
pub use state::{AgentState, AgentStatus, Handoff};
pub use tool::{ExecutionStrategy, ToolCallRequest, ToolDefinition, ToolError, ToolRegistry, ToolSchema};
