// src/lib.rs

//! A deterministic agent loop with tool calling and handoffs, a typed DAG
//! orchestrator, and a hybrid RAG sync engine. See the [`cloudllm`] module
//! tree for the component breakdown (agent loop, tool registry, guardrails,
//! context pruning, DAG scheduler, RAG sync and hybrid search).

pub mod cloudllm;

// Re-export the central types at the crate root so callers mostly work
// through `cloudllm::{AgentLoop, AgentState, Message, ...}` rather than
// reaching into `cloudllm::cloudllm::*`.
pub use cloudllm::{config, tool, tools};
pub use cloudllm::agent_loop::{AgentLoop, HandoffTarget};
pub use cloudllm::client::{Completion, CompletionOptions, LLMClient, Reasoning, StreamedChunk};
pub use cloudllm::error::AgentError;
pub use cloudllm::event::{AgentEvent, EventSink};
pub use cloudllm::message::{Conversation, Message, ToolCall};
pub use cloudllm::state::{AgentState, AgentStatus, Handoff};
pub use cloudllm::tool::{ExecutionStrategy, ToolCallRequest, ToolDefinition, ToolError, ToolRegistry, ToolSchema};
