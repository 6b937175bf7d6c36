// src/cloudllm/client.rs

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::cloudllm::error::AgentError;
use crate::cloudllm::message::Message;
use crate::cloudllm::tool::ToolSchema;

/// How hard the model should think before answering, mirrored from
/// provider "reasoning effort" knobs. `None` leaves the provider default in
/// place; the other variants are a portable subset most reasoning-capable
/// providers can map onto their own scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reasoning {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// Per-call knobs layered on top of whatever an [`LLMClient`] impl defaults
/// to. Round-trips through JSON as part of [`AgentState`](crate::cloudllm::state::AgentState)
/// persistence: every field added after the first release is `#[serde(default)]`
/// so an older persisted state with no `reasoning`/`budget_tokens` recorded
/// deserializes as "unset" rather than failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub reasoning: Reasoning,
    /// Tokens to reserve for the completion when computing how much history
    /// fits in the context window; see [`LLMClient::reserve_completion`].
    #[serde(default)]
    pub reserve_tokens: Option<usize>,
    /// Explicit reasoning-token budget for providers that meter it
    /// separately from `max_output_tokens`.
    #[serde(default)]
    pub budget_tokens: Option<usize>,
    /// The tool schemas offered to the model on this call. An
    /// [`AgentLoop`](crate::cloudllm::agent_loop::AgentLoop) overwrites this
    /// every step with the registry attached to the current
    /// [`AgentState`](crate::cloudllm::state::AgentState) plus any
    /// synthesized handoff tools; callers configuring base options
    /// generally leave it empty.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

/// A finished, non-streamed model response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl Completion {
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One incremental piece of a streamed response. Mirrors the teacher's
/// `AgentEvent::TextChunk`/tool-call-accumulation pattern in `agent.rs`,
/// but scoped to the client boundary rather than the whole agent loop.
#[derive(Debug, Clone)]
pub enum StreamedChunk {
    TextDelta(String),
    /// A tool call has finished accumulating across however many deltas the
    /// provider split it into; emitted once, fully formed.
    ToolCall(crate::cloudllm::message::ToolCall),
    /// Terminal chunk carrying final token accounting.
    Done { prompt_tokens: usize, completion_tokens: usize },
}

/// The boundary between this crate and a concrete LLM provider wire
/// protocol. Concrete implementations (OpenAI, Anthropic, a local model
/// server) are collaborators this crate does not ship; callers bring their
/// own, mirroring how the teacher's `ClientWrapper` trait is implemented
/// per-provider in `clients/*` while `agent.rs` only ever depends on the
/// trait object.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send the full conversation and block for one complete response.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, AgentError>;

    /// Same contract as [`complete`](LLMClient::complete) but streamed.
    async fn stream_complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<StreamedChunk, AgentError>>, AgentError>;

    /// The model's total context window, in tokens.
    fn context_window(&self) -> usize;

    /// How many tokens of the context window should be left unfilled by
    /// history so the completion itself has room, given `options`. Default
    /// impl falls back to `options.reserve_tokens` or 1024, the same
    /// headroom the teacher's sessions implicitly assume by trimming
    /// aggressively whenever `token_count > max_tokens`.
    fn reserve_completion(&self, options: &CompletionOptions) -> usize {
        options.reserve_tokens.unwrap_or(1024)
    }
}
