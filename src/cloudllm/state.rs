// src/cloudllm/state.rs

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cloudllm::client::CompletionOptions;
use crate::cloudllm::message::{Conversation, Message};
use crate::cloudllm::tool::ToolRegistry;

/// Derives the synthesized handoff tool name from a target agent's
/// identity, the same way every call site needs to agree on one name for
/// "the tool that hands off to agent X" without the source and target
/// having to coordinate on a literal string. A truncated SHA-256 digest of
/// the agent id keeps the name stable across runs and collision-free enough
/// for realistic agent counts.
pub fn handoff_tool_name(agent_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("handoff_to_agent_{}", &digest[..12])
}

/// A request, surfaced by the model, to transfer the conversation to a
/// named specialist agent. Pure data — no executable reference to the
/// target agent, so it round-trips through JSON as part of
/// [`AgentStatus::HandoffRequested`]. The executable counterpart, pairing
/// this with the `Arc<AgentLoop>` that actually runs the target, is
/// [`crate::cloudllm::agent_loop::HandoffTarget`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub target_agent: String,
    #[serde(default)]
    pub transfer_reason: Option<String>,
    #[serde(default = "default_true")]
    pub preserve_context: bool,
    #[serde(default = "default_true")]
    pub transfer_system_message: bool,
}

fn default_true() -> bool {
    true
}

impl Handoff {
    pub fn new(target_agent: impl Into<String>) -> Self {
        Handoff {
            target_agent: target_agent.into(),
            transfer_reason: None,
            preserve_context: true,
            transfer_system_message: true,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.transfer_reason = Some(reason.into());
        self
    }

    pub fn without_context(mut self) -> Self {
        self.preserve_context = false;
        self
    }

    pub fn without_system_message(mut self) -> Self {
        self.transfer_system_message = false;
        self
    }

    /// The synthesized tool name the model sees for this handoff:
    /// `handoff_to_agent_<hex-id>`.
    pub fn tool_name(&self) -> String {
        handoff_tool_name(&self.target_agent)
    }
}

/// Where an [`AgentState`] currently sits in the loop. A tagged sum rather
/// than separate boolean flags (`is_done`, `is_failed`, ...) so a caller
/// matching on it can't observe an invalid combination — the same reasoning
/// the teacher applies to `AgentEvent` being one closed enum rather than a
/// handful of independent flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentStatus {
    /// A completion request is outstanding, or the loop is between steps.
    InProgress,
    /// Tool calls from the latest assistant message are executing.
    WaitingForTools,
    /// The loop produced a final assistant message with no further tool calls.
    Complete,
    /// The loop exited without completing, with a human-readable reason.
    /// A named field rather than a bare tuple variant: serde's internally
    /// tagged representation (`#[serde(tag = "status")]`) can only merge the
    /// tag into a map, so a newtype variant wrapping a lone string would
    /// fail to serialize — wrapping it in a one-field struct keeps the
    /// wire shape an object in every variant.
    Failed { error: String },
    /// The model asked to hand off, and the target matched a configured
    /// handoff. Transient in practice: the loop resolves this by invoking
    /// the target agent and returning its result, so callers mostly observe
    /// this status only via the [`crate::cloudllm::event::AgentEvent::HandoffStarted`]
    /// event or a trace, not as a final return value.
    HandoffRequested { handoff: Handoff, reason: String },
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Complete | AgentStatus::Failed { .. })
    }
}

/// The full, serializable state of one agent run: its conversation so far,
/// its status, and the step/option knobs needed to resume it exactly where
/// it left off. `tools` and `available_handoffs` are excluded from
/// serialization (they carry live handler/agent references with no JSON
/// form); everything else round-trips, including `completion_options` with
/// its `reasoning`/`budget_tokens` fields unset-safe for older blobs.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub conversation: Conversation,
    /// The tools available to this run. Not serialized; a restored state
    /// has an empty registry until the caller re-attaches one with
    /// [`with_tools`](Self::with_tools).
    #[serde(skip)]
    pub tools: ToolRegistry,
    #[serde(default)]
    pub initial_query: Option<String>,
    pub status: AgentStatus,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub completion_options: CompletionOptions,
    /// Specialist agents this run may hand off to. Not serialized, for the
    /// same reason as `tools`; empty on the receiving end of a handoff per
    /// the "no chained handoffs" rule.
    #[serde(skip)]
    pub available_handoffs: Vec<crate::cloudllm::agent_loop::HandoffTarget>,
    pub steps_taken: u32,
    pub step_budget: u32,
}

impl AgentState {
    pub fn new(step_budget: u32) -> Self {
        AgentState {
            conversation: Conversation::new(),
            tools: ToolRegistry::new(),
            initial_query: None,
            status: AgentStatus::InProgress,
            logs: Vec::new(),
            system_message: None,
            completion_options: CompletionOptions::default(),
            available_handoffs: Vec::new(),
            steps_taken: 0,
            step_budget,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn with_initial_query(mut self, query: impl Into<String>) -> Self {
        self.initial_query = Some(query.into());
        self
    }

    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.completion_options = options;
        self
    }

    pub fn with_handoffs(mut self, handoffs: Vec<crate::cloudllm::agent_loop::HandoffTarget>) -> Self {
        self.available_handoffs = handoffs;
        self
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// Appends one message to the conversation.
    pub fn add_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    /// Appends every message in `messages`, in order.
    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.conversation.messages.extend(messages);
    }

    /// Consuming builder that replaces `status`, matching the `with_*`
    /// convention the rest of this type's setters use.
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn remaining_steps(&self) -> u32 {
        self.step_budget.saturating_sub(self.steps_taken)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Materializes the conversation actually sent to the model: the
    /// configured system message, if any, prepended as the first element.
    pub fn to_api_conversation(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        if let Some(system_message) = &self.system_message {
            messages.push(Message::system(system_message.clone()));
        }
        messages.extend(self.conversation.messages.iter().cloned());
        messages
    }
}
