// src/cloudllm/message.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model, as it appears attached
/// to an assistant [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier correlating this call with its result message.
    pub id: String,
    /// The tool's registered name.
    pub name: String,
    /// Arguments, already parsed out of the provider's wire format.
    pub arguments: Value,
}

/// One turn of a [`Conversation`](crate::message::Conversation).
///
/// Unlike the teacher's `Message { role: Role, content: String }`, this is a
/// tagged enum: the shape of a tool-result turn (it must reference the call
/// it answers) and an assistant turn (it may carry zero or more tool calls)
/// are different enough that a single flat struct would let callers build
/// invalid histories. `#[serde(tag = "role")]` keeps the wire format close
/// to the conventional `{ "role": "...", ... }` shape most providers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// The result of executing one `ToolCall`. `tool_call_id` must match a
    /// call emitted by a preceding `Assistant` message; the agent loop
    /// enforces this and the pruner never orphans one side of the pair.
    Tool {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }

    /// The textual content of this turn, regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }
}

/// An ordered conversation history. A thin `Vec<Message>` wrapper rather
/// than a bare alias so helpers like [`Conversation::estimated_tokens`] and
/// invariant checks (no orphaned tool results) have a natural home, the way
/// the teacher hangs history bookkeeping off `LLMSession` rather than off
/// `Vec<Message>` directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Conversation { messages: Vec::new() }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Same per-character heuristic the teacher's `LLMSession` uses
    /// (`len / 4`, minimum 1 token per message) — good enough to drive
    /// pruning decisions without depending on a tokenizer crate.
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(estimate_message_tokens).sum()
    }

    /// True if every `Tool` message's `tool_call_id` resolves to a tool call
    /// emitted by a preceding `Assistant` message, and vice versa — every
    /// assistant tool call it has a matching result or is still pending at
    /// the tail. Used by the pruner to validate it never split a pair.
    pub fn tool_call_pairs_intact(&self) -> bool {
        let mut pending: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for message in &self.messages {
            match message {
                Message::Assistant { tool_calls, .. } => {
                    for call in tool_calls {
                        pending.insert(call.id.as_str());
                    }
                }
                Message::Tool { tool_call_id, .. } => {
                    if !pending.remove(tool_call_id.as_str()) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

pub(crate) fn estimate_message_tokens(message: &Message) -> usize {
    let role_overhead = 1;
    let content_tokens = (message.content().len() / 4).max(1);
    let tool_call_tokens: usize = message
        .tool_calls()
        .iter()
        .map(|call| (call.name.len() + call.arguments.to_string().len()) / 4 + 1)
        .sum();
    role_overhead + content_tokens + tool_call_tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_pairs_intact_detects_orphans() {
        let mut convo = Conversation::new();
        convo.push(Message::user("hi"));
        convo.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall { id: "call_1".into(), name: "search".into(), arguments: Value::Null }],
        ));
        assert!(!convo.tool_call_pairs_intact());

        convo.push(Message::tool_result("call_1", "ok", false));
        assert!(convo.tool_call_pairs_intact());
    }

    #[test]
    fn orphan_tool_result_without_preceding_call_is_invalid() {
        let mut convo = Conversation::new();
        convo.push(Message::tool_result("call_x", "ok", false));
        assert!(!convo.tool_call_pairs_intact());
    }
}
