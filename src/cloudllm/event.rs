//! Streaming observability for an [`AgentLoop`](crate::agent_loop::AgentLoop) run.
//!
//! Implement [`EventSink`] to receive a blow-by-blow account of a single
//! `run_with_events` call: step boundaries, streamed text, tool execution,
//! guardrail verdicts, and handoffs. The default no-op methods mean callers
//! only override what they care about, the same shape as the teacher's
//! `EventHandler` trait in `event.rs`.
//!
//! # Event flow (one `run_with_events` call)
//!
//! ```text
//! AgentStarted
//!   StepStarted { step: 1 }
//!     TextDelta* / ToolCallStarted / ToolCallCompleted
//!   StepCompleted { step: 1, has_tool_calls }
//!   ... (further steps until completion, handoff, or budget exhaustion)
//! AgentCompleted | AgentFailed | HandoffCompleted
//! ```

use async_trait::async_trait;

use crate::cloudllm::state::Handoff;

/// One observable occurrence during an agent run. A single closed enum
/// rather than per-concern callbacks, mirroring the teacher's `AgentEvent`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStarted { agent_id: String },
    AgentCompleted { agent_id: String, steps_taken: u32 },
    /// The loop exited without completing; see `reason` for why.
    AgentFailed { agent_id: String, reason: String },

    StepStarted { step: u32 },
    StepCompleted { step: u32, has_tool_calls: bool },

    /// One incremental chunk of assistant text.
    TextDelta { step: u32, delta: String },
    TextComplete { step: u32, text: String },

    ToolCallStarted { step: u32, tool_call_id: String, tool_name: String },
    /// `duration_ms` is measured with `std::time::Instant` around the
    /// handler invocation, the same way the teacher times tool calls.
    ToolCallCompleted { step: u32, tool_call_id: String, tool_name: String, duration_ms: u64 },
    ToolCallFailed { step: u32, tool_call_id: String, tool_name: String, error: String },

    InputGuardrailStarted { step: u32, guardrail: String },
    InputGuardrailCompleted { step: u32, guardrail: String, blocked: bool },
    OutputGuardrailStarted { step: u32, guardrail: String },
    OutputGuardrailCompleted { step: u32, guardrail: String, blocked: bool },

    HandoffStarted { step: u32, handoff: Handoff, reason: String },
    HandoffCompleted { step: u32, target_agent: String, success: bool },
}

/// Receives [`AgentEvent`]s as an [`AgentLoop`](crate::agent_loop::AgentLoop)
/// progresses through `run_with_events`. Every method defaults to a no-op,
/// so implementors override only the events they need.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: &AgentEvent) {
        let _ = event;
    }
}

/// A sink that drops every event, for callers of `run_with_events` who want
/// the streaming code path without actually observing anything — mirrors
/// the teacher's `NoopStream`/`NoopPolicy` test-double convention.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<AgentEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn on_event(&self, event: &AgentEvent) {
            self.events.lock().await.push(event.clone());
        }
    }

    #[tokio::test]
    async fn noop_sink_accepts_any_event_without_panicking() {
        let sink = NoopSink;
        sink.on_event(&AgentEvent::AgentStarted { agent_id: "a".into() }).await;
    }

    #[tokio::test]
    async fn recording_sink_preserves_emission_order() {
        let sink = RecordingSink { events: Mutex::new(Vec::new()) };
        sink.on_event(&AgentEvent::StepStarted { step: 1 }).await;
        sink.on_event(&AgentEvent::StepCompleted { step: 1, has_tool_calls: false }).await;
        let events = sink.events.lock().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AgentEvent::StepStarted { step: 1 }));
    }
}
