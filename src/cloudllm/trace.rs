// src/cloudllm/trace.rs

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::cloudllm::error::AgentError;
use crate::cloudllm::event::AgentEvent;

/// Appends a human-readable Markdown trace of an agent run to a file,
/// the way the teacher's `ThoughtChain` appends `.jsonl` entries — except
/// this writer is swappable and optional: an [`AgentLoop`](crate::agent_loop::AgentLoop)
/// with no trace path configured never touches the filesystem.
pub struct TraceWriter {
    path: PathBuf,
}

impl TraceWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TraceWriter { path: path.into() }
    }

    /// Appends one Markdown-formatted line per event. Opens and closes the
    /// file on every call rather than holding it open, so a crashed process
    /// never leaves a half-flushed trace.
    pub fn record(&self, event: &AgentEvent) -> Result<(), AgentError> {
        let line = render_event(event);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AgentError::processing("trace_write", e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| AgentError::processing("trace_write", e.to_string()))?;
        Ok(())
    }
}

fn render_event(event: &AgentEvent) -> String {
    match event {
        AgentEvent::AgentStarted { agent_id } => {
            format!("# Agent Execution Trace\n\nAgent: `{agent_id}`\n\n## Conversation Flow")
        }
        AgentEvent::AgentCompleted { agent_id, steps_taken } => {
            format!("## Agent `{agent_id}` completed after {steps_taken} step(s)")
        }
        AgentEvent::AgentFailed { agent_id, reason } => {
            format!("## Agent `{agent_id}` failed: {reason}")
        }
        AgentEvent::StepStarted { step } => format!("### Step {step}"),
        AgentEvent::StepCompleted { step, has_tool_calls } => {
            format!("- step {step} completed (tool calls: {has_tool_calls})")
        }
        AgentEvent::TextDelta { .. } => String::new(),
        AgentEvent::TextComplete { step, text } => format!("- step {step} text:\n\n> {text}"),
        AgentEvent::ToolCallStarted { step, tool_call_id, tool_name } => {
            format!("- step {step}: calling `{tool_name}` ({tool_call_id})")
        }
        AgentEvent::ToolCallCompleted { step, tool_call_id, tool_name, duration_ms } => {
            format!("- step {step}: `{tool_name}` ({tool_call_id}) completed in {duration_ms}ms")
        }
        AgentEvent::ToolCallFailed { step, tool_call_id, tool_name, error } => {
            format!("- step {step}: `{tool_name}` ({tool_call_id}) failed: {error}")
        }
        AgentEvent::InputGuardrailStarted { step, guardrail } => {
            format!("- step {step}: input guardrail `{guardrail}` evaluating")
        }
        AgentEvent::InputGuardrailCompleted { step, guardrail, blocked } => {
            format!("- step {step}: input guardrail `{guardrail}` blocked={blocked}")
        }
        AgentEvent::OutputGuardrailStarted { step, guardrail } => {
            format!("- step {step}: output guardrail `{guardrail}` evaluating")
        }
        AgentEvent::OutputGuardrailCompleted { step, guardrail, blocked } => {
            format!("- step {step}: output guardrail `{guardrail}` blocked={blocked}")
        }
        AgentEvent::HandoffStarted { step, handoff, reason } => {
            format!("- step {step}: handoff requested to `{}` ({reason})", handoff.target_agent)
        }
        AgentEvent::HandoffCompleted { step, target_agent, success } => {
            format!("- step {step}: handoff to `{target_agent}` completed (success={success})")
        }
    }
}
