// src/cloudllm/agent_loop.rs

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::cloudllm::client::{CompletionOptions, LLMClient, StreamedChunk};
use crate::cloudllm::error::AgentError;
use crate::cloudllm::event::{AgentEvent, EventSink, NoopSink};
use crate::cloudllm::guardrail::{run_chain, Guardrail};
use crate::cloudllm::message::{Message, ToolCall};
use crate::cloudllm::pruner::{ContextWindowConfig, PruningStrategy};
use crate::cloudllm::state::{AgentState, AgentStatus, Handoff};
use crate::cloudllm::tool::{ExecutionStrategy, ToolCallRequest, ToolRegistry, ToolSchema};
use crate::cloudllm::trace::TraceWriter;

/// A configured handoff target: the data describing the handoff
/// ([`Handoff`]), the agent it actually runs against, and the tool
/// registry that agent should be given in the child run (mirrors
/// "`tools` is the target agent's own registry" from the handoff-execution
/// contract).
#[derive(Clone)]
pub struct HandoffTarget {
    pub handoff: Handoff,
    pub agent: Arc<AgentLoop>,
    pub tools: ToolRegistry,
}

impl HandoffTarget {
    pub fn new(handoff: Handoff, agent: Arc<AgentLoop>, tools: ToolRegistry) -> Self {
        HandoffTarget { handoff, agent, tools }
    }
}

/// The deterministic step loop wired around an [`LLMClient`]: each step
/// sends the (pruned, guardrail-checked) conversation, executes whatever
/// tool calls come back, and feeds the results back in — the same
/// "call, detect tool call, execute, repeat" shape as the teacher's
/// `Agent::send`, generalized from a single provider-specific tool-call
/// JSON parser into the typed [`ToolCall`] already attached to `Message::Assistant`.
///
/// Tools, completion options, the system message, and available handoffs
/// travel on [`AgentState`] (per-run, and serializable apart from the
/// handler/agent references they hold); this struct owns only the
/// *driver* configuration that stays fixed across runs of the same agent
/// identity — which client to call, which guardrails bookend a run, how to
/// prune, and where to trace.
pub struct AgentLoop {
    pub id: String,
    client: Arc<dyn LLMClient>,
    input_guardrails: Vec<Box<dyn Guardrail>>,
    output_guardrails: Vec<Box<dyn Guardrail>>,
    pruning: PruningStrategy,
    context_window: ContextWindowConfig,
    execution_strategy: ExecutionStrategy,
    trace_writer: Option<TraceWriter>,
}

/// Fraction of `(contextWindow - reserveCompletion)` left unused as a safety
/// margin, per spec §4.6's token-budget formula.
const CONTEXT_HEADROOM: f64 = 0.08;

/// `(contextWindow - reserveCompletion) * (1 - headroom)`, evaluated once
/// against the client's defaults at construction time (reserve_completion
/// is consulted here, not left dead).
fn effective_token_budget(client: &dyn LLMClient) -> usize {
    let options = CompletionOptions::default();
    let window = client.context_window();
    let reserve = client.reserve_completion(&options);
    let usable = window.saturating_sub(reserve) as f64;
    (usable * (1.0 - CONTEXT_HEADROOM)).floor().max(0.0) as usize
}

impl AgentLoop {
    pub fn new(id: impl Into<String>, client: Arc<dyn LLMClient>) -> Self {
        let context_window = ContextWindowConfig {
            max_tokens: effective_token_budget(client.as_ref()),
            pinned_prefix_len: 1,
            ..Default::default()
        };
        AgentLoop {
            id: id.into(),
            client,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            pruning: PruningStrategy::OldestFirst,
            context_window,
            execution_strategy: ExecutionStrategy::Sequential,
            trace_writer: None,
        }
    }

    pub fn with_input_guardrails(mut self, guardrails: Vec<Box<dyn Guardrail>>) -> Self {
        self.input_guardrails = guardrails;
        self
    }

    pub fn with_output_guardrails(mut self, guardrails: Vec<Box<dyn Guardrail>>) -> Self {
        self.output_guardrails = guardrails;
        self
    }

    pub fn with_pruning_strategy(mut self, strategy: PruningStrategy) -> Self {
        self.pruning = strategy;
        self
    }

    pub fn with_execution_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.execution_strategy = strategy;
        self
    }

    pub fn with_trace_writer(mut self, writer: TraceWriter) -> Self {
        self.trace_writer = Some(writer);
        self
    }

    /// Runtime equivalent of [`with_pruning_strategy`](Self::with_pruning_strategy),
    /// for callers that need to change strategy between runs on an already
    /// built loop rather than at construction time.
    pub fn set_pruning_strategy(&mut self, strategy: PruningStrategy) {
        self.pruning = strategy;
    }

    /// Valid only when `prev_state.status` is terminal (`Complete` or
    /// `Failed`); appends `user_message`, resets status to `InProgress`,
    /// clears `logs`, and runs.
    pub async fn continue_conversation(
        &self,
        mut state: AgentState,
        user_message: Message,
    ) -> Result<AgentState, AgentError> {
        if !state.is_terminal() {
            return Err(AgentError::validation(
                "agentState",
                "continuation is only valid from a terminal (Complete or Failed) state",
            ));
        }
        if !matches!(user_message, Message::User { .. }) {
            return Err(AgentError::validation("user_message", "continuation message must have role=user"));
        }
        state.conversation.push(user_message);
        state.status = AgentStatus::InProgress;
        state.logs.clear();
        state.conversation = self.pruning.prune(&state.conversation, &self.context_window);
        self.run(state).await
    }

    /// Non-streaming run: each step sends the whole conversation with
    /// [`LLMClient::complete`] and blocks for a full response. An LLM error
    /// propagates directly to the caller without mutating `state.status`,
    /// per the documented asymmetry with [`run_with_events`](Self::run_with_events).
    pub async fn run(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        state.status = AgentStatus::InProgress;
        if state.initial_query.is_none() {
            state.initial_query = last_user_message(&state.conversation).map(|m| m.content().to_string());
        }

        if let Some(outcome_state) = self.apply_input_guardrails(&mut state).await? {
            return Ok(outcome_state);
        }

        loop {
            if state.remaining_steps() == 0 {
                return Ok(self.fail_step_limit(state));
            }

            state.conversation = self.pruning.prune(&state.conversation, &self.context_window);
            let options = effective_completion_options(&state);
            let completion = self.client.complete(&state.to_api_conversation(), &options).await?;

            let tool_calls = completion.message.tool_calls().to_vec();
            state.add_message(completion.message);

            if tool_calls.is_empty() {
                state.steps_taken += 1;
                return self.finish_with_output_guardrails(state).await;
            }

            state.status = AgentStatus::WaitingForTools;

            let handoff = detect_handoff(&tool_calls, &state.available_handoffs)
                .map(|(target, reason)| (target.clone(), reason));
            if let Some((target, reason)) = handoff {
                return Box::pin(self.execute_handoff(state, target, reason, None)).await;
            }

            self.dispatch_tools(&mut state, &tool_calls, None).await;
            state.steps_taken += 1;
            state.status = AgentStatus::InProgress;
        }
    }

    /// Convenience wrapper for callers that don't need events: drives the
    /// same state machine as [`run_with_events`](Self::run_with_events)
    /// with a sink that discards everything.
    pub async fn run_silently(&self, state: AgentState) -> Result<AgentState, AgentError> {
        self.run_with_events(state, &NoopSink).await
    }

    /// Streaming run: each step sends the conversation with
    /// [`LLMClient::stream_complete`], emitting a [`AgentEvent::TextDelta`]
    /// per non-empty chunk and one [`AgentEvent::TextComplete`] once the
    /// stream is exhausted, plus the full lifecycle of step/tool/guardrail/
    /// handoff events. Unlike [`run`](Self::run), an LLM error here is
    /// captured into `AgentStatus::Failed` and surfaced via
    /// [`AgentEvent::AgentFailed`] rather than returned as an `Err`.
    pub async fn run_with_events(
        &self,
        mut state: AgentState,
        sink: &dyn EventSink,
    ) -> Result<AgentState, AgentError> {
        state.status = AgentStatus::InProgress;
        if state.initial_query.is_none() {
            state.initial_query = last_user_message(&state.conversation).map(|m| m.content().to_string());
        }
        self.emit(sink, AgentEvent::AgentStarted { agent_id: self.id.clone() }).await;

        if let Some(outcome_state) = self.apply_input_guardrails_with_events(&mut state, sink).await? {
            return Ok(outcome_state);
        }

        loop {
            if state.remaining_steps() == 0 {
                let state = self.fail_step_limit(state);
                self.emit(
                    sink,
                    AgentEvent::AgentFailed { agent_id: self.id.clone(), reason: "Maximum step limit reached".into() },
                )
                .await;
                return Ok(state);
            }

            let step = state.steps_taken + 1;
            self.emit(sink, AgentEvent::StepStarted { step }).await;

            state.conversation = self.pruning.prune(&state.conversation, &self.context_window);
            let options = effective_completion_options(&state);

            let mut stream = match self.client.stream_complete(&state.to_api_conversation(), &options).await {
                Ok(stream) => stream,
                Err(e) => return Ok(self.fail_with_event(state, sink, e).await),
            };

            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut stream_failed = None;

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(StreamedChunk::TextDelta(delta)) => {
                        if !delta.is_empty() {
                            content.push_str(&delta);
                            self.emit(sink, AgentEvent::TextDelta { step, delta }).await;
                        }
                    }
                    Ok(StreamedChunk::ToolCall(call)) => tool_calls.push(call),
                    Ok(StreamedChunk::Done { .. }) => {}
                    Err(e) => {
                        stream_failed = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = stream_failed {
                return Ok(self.fail_with_event(state, sink, e).await);
            }

            self.emit(sink, AgentEvent::TextComplete { step, text: content.clone() }).await;

            state.conversation.push(Message::assistant_with_tool_calls(content, tool_calls.clone()));

            if tool_calls.is_empty() {
                state.steps_taken = step;
                self.emit(sink, AgentEvent::StepCompleted { step, has_tool_calls: false }).await;
                let state = match self.finish_with_output_guardrails_events(state, sink, step).await? {
                    Ok(completed) => completed,
                    Err(blocked) => {
                        self.emit(
                            sink,
                            AgentEvent::AgentFailed { agent_id: self.id.clone(), reason: blocked_reason(&blocked) },
                        )
                        .await;
                        return Ok(blocked);
                    }
                };
                self.emit(sink, AgentEvent::AgentCompleted { agent_id: self.id.clone(), steps_taken: step }).await;
                return Ok(state);
            }

            state.status = AgentStatus::WaitingForTools;
            self.emit(sink, AgentEvent::StepCompleted { step, has_tool_calls: true }).await;

            let handoff = detect_handoff(&tool_calls, &state.available_handoffs)
                .map(|(target, reason)| (target.clone(), reason));
            if let Some((target, reason)) = handoff {
                return Box::pin(self.execute_handoff(state, target, reason, Some(sink))).await;
            }

            self.dispatch_tools(&mut state, &tool_calls, Some(sink)).await;
            state.steps_taken = step;
            state.status = AgentStatus::InProgress;
        }
    }

    async fn apply_input_guardrails(&self, state: &mut AgentState) -> Result<Option<AgentState>, AgentError> {
        if self.input_guardrails.is_empty() {
            return Ok(None);
        }
        let Some(last_user) = last_user_message(&state.conversation) else { return Ok(None) };
        let outcome = run_chain(&self.input_guardrails, last_user).await?;
        if outcome.is_blocked() {
            state.status = AgentStatus::Failed { error: format!("input guardrail blocked: {}", outcome.blocked.unwrap()) };
            return Ok(Some(state.clone()));
        }
        replace_last_user_message(state, outcome.message);
        Ok(None)
    }

    async fn apply_input_guardrails_with_events(
        &self,
        state: &mut AgentState,
        sink: &dyn EventSink,
    ) -> Result<Option<AgentState>, AgentError> {
        if self.input_guardrails.is_empty() {
            return Ok(None);
        }
        for guardrail in &self.input_guardrails {
            self.emit(sink, AgentEvent::InputGuardrailStarted { step: 0, guardrail: guardrail.name().to_string() })
                .await;
        }
        let Some(last_user) = last_user_message(&state.conversation) else { return Ok(None) };
        let outcome = run_chain(&self.input_guardrails, last_user).await?;
        for guardrail in &self.input_guardrails {
            self.emit(
                sink,
                AgentEvent::InputGuardrailCompleted {
                    step: 0,
                    guardrail: guardrail.name().to_string(),
                    blocked: outcome.is_blocked(),
                },
            )
            .await;
        }
        if outcome.is_blocked() {
            let reason = format!("input guardrail blocked: {}", outcome.blocked.unwrap());
            state.status = AgentStatus::Failed { error: reason.clone() };
            self.emit(sink, AgentEvent::AgentFailed { agent_id: self.id.clone(), reason }).await;
            return Ok(Some(state.clone()));
        }
        replace_last_user_message(state, outcome.message);
        Ok(None)
    }

    /// Runs the output guardrail chain once, on the final assistant
    /// message, and resolves the run's terminal status.
    async fn finish_with_output_guardrails(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        if !self.output_guardrails.is_empty() {
            if let Some(last) = state.conversation.messages.last().cloned() {
                let outcome = run_chain(&self.output_guardrails, last).await?;
                if outcome.is_blocked() {
                    state.status =
                        AgentStatus::Failed { error: format!("output guardrail blocked: {}", outcome.blocked.unwrap()) };
                    return Ok(state);
                }
                *state.conversation.messages.last_mut().unwrap() = outcome.message;
            }
        }
        state.status = AgentStatus::Complete;
        Ok(state)
    }

    /// Event-emitting counterpart of [`finish_with_output_guardrails`](Self::finish_with_output_guardrails).
    /// Returns `Ok(Ok(state))` on success and `Ok(Err(state))` when a
    /// guardrail blocked the run, so the caller can emit `AgentFailed`
    /// before returning.
    async fn finish_with_output_guardrails_events(
        &self,
        mut state: AgentState,
        sink: &dyn EventSink,
        step: u32,
    ) -> Result<Result<AgentState, AgentState>, AgentError> {
        if !self.output_guardrails.is_empty() {
            for guardrail in &self.output_guardrails {
                self.emit(sink, AgentEvent::OutputGuardrailStarted { step, guardrail: guardrail.name().to_string() })
                    .await;
            }
            if let Some(last) = state.conversation.messages.last().cloned() {
                let outcome = run_chain(&self.output_guardrails, last).await?;
                for guardrail in &self.output_guardrails {
                    self.emit(
                        sink,
                        AgentEvent::OutputGuardrailCompleted {
                            step,
                            guardrail: guardrail.name().to_string(),
                            blocked: outcome.is_blocked(),
                        },
                    )
                    .await;
                }
                if outcome.is_blocked() {
                    state.status =
                        AgentStatus::Failed { error: format!("output guardrail blocked: {}", outcome.blocked.unwrap()) };
                    return Ok(Err(state));
                }
                *state.conversation.messages.last_mut().unwrap() = outcome.message;
            }
        }
        state.status = AgentStatus::Complete;
        Ok(Ok(state))
    }

    fn fail_step_limit(&self, mut state: AgentState) -> AgentState {
        state.status = AgentStatus::Failed { error: "Maximum step limit reached".into() };
        state.log("[system] Step limit reached");
        state
    }

    async fn fail_with_event(&self, mut state: AgentState, sink: &dyn EventSink, error: AgentError) -> AgentState {
        let reason = error.to_string();
        state.status = AgentStatus::Failed { error: reason.clone() };
        self.emit(sink, AgentEvent::AgentFailed { agent_id: self.id.clone(), reason }).await;
        state
    }

    /// Dispatches `tool_calls` through `state.tools` under the loop's
    /// configured [`ExecutionStrategy`], appending one `Message::Tool` per
    /// call in call order regardless of execution order, and (if `sink` is
    /// given) emitting the started/completed/failed events around them.
    async fn dispatch_tools(
        &self,
        state: &mut AgentState,
        tool_calls: &[ToolCall],
        sink: Option<&dyn EventSink>,
    ) {
        let requests: Vec<ToolCallRequest> = tool_calls
            .iter()
            .map(|call| ToolCallRequest { name: call.name.clone(), parameters: call.arguments.clone() })
            .collect();

        if let Some(sink) = sink {
            for call in tool_calls {
                self.emit(
                    sink,
                    AgentEvent::ToolCallStarted { step: state.steps_taken + 1, tool_call_id: call.id.clone(), tool_name: call.name.clone() },
                )
                .await;
            }
        }

        let started = Instant::now();
        let results = state.tools.execute_all(requests, self.execution_strategy).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        for (call, result) in tool_calls.iter().zip(results.into_iter()) {
            match result {
                Ok(value) => {
                    if let Some(sink) = sink {
                        self.emit(
                            sink,
                            AgentEvent::ToolCallCompleted {
                                step: state.steps_taken + 1,
                                tool_call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                                duration_ms,
                            },
                        )
                        .await;
                    }
                    state.conversation.push(Message::tool_result(call.id.clone(), render_tool_value(&value), false));
                }
                Err(tool_error) => {
                    let error_json = json!({
                        "isError": true,
                        "type": tool_error_kind(&tool_error),
                        "message": tool_error.to_string(),
                    });
                    if let Some(sink) = sink {
                        self.emit(
                            sink,
                            AgentEvent::ToolCallFailed {
                                step: state.steps_taken + 1,
                                tool_call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                                error: error_json.to_string(),
                            },
                        )
                        .await;
                    }
                    state.conversation.push(Message::tool_result(call.id.clone(), error_json.to_string(), true));
                }
            }
        }
    }

    /// Builds the target's child state per the handoff-execution contract
    /// and recursively runs it, returning its result directly — the caller
    /// (`run`/`run_with_events`) returns whatever this produces as its own
    /// result, so a handoff never surfaces `HandoffRequested` as a final
    /// status.
    async fn execute_handoff(
        &self,
        source: AgentState,
        target: HandoffTarget,
        reason: String,
        sink: Option<&dyn EventSink>,
    ) -> Result<AgentState, AgentError> {
        if let Some(sink) = sink {
            self.emit(
                sink,
                AgentEvent::HandoffStarted {
                    step: source.steps_taken,
                    handoff: target.handoff.clone(),
                    reason: reason.clone(),
                },
            )
            .await;
        }

        let mut child = AgentState::new(source.remaining_steps());
        child.conversation = if target.handoff.preserve_context {
            source.conversation.clone()
        } else {
            let mut conversation = crate::cloudllm::message::Conversation::new();
            if let Some(last_user) = last_user_message(&source.conversation) {
                conversation.push(last_user);
            }
            conversation
        };
        child.system_message =
            if target.handoff.transfer_system_message { source.system_message.clone() } else { None };
        child.tools = target.tools.clone();
        child.initial_query = source.initial_query.clone();
        child.completion_options = source.completion_options.clone();
        child.available_handoffs = Vec::new();
        child.log(format!("[handoff] from `{}` to `{}`: {reason}", self.id, target.handoff.target_agent));

        let result = if let Some(sink) = sink {
            target.agent.run_with_events(child, sink).await
        } else {
            target.agent.run(child).await
        };

        if let Some(sink) = sink {
            self.emit(
                sink,
                AgentEvent::HandoffCompleted {
                    step: source.steps_taken,
                    target_agent: target.handoff.target_agent.clone(),
                    success: matches!(&result, Ok(s) if matches!(s.status, AgentStatus::Complete)),
                },
            )
            .await;
        }

        result
    }

    async fn emit(&self, sink: &dyn EventSink, event: AgentEvent) {
        sink.on_event(&event).await;
        self.trace(&event);
    }

    fn trace(&self, event: &AgentEvent) {
        if let Some(writer) = &self.trace_writer {
            if let Err(e) = writer.record(event) {
                log::warn!("failed to write trace for agent {}: {e}", self.id);
            }
        }
    }
}

fn blocked_reason(state: &AgentState) -> String {
    match &state.status {
        AgentStatus::Failed { error } => error.clone(),
        _ => "blocked".to_string(),
    }
}

/// Builds the [`CompletionOptions`] actually sent for this step: the
/// state's configured base options, with `tools` overwritten by the
/// registry attached to `state` plus one synthesized tool per available
/// handoff.
fn effective_completion_options(state: &AgentState) -> CompletionOptions {
    let mut options = state.completion_options.clone();
    let mut tools: Vec<ToolSchema> = state.tools.definitions().map(ToolSchema::from).collect();
    for target in &state.available_handoffs {
        let reason_suffix =
            target.handoff.transfer_reason.as_ref().map(|r| format!(" {r}")).unwrap_or_default();
        tools.push(ToolSchema {
            name: target.handoff.tool_name(),
            description: format!("Hand off this query to a specialist agent.{reason_suffix}"),
            parameters_schema: json!({
                "type": "object",
                "properties": { "reason": { "type": "string" } },
                "required": ["reason"],
            }),
        });
    }
    options.tools = tools;
    options
}

/// Finds the first tool call whose name matches a configured handoff's
/// synthesized tool name, returning the matching target and the reason
/// parsed from the call's arguments (falling back to the handoff's
/// configured reason, then `"No reason provided"`).
fn detect_handoff<'a>(
    tool_calls: &[ToolCall],
    handoffs: &'a [HandoffTarget],
) -> Option<(&'a HandoffTarget, String)> {
    for call in tool_calls {
        if let Some(target) = handoffs.iter().find(|t| t.handoff.tool_name() == call.name) {
            let reason = call
                .arguments
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| target.handoff.transfer_reason.clone())
                .unwrap_or_else(|| "No reason provided".to_string());
            return Some((target, reason));
        }
    }
    None
}

fn last_user_message(conversation: &crate::cloudllm::message::Conversation) -> Option<Message> {
    conversation.messages.iter().rev().find(|m| matches!(m, Message::User { .. })).cloned()
}

fn replace_last_user_message(state: &mut AgentState, replacement: Message) {
    if let Some(idx) = state.conversation.messages.iter().rposition(|m| matches!(m, Message::User { .. })) {
        state.conversation.messages[idx] = replacement;
    }
}

fn render_tool_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tool_error_kind(error: &crate::cloudllm::tool::ToolError) -> &'static str {
    use crate::cloudllm::tool::ToolError;
    match error {
        ToolError::NotFound(_) => "NotFound",
        ToolError::InvalidParameters(_) => "BadArguments",
        ToolError::ExecutionFailed(_) => "Handler",
        ToolError::Timeout(_) => "Timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client::Completion;
    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Message>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Message>) -> Arc<Self> {
            Arc::new(ScriptedClient { responses: Mutex::new(responses), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn complete(&self, _messages: &[Message], _options: &CompletionOptions) -> Result<Completion, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let message = self.responses.lock().unwrap().remove(0);
            Ok(Completion { message, prompt_tokens: 10, completion_tokens: 5 })
        }

        async fn stream_complete(
            &self,
            messages: &[Message],
            options: &CompletionOptions,
        ) -> Result<BoxStream<'static, Result<StreamedChunk, AgentError>>, AgentError> {
            let completion = self.complete(messages, options).await?;
            let mut chunks = Vec::new();
            if !completion.message.content().is_empty() {
                chunks.push(Ok(StreamedChunk::TextDelta(completion.message.content().to_string())));
            }
            for call in completion.message.tool_calls() {
                chunks.push(Ok(StreamedChunk::ToolCall(call.clone())));
            }
            chunks.push(Ok(StreamedChunk::Done { prompt_tokens: 10, completion_tokens: 5 }));
            Ok(Box::pin(stream::iter(chunks)))
        }

        fn context_window(&self) -> usize {
            8000
        }
    }

    #[tokio::test]
    async fn completes_immediately_when_no_tool_calls_are_requested() {
        let client = ScriptedClient::new(vec![Message::assistant("done")]);
        let agent = AgentLoop::new("agent-1", client);
        let mut state = AgentState::new(5);
        state.conversation.push(Message::user("hello"));
        let result = agent.run(state).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        assert_eq!(result.steps_taken, 1);
    }

    #[tokio::test]
    async fn streaming_run_emits_text_delta_and_completes() {
        let client = ScriptedClient::new(vec![Message::assistant("The answer is 4.")]);
        let agent = AgentLoop::new("agent-1", client);
        let mut state = AgentState::new(5);
        state.conversation.push(Message::user("What is 2+2?"));

        struct RecordingSink(tokio::sync::Mutex<Vec<AgentEvent>>);
        #[async_trait]
        impl EventSink for RecordingSink {
            async fn on_event(&self, event: &AgentEvent) {
                self.0.lock().await.push(event.clone());
            }
        }
        let sink = RecordingSink(tokio::sync::Mutex::new(Vec::new()));
        let result = agent.run_with_events(state.clone(), &sink).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        let events = sink.0.lock().await;
        assert!(events.iter().any(|e| matches!(e, AgentEvent::TextDelta { .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::AgentCompleted { .. })));
    }

    #[tokio::test]
    async fn fails_when_step_budget_is_exhausted() {
        let client = ScriptedClient::new(vec![
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall { id: "c1".into(), name: "noop".into(), arguments: Value::Null }],
            ),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall { id: "c2".into(), name: "noop".into(), arguments: Value::Null }],
            ),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(crate::cloudllm::tool::ToolDefinition::new(
            "noop",
            "does nothing",
            Value::Null,
            |_: Value| async move { Ok(Value::Null) },
        ));
        let agent = AgentLoop::new("agent-1", client);
        let mut state = AgentState::new(2).with_tools(tools);
        state.conversation.push(Message::user("hello"));
        let result = agent.run(state).await.unwrap();
        assert!(matches!(result.status, AgentStatus::Failed { .. }));
        let tool_messages =
            result.conversation.messages.iter().filter(|m| matches!(m, Message::Tool { .. })).count();
        assert_eq!(tool_messages, 2);
    }

    #[tokio::test]
    async fn handoff_runs_the_target_agent_and_returns_its_result() {
        let source_client = ScriptedClient::new(vec![Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: crate::cloudllm::state::handoff_tool_name("specialist"),
                arguments: serde_json::json!({"reason": "needs a specialist"}),
            }],
        )]);
        let target_client = ScriptedClient::new(vec![Message::assistant("Specialist answer.")]);
        let target_agent = Arc::new(AgentLoop::new("specialist", target_client));

        let handoff = Handoff::new("specialist");
        let handoff_target = HandoffTarget::new(handoff, target_agent, ToolRegistry::new());

        let source_agent = AgentLoop::new("agent-1", source_client);
        let mut state = AgentState::new(5).with_handoffs(vec![handoff_target]);
        state.conversation.push(Message::user("hello"));

        let result = source_agent.run(state).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        assert!(result.conversation.messages.iter().any(|m| m.content() == "Specialist answer."));
        assert!(result.logs.iter().any(|l| l.contains("needs a specialist")));
    }

    #[tokio::test]
    async fn unmatched_handoff_like_tool_name_is_treated_as_a_regular_unknown_tool() {
        let client = ScriptedClient::new(vec![
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall { id: "c1".into(), name: "handoff_to_agent_deadbeef0000".into(), arguments: Value::Null }],
            ),
            Message::assistant("done anyway"),
        ]);
        let agent = AgentLoop::new("agent-1", client);
        let mut state = AgentState::new(5);
        state.conversation.push(Message::user("hello"));
        let result = agent.run(state).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        let tool_message = result
            .conversation
            .messages
            .iter()
            .find(|m| matches!(m, Message::Tool { .. }))
            .unwrap();
        assert!(tool_message.content().contains("NotFound"));
    }
}
