// src/cloudllm/pruner.rs

use crate::cloudllm::message::{estimate_message_tokens, Conversation, Message};

/// Bounds on how large a conversation is allowed to grow before the next
/// completion request, applied by [`PruningStrategy::prune`].
#[derive(Debug, Clone)]
pub struct ContextWindowConfig {
    pub max_tokens: usize,
    /// Optional hard cap on message count, independent of `max_tokens`.
    pub max_messages: Option<usize>,
    /// Retain any in-conversation `Message::System` regardless of age when
    /// true, the way the teacher's `LLMSession` never lets its
    /// `system_prompt` fall out of history.
    pub preserve_system_message: bool,
    /// The last `min_recent_turns` turns (a turn starts at a `User` message
    /// and runs to the next one) are never dropped, even if the result
    /// exceeds `max_tokens`/`max_messages`.
    pub min_recent_turns: usize,
    /// Messages never pruned regardless of strategy — typically the system
    /// prompt — kept at the front the way the teacher's `LLMSession`
    /// reinserts its `system_prompt` before every send and never counts it
    /// toward the trimmable history.
    pub pinned_prefix_len: usize,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        ContextWindowConfig {
            max_tokens: usize::MAX,
            max_messages: None,
            preserve_system_message: true,
            min_recent_turns: 0,
            pinned_prefix_len: 1,
        }
    }
}

impl ContextWindowConfig {
    fn exceeds_bounds(&self, messages: &[Message]) -> bool {
        estimated_tokens(messages) > self.max_tokens
            || self.max_messages.map_or(false, |max| messages.len() > max)
    }
}

/// A pluggable policy for shrinking a conversation back under
/// `ContextWindowConfig::max_tokens`. Modeled on the teacher's
/// `ContextStrategy` trait (`context_strategy.rs`), generalized from a
/// single `TrimStrategy` implementor into a closed strategy enum so callers
/// can select a behavior declaratively instead of constructing a trait object.
#[derive(Clone)]
pub enum PruningStrategy {
    /// Drop the oldest non-pinned messages first, same loop as the
    /// teacher's `LLMSession::trim_conversation_history`.
    OldestFirst,
    /// Drop from the middle of the conversation, keeping the pinned prefix
    /// and a trailing window of recent turns intact.
    MiddleOut,
    /// Keep only the last `n` user/assistant turns (plus their tool-call
    /// pairs) after the pinned prefix.
    RecentTurnsOnly(usize),
    /// Caller-supplied pruning logic for anything the built-ins don't cover.
    Custom(std::sync::Arc<dyn Fn(&Conversation, &ContextWindowConfig) -> Conversation + Send + Sync>),
}

impl std::fmt::Debug for PruningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PruningStrategy::OldestFirst => write!(f, "OldestFirst"),
            PruningStrategy::MiddleOut => write!(f, "MiddleOut"),
            PruningStrategy::RecentTurnsOnly(n) => write!(f, "RecentTurnsOnly({n})"),
            PruningStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl PruningStrategy {
    pub fn prune(&self, conversation: &Conversation, config: &ContextWindowConfig) -> Conversation {
        let pruned = match self {
            PruningStrategy::OldestFirst => prune_oldest_first(conversation, config),
            PruningStrategy::MiddleOut => prune_middle_out(conversation, config),
            PruningStrategy::RecentTurnsOnly(n) => prune_recent_turns_only(conversation, config, *n),
            PruningStrategy::Custom(f) => {
                let candidate = f(conversation, config);
                if !candidate.tool_call_pairs_intact() {
                    log::warn!(
                        "custom pruning strategy orphaned a tool-call/tool-result pair; \
                         returning the conversation unchanged"
                    );
                    return conversation.clone();
                }
                candidate
            }
        };
        debug_assert!(
            pruned.tool_call_pairs_intact(),
            "pruning strategy must never orphan a tool-call/tool-result pair"
        );
        pruned
    }
}

/// Extends `messages[start..]` backward (toward index 0) while the group at
/// `start - 1` is a `Tool` result, so a trailing tool-result never gets
/// separated from the `Assistant` call it answers. Used by every built-in
/// strategy when it decides "keep everything from index `start` onward".
fn extend_to_include_orphaned_tool_results(messages: &[Message], mut start: usize) -> usize {
    while start > 0 && matches!(messages.get(start), Some(Message::Tool { .. })) {
        start -= 1;
    }
    start
}

/// The earliest index that must not be pruned away because it falls within
/// the last `min_recent_turns` turns (a turn starts at a `User` message).
/// `min_recent_turns == 0` places no floor beyond the pinned prefix.
fn min_recent_turns_start(messages: &[Message], pinned_len: usize, min_recent_turns: usize) -> usize {
    if min_recent_turns == 0 {
        return messages.len();
    }
    let mut turns_seen = 0;
    let mut start = messages.len();
    for idx in (pinned_len..messages.len()).rev() {
        if matches!(messages[idx], Message::User { .. }) {
            turns_seen += 1;
            if turns_seen > min_recent_turns {
                break;
            }
        }
        start = idx;
    }
    extend_to_include_orphaned_tool_results(messages, start)
}

/// Re-inserts any `Message::System` found in `messages[dropped_range]` back
/// into `kept`, right after the pinned prefix and in original relative
/// order, when `config.preserve_system_message` is set. Used by strategies
/// that drop a contiguous middle range and so might otherwise discard an
/// in-conversation system message that isn't part of the pinned prefix.
fn reinsert_protected_system_messages(
    messages: &[Message],
    dropped_range: std::ops::Range<usize>,
    pinned_len: usize,
    kept: &mut Vec<Message>,
    config: &ContextWindowConfig,
) {
    if !config.preserve_system_message {
        return;
    }
    let mut insert_at = pinned_len.min(kept.len());
    for idx in dropped_range {
        if let Some(message @ Message::System { .. }) = messages.get(idx) {
            kept.insert(insert_at, message.clone());
            insert_at += 1;
        }
    }
}

fn prune_oldest_first(conversation: &Conversation, config: &ContextWindowConfig) -> Conversation {
    let messages = &conversation.messages;
    let pinned_len = config.pinned_prefix_len.min(messages.len());
    let protected_start = min_recent_turns_start(messages, pinned_len, config.min_recent_turns).max(pinned_len);
    let mut removable = protected_start - pinned_len;
    let mut kept: Vec<Message> = messages.clone();

    while config.exceeds_bounds(&kept) && removable > 0 {
        // Find the first prunable message within the still-removable middle
        // window, skipping any protected in-conversation system message.
        let mut idx = pinned_len;
        while idx < pinned_len + removable {
            if config.preserve_system_message && matches!(kept[idx], Message::System { .. }) {
                idx += 1;
                continue;
            }
            break;
        }
        if idx >= pinned_len + removable {
            break; // everything left in the window is a protected system message
        }

        kept.remove(idx);
        removable -= 1;
        // Dropping an `Assistant` message may orphan a following `Tool`
        // result; drop it too so the pair is removed atomically.
        while matches!(kept.get(idx), Some(Message::Tool { .. })) {
            kept.remove(idx);
            removable = removable.saturating_sub(1);
        }
    }

    Conversation { messages: kept }
}

fn prune_middle_out(conversation: &Conversation, config: &ContextWindowConfig) -> Conversation {
    let messages = &conversation.messages;
    let pinned_len = config.pinned_prefix_len.min(messages.len());

    if !config.exceeds_bounds(messages) {
        return conversation.clone();
    }

    // Keep the pinned prefix and grow a trailing window from the end until
    // the budget is exhausted. Per the design decision for a split
    // assistant+tool-call group straddling the cut: the group is kept on
    // the trailing (recent) side, never the discarded middle.
    let mut trailing_start = messages.len();
    let mut kept_so_far: Vec<Message> = messages[..pinned_len].to_vec();

    while trailing_start > pinned_len {
        // Candidate: pull one more message group into the trailing window,
        // extended backward so a tool result is never separated from the
        // assistant call it answers.
        let candidate_start = extend_to_include_orphaned_tool_results(messages, trailing_start - 1);
        let mut candidate: Vec<Message> = kept_so_far.clone();
        candidate.extend_from_slice(&messages[candidate_start..trailing_start]);

        if config.exceeds_bounds(&candidate) && trailing_start != messages.len() {
            break;
        }
        kept_so_far = candidate;
        trailing_start = candidate_start;
    }

    // The trailing window must cover at least `min_recent_turns` turns even
    // if that means staying over budget.
    let floor = min_recent_turns_start(messages, pinned_len, config.min_recent_turns).max(pinned_len);
    if trailing_start > floor {
        trailing_start = floor;
        kept_so_far = messages[..pinned_len].to_vec();
        kept_so_far.extend_from_slice(&messages[trailing_start..]);
    }

    reinsert_protected_system_messages(messages, pinned_len..trailing_start, pinned_len, &mut kept_so_far, config);
    Conversation { messages: kept_so_far }
}

fn prune_recent_turns_only(conversation: &Conversation, config: &ContextWindowConfig, n: usize) -> Conversation {
    let messages = &conversation.messages;
    let pinned_len = config.pinned_prefix_len.min(messages.len());

    let mut turns_seen = 0;
    let mut start = messages.len();
    for idx in (pinned_len..messages.len()).rev() {
        if matches!(messages[idx], Message::User { .. }) {
            turns_seen += 1;
            if turns_seen > n {
                break;
            }
        }
        start = idx;
    }
    start = extend_to_include_orphaned_tool_results(messages, start);

    let floor = min_recent_turns_start(messages, pinned_len, config.min_recent_turns).max(pinned_len);
    if start > floor {
        start = floor;
    }

    let mut kept: Vec<Message> = messages[..pinned_len].to_vec();
    kept.extend_from_slice(&messages[start..]);
    reinsert_protected_system_messages(messages, pinned_len..start, pinned_len, &mut kept, config);
    Conversation { messages: kept }
}

fn estimated_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
