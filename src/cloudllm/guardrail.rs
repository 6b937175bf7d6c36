// src/cloudllm/guardrail.rs

use async_trait::async_trait;

use crate::cloudllm::error::AgentError;
use crate::cloudllm::message::Message;

/// The verdict a single [`Guardrail`] reaches about one message.
///
/// Extends the teacher's binary `PolicyDecision::{Allow, Deny}`
/// (`planner.rs`) with a `Fix` variant: a guardrail chain in this crate is
/// allowed to repair a message in place (redact a secret, truncate an
/// over-long argument) rather than only ever accepting or rejecting it.
#[derive(Debug, Clone)]
pub enum GuardrailAction {
    /// The message passes unchanged.
    Allow,
    /// The message is replaced with the given, corrected message.
    Fix(Message),
    /// The message passes, but the violation is recorded for the caller.
    Warn(GuardrailViolation),
    /// The message is rejected outright; the chain stops here.
    Block(String),
}

#[derive(Debug, Clone)]
pub struct GuardrailViolation {
    pub guardrail: String,
    pub message: String,
}

/// One link in a guardrail chain, evaluated against either the input
/// headed into the model or the output coming back from it. Shaped after
/// the teacher's `PolicyEngine` trait (`allow_tool_call(&self, call) ->
/// PolicyDecision`) but generalized from tool calls to arbitrary messages
/// and from a binary verdict to the four-way `GuardrailAction`.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn evaluate(&self, message: &Message) -> Result<GuardrailAction, AgentError>;
}

/// Runs every guardrail in `chain` against `message` in order. A `Block`
/// short-circuits the remaining chain. A `Fix` replaces the message that
/// subsequent guardrails see, so later guardrails validate the *repaired*
/// message, not the original. `Warn` violations accumulate across the whole
/// chain rather than stopping it, mirroring the teacher's habit of never
/// dropping diagnostic information (`ToolResult::metadata`).
///
/// An empty chain always returns `Allow` with the message untouched — the
/// identity law a guardrail chain must satisfy per its contract.
pub async fn run_chain(
    chain: &[Box<dyn Guardrail>],
    message: Message,
) -> Result<GuardrailOutcome, AgentError> {
    let mut current = message;
    let mut violations = Vec::new();

    for guardrail in chain {
        match guardrail.evaluate(&current).await? {
            GuardrailAction::Allow => {}
            GuardrailAction::Fix(fixed) => current = fixed,
            GuardrailAction::Warn(violation) => violations.push(violation),
            GuardrailAction::Block(reason) => {
                return Ok(GuardrailOutcome {
                    message: current,
                    violations,
                    blocked: Some(reason),
                });
            }
        }
    }

    Ok(GuardrailOutcome { message: current, violations, blocked: None })
}

/// The result of running a message through a full guardrail chain.
#[derive(Debug, Clone)]
pub struct GuardrailOutcome {
    /// The message after any `Fix` rewrites; unchanged if no guardrail
    /// rewrote it or the chain was empty.
    pub message: Message,
    pub violations: Vec<GuardrailViolation>,
    /// `Some(reason)` if some guardrail blocked the chain.
    pub blocked: Option<String>,
}

impl GuardrailOutcome {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAllow;
    #[async_trait]
    impl Guardrail for AlwaysAllow {
        fn name(&self) -> &str {
            "always_allow"
        }
        async fn evaluate(&self, _message: &Message) -> Result<GuardrailAction, AgentError> {
            Ok(GuardrailAction::Allow)
        }
    }

    struct BlockIfContains(&'static str);
    #[async_trait]
    impl Guardrail for BlockIfContains {
        fn name(&self) -> &str {
            "block_if_contains"
        }
        async fn evaluate(&self, message: &Message) -> Result<GuardrailAction, AgentError> {
            if message.content().contains(self.0) {
                Ok(GuardrailAction::Block(format!("contains banned substring `{}`", self.0)))
            } else {
                Ok(GuardrailAction::Allow)
            }
        }
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let chain: Vec<Box<dyn Guardrail>> = vec![];
        let outcome = run_chain(&chain, Message::user("hello")).await.unwrap();
        assert!(!outcome.is_blocked());
        assert_eq!(outcome.message, Message::user("hello"));
        assert!(outcome.violations.is_empty());
    }

    #[tokio::test]
    async fn block_short_circuits_remaining_chain() {
        let chain: Vec<Box<dyn Guardrail>> =
            vec![Box::new(BlockIfContains("secret")), Box::new(AlwaysAllow)];
        let outcome = run_chain(&chain, Message::user("my secret key")).await.unwrap();
        assert!(outcome.is_blocked());
    }

    #[tokio::test]
    async fn fix_rewrites_message_seen_by_later_guardrails() {
        struct Redact;
        #[async_trait]
        impl Guardrail for Redact {
            fn name(&self) -> &str {
                "redact"
            }
            async fn evaluate(&self, message: &Message) -> Result<GuardrailAction, AgentError> {
                if message.content().contains("secret") {
                    Ok(GuardrailAction::Fix(Message::user("[redacted]")))
                } else {
                    Ok(GuardrailAction::Allow)
                }
            }
        }
        let chain: Vec<Box<dyn Guardrail>> = vec![Box::new(Redact), Box::new(BlockIfContains("secret"))];
        let outcome = run_chain(&chain, Message::user("my secret key")).await.unwrap();
        assert!(!outcome.is_blocked());
        assert_eq!(outcome.message, Message::user("[redacted]"));
    }
}
