// src/cloudllm/error.rs

use std::fmt;

/// The closed error taxonomy shared by every fallible operation in this
/// crate: LLM client calls, tool execution, guardrail evaluation, state
/// transitions, DAG scheduling and RAG sync all resolve into one of these
/// variants so callers can match on a single type regardless of which
/// subsystem raised it.
#[derive(Debug)]
pub enum AgentError {
    /// The LLM provider rejected credentials or the request was unauthenticated.
    AuthError(String),
    /// The LLM provider is throttling requests.
    RateLimitError(String),
    /// A caller-supplied value failed validation before it ever reached the network.
    ValidationError { field: String, message: String },
    /// The LLM provider responded with a non-success status.
    ServiceError { status: u16, message: String },
    /// The request never reached the provider, or the response never came back.
    NetworkError(String),
    /// A named processing stage (parsing, pruning, tool dispatch, ...) failed.
    ProcessingError { stage: String, message: String },
    /// An operation exceeded its deadline.
    TimeoutError(String),
    /// A referenced tool, agent, document or node does not exist.
    NotFoundError(String),
    /// The crate or caller was misconfigured (missing budget, bad strategy, ...).
    ConfigurationError(String),
    /// Catch-all for provider-reported errors that don't fit the above shape.
    LLMError(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::AuthError(msg) => write!(f, "authentication error: {msg}"),
            AgentError::RateLimitError(msg) => write!(f, "rate limited: {msg}"),
            AgentError::ValidationError { field, message } => {
                write!(f, "validation error on `{field}`: {message}")
            }
            AgentError::ServiceError { status, message } => {
                write!(f, "service error ({status}): {message}")
            }
            AgentError::NetworkError(msg) => write!(f, "network error: {msg}"),
            AgentError::ProcessingError { stage, message } => {
                write!(f, "processing error in `{stage}`: {message}")
            }
            AgentError::TimeoutError(msg) => write!(f, "timeout: {msg}"),
            AgentError::NotFoundError(msg) => write!(f, "not found: {msg}"),
            AgentError::ConfigurationError(msg) => write!(f, "configuration error: {msg}"),
            AgentError::LLMError(msg) => write!(f, "LLM error: {msg}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl AgentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn processing(stage: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::ProcessingError {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// True for errors worth retrying unchanged (rate limits, network blips,
    /// timeouts); false for errors that will reproduce on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::RateLimitError(_) | AgentError::NetworkError(_) | AgentError::TimeoutError(_)
        )
    }
}
