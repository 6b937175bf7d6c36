// src/cloudllm/dag/policy.rs

use std::time::Duration;

/// Retry/timeout/fallback wrapping for a single DAG node, applied around
/// whatever [`NodeExecutor`](super::node::NodeExecutor) the node wraps.
/// Composable the way the teacher layers tool-call error handling around a
/// bare `ToolProtocol::execute_tool` call rather than baking retries into
/// every protocol implementor.
#[derive(Debug, Clone, Default)]
pub struct NodePolicy {
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
    /// Output substituted in place of a node's result if every retry
    /// attempt still fails (or the node times out) after the timeout/retry
    /// policy above has been exhausted.
    pub fallback: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        RetryPolicy { max_attempts: max_attempts.max(1), backoff }
    }
}

impl NodePolicy {
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fallback(mut self, value: serde_json::Value) -> Self {
        self.fallback = Some(value);
        self
    }
}
