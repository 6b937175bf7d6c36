// src/cloudllm/dag/node.rs

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cloudllm::dag::policy::NodePolicy;
use crate::cloudllm::error::AgentError;

/// The executable unit a [`Node`] wraps. Typed node input/output (`I`/`O`
/// in the original design) is routed through `serde_json::Value` at the
/// scheduler boundary — the same type-erasure the teacher leans on for
/// `ToolProtocol::execute_tool(params: Value) -> Result<Value, ToolError>`,
/// rather than a bespoke `Any`-downcasting scheme.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, input: Value) -> Result<Value, AgentError>;
}

#[async_trait]
impl<F, Fut> NodeExecutor for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, AgentError>> + Send,
{
    async fn execute(&self, input: Value) -> Result<Value, AgentError> {
        (self)(input).await
    }
}

/// One node in a [`Plan`](super::scheduler::Plan): an id, the ids of nodes
/// whose output it depends on, the executor that runs it, and an optional
/// retry/timeout/fallback policy.
#[derive(Clone)]
pub struct Node {
    pub id: String,
    pub dependencies: Vec<String>,
    pub executor: Arc<dyn NodeExecutor>,
    pub policy: NodePolicy,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl Node {
    pub fn new(id: impl Into<String>, executor: impl NodeExecutor + 'static) -> Self {
        Node {
            id: id.into(),
            dependencies: Vec::new(),
            executor: Arc::new(executor),
            policy: NodePolicy::default(),
        }
    }

    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.dependencies.push(node_id.into());
        self
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }
}
