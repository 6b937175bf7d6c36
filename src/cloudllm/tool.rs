// src/cloudllm/tool.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

/// Mirrors the teacher's `ToolError` enum in `tool_protocol.rs` — a closed,
/// hand-written error type rather than a boxed `dyn Error`, so registry
/// callers can match on failure kind without downcasting.
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    InvalidParameters(String),
    ExecutionFailed(String),
    Timeout(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {name}"),
            ToolError::InvalidParameters(msg) => write!(f, "invalid parameters: {msg}"),
            ToolError::ExecutionFailed(msg) => write!(f, "execution failed: {msg}"),
            ToolError::Timeout(msg) => write!(f, "tool call timed out: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// A pending tool invocation, exactly the shape the teacher's
/// `planner.rs::ToolCallRequest` already uses — name plus a raw JSON
/// parameter blob, decoded by each handler itself.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub parameters: Value,
}

/// The executable half of a [`ToolDefinition`]. A trait object rather than
/// a boxed closure so handlers can carry their own state (an HTTP client,
/// an open file handle) the way the teacher's `ToolProtocol` implementors do.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, parameters: Value) -> Result<Value, ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, parameters: Value) -> Result<Value, ToolError> {
        (self)(parameters).await
    }
}

/// The provider-facing half of a [`ToolDefinition`]: name, description, and
/// JSON-Schema parameters, with the handler stripped out. This is what
/// actually rides along on [`crate::cloudllm::client::CompletionOptions::tools`]
/// — a handler (`Arc<dyn ToolHandler>`) has no business crossing into a
/// wire-format request, and isn't `Serialize` besides.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

impl From<&ToolDefinition> for ToolSchema {
    fn from(tool: &ToolDefinition) -> Self {
        ToolSchema {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters_schema: tool.parameters_schema.clone(),
        }
    }
}

/// A tool's registration: its name, the JSON-Schema describing its
/// parameters (surfaced to the model as part of the completion request),
/// and the handler that actually runs it.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            handler: Arc::new(handler),
        }
    }
}

/// How a batch of tool calls requested in a single assistant turn should be
/// executed. Grounded in the teacher's `OrchestrationMode` (`orchestration.rs`)
/// and `execute_parallel`'s `tokio::spawn` fan-out/join pattern.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionStrategy {
    /// One call at a time, in request order.
    Sequential,
    /// All calls concurrently, unbounded.
    Parallel,
    /// All calls concurrently, at most `n` in flight at once.
    ParallelWithLimit(usize),
}

/// The name-indexed set of tools available to an agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Executes every call in `requests` under `strategy`, returning results
    /// in the same order the requests were given regardless of completion
    /// order — callers pair result `i` with request `i` to build the
    /// matching `Message::Tool` turns.
    pub async fn execute_all(
        &self,
        requests: Vec<ToolCallRequest>,
        strategy: ExecutionStrategy,
    ) -> Vec<Result<Value, ToolError>> {
        match strategy {
            ExecutionStrategy::Sequential => {
                let mut results = Vec::with_capacity(requests.len());
                for request in requests {
                    results.push(self.execute_one(request).await);
                }
                results
            }
            ExecutionStrategy::Parallel => self.execute_concurrent(requests, None).await,
            ExecutionStrategy::ParallelWithLimit(limit) => {
                self.execute_concurrent(requests, Some(limit)).await
            }
        }
    }

    async fn execute_one(&self, request: ToolCallRequest) -> Result<Value, ToolError> {
        match self.tools.get(&request.name) {
            Some(tool) => tool.handler.call(request.parameters).await,
            None => Err(ToolError::NotFound(request.name)),
        }
    }

    async fn execute_concurrent(
        &self,
        requests: Vec<ToolCallRequest>,
        limit: Option<usize>,
    ) -> Vec<Result<Value, ToolError>> {
        let semaphore = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let handler = self.tools.get(&request.name).map(|tool| tool.handler.clone());
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match &semaphore {
                    Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore never closed")),
                    None => None,
                };
                match handler {
                    Some(handler) => handler.call(request.parameters).await,
                    None => Err(ToolError::NotFound(request.name)),
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    results.push(Err(ToolError::ExecutionFailed(format!(
                        "tool task panicked: {join_error}"
                    ))));
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::new("echo", "echoes its input", json!({"type": "object"}), |params: Value| async move {
            Ok(params)
        })
    }

    #[tokio::test]
    async fn sequential_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        let requests = vec![
            ToolCallRequest { name: "echo".into(), parameters: json!(1) },
            ToolCallRequest { name: "echo".into(), parameters: json!(2) },
            ToolCallRequest { name: "echo".into(), parameters: json!(3) },
        ];
        let results = registry.execute_all(requests, ExecutionStrategy::Sequential).await;
        let values: Vec<Value> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn parallel_preserves_order_despite_concurrency() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        let requests: Vec<_> = (0..8)
            .map(|i| ToolCallRequest { name: "echo".into(), parameters: json!(i) })
            .collect();
        let results = registry.execute_all(requests, ExecutionStrategy::ParallelWithLimit(3)).await;
        let values: Vec<i64> = results.into_iter().map(|r| r.unwrap().as_i64().unwrap()).collect();
        assert_eq!(values, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_tool_yields_not_found() {
        let registry = ToolRegistry::new();
        let requests = vec![ToolCallRequest { name: "missing".into(), parameters: json!(null) }];
        let results = registry.execute_all(requests, ExecutionStrategy::Sequential).await;
        assert!(matches!(results[0], Err(ToolError::NotFound(_))));
    }
}
