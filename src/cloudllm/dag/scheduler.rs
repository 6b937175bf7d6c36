// src/cloudllm/dag/scheduler.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::cloudllm::dag::node::Node;
use crate::cloudllm::error::AgentError;

/// A validated, ready-to-run directed acyclic graph of [`Node`]s.
#[derive(Default)]
pub struct Plan {
    nodes: HashMap<String, Node>,
}

impl Plan {
    pub fn new() -> Self {
        Plan { nodes: HashMap::new() }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Checks every dependency resolves to a node in the plan (no dangling
    /// fan-in) and that the dependency graph has no cycles.
    pub fn validate(&self) -> Result<(), AgentError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(AgentError::validation(
                        "dependencies",
                        format!("node `{}` depends on unknown node `{dep}`", node.id),
                    ));
                }
            }
        }

        #[derive(PartialEq, Clone, Copy)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> =
            self.nodes.keys().map(|id| (id.as_str(), Mark::Unvisited)).collect();

        fn visit<'a>(
            id: &'a str,
            nodes: &'a HashMap<String, Node>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), AgentError> {
            match marks.get(id).copied() {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    return Err(AgentError::validation("dependencies", format!("cycle detected at node `{id}`")));
                }
                _ => {}
            }
            marks.insert(id, Mark::InProgress);
            if let Some(node) = nodes.get(id) {
                for dep in &node.dependencies {
                    visit(dep, nodes, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in self.nodes.keys() {
            visit(id, &self.nodes, &mut marks)?;
        }
        Ok(())
    }

    /// Nodes with no dependencies.
    fn roots(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.as_str())
            .collect()
    }
}

/// Runs a [`Plan`] to completion, executing each wave of nodes whose
/// dependencies have all resolved concurrently (bounded by
/// `max_concurrency`, if set), mirroring the teacher's
/// `orchestration.rs::execute_parallel` fan-out/join pattern generalized
/// from a flat task list to dependency waves.
pub struct Scheduler {
    pub max_concurrency: Option<usize>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { max_concurrency: None }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Executes every node in `plan`, seeding root nodes (no dependencies)
    /// with `initial_input`. A node with dependencies receives a JSON
    /// object mapping each dependency id to that dependency's output.
    /// Returns every node's output keyed by node id, or the first
    /// unrecovered error (after policy retries/fallback are exhausted).
    pub async fn run(&self, plan: &Plan, initial_input: Value) -> Result<HashMap<String, Value>, AgentError> {
        plan.validate()?;

        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut remaining: HashSet<String> = plan.nodes.keys().cloned().collect();
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    plan.nodes[*id].dependencies.iter().all(|dep| outputs.contains_key(dep))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                return Err(AgentError::processing(
                    "dag_schedule",
                    "no ready nodes but unscheduled nodes remain; dependency graph is malformed",
                ));
            }

            let mut handles = Vec::with_capacity(ready.len());
            for id in &ready {
                let node = plan.nodes[id].clone();
                let input = if node.dependencies.is_empty() {
                    initial_input.clone()
                } else {
                    let mut map = Map::new();
                    for dep in &node.dependencies {
                        map.insert(dep.clone(), outputs[dep].clone());
                    }
                    Value::Object(map)
                };
                let semaphore = semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = match &semaphore {
                        Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore never closed")),
                        None => None,
                    };
                    let result = execute_with_policy(&node, input).await;
                    (node.id.clone(), result)
                }));
            }

            for handle in handles {
                let (id, result) = handle
                    .await
                    .map_err(|e| AgentError::processing("dag_schedule", format!("node task panicked: {e}")))?;
                outputs.insert(id, result?);
            }

            for id in &ready {
                remaining.remove(id);
            }
        }

        Ok(outputs)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn execute_with_policy(node: &Node, input: Value) -> Result<Value, AgentError> {
    let attempts = node.policy.retry.map(|r| r.max_attempts).unwrap_or(1);
    let backoff = node.policy.retry.map(|r| r.backoff);

    let mut last_error = None;
    for attempt in 0..attempts {
        let call = node.executor.execute(input.clone());
        let outcome = match node.policy.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::TimeoutError(format!("node `{}` timed out", node.id))),
            },
            None => call.await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = Some(e);
                if attempt + 1 < attempts {
                    if let Some(backoff) = backoff {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }

    match node.policy.fallback.clone() {
        Some(fallback) => Ok(fallback),
        None => Err(last_error.expect("loop always runs at least once")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::dag::policy::{NodePolicy, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn executes_in_dependency_order() {
        let mut plan = Plan::new();
        plan.add_node(Node::new("a", |input: Value| async move {
            Ok(Value::String(format!("a({input})")))
        }));
        plan.add_node(Node::new("b", |input: Value| async move {
            Ok(Value::String(format!("b({input})")))
        }).depends_on("a"));

        let outputs = Scheduler::new().run(&plan, Value::String("seed".into())).await.unwrap();
        assert!(outputs["a"].as_str().unwrap().contains("seed"));
        assert!(outputs["b"].as_str().unwrap().contains("a("));
    }

    #[tokio::test]
    async fn detects_cycles() {
        let mut plan = Plan::new();
        plan.add_node(Node::new("a", |v: Value| async move { Ok(v) }).depends_on("b"));
        plan.add_node(Node::new("b", |v: Value| async move { Ok(v) }).depends_on("a"));
        assert!(plan.validate().is_err());
    }

    #[tokio::test]
    async fn retry_policy_recovers_from_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let mut plan = Plan::new();
        plan.add_node(
            Node::new("flaky", move |_: Value| {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(AgentError::ProcessingError { stage: "flaky".into(), message: "boom".into() })
                    } else {
                        Ok(Value::Bool(true))
                    }
                }
            })
            .with_policy(NodePolicy::default().with_retry(RetryPolicy::new(3, Duration::from_millis(1)))),
        );
        let outputs = Scheduler::new().run(&plan, Value::Null).await.unwrap();
        assert_eq!(outputs["flaky"], Value::Bool(true));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fallback_is_used_after_retries_are_exhausted() {
        let mut plan = Plan::new();
        plan.add_node(
            Node::new("always_fails", |_: Value| async move {
                Err(AgentError::ProcessingError { stage: "x".into(), message: "nope".into() })
            })
            .with_policy(NodePolicy::default().with_fallback(Value::String("fallback".into()))),
        );
        let outputs = Scheduler::new().run(&plan, Value::Null).await.unwrap();
        assert_eq!(outputs["always_fails"], Value::String("fallback".into()));
    }
}
