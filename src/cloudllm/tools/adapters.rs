//! Thin [`ToolDefinition`] wrappers around the built-in tool structs in this
//! module, so they can be registered on a [`ToolRegistry`](crate::tool::ToolRegistry)
//! and dispatched by an [`AgentLoop`](crate::agent_loop::AgentLoop). The tools
//! themselves (`Calculator`, `Memory`, ...) stay free of any agent-loop
//! concept; these adapters are the only place that knows about JSON-Schema
//! parameter shapes and `ToolError` mapping, mirroring how the teacher keeps
//! protocol adapters (`tool_protocols.rs`) separate from the tool structs
//! they wrap.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::cloudllm::tool::{ToolDefinition, ToolError};
use crate::cloudllm::tools::bash::BashTool;
use crate::cloudllm::tools::calculator::Calculator;
use crate::cloudllm::tools::filesystem::FileSystemTool;
use crate::cloudllm::tools::http_client::HttpClient;
use crate::cloudllm::tools::memory::Memory;

/// Registers a stateless scientific calculator as a single `calculator` tool
/// taking `{"expression": string}` and returning `{"result": number}`.
pub fn calculator_tool() -> ToolDefinition {
    let calculator = Arc::new(Calculator::new());
    ToolDefinition::new(
        "calculator",
        "Evaluates a scientific math expression (arithmetic, trig, stats) and returns the numeric result.",
        json!({
            "type": "object",
            "properties": { "expression": { "type": "string" } },
            "required": ["expression"],
        }),
        move |params: Value| {
            let calculator = calculator.clone();
            async move {
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidParameters("missing `expression` string".into()))?;
                let result = calculator
                    .evaluate(expression)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "result": result }))
            }
        },
    )
}

/// Registers `memory_put`/`memory_get`/`memory_delete`/`memory_list` tools
/// sharing one [`Memory`] store, so an agent can persist scratch state
/// across steps (and, via `continue_conversation`, across turns).
pub fn memory_tools(memory: Arc<Memory>) -> Vec<ToolDefinition> {
    let put_memory = memory.clone();
    let get_memory = memory.clone();
    let delete_memory = memory.clone();
    let list_memory = memory;

    vec![
        ToolDefinition::new(
            "memory_put",
            "Stores a key/value pair, optionally with a TTL in seconds.",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "value": { "type": "string" },
                    "ttl_seconds": { "type": "integer" },
                },
                "required": ["key", "value"],
            }),
            move |params: Value| {
                let memory = put_memory.clone();
                async move {
                    let key = params
                        .get("key")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `key` string".into()))?
                        .to_string();
                    let value = params
                        .get("value")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `value` string".into()))?
                        .to_string();
                    let ttl = params.get("ttl_seconds").and_then(Value::as_u64);
                    memory.put(key, value, ttl);
                    Ok(json!({ "stored": true }))
                }
            },
        ),
        ToolDefinition::new(
            "memory_get",
            "Retrieves a previously stored value by key, or null if absent or expired.",
            json!({
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": ["key"],
            }),
            move |params: Value| {
                let memory = get_memory.clone();
                async move {
                    let key = params
                        .get("key")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `key` string".into()))?;
                    Ok(match memory.get(key, false) {
                        Some((value, _)) => json!({ "value": value }),
                        None => json!({ "value": null }),
                    })
                }
            },
        ),
        ToolDefinition::new(
            "memory_delete",
            "Deletes a stored key, returning whether it existed.",
            json!({
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": ["key"],
            }),
            move |params: Value| {
                let memory = delete_memory.clone();
                async move {
                    let key = params
                        .get("key")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `key` string".into()))?;
                    Ok(json!({ "deleted": memory.delete(key) }))
                }
            },
        ),
        ToolDefinition::new(
            "memory_list",
            "Lists every non-expired stored key.",
            json!({ "type": "object", "properties": {} }),
            move |_params: Value| {
                let memory = list_memory.clone();
                async move { Ok(json!({ "keys": memory.list_keys() })) }
            },
        ),
    ]
}

/// Registers `read_file`/`write_file` tools sandboxed to whatever root path
/// `fs` was constructed with.
pub fn filesystem_tools(fs: Arc<FileSystemTool>) -> Vec<ToolDefinition> {
    let read_fs = fs.clone();
    let write_fs = fs;

    vec![
        ToolDefinition::new(
            "read_file",
            "Reads the full contents of a file at a sandboxed relative path.",
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
            move |params: Value| {
                let fs = read_fs.clone();
                async move {
                    let path = params
                        .get("path")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `path` string".into()))?;
                    let content = fs
                        .read_file(path)
                        .await
                        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                    Ok(json!({ "content": content }))
                }
            },
        ),
        ToolDefinition::new(
            "write_file",
            "Writes content to a file at a sandboxed relative path, creating it if absent.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                },
                "required": ["path", "content"],
            }),
            move |params: Value| {
                let fs = write_fs.clone();
                async move {
                    let path = params
                        .get("path")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `path` string".into()))?;
                    let content = params
                        .get("content")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidParameters("missing `content` string".into()))?;
                    fs.write_file(path, content)
                        .await
                        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                    Ok(json!({ "written": true }))
                }
            },
        ),
    ]
}

/// Registers a `bash` tool running `cmd` under `bash`'s timeout and
/// command allow/deny lists and returning stdout/stderr/exit code.
pub fn bash_tool(bash: Arc<BashTool>) -> ToolDefinition {
    ToolDefinition::new(
        "bash",
        "Executes a shell command and returns its stdout, stderr, and exit code.",
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
        }),
        move |params: Value| {
            let bash = bash.clone();
            async move {
                let command = params
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidParameters("missing `command` string".into()))?;
                let result = bash
                    .execute(command)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "exit_code": result.exit_code,
                    "success": result.success,
                }))
            }
        },
    )
}

/// Registers an `http_get` tool issuing GET requests through `client`'s
/// domain allow/deny lists and timeout configuration.
pub fn http_get_tool(client: Arc<HttpClient>) -> ToolDefinition {
    ToolDefinition::new(
        "http_get",
        "Issues an HTTP GET request and returns the status code and response body.",
        json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"],
        }),
        move |params: Value| {
            let client = client.clone();
            async move {
                let url = params
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidParameters("missing `url` string".into()))?;
                let response = client
                    .get(url)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "status": response.status, "body": response.body }))
            }
        },
    )
}
