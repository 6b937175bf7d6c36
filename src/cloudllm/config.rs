//! Process-wide defaults for knobs that aren't already expressed as builder
//! options on individual components. Applications construct this directly;
//! no file-format parsing dependency is introduced, matching the teacher's
//! own `CloudLLMConfig::default()` approach.
//!
//! # Example
//!
//! ```rust
//! use cloudllm::config::CloudLLMAgentsConfig;
//!
//! let config = CloudLLMAgentsConfig::default();
//! assert_eq!(config.default_step_budget, 50);
//! ```

/// Global configuration for defaults not otherwise exposed as per-component
/// builder options.
pub struct CloudLLMAgentsConfig {
    /// Upper bound on agent-loop steps when a caller doesn't specify one.
    pub default_step_budget: u32,
    /// Tokens reserved for the completion on top of conversation history,
    /// when a caller doesn't pass `CompletionOptions::reserve_tokens`.
    pub default_completion_headroom_tokens: usize,
    /// Default wall-clock budget for a single tool invocation.
    pub default_tool_timeout_ms: u64,
}

impl Default for CloudLLMAgentsConfig {
    fn default() -> Self {
        CloudLLMAgentsConfig {
            default_step_budget: 50,
            default_completion_headroom_tokens: 1024,
            default_tool_timeout_ms: 30_000,
        }
    }
}
