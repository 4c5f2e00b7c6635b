//! Request builders for the kinds of task an operator can submit.
//!
//! A [`TaskTemplate`] turns free-form input into a capability and payload, and
//! knows how to present that capability's output once the task completes.

use crate::protocol::decode_output;
use serde_json::{json, Value};

pub const SHELL_CAPABILITY: &str = "shell::bash";
pub const LLM_CAPABILITY_PREFIX: &str = "LLM::";

pub trait TaskTemplate: Send + Sync {
    /// Capability the task is submitted under.
    fn capability(&self) -> &str;

    /// Payload for the given operator input.
    fn build_payload(&self, input: &str) -> Value;

    /// Human-readable form of a completed task's output.
    fn render_output(&self, output: &Value) -> String {
        render_json(&decode_output(output))
    }
}

/// Escape `command` for use inside a single-quoted shell string.
pub fn escape_single_quotes(command: &str) -> String {
    command.replace('\'', r#"'"'"'"#)
}

/// Wrap `command` so it runs under `bash -c`.
pub fn bash_invocation(command: &str) -> String {
    format!("bash -c '{}'", escape_single_quotes(command))
}

/// Shell commands run by a shell-capable agent.
#[derive(Debug, Clone)]
pub struct ShellTemplate {
    capability: String,
}

impl ShellTemplate {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

impl Default for ShellTemplate {
    fn default() -> Self {
        Self::new(SHELL_CAPABILITY)
    }
}

impl TaskTemplate for ShellTemplate {
    fn capability(&self) -> &str {
        &self.capability
    }

    fn build_payload(&self, input: &str) -> Value {
        json!({ "command": bash_invocation(input) })
    }

    fn render_output(&self, output: &Value) -> String {
        let decoded = decode_output(output);
        let stdout = decoded.get("stdout").and_then(Value::as_str);
        let stderr = decoded
            .get("stderr")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        match (stdout, stderr) {
            (Some(out), None) => out.to_string(),
            (Some(out), Some(err)) => format!("{out}{err}"),
            (None, Some(err)) => err.to_string(),
            (None, None) => render_json(&decoded),
        }
    }
}

/// Single-turn chat prompts for an `LLM::<model>` agent.
#[derive(Debug, Clone)]
pub struct LlmTemplate {
    capability: String,
}

impl LlmTemplate {
    /// Accepts either a bare model name or a full `LLM::` capability.
    pub fn new(model: &str) -> Self {
        let capability = if model.starts_with(LLM_CAPABILITY_PREFIX) {
            model.to_string()
        } else {
            format!("{LLM_CAPABILITY_PREFIX}{model}")
        };
        Self { capability }
    }
}

impl TaskTemplate for LlmTemplate {
    fn capability(&self) -> &str {
        &self.capability
    }

    fn build_payload(&self, input: &str) -> Value {
        json!({
            "messages": [{ "role": "user", "content": input }],
            "stream": false
        })
    }

    fn render_output(&self, output: &Value) -> String {
        let decoded = decode_output(output);
        decoded
            .pointer("/message/content")
            .or_else(|| decoded.get("response"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| render_json(&decoded))
    }
}

/// Any capability, with the input taken as the payload verbatim.
#[derive(Debug, Clone)]
pub struct RawTemplate {
    capability: String,
}

impl RawTemplate {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

impl TaskTemplate for RawTemplate {
    fn capability(&self) -> &str {
        &self.capability
    }

    /// JSON input is sent as-is; anything else is sent as a JSON string.
    fn build_payload(&self, input: &str) -> Value {
        serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
    }
}

fn render_json(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
