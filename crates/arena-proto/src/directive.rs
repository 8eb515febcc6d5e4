//! Directive payloads and the tag pairs that frame them in model output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A start/end marker pair delimiting one directive or result span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPair {
    pub start: &'static str,
    pub end: &'static str,
}

impl TagPair {
    pub const TOOL_CALL: TagPair = TagPair {
        start: "<|tool_call|>",
        end: "<|tool_call_end|>",
    };
    pub const TOOL_RESULT: TagPair = TagPair {
        start: "<|tool_result|>",
        end: "<|tool_result_end|>",
    };
    pub const AGENT_CALL: TagPair = TagPair {
        start: "<|agent_call|>",
        end: "<|agent_call_end|>",
    };
    pub const AGENT_RESULT: TagPair = TagPair {
        start: "<|agent_result|>",
        end: "<|agent_result_end|>",
    };
    pub const ERROR: TagPair = TagPair {
        start: "<|error|>",
        end: "<|error_end|>",
    };

    /// Frames `body` with this pair.
    pub fn wrap(&self, body: &str) -> String {
        format!("{}{}{}", self.start, body, self.end)
    }
}

/// A tool invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A sub-agent invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCall {
    pub name: String,
    pub input: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap() {
        assert_eq!(
            TagPair::AGENT_RESULT.wrap("\"hello\""),
            "<|agent_result|>\"hello\"<|agent_result_end|>"
        );
    }

    #[test]
    fn test_tool_call_parameters_default_to_empty_object() {
        let call: ToolCall = serde_json::from_value(json!({"name": "clock"})).unwrap();
        assert_eq!(call.parameters, json!({}));
    }
}
