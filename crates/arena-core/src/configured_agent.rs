//! Agents defined by configuration rather than code.

use crate::agent::{Agent, AgentError};
use crate::config::AgentDefinition;
use crate::directive_parser::{parse_agent_results, parse_tool_results};
use crate::tool::{Tool, ToolSet};
use arena_proto::{ChunkType, TagPair, Task};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

/// An agent whose behavior is fully described by instructions, a tool set
/// and a sub-agent whitelist.
///
/// The prompt is the instructions, a description of the available tools and
/// agents, and the task's history so far.
#[derive(Debug, Clone)]
pub struct ConfiguredAgent {
    name: String,
    instructions: String,
    tools: ToolSet,
    sub_agents: Vec<String>,
    supports_continuation: bool,
}

impl ConfiguredAgent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: ToolSet::new(),
            sub_agents: Vec::new(),
            supports_continuation: false,
        }
    }

    /// Builds an agent from a definition, resolving tool names in `catalog`.
    ///
    /// Unknown tool names are logged and skipped.
    pub fn from_definition(name: &str, definition: &AgentDefinition, catalog: &ToolSet) -> Self {
        let mut agent = Self::new(name, definition.instructions.clone())
            .with_sub_agents(definition.sub_agents.iter().cloned())
            .with_continuation(definition.supports_continuation);
        for tool_name in &definition.tools {
            match catalog.get(tool_name) {
                Some(tool) => agent.tools.insert(tool),
                None => warn!(agent = %name, tool = %tool_name, "Skipping unknown tool"),
            }
        }
        agent
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool);
        self
    }

    pub fn with_sub_agents(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub_agents.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_continuation(mut self, supports_continuation: bool) -> Self {
        self.supports_continuation = supports_continuation;
        self
    }

    fn render_tools(&self, out: &mut String) {
        if self.tools.is_empty() {
            return;
        }
        out.push_str("\n\n## Tools\n");
        for tool in self.tools.iter() {
            let parameters = serde_json::to_string(&tool.parameters()).unwrap_or_default();
            let _ = writeln!(out, "- {}: {} Parameters: {parameters}", tool.name(), tool.description());
        }
        let _ = write!(
            out,
            "Call a tool with {}",
            TagPair::TOOL_CALL.wrap(r#"{"name": "<tool>", "parameters": {...}}"#)
        );
    }

    fn render_sub_agents(&self, out: &mut String) {
        if self.sub_agents.is_empty() {
            return;
        }
        out.push_str("\n\n## Agents\n");
        for name in &self.sub_agents {
            let _ = writeln!(out, "- {name}");
        }
        let _ = write!(
            out,
            "Delegate to an agent with {}",
            TagPair::AGENT_CALL.wrap(r#"{"name": "<agent>", "input": ...}"#)
        );
    }
}

/// Renders one scratchpad entry, unwrapping tool and agent results.
fn render_history_line(chunk_type: ChunkType, content: &str) -> Option<String> {
    let line = match chunk_type {
        ChunkType::Input => format!("Input: {content}"),
        ChunkType::LlmOutput => format!("You: {content}"),
        ChunkType::ToolOutput => match parse_tool_results(content) {
            Ok(results) => results
                .iter()
                .map(|result| format!("Tool result: {result}"))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(_) => format!("Tool result: {content}"),
        },
        ChunkType::AgentOutput => match parse_agent_results(content) {
            Ok(results) => results
                .iter()
                .map(|result| match result {
                    Value::String(text) => format!("Agent result: {text}"),
                    other => format!("Agent result: {other}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(_) => format!("Agent result: {content}"),
        },
        ChunkType::Error => format!("Error: {content}"),
        ChunkType::Data => return None,
    };
    Some(line)
}

#[async_trait]
impl Agent for ConfiguredAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_continuation(&self) -> bool {
        self.supports_continuation
    }

    fn tools(&self) -> &ToolSet {
        &self.tools
    }

    fn sub_agents(&self) -> &[String] {
        &self.sub_agents
    }

    async fn build_prompt(&self, task: &Task) -> Result<String, AgentError> {
        let mut prompt = self.instructions.trim().to_string();
        self.render_tools(&mut prompt);
        self.render_sub_agents(&mut prompt);

        prompt.push_str("\n\n## History\n");
        let history: Vec<String> = task
            .scratchpad
            .iter()
            .filter_map(|chunk| render_history_line(chunk.chunk_type, &chunk.content))
            .collect();
        if history.is_empty() {
            // A task restored without its seed chunk still has its input.
            let _ = writeln!(prompt, "Input: {}", task.input_text());
        } else {
            prompt.push_str(&history.join("\n"));
        }
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::EchoTool;
    use arena_proto::Chunk;
    use serde_json::json;

    #[tokio::test]
    async fn test_prompt_renders_history_with_unwrapped_results() {
        let agent = ConfiguredAgent::new("Planner", "Plan the work.").with_tool(Arc::new(EchoTool));
        let mut task = Task::new("Planner", json!("build a shed"));
        task.push_chunk(Chunk::input("build a shed"));
        task.push_chunk(Chunk::tool_output(r#"<|tool_result|>{"ok":true}<|tool_result_end|>"#));
        task.push_chunk(Chunk::agent_output(r#"<|agent_result|>"wood is cheap"<|agent_result_end|>"#));
        task.write_data_chunk("agent.Planner", &json!({"hidden": true})).unwrap();

        let prompt = agent.build_prompt(&task).await.unwrap();

        assert!(prompt.starts_with("Plan the work."));
        assert!(prompt.contains("- echo:"));
        assert!(prompt.contains("Input: build a shed"));
        assert!(prompt.contains(r#"Tool result: {"ok":true}"#));
        assert!(prompt.contains("Agent result: wood is cheap"));
        assert!(!prompt.contains("hidden"));
    }

    #[test]
    fn test_from_definition_skips_unknown_tools() {
        let catalog = ToolSet::new().with(Arc::new(EchoTool));
        let definition = AgentDefinition {
            instructions: "Research.".into(),
            sub_agents: vec!["Writer".into()],
            tools: vec!["echo".into(), "missing".into()],
            supports_continuation: true,
            ..AgentDefinition::default()
        };

        let agent = ConfiguredAgent::from_definition("Researcher", &definition, &catalog);
        assert_eq!(agent.tools().names().collect::<Vec<_>>(), vec!["echo"]);
        assert_eq!(agent.sub_agents(), ["Writer".to_string()]);
        assert!(agent.supports_continuation());
    }
}
