//! Events published on the Arena event bus.

use crate::chunk::Chunk;
use crate::directive::{AgentCall, ToolCall};
use crate::task::{TaskId, TaskType};
use serde::{Deserialize, Serialize};

/// Which parser or dispatch step rejected part of an agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// The tool-call directives could not be parsed.
    ToolCall,
    /// The agent-call directives could not be parsed.
    AgentCall,
    /// A tool was missing or failed.
    Tool,
    /// An agent-call target was unknown or not allowed.
    Agent,
}

/// Something observable that happened inside the Arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArenaEvent {
    /// A chunk was appended to a task's scratchpad.
    Chunk {
        agent_name: Option<String>,
        task_id: TaskId,
        chunk: Chunk,
    },
    /// One streamed token of a generation.
    Token {
        agent_name: String,
        task_id: TaskId,
        token: String,
    },
    ToolCall {
        agent_name: String,
        task_id: TaskId,
        call: ToolCall,
    },
    AgentCall {
        agent_name: String,
        task_id: TaskId,
        call: AgentCall,
    },
    /// A recoverable failure that counts toward the task's retry budget.
    ParseError {
        agent_name: String,
        task_id: TaskId,
        error: String,
        #[serde(rename = "type")]
        kind: ParseErrorKind,
    },
    /// A generation failure, or an evaluator failure when mirrored.
    Error {
        agent_name: Option<String>,
        task_id: Option<TaskId>,
        error: String,
    },
}

impl ArenaEvent {
    /// Returns the base event name, e.g. `toolCall`.
    pub fn base_name(&self) -> &'static str {
        match self {
            ArenaEvent::Chunk { .. } => "chunk",
            ArenaEvent::Token { .. } => "token",
            ArenaEvent::ToolCall { .. } => "toolCall",
            ArenaEvent::AgentCall { .. } => "agentCall",
            ArenaEvent::ParseError { .. } => "parseError",
            ArenaEvent::Error { .. } => "error",
        }
    }

    /// Returns the `evaluator*` mirror name, e.g. `evaluatorToolCall`.
    pub fn evaluator_name(&self) -> &'static str {
        match self {
            ArenaEvent::Chunk { .. } => "evaluatorChunk",
            ArenaEvent::Token { .. } => "evaluatorToken",
            ArenaEvent::ToolCall { .. } => "evaluatorToolCall",
            ArenaEvent::AgentCall { .. } => "evaluatorAgentCall",
            ArenaEvent::ParseError { .. } => "evaluatorParseError",
            ArenaEvent::Error { .. } => "evaluatorError",
        }
    }
}

/// Whether an event came from ordinary scheduling or from the evaluator
/// side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    Task,
    Evaluator,
}

impl From<TaskType> for EventOrigin {
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Regular => EventOrigin::Task,
            TaskType::Evaluator => EventOrigin::Evaluator,
        }
    }
}

/// An event together with its origin, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub origin: EventOrigin,
    pub event: ArenaEvent,
}

impl PublishedEvent {
    /// Returns the name observers subscribe to.
    pub fn name(&self) -> &'static str {
        match self.origin {
            EventOrigin::Task => self.event.base_name(),
            EventOrigin::Evaluator => self.event.evaluator_name(),
        }
    }

    /// Returns the type-specific topic of chunk events, e.g. `chunk:llm_output`.
    pub fn chunk_topic(&self) -> Option<String> {
        match &self.event {
            ArenaEvent::Chunk { chunk, .. } => Some(format!("{}:{}", self.name(), chunk.chunk_type)),
            _ => None,
        }
    }

    /// Returns true if this event counts toward the Arena's error counter.
    pub fn counts_as_error(&self) -> bool {
        self.origin == EventOrigin::Task && matches!(self.event, ArenaEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_event() -> ArenaEvent {
        ArenaEvent::Chunk {
            agent_name: Some("Planner".into()),
            task_id: TaskId::new("t1"),
            chunk: Chunk::llm_output("hi"),
        }
    }

    #[test]
    fn test_names_follow_origin() {
        let task = PublishedEvent {
            origin: EventOrigin::Task,
            event: chunk_event(),
        };
        let evaluator = PublishedEvent {
            origin: EventOrigin::Evaluator,
            event: chunk_event(),
        };

        assert_eq!(task.name(), "chunk");
        assert_eq!(task.chunk_topic().as_deref(), Some("chunk:llm_output"));
        assert_eq!(evaluator.name(), "evaluatorChunk");
        assert_eq!(evaluator.chunk_topic().as_deref(), Some("evaluatorChunk:llm_output"));
    }

    #[test]
    fn test_only_task_errors_count() {
        let error = ArenaEvent::Error {
            agent_name: None,
            task_id: None,
            error: "boom".into(),
        };
        let task = PublishedEvent {
            origin: EventOrigin::Task,
            event: error.clone(),
        };
        let evaluator = PublishedEvent {
            origin: EventOrigin::Evaluator,
            event: error,
        };
        assert!(task.counts_as_error());
        assert!(!evaluator.counts_as_error());
    }

    #[test]
    fn test_parse_error_serializes_type_field() {
        let event = ArenaEvent::ParseError {
            agent_name: "Planner".into(),
            task_id: TaskId::new("t1"),
            error: "incomplete".into(),
            kind: ParseErrorKind::ToolCall,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "parse_error");
        assert_eq!(value["type"], "tool_call");
    }
}
