//! Tasks: units of scheduled work.

use crate::chunk::{Chunk, ChunkType, read_data_chunks};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Distinguishes ordinary work from evaluator-internal work.
///
/// Evaluator tasks are scheduled like any other task, but their chunk
/// emissions are mirrored on `evaluator*` events and never evaluated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Regular,
    Evaluator,
}

/// Where a task sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// In the queue, or about to be put back into it.
    #[default]
    Queued,
    /// Issued agent calls and waits for their results.
    WaitingOnChildren,
    /// A continuation agent answered and waits for fresh external input.
    AwaitingInput,
    /// Produced its final result.
    Completed,
    /// Exhausted its budget and handed over to an ErrorAgent child.
    Abandoned,
}

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub agent_name: String,
    /// A string, or an object that may carry `text` and `messageId`.
    pub input: Value,
    pub parent_task_id: Option<TaskId>,
    #[serde(default)]
    pub scratchpad: Vec<Chunk>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a root task with a fresh id and an empty scratchpad.
    pub fn new(agent_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: TaskId::generate(),
            agent_name: agent_name.into(),
            input,
            parent_task_id: None,
            scratchpad: Vec::new(),
            retry_count: 0,
            execution_count: 0,
            task_type: TaskType::Regular,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
        }
    }

    /// Sets the parent task.
    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_task_id = Some(parent);
        self
    }

    /// Sets the task type.
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Returns true if this task reports to the original caller.
    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_none()
    }

    /// Returns the textual form of the input.
    ///
    /// Strings are returned as-is, objects with a string `text` field return
    /// that field, anything else is JSON-encoded.
    pub fn input_text(&self) -> String {
        match &self.input {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("text") {
                Some(Value::String(text)) => text.clone(),
                _ => self.input.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Returns `input.messageId` when the input is an object carrying one.
    pub fn input_message_id(&self) -> Option<&str> {
        self.input.get("messageId").and_then(Value::as_str)
    }

    /// Returns the message id of the most recent `Input` chunk that has one.
    pub fn latest_input_message_id(&self) -> Option<&str> {
        self.scratchpad
            .iter()
            .rev()
            .filter(|chunk| chunk.chunk_type == ChunkType::Input)
            .find_map(|chunk| chunk.message_id.as_deref())
    }

    /// Appends a chunk and returns its index.
    ///
    /// `LlmOutput` chunks without a message id inherit it from the latest
    /// `Input` chunk, falling back to `input.messageId`.
    pub fn push_chunk(&mut self, mut chunk: Chunk) -> usize {
        if chunk.chunk_type == ChunkType::LlmOutput && chunk.message_id.is_none() {
            chunk.message_id = self
                .latest_input_message_id()
                .or_else(|| self.input_message_id())
                .map(str::to_string);
        }
        self.scratchpad.push(chunk);
        self.scratchpad.len() - 1
    }

    /// Returns the index of the unprocessed `LlmOutput` chunk, if the most
    /// recent one has not been acted on yet.
    pub fn unprocessed_output_index(&self) -> Option<usize> {
        self.scratchpad
            .iter()
            .rposition(|chunk| chunk.chunk_type == ChunkType::LlmOutput)
            .filter(|&idx| !self.scratchpad[idx].processed)
    }

    /// Concatenates the content of every `Error` chunk, one per line.
    pub fn error_summary(&self) -> String {
        self.scratchpad
            .iter()
            .filter(|chunk| chunk.chunk_type == ChunkType::Error)
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Appends a `Data` chunk tagged with `fqdn`.
    pub fn write_data_chunk(&mut self, fqdn: &str, payload: &Value) -> Result<()> {
        let chunk = Chunk::data(fqdn, payload)?;
        self.scratchpad.push(chunk);
        Ok(())
    }

    /// Returns every `Data` payload in this scratchpad tagged with `fqdn`.
    pub fn data_chunks(&self, fqdn: &str) -> Vec<Value> {
        read_data_chunks(&self.scratchpad, fqdn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_text_variants() {
        assert_eq!(Task::new("A", json!("plain")).input_text(), "plain");
        assert_eq!(
            Task::new("A", json!({"text": "hi", "messageId": "m"})).input_text(),
            "hi"
        );
        assert_eq!(Task::new("A", json!({"q": 1})).input_text(), r#"{"q":1}"#);
    }

    #[test]
    fn test_llm_output_inherits_latest_input_message_id() {
        let mut task = Task::new("A", json!({"text": "hi", "messageId": "from-input"}));
        task.push_chunk(Chunk::input("first").with_message_id("m1"));
        task.push_chunk(Chunk::input("second").with_message_id("m2"));

        let idx = task.push_chunk(Chunk::llm_output("reply"));
        assert_eq!(task.scratchpad[idx].message_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_llm_output_falls_back_to_task_input_message_id() {
        let mut task = Task::new("A", json!({"text": "hi", "messageId": "from-input"}));
        let idx = task.push_chunk(Chunk::llm_output("reply"));
        assert_eq!(task.scratchpad[idx].message_id.as_deref(), Some("from-input"));
    }

    #[test]
    fn test_explicit_message_id_is_kept() {
        let mut task = Task::new("A", json!({"messageId": "from-input"}));
        let idx = task.push_chunk(Chunk::llm_output("reply").with_message_id("own"));
        assert_eq!(task.scratchpad[idx].message_id.as_deref(), Some("own"));
    }

    #[test]
    fn test_unprocessed_output_index_only_tracks_latest() {
        let mut task = Task::new("A", json!("x"));
        assert_eq!(task.unprocessed_output_index(), None);

        let first = task.push_chunk(Chunk::llm_output("one"));
        assert_eq!(task.unprocessed_output_index(), Some(first));

        task.scratchpad[first].processed = true;
        task.push_chunk(Chunk::tool_output("result"));
        assert_eq!(task.unprocessed_output_index(), None);

        let second = task.push_chunk(Chunk::llm_output("two"));
        assert_eq!(task.unprocessed_output_index(), Some(second));
    }

    #[test]
    fn test_error_summary_joins_error_chunks() {
        let mut task = Task::new("A", json!("x"));
        task.push_chunk(Chunk::error("bad json"));
        task.push_chunk(Chunk::llm_output("noise"));
        task.push_chunk(Chunk::error("missing tool"));
        assert_eq!(task.error_summary(), "bad json\nmissing tool");
    }
}
