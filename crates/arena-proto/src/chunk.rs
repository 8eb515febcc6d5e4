//! Scratchpad chunks.
//!
//! A chunk is one atomic entry in a task's scratchpad. Chunks are appended in
//! causal order and, apart from annotations merged in by evaluators, are not
//! modified after the scheduler has processed them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Annotations keyed by the fully-qualified name of the agent, tool or
/// evaluator that produced them.
pub type Annotations = serde_json::Map<String, Value>;

/// The kind of a scratchpad entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Input given to the task, either by the caller or by a parent agent.
    Input,
    /// Raw text produced by the task's agent.
    LlmOutput,
    /// A tool result wrapped in `<|tool_result|>` tags.
    ToolOutput,
    /// A child agent's result wrapped in `<|agent_result|>` tags.
    AgentOutput,
    /// A parse, tool or generation failure.
    Error,
    /// Opaque payload written by an agent or tool.
    Data,
}

impl ChunkType {
    /// Returns the snake_case name used in event topics.
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Input => "input",
            ChunkType::LlmOutput => "llm_output",
            ChunkType::ToolOutput => "tool_output",
            ChunkType::AgentOutput => "agent_output",
            ChunkType::Error => "error",
            ChunkType::Data => "data",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a task's scratchpad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,

    pub content: String,

    /// Whether the scheduler already acted on this chunk. Only meaningful for
    /// the most recent `LlmOutput` chunk.
    #[serde(default)]
    pub processed: bool,

    /// Correlates the chunk with an externally visible conversation message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Chunk {
    /// Creates an unprocessed chunk without message id or annotations.
    pub fn new(chunk_type: ChunkType, content: impl Into<String>) -> Self {
        Self {
            chunk_type,
            content: content.into(),
            processed: false,
            message_id: None,
            annotations: None,
        }
    }

    pub fn input(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Input, content)
    }

    pub fn llm_output(content: impl Into<String>) -> Self {
        Self::new(ChunkType::LlmOutput, content)
    }

    pub fn tool_output(content: impl Into<String>) -> Self {
        Self::new(ChunkType::ToolOutput, content)
    }

    pub fn agent_output(content: impl Into<String>) -> Self {
        Self::new(ChunkType::AgentOutput, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Error, content)
    }

    /// Builds a `Data` chunk tagged with `fqdn`.
    pub fn data(fqdn: &str, payload: &Value) -> Result<Self> {
        if fqdn.trim().is_empty() {
            return Err(Error::MissingFqdn);
        }
        let envelope = DataEnvelope {
            tag: fqdn.to_string(),
            data: payload.clone(),
        };
        Ok(Self::new(ChunkType::Data, serde_json::to_string(&envelope)?))
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets the annotations. An empty map leaves the chunk unannotated.
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        if !annotations.is_empty() {
            self.annotations = Some(annotations);
        }
        self
    }

    /// Returns the payload of a `Data` chunk tagged with `fqdn`.
    ///
    /// Chunks of another type, with another tag, or with unparsable content
    /// yield `None`.
    pub fn data_payload(&self, fqdn: &str) -> Option<Value> {
        if self.chunk_type != ChunkType::Data {
            return None;
        }
        let envelope: DataEnvelope = serde_json::from_str(&self.content).ok()?;
        (envelope.tag == fqdn).then_some(envelope.data)
    }

    /// Writes an annotation under `fqdn`, creating the map on first write.
    pub fn write_annotation(&mut self, fqdn: &str, value: Value) -> Result<()> {
        if fqdn.trim().is_empty() {
            return Err(Error::MissingFqdn);
        }
        self.annotations
            .get_or_insert_with(Annotations::new)
            .insert(fqdn.to_string(), value);
        Ok(())
    }

    /// Returns the annotation written under `fqdn`.
    pub fn annotation(&self, fqdn: &str) -> Option<&Value> {
        self.annotations.as_ref()?.get(fqdn)
    }

    /// Returns every annotation on this chunk.
    pub fn all_annotations(&self) -> Option<&Annotations> {
        self.annotations.as_ref()
    }

    /// Spreads `annotations` into this chunk's map, overwriting equal keys.
    pub fn merge_annotations(&mut self, annotations: Annotations) {
        if annotations.is_empty() {
            return;
        }
        self.annotations
            .get_or_insert_with(Annotations::new)
            .extend(annotations);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DataEnvelope {
    tag: String,
    data: Value,
}

/// Collects the payloads of every `Data` chunk tagged with `fqdn`, in order.
pub fn read_data_chunks<'a>(chunks: impl IntoIterator<Item = &'a Chunk>, fqdn: &str) -> Vec<Value> {
    chunks
        .into_iter()
        .filter_map(|chunk| chunk.data_payload(fqdn))
        .collect()
}
