//! Tools: units an agent invokes with JSON parameters during its turn.

use arena_proto::{Annotations, Chunk, Task, read_data_chunks};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// Errors a tool execution can end with.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Execution(String),

    /// A tool must return either one annotation or an annotation map.
    #[error("tool returned both `annotation` and `annotations`")]
    ConflictingAnnotations,

    #[error(transparent)]
    Data(#[from] arena_proto::Error),
}

/// JSON-schema-like description of a tool's parameters, used in prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl ParameterSchema {
    /// An object schema without properties.
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Adds an optional property.
    pub fn property(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    /// Adds a required property.
    pub fn required_property(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.to_string(), schema);
        self.required.push(name.to_string());
        self
    }
}

/// What a tool returns: a raw result plus optional annotations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub result: Value,
    pub annotation: Option<Value>,
    pub annotations: Option<Annotations>,
}

impl ToolOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            annotation: None,
            annotations: None,
        }
    }

    pub fn with_annotation(mut self, annotation: Value) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Splits the output into its result and the annotations to attach to
    /// the result chunk, with a single annotation keyed by `fqdn`.
    pub fn into_parts(self, fqdn: &str) -> Result<(Value, Annotations), ToolError> {
        match (self.annotation, self.annotations) {
            (Some(_), Some(_)) => Err(ToolError::ConflictingAnnotations),
            (Some(annotation), None) => {
                let mut map = Annotations::new();
                map.insert(fqdn.to_string(), annotation);
                Ok((self.result, map))
            }
            (None, Some(map)) => Ok((self.result, map)),
            (None, None) => Ok((self.result, Annotations::new())),
        }
    }
}

impl From<Value> for ToolOutput {
    fn from(result: Value) -> Self {
        Self::new(result)
    }
}

/// Access a running tool has to the Arena: the calling task and the
/// session-global data chunks.
pub struct ToolContext<'a> {
    task: &'a mut Task,
    session: &'a mut Vec<Chunk>,
}

impl<'a> ToolContext<'a> {
    pub fn new(task: &'a mut Task, session: &'a mut Vec<Chunk>) -> Self {
        Self { task, session }
    }

    /// The task whose agent invoked the tool.
    pub fn task(&self) -> &Task {
        self.task
    }

    pub fn write_task_data_chunk(&mut self, fqdn: &str, payload: &Value) -> Result<(), ToolError> {
        Ok(self.task.write_data_chunk(fqdn, payload)?)
    }

    pub fn task_data_chunks(&self, fqdn: &str) -> Vec<Value> {
        self.task.data_chunks(fqdn)
    }

    pub fn write_session_data_chunk(&mut self, fqdn: &str, payload: &Value) -> Result<(), ToolError> {
        self.session.push(Chunk::data(fqdn, payload)?);
        Ok(())
    }

    pub fn session_data_chunks(&self, fqdn: &str) -> Vec<Value> {
        read_data_chunks(self.session.iter(), fqdn)
    }
}

/// A tool an agent can call with `<|tool_call|>` directives.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> ParameterSchema;

    /// Key under which this tool's annotations and data chunks are stored.
    fn fqdn(&self) -> String {
        format!("tool.{}", self.name())
    }

    async fn run(&self, parameters: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput, ToolError>;
}

/// Tools registered on an agent, keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

static EMPTY_TOOLS: LazyLock<ToolSet> = LazyLock::new(ToolSet::default);

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared empty set for agents without tools.
    pub fn empty() -> &'static ToolSet {
        &EMPTY_TOOLS
    }

    /// Adds a tool, builder style.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.insert(tool);
        self
    }

    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Returns its parameters unchanged.
#[derive(Debug, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the given parameters unchanged."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::object().property("text", serde_json::json!({"type": "string"}))
    }

    async fn run(&self, parameters: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::new(parameters))
    }
}
