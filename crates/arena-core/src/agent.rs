//! Agents: units that turn a task into a prompt and stream a response.
//!
//! The Arena lends each running agent an `AgentContext` instead of letting
//! agents hold a reference back to it. Everything an agent may touch outside
//! its own task (the generator, the event bus, session data chunks) goes
//! through that context.

use crate::llm::{GenerationError, GenerationEvent, GenerationRequest, TextGenerator};
use crate::tool::ToolSet;
use arena_proto::{
    Annotations, ArenaEvent, Chunk, EventBus, EventOrigin, Task, TaskId, read_data_chunks,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;

/// Errors an agent run can end with.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to build prompt: {0}")]
    Prompt(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("failed to process response: {0}")]
    Response(String),

    #[error(transparent)]
    Data(#[from] arena_proto::Error),
}

/// What an agent run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    pub annotation: Option<Value>,
    pub annotations: Option<Annotations>,
}

impl AgentResponse {
    /// A plain-text response without annotations.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
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

    /// Splits the response into its content and a single annotation map:
    /// `annotation` is keyed by `fqdn`, `annotations` are spread in.
    pub fn into_parts(self, fqdn: &str) -> (String, Annotations) {
        let mut map = self.annotations.unwrap_or_default();
        if let Some(annotation) = self.annotation {
            map.insert(fqdn.to_string(), annotation);
        }
        (self.content, map)
    }
}

/// Arena capabilities lent to an agent for the duration of one run.
pub struct AgentContext<'a> {
    generator: &'a dyn TextGenerator,
    bus: &'a mut EventBus,
    session: &'a mut Vec<Chunk>,
    origin: EventOrigin,
}

impl<'a> AgentContext<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        bus: &'a mut EventBus,
        session: &'a mut Vec<Chunk>,
        origin: EventOrigin,
    ) -> Self {
        Self {
            generator,
            bus,
            session,
            origin,
        }
    }

    pub fn generator(&self) -> &'a dyn TextGenerator {
        self.generator
    }

    /// Whether the running task is ordinary work or evaluator work.
    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    pub fn emit_token(&mut self, agent_name: &str, task_id: &TaskId, token: &str) {
        self.bus.publish(
            self.origin,
            ArenaEvent::Token {
                agent_name: agent_name.to_string(),
                task_id: task_id.clone(),
                token: token.to_string(),
            },
        );
    }

    pub fn emit_error(&mut self, agent_name: &str, task_id: &TaskId, error: String) {
        self.bus.publish(
            self.origin,
            ArenaEvent::Error {
                agent_name: Some(agent_name.to_string()),
                task_id: Some(task_id.clone()),
                error,
            },
        );
    }

    pub fn write_session_data_chunk(&mut self, fqdn: &str, payload: &Value) -> Result<(), AgentError> {
        self.session.push(Chunk::data(fqdn, payload)?);
        Ok(())
    }

    pub fn session_data_chunks(&self, fqdn: &str) -> Vec<Value> {
        read_data_chunks(self.session.iter(), fqdn)
    }
}

/// An LLM-backed unit of work.
///
/// Implementors provide `build_prompt`; the default `run` streams a
/// generation for that prompt, emitting one `token` event per token, and
/// hands the full text to `post_process_response`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry key, also used as the `agent_name` of tasks.
    fn name(&self) -> &str;

    /// Key under which this agent's annotations and data chunks are stored.
    fn fqdn(&self) -> String {
        format!("agent.{}", self.name())
    }

    /// Whether a plain response means "waiting for more input" in
    /// interactive mode rather than "final answer".
    fn supports_continuation(&self) -> bool {
        false
    }

    fn tools(&self) -> &ToolSet {
        ToolSet::empty()
    }

    /// Agents this agent may call. Empty means any registered agent.
    fn sub_agents(&self) -> &[String] {
        &[]
    }

    async fn build_prompt(&self, task: &Task) -> Result<String, AgentError>;

    fn post_process_response(&self, text: String) -> Result<AgentResponse, AgentError> {
        Ok(AgentResponse::text(text))
    }

    async fn run(&self, task: &mut Task, ctx: &mut AgentContext<'_>) -> Result<AgentResponse, AgentError> {
        let outcome: Result<AgentResponse, AgentError> = async {
            let prompt = self.build_prompt(task).await?;
            let mut stream = ctx
                .generator()
                .generate(GenerationRequest::new(self.name(), prompt))
                .await?;

            let mut text = String::new();
            while let Some(event) = stream.next().await {
                match event? {
                    GenerationEvent::Token(token) => {
                        ctx.emit_token(self.name(), &task.id, &token);
                        text.push_str(&token);
                    }
                    GenerationEvent::Finish { .. } => break,
                }
            }
            self.post_process_response(text)
        }
        .await;

        if let Err(err) = &outcome {
            ctx.emit_error(self.name(), &task.id, err.to_string());
        }
        outcome
    }

    fn write_task_data_chunk(&self, task: &mut Task, payload: &Value) -> Result<(), AgentError> {
        Ok(task.write_data_chunk(&self.fqdn(), payload)?)
    }

    fn task_data_chunks(&self, task: &Task) -> Vec<Value> {
        task.data_chunks(&self.fqdn())
    }

    fn write_session_data_chunk(&self, ctx: &mut AgentContext<'_>, payload: &Value) -> Result<(), AgentError> {
        ctx.write_session_data_chunk(&self.fqdn(), payload)
    }

    fn session_data_chunks(&self, ctx: &AgentContext<'_>) -> Vec<Value> {
        ctx.session_data_chunks(&self.fqdn())
    }

    fn write_chunk_annotation(&self, chunk: &mut Chunk, annotation: Value) -> Result<(), AgentError> {
        Ok(chunk.write_annotation(&self.fqdn(), annotation)?)
    }

    fn chunk_annotation<'c>(&self, chunk: &'c Chunk) -> Option<&'c Value> {
        chunk.annotation(&self.fqdn())
    }

    fn all_chunk_annotations<'c>(&self, chunk: &'c Chunk) -> Option<&'c Annotations> {
        chunk.all_annotations()
    }
}
