//! Evaluators: side-channel annotators triggered by chunk emission.
//!
//! Evaluation never blocks scheduling. The Arena runs every matching
//! evaluator concurrently in a background job and merges the annotations
//! back onto the chunk once the job finishes. A failing evaluator is logged
//! and otherwise ignored.

use crate::agent::Agent;
use crate::handle::{ArenaHandle, HandleError};
use arena_proto::{Annotations, Chunk, ChunkType, TaskId};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors an evaluator can end with.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Handle(#[from] HandleError),

    /// Continuation agents never produce a final answer.
    #[error("agent {0} supports continuation and cannot back an evaluator")]
    ContinuationAgent(String),
}

/// What an evaluator produced for a chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub annotation: Option<Value>,
    pub annotations: Option<Annotations>,
}

impl Evaluation {
    /// A single annotation, stored under the evaluator's fqdn.
    pub fn annotation(value: Value) -> Self {
        Self {
            annotation: Some(value),
            annotations: None,
        }
    }

    /// Several annotations, spread into the chunk's map.
    pub fn annotations(annotations: Annotations) -> Self {
        Self {
            annotation: None,
            annotations: Some(annotations),
        }
    }

    /// Collapses both forms into one map, keying `annotation` by `fqdn`.
    pub fn into_annotations(self, fqdn: &str) -> Annotations {
        let mut map = Annotations::new();
        if let Some(annotation) = self.annotation {
            map.insert(fqdn.to_string(), annotation);
        }
        if let Some(annotations) = self.annotations {
            map.extend(annotations);
        }
        map
    }
}

/// Where the evaluated chunk came from, plus a handle for evaluators that
/// need to schedule work of their own.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub handle: ArenaHandle,
    pub task_id: TaskId,
    pub agent_name: Option<String>,
}

/// An annotator for chunks of selected types.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Key under which this evaluator's annotation is stored.
    fn fqdn(&self) -> &str;

    fn supported_chunk_types(&self) -> &[ChunkType];

    fn supports(&self, chunk_type: ChunkType) -> bool {
        self.supported_chunk_types().contains(&chunk_type)
    }

    async fn evaluate(&self, chunk: &Chunk, ctx: &EvaluationContext) -> Result<Evaluation, EvaluatorError>;
}

/// Wraps a plain function.
pub struct FnEvaluator<F> {
    fqdn: String,
    chunk_types: Vec<ChunkType>,
    func: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&Chunk) -> Result<Evaluation, EvaluatorError> + Send + Sync,
{
    pub fn new(fqdn: impl Into<String>, chunk_types: Vec<ChunkType>, func: F) -> Self {
        Self {
            fqdn: fqdn.into(),
            chunk_types,
            func,
        }
    }
}

impl<F> fmt::Debug for FnEvaluator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEvaluator")
            .field("fqdn", &self.fqdn)
            .field("chunk_types", &self.chunk_types)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&Chunk) -> Result<Evaluation, EvaluatorError> + Send + Sync,
{
    fn fqdn(&self) -> &str {
        &self.fqdn
    }

    fn supported_chunk_types(&self) -> &[ChunkType] {
        &self.chunk_types
    }

    async fn evaluate(&self, chunk: &Chunk, _ctx: &EvaluationContext) -> Result<Evaluation, EvaluatorError> {
        (self.func)(chunk)
    }
}

/// Delegates evaluation to an agent by scheduling an evaluator task whose
/// input is the chunk itself.
///
/// The agent's final answer becomes the annotation: parsed as JSON when it
/// is valid JSON, kept as a string otherwise.
#[derive(Debug, Clone)]
pub struct AgentEvaluator {
    fqdn: String,
    agent_name: String,
    chunk_types: Vec<ChunkType>,
}

impl AgentEvaluator {
    /// Fails for agents that support continuation.
    pub fn new(agent: &dyn Agent, chunk_types: Vec<ChunkType>) -> Result<Self, EvaluatorError> {
        if agent.supports_continuation() {
            return Err(EvaluatorError::ContinuationAgent(agent.name().to_string()));
        }
        Ok(Self {
            fqdn: format!("evaluator.{}", agent.name()),
            agent_name: agent.name().to_string(),
            chunk_types,
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

#[async_trait]
impl Evaluator for AgentEvaluator {
    fn fqdn(&self) -> &str {
        &self.fqdn
    }

    fn supported_chunk_types(&self) -> &[ChunkType] {
        &self.chunk_types
    }

    async fn evaluate(&self, chunk: &Chunk, ctx: &EvaluationContext) -> Result<Evaluation, EvaluatorError> {
        let input = serde_json::to_value(chunk).map_err(|e| EvaluatorError::Failed(e.to_string()))?;
        let verdict = ctx.handle.submit_evaluation(&self.agent_name, input).await?;
        let annotation = serde_json::from_str(&verdict).unwrap_or(Value::String(verdict));
        Ok(Evaluation::annotation(annotation))
    }
}
