//! Streaming text-generation capability.
//!
//! The Arena never talks to a model provider directly. Agents receive a
//! `TextGenerator` through their run context and consume its token stream.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// What an agent asks the generator for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Name of the agent issuing the request.
    pub agent: String,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
        }
    }
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    Token(String),
    Finish { reason: String },
}

/// Errors raised by a generator, either up front or mid-stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    #[error("generation stream failed: {0}")]
    Stream(String),

    /// A scripted backend ran out of responses.
    #[error("no scripted response left for agent {0}")]
    Exhausted(String),
}

/// Stream of tokens terminated by a finish event.
pub type TokenStream = BoxStream<'static, Result<GenerationEvent, GenerationError>>;

/// Produces a token stream for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError>;
}
