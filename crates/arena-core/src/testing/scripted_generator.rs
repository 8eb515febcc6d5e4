//! Scripted text generator for deterministic runs.
//!
//! `ScriptedGenerator` serves canned responses per agent, in order, and
//! records every prompt it receives. Responses are streamed as one token per
//! whitespace-terminated word so token events fire as with a real backend.
//!
//! # Example
//!
//! ```
//! use arena_core::testing::ScriptedGenerator;
//!
//! let generator = ScriptedGenerator::new()
//!     .respond("Planner", "first answer")
//!     .fail("Planner", "rate limited");
//! assert_eq!(generator.remaining("Planner"), 2);
//! ```

use crate::llm::{GenerationError, GenerationEvent, GenerationRequest, TextGenerator, TokenStream};
use async_trait::async_trait;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    /// The generator refuses the request with this message.
    Fail(String),
}

/// A prompt the generator received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub agent: String,
    pub prompt: String,
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: HashMap<String, VecDeque<ScriptedReply>>,
    /// Replies repeated forever once an agent's queue is empty.
    fallbacks: HashMap<String, ScriptedReply>,
    prompts: Vec<RecordedPrompt>,
}

/// A `TextGenerator` driven by per-agent scripts.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    state: Mutex<ScriptState>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a text reply for `agent`.
    pub fn respond(self, agent: &str, text: impl Into<String>) -> Self {
        self.push(agent, ScriptedReply::Text(text.into()));
        self
    }

    /// Queues a failure for `agent`.
    pub fn fail(self, agent: &str, message: impl Into<String>) -> Self {
        self.push(agent, ScriptedReply::Fail(message.into()));
        self
    }

    /// Replies with `text` whenever `agent` has nothing else queued.
    pub fn always(self, agent: &str, text: impl Into<String>) -> Self {
        self.lock()
            .fallbacks
            .insert(agent.to_string(), ScriptedReply::Text(text.into()));
        self
    }

    /// Queues a reply on a shared generator.
    pub fn push(&self, agent: &str, reply: ScriptedReply) {
        self.lock()
            .replies
            .entry(agent.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Number of queued replies left for `agent`.
    pub fn remaining(&self, agent: &str) -> usize {
        self.lock().replies.get(agent).map_or(0, VecDeque::len)
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.lock().prompts.clone()
    }

    /// Prompts received from `agent`, in order.
    pub fn prompts_for(&self, agent: &str) -> Vec<String> {
        self.lock()
            .prompts
            .iter()
            .filter(|recorded| recorded.agent == agent)
            .map(|recorded| recorded.prompt.clone())
            .collect()
    }

    /// Number of generations requested by `agent`.
    pub fn call_count(&self, agent: &str) -> usize {
        self.lock()
            .prompts
            .iter()
            .filter(|recorded| recorded.agent == agent)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: &GenerationRequest) -> Option<ScriptedReply> {
        let mut state = self.lock();
        state.prompts.push(RecordedPrompt {
            agent: request.agent.clone(),
            prompt: request.prompt.clone(),
        });
        let queued = state
            .replies
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| state.fallbacks.get(&request.agent).cloned())
    }
}

/// Splits text into whitespace-terminated tokens that concatenate back to it.
fn tokenize(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError> {
        match self.next_reply(&request) {
            Some(ScriptedReply::Text(text)) => {
                let mut events: Vec<Result<GenerationEvent, GenerationError>> = tokenize(&text)
                    .into_iter()
                    .map(|token| Ok(GenerationEvent::Token(token)))
                    .collect();
                events.push(Ok(GenerationEvent::Finish {
                    reason: "stop".to_string(),
                }));
                Ok(Box::pin(stream::iter(events)))
            }
            Some(ScriptedReply::Fail(message)) => Err(GenerationError::Unavailable(message)),
            None => Err(GenerationError::Exhausted(request.agent)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(generator: &ScriptedGenerator, agent: &str) -> Result<String, GenerationError> {
        let mut stream = generator.generate(GenerationRequest::new(agent, "prompt")).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let GenerationEvent::Token(token) = event? {
                text.push_str(&token);
            }
        }
        Ok(text)
    }

    #[test]
    fn test_tokenize_roundtrips() {
        let text = "a  multi\nline reply";
        assert_eq!(tokenize(text).concat(), text);
        assert_eq!(tokenize("one two"), vec!["one ", "two"]);
    }

    #[tokio::test]
    async fn test_replies_served_in_order_per_agent() {
        let generator = ScriptedGenerator::new()
            .respond("A", "first")
            .respond("B", "other")
            .respond("A", "second");

        assert_eq!(collect(&generator, "A").await.unwrap(), "first");
        assert_eq!(collect(&generator, "A").await.unwrap(), "second");
        assert_eq!(collect(&generator, "B").await.unwrap(), "other");
        assert!(matches!(
            collect(&generator, "A").await,
            Err(GenerationError::Exhausted(_))
        ));
        assert_eq!(generator.call_count("A"), 3);
    }

    #[tokio::test]
    async fn test_fail_and_fallback() {
        let generator = ScriptedGenerator::new().fail("A", "down").always("A", "again");

        assert!(matches!(
            collect(&generator, "A").await,
            Err(GenerationError::Unavailable(_))
        ));
        assert_eq!(collect(&generator, "A").await.unwrap(), "again");
        assert_eq!(collect(&generator, "A").await.unwrap(), "again");
    }
}
