//! The builtin ErrorAgent, which turns an exhausted task's failures into a
//! report for the caller.

use crate::agent::{Agent, AgentError, AgentResponse};
use arena_proto::{TagPair, Task};
use async_trait::async_trait;

/// Registry name of the error-reporting agent.
pub const ERROR_AGENT: &str = "ErrorAgent";

/// Reported when the ErrorAgent itself cannot generate a report.
pub const FALLBACK_ERROR_MESSAGE: &str =
    "Something went wrong while handling your request, and the error report could not be generated.";

/// Returns the fallback report, framed in error tags.
pub fn fallback_error_content() -> String {
    TagPair::ERROR.wrap(FALLBACK_ERROR_MESSAGE)
}

/// Explains a failure to the user.
///
/// Used whenever no agent named `ErrorAgent` is registered.
#[derive(Debug, Default)]
pub struct ErrorAgent;

#[async_trait]
impl Agent for ErrorAgent {
    fn name(&self) -> &str {
        ERROR_AGENT
    }

    async fn build_prompt(&self, task: &Task) -> Result<String, AgentError> {
        Ok(format!(
            "A task could not be completed. Explain to the user, briefly and without \
             technical jargon, what went wrong. Do not call any tools or agents.\n\n\
             Failure report:\n{}",
            task.input_text()
        ))
    }

    fn post_process_response(&self, text: String) -> Result<AgentResponse, AgentError> {
        let trimmed = text.trim();
        if trimmed.starts_with(TagPair::ERROR.start) {
            return Ok(AgentResponse::text(trimmed));
        }
        Ok(AgentResponse::text(TagPair::ERROR.wrap(trimmed)))
    }
}
