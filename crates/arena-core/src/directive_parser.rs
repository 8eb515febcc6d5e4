//! Directive parsing from agent output.
//!
//! Parses tag-delimited directives from model text:
//! ```text
//! <|tool_call|>{"name": "search", "parameters": {"q": "rust"}}<|tool_call_end|>
//! <|agent_call|>"Researcher", {"topic": "rust"}<|agent_call_end|>
//! ```
//!
//! Every parser first checks that start and end tags balance across the
//! whole text, so a response truncated mid-directive fails as incomplete
//! before anything is extracted. Spans are then scanned left to right, each
//! running from a start tag to the next end tag.

use arena_proto::{AgentCall, TagPair, ToolCall};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while parsing directives or results.
#[derive(Debug, Error)]
pub enum DirectiveError {
    /// Start and end tag counts differ; the response was likely truncated.
    #[error("incomplete {tag} directive: found {starts} start tags and {ends} end tags")]
    Incomplete {
        tag: &'static str,
        starts: usize,
        ends: usize,
    },

    /// A span did not contain the JSON it must carry.
    #[error("invalid JSON in {tag} directive: {source}")]
    InvalidJson {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid agent call: name must be quoted")]
    NameNotQuoted,

    #[error("invalid agent call: input must be valid JSON")]
    InvalidInput,

    #[error("invalid agent call: missing input")]
    MissingInput,
}

/// Scanner state while walking the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the next start tag from this byte offset.
    Outside(usize),
    /// Inside a span whose body starts at this byte offset.
    Inside(usize),
    Done,
}

/// Walks `text` and yields the trimmed body of every complete span.
struct SpanScanner<'a> {
    text: &'a str,
    tags: TagPair,
    state: ScanState,
}

impl<'a> SpanScanner<'a> {
    fn new(text: &'a str, tags: TagPair) -> Self {
        Self {
            text,
            tags,
            state: ScanState::Outside(0),
        }
    }
}

impl<'a> Iterator for SpanScanner<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            match self.state {
                ScanState::Outside(from) => {
                    self.state = match self.text[from..].find(self.tags.start) {
                        Some(idx) => ScanState::Inside(from + idx + self.tags.start.len()),
                        None => ScanState::Done,
                    };
                }
                ScanState::Inside(body_start) => {
                    let Some(idx) = self.text[body_start..].find(self.tags.end) else {
                        self.state = ScanState::Done;
                        continue;
                    };
                    let body_end = body_start + idx;
                    self.state = ScanState::Outside(body_end + self.tags.end.len());
                    return Some(self.text[body_start..body_end].trim());
                }
                ScanState::Done => return None,
            }
        }
    }
}

/// Checks tag balance, then extracts every span body in order.
fn extract_spans(text: &str, tags: TagPair) -> Result<Vec<&str>, DirectiveError> {
    let starts = text.matches(tags.start).count();
    let ends = text.matches(tags.end).count();
    if starts != ends {
        return Err(DirectiveError::Incomplete {
            tag: tags.start,
            starts,
            ends,
        });
    }
    Ok(SpanScanner::new(text, tags).collect())
}

/// Parses every `<|tool_call|>` directive.
///
/// All or nothing: one malformed span fails the whole parse.
pub fn parse_tool_calls(text: &str) -> Result<Vec<ToolCall>, DirectiveError> {
    extract_spans(text, TagPair::TOOL_CALL)?
        .into_iter()
        .map(|span| {
            serde_json::from_str(span).map_err(|source| DirectiveError::InvalidJson {
                tag: TagPair::TOOL_CALL.start,
                source,
            })
        })
        .collect()
}

/// Parses every `<|agent_call|>` directive.
///
/// Each span may be a JSON object with `name` and `input`, the same object
/// without its outer braces, or a `"Name", {input}` tuple.
pub fn parse_agent_calls(text: &str) -> Result<Vec<AgentCall>, DirectiveError> {
    extract_spans(text, TagPair::AGENT_CALL)?
        .into_iter()
        .map(parse_agent_call)
        .collect()
}

fn parse_agent_call(span: &str) -> Result<AgentCall, DirectiveError> {
    if let Ok(call) = serde_json::from_str::<AgentCall>(span) {
        return Ok(call);
    }
    if let Ok(call) = serde_json::from_str::<AgentCall>(&format!("{{{span}}}")) {
        return Ok(call);
    }

    let Some((name, input)) = span.split_once(',') else {
        return Err(DirectiveError::MissingInput);
    };

    let name = name.trim();
    if name.len() < 2 || !name.starts_with('"') || !name.ends_with('"') {
        return Err(DirectiveError::NameNotQuoted);
    }
    let name: String = serde_json::from_str(name).map_err(|_| DirectiveError::NameNotQuoted)?;
    let input: Value =
        serde_json::from_str(input.trim()).map_err(|_| DirectiveError::InvalidInput)?;

    Ok(AgentCall { name, input })
}

/// Parses every `<|tool_result|>` span back into the tool's raw result.
pub fn parse_tool_results(text: &str) -> Result<Vec<Value>, DirectiveError> {
    parse_results(text, TagPair::TOOL_RESULT)
}

/// Parses every `<|agent_result|>` span back into the child's result.
pub fn parse_agent_results(text: &str) -> Result<Vec<Value>, DirectiveError> {
    parse_results(text, TagPair::AGENT_RESULT)
}

fn parse_results(text: &str, tags: TagPair) -> Result<Vec<Value>, DirectiveError> {
    extract_spans(text, tags)?
        .into_iter()
        .map(|span| {
            serde_json::from_str(span).map_err(|source| DirectiveError::InvalidJson {
                tag: tags.start,
                source,
            })
        })
        .collect()
}
