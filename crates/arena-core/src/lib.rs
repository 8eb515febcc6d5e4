//! # arena-core
//!
//! Task orchestration engine for LLM agents.
//!
//! This crate provides:
//! - The directive parser for tool calls, agent calls and their results
//! - The `Agent`, `Tool` and `Evaluator` capability traits
//! - The `Arena` scheduler with retry and execution budgets
//! - Agent and evaluator registries, including YAML-defined agents
//! - Configuration loading and the JSONL event recorder
//! - A scripted text generator for deterministic runs

mod agent;
mod arena;
mod config;
mod configured_agent;
mod directive_parser;
mod error_agent;
mod evaluator;
mod event_recorder;
mod handle;
mod llm;
mod registry;
mod snapshot;
pub mod testing;
mod tool;

pub use agent::{Agent, AgentContext, AgentError, AgentResponse};
pub use arena::{Arena, ArenaError, FailureReason};
pub use config::{
    AGENT_PATH_ENV, AgentDefinition, AgentsConfig, ArenaConfig, ConfigError, GenerationFailurePolicy,
    SchedulerConfig,
};
pub use configured_agent::ConfiguredAgent;
pub use directive_parser::{
    DirectiveError, parse_agent_calls, parse_agent_results, parse_tool_calls, parse_tool_results,
};
pub use error_agent::{ERROR_AGENT, ErrorAgent, FALLBACK_ERROR_MESSAGE, fallback_error_content};
pub use evaluator::{AgentEvaluator, Evaluation, EvaluationContext, Evaluator, EvaluatorError, FnEvaluator};
pub use event_recorder::{EventRecorder, Record};
pub use handle::{ArenaHandle, HandleError};
pub use llm::{GenerationError, GenerationEvent, GenerationRequest, TextGenerator, TokenStream};
pub use registry::{AgentManager, EvaluatorManager};
pub use snapshot::ArenaSnapshot;
pub use tool::{EchoTool, ParameterSchema, Tool, ToolContext, ToolError, ToolOutput, ToolSet};
