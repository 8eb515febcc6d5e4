//! # arena-proto
//!
//! Shared types, error definitions, and the event bus for the Arena scheduler.
//!
//! This crate provides the data model every other Arena crate speaks:
//! - `Chunk` and `Task`, the units of scratchpad history and scheduled work
//! - The invocation log used to print and cascade-delete the call tree
//! - Directive payloads (`ToolCall`, `AgentCall`) and the tag pairs that frame them
//! - `ArenaEvent` and the per-Arena `EventBus`
//! - Common error types

mod chunk;
mod directive;
mod error;
mod event;
mod event_bus;
mod invocation;
mod task;

pub use chunk::{Annotations, Chunk, ChunkType, read_data_chunks};
pub use directive::{AgentCall, TagPair, ToolCall};
pub use error::{Error, Result};
pub use event::{ArenaEvent, EventOrigin, ParseErrorKind, PublishedEvent};
pub use event_bus::{Audience, EventBus};
pub use invocation::{InvocationKind, InvocationLog, InvocationLogEntry, tool_invocation_id};
pub use task::{Task, TaskId, TaskStatus, TaskType};
