//! Point-in-time copy of an Arena's mutable state.

use arena_proto::{Chunk, InvocationLog, Task, TaskId};
use serde::{Deserialize, Serialize};

/// Everything needed to resume an Arena elsewhere.
///
/// Completion callbacks and in-flight evaluations are not part of a snapshot:
/// a restored root task still runs to completion, but nobody is notified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArenaSnapshot {
    /// Tasks in creation order.
    pub tasks: Vec<Task>,
    pub queue: Vec<TaskId>,
    pub invocation_log: InvocationLog,
    #[serde(default)]
    pub continuation_task: Option<TaskId>,
    #[serde(default)]
    pub error_count: u64,
    /// Session-scoped data chunks.
    #[serde(default)]
    pub data_chunks: Vec<Chunk>,
}

impl ArenaSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
