//! Invocation log: an append-only record of the agent/tool call tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write as _;

/// Whether an entry records an agent task or a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Agent,
    Tool,
}

/// One node of the invocation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationLogEntry {
    /// Task id for agents, `tool_<taskId>_<toolName>` for tools.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InvocationKind,
    pub name: String,
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl InvocationLogEntry {
    pub fn agent(id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind: InvocationKind::Agent,
            name: name.into(),
            parent_id,
            params: None,
            result: None,
        }
    }

    pub fn tool(id: impl Into<String>, name: impl Into<String>, parent_id: String, params: Value) -> Self {
        Self {
            id: id.into(),
            kind: InvocationKind::Tool,
            name: name.into(),
            parent_id: Some(parent_id),
            params: Some(params),
            result: None,
        }
    }
}

/// Builds the synthetic invocation id of a tool executed inside a task.
pub fn tool_invocation_id(task_id: &str, tool_name: &str) -> String {
    format!("tool_{task_id}_{tool_name}")
}

/// Append-only log with at most one entry per id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationLog {
    entries: Vec<InvocationLogEntry>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` unless an entry with the same id exists.
    ///
    /// Returns true if the entry was added.
    pub fn record(&mut self, entry: InvocationLogEntry) -> bool {
        if self.contains(&entry.id) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&InvocationLogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Stores the result of an existing entry.
    pub fn set_result(&mut self, id: &str, result: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
            entry.result = Some(result);
        }
    }

    pub fn entries(&self) -> &[InvocationLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `id` and the ids of all its descendants, parents first.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut found = vec![id.to_string()];
        let mut seen: HashSet<String> = found.iter().cloned().collect();
        let mut cursor = 0;
        while cursor < found.len() {
            let current = found[cursor].clone();
            for entry in &self.entries {
                if entry.parent_id.as_deref() == Some(current.as_str()) && seen.insert(entry.id.clone()) {
                    found.push(entry.id.clone());
                }
            }
            cursor += 1;
        }
        found
    }

    /// Removes `id` and every entry descending from it.
    ///
    /// Returns the removed ids (including `id` even if it was never logged).
    pub fn remove_cascade(&mut self, id: &str) -> Vec<String> {
        let removed = self.descendants(id);
        let doomed: HashSet<&str> = removed.iter().map(String::as_str).collect();
        self.entries.retain(|entry| !doomed.contains(entry.id.as_str()));
        removed
    }

    /// Renders the call tree, one indented line per entry.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let roots = self.entries.iter().filter(|entry| {
            entry
                .parent_id
                .as_deref()
                .is_none_or(|parent| !self.contains(parent))
        });
        for root in roots {
            self.render_node(root, 0, &mut out);
        }
        out
    }

    fn render_node(&self, entry: &InvocationLogEntry, depth: usize, out: &mut String) {
        let marker = match entry.kind {
            InvocationKind::Agent => "agent",
            InvocationKind::Tool => "tool",
        };
        let _ = writeln!(out, "{}- [{}] {} ({})", "  ".repeat(depth), marker, entry.name, entry.id);
        for child in self
            .entries
            .iter()
            .filter(|child| child.parent_id.as_deref() == Some(entry.id.as_str()))
        {
            self.render_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_log() -> InvocationLog {
        let mut log = InvocationLog::new();
        log.record(InvocationLogEntry::agent("root", "Planner", None));
        log.record(InvocationLogEntry::agent("child", "Researcher", Some("root".into())));
        log.record(InvocationLogEntry::tool(
            tool_invocation_id("child", "search"),
            "search",
            "child".into(),
            json!({"q": "rust"}),
        ));
        log.record(InvocationLogEntry::agent("other", "Writer", None));
        log
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut log = sample_log();
        assert!(!log.record(InvocationLogEntry::agent("root", "Planner", None)));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_remove_cascade_removes_descendants_only() {
        let mut log = sample_log();
        let removed = log.remove_cascade("root");

        assert_eq!(removed, vec!["root", "child", "tool_child_search"]);
        assert_eq!(log.len(), 1);
        assert!(log.contains("other"));
    }

    #[test]
    fn test_render_tree_indents_children() {
        let tree = sample_log().render_tree();
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines[0], "- [agent] Planner (root)");
        assert_eq!(lines[1], "  - [agent] Researcher (child)");
        assert_eq!(lines[2], "    - [tool] search (tool_child_search)");
        assert_eq!(lines[3], "- [agent] Writer (other)");
    }
}
