//! Event recorder for writing Arena events to JSONL files.
//!
//! `EventRecorder` is an event-bus observer that appends one JSON line per
//! published event, plus optional metadata records framing a run.

use arena_proto::PublishedEvent;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A timestamped record in the JSONL file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unix timestamp in milliseconds when the event was recorded.
    pub ts: u64,

    /// The published event name (e.g. "chunk", "evaluatorToolCall") or a
    /// `_meta.*` marker.
    pub event: String,

    pub data: serde_json::Value,
}

impl Record {
    /// Creates a new record with the current timestamp.
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self {
            ts: u64::try_from(ts).unwrap_or(u64::MAX),
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Creates a record for a published event.
    pub fn from_published(published: &PublishedEvent) -> Self {
        Self::new(published.name(), &published.event)
    }

    /// Creates a metadata record for the start of a run.
    pub fn meta_run_start(agent: &str, input: &serde_json::Value) -> Self {
        Self::new(
            "_meta.run_start",
            serde_json::json!({
                "agent": agent,
                "input": input,
            }),
        )
    }

    /// Creates a metadata record for the end of a run.
    pub fn meta_run_end(result: Option<&str>, error_count: u64) -> Self {
        Self::new(
            "_meta.run_end",
            serde_json::json!({
                "result": result,
                "error_count": error_count,
            }),
        )
    }
}

/// Records Arena events to a JSONL output.
///
/// Thread-safe; each event is written as soon as it is observed.
///
/// # Example
///
/// ```
/// use arena_core::EventRecorder;
/// use arena_proto::{ArenaEvent, EventOrigin, PublishedEvent, TaskId};
///
/// let mut output = Vec::new();
/// let recorder = EventRecorder::new(&mut output);
///
/// recorder.record(&PublishedEvent {
///     origin: EventOrigin::Task,
///     event: ArenaEvent::Token {
///         agent_name: "Planner".into(),
///         task_id: TaskId::new("t1"),
///         token: "Hi".into(),
///     },
/// });
///
/// drop(recorder);
/// let output_str = String::from_utf8_lossy(&output);
/// assert!(output_str.contains(r#""event":"token""#));
/// ```
pub struct EventRecorder<W> {
    writer: Mutex<W>,
    recorded: Mutex<u64>,
}

impl<W: Write> EventRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            recorded: Mutex::new(0),
        }
    }

    /// Records a published event.
    pub fn record(&self, published: &PublishedEvent) {
        if let Ok(mut count) = self.recorded.lock() {
            *count += 1;
        }
        self.write_record(&Record::from_published(published));
    }

    /// Records a metadata record.
    pub fn record_meta(&self, record: Record) {
        self.write_record(&record);
    }

    /// Number of events recorded, metadata excluded.
    pub fn recorded(&self) -> u64 {
        self.recorded.lock().map(|g| *g).unwrap_or(0)
    }

    fn write_record(&self, record: &Record) {
        if let Ok(mut writer) = self.writer.lock() {
            // Recording must never interrupt a run.
            if let Ok(json) = serde_json::to_string(record) {
                let _ = writeln!(writer, "{json}");
            }
        }
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) -> io::Result<()> {
        self.writer
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire writer lock"))?
            .flush()
    }
}

impl<W: Write + Send + 'static> EventRecorder<W> {
    /// Creates an observer closure for `Arena::add_observer`.
    ///
    /// ```ignore
    /// let recorder = Arc::new(EventRecorder::new(file));
    /// arena.add_observer(EventRecorder::make_observer(Arc::clone(&recorder)));
    /// ```
    pub fn make_observer(recorder: Arc<Self>) -> impl Fn(&PublishedEvent) + Send + 'static {
        move |published| {
            recorder.record(published);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_proto::{ArenaEvent, Chunk, EventOrigin, TaskId};

    fn chunk_event(origin: EventOrigin) -> PublishedEvent {
        PublishedEvent {
            origin,
            event: ArenaEvent::Chunk {
                agent_name: Some("Planner".into()),
                task_id: TaskId::new("t1"),
                chunk: Chunk::llm_output("Begin work"),
            },
        }
    }

    #[test]
    fn test_record_uses_published_name() {
        let mut output = Vec::new();
        {
            let recorder = EventRecorder::new(&mut output);
            recorder.record(&chunk_event(EventOrigin::Task));
            recorder.record(&chunk_event(EventOrigin::Evaluator));
            assert_eq!(recorder.recorded(), 2);
        }

        let output_str = String::from_utf8_lossy(&output);
        let lines: Vec<&str> = output_str.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Record = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, "chunk");
        assert_eq!(first.data["chunk"]["content"], "Begin work");
        let second: Record = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.event, "evaluatorChunk");
    }

    #[test]
    fn test_record_metadata() {
        let mut output = Vec::new();
        {
            let recorder = EventRecorder::new(&mut output);
            recorder.record_meta(Record::meta_run_start("Planner", &serde_json::json!("plan it")));
            recorder.record_meta(Record::meta_run_end(Some("done"), 0));
            assert_eq!(recorder.recorded(), 0);
        }

        let output_str = String::from_utf8_lossy(&output);
        assert!(output_str.contains("_meta.run_start"));
        assert!(output_str.contains("_meta.run_end"));
        assert!(output_str.contains("plan it"));
    }

    #[test]
    fn test_observer_writes_through_shared_recorder() {
        let recorder = Arc::new(EventRecorder::new(Vec::new()));
        let observer = EventRecorder::make_observer(Arc::clone(&recorder));

        observer(&chunk_event(EventOrigin::Task));
        assert_eq!(recorder.recorded(), 1);
    }
}
