//! Event bus for Arena observability.
//!
//! Every Arena owns one bus. Observers receive each published event in
//! publish order. Evaluator-originated events are filtered at this boundary:
//! observers registered for the external audience never see them.

use crate::event::{ArenaEvent, EventOrigin, PublishedEvent};
use std::fmt;
use tracing::trace;

/// Type alias for the observer callback function.
type Observer = Box<dyn Fn(&PublishedEvent) + Send + 'static>;

/// Which events an observer receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every event, including the `evaluator*` mirror set.
    All,
    /// Only events of ordinary tasks (what a caller's UI should see).
    External,
}

/// Per-Arena event emitter.
#[derive(Default)]
pub struct EventBus {
    observers: Vec<(Audience, Observer)>,

    /// Number of task-originated `error` events published so far.
    error_count: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.len())
            .field("error_count", &self.error_count)
            .finish()
    }
}

impl EventBus {
    /// Creates a new event bus without observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer that receives all published events.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&PublishedEvent) + Send + 'static,
    {
        self.observers.push((Audience::All, Box::new(observer)));
    }

    /// Adds an observer that only receives events of regular tasks.
    pub fn add_external_observer<F>(&mut self, observer: F)
    where
        F: Fn(&PublishedEvent) + Send + 'static,
    {
        self.observers.push((Audience::External, Box::new(observer)));
    }

    /// Adds an observer for one topic: an event name such as `toolCall`, or
    /// a type-specific chunk topic such as `chunk:llm_output`.
    pub fn add_topic_observer<F>(&mut self, topic: impl Into<String>, observer: F)
    where
        F: Fn(&PublishedEvent) + Send + 'static,
    {
        let topic = topic.into();
        self.add_observer(move |published| {
            if published.name() == topic || published.chunk_topic().as_deref() == Some(topic.as_str()) {
                observer(published);
            }
        });
    }

    /// Publishes an event.
    ///
    /// Task-originated `error` events increment the error counter.
    pub fn publish(&mut self, origin: EventOrigin, event: ArenaEvent) {
        let published = PublishedEvent { origin, event };
        if published.counts_as_error() {
            self.error_count += 1;
        }
        trace!(event = published.name(), "Publishing event");

        for (audience, observer) in &self.observers {
            if *audience == Audience::External && origin == EventOrigin::Evaluator {
                continue;
            }
            observer(&published);
        }
    }

    /// Returns the number of task-originated errors published.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Overwrites the error counter, used when restoring a snapshot.
    pub fn set_error_count(&mut self, count: u64) {
        self.error_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::task::TaskId;
    use std::sync::{Arc, Mutex};

    fn chunk_event() -> ArenaEvent {
        ArenaEvent::Chunk {
            agent_name: None,
            task_id: TaskId::new("t1"),
            chunk: Chunk::input("hello"),
        }
    }

    fn error_event() -> ArenaEvent {
        ArenaEvent::Error {
            agent_name: Some("Planner".into()),
            task_id: Some(TaskId::new("t1")),
            error: "stream failed".into(),
        }
    }

    #[test]
    fn test_observer_receives_all_events() {
        let mut bus = EventBus::new();
        let observed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let observed_clone = Arc::clone(&observed);
        bus.add_observer(move |event| {
            observed_clone.lock().unwrap().push(event.name().to_string());
        });

        bus.publish(EventOrigin::Task, chunk_event());
        bus.publish(EventOrigin::Evaluator, chunk_event());
        bus.publish(EventOrigin::Task, error_event());

        let captured = observed.lock().unwrap();
        assert_eq!(*captured, vec!["chunk", "evaluatorChunk", "error"]);
    }

    #[test]
    fn test_external_observer_skips_evaluator_events() {
        let mut bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));

        let count_clone = Arc::clone(&count);
        bus.add_external_observer(move |_| {
            *count_clone.lock().unwrap() += 1;
        });

        bus.publish(EventOrigin::Evaluator, chunk_event());
        bus.publish(EventOrigin::Evaluator, error_event());
        assert_eq!(*count.lock().unwrap(), 0);

        bus.publish(EventOrigin::Task, chunk_event());
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_error_counter_ignores_evaluator_errors() {
        let mut bus = EventBus::new();

        bus.publish(EventOrigin::Evaluator, error_event());
        assert_eq!(bus.error_count(), 0);

        bus.publish(EventOrigin::Task, error_event());
        bus.publish(EventOrigin::Task, chunk_event());
        assert_eq!(bus.error_count(), 1);
    }

    #[test]
    fn test_topic_observer_matches_names_and_chunk_topics() {
        let mut bus = EventBus::new();
        let inputs = Arc::new(Mutex::new(0));
        let errors = Arc::new(Mutex::new(0));

        let inputs_clone = Arc::clone(&inputs);
        bus.add_topic_observer("chunk:input", move |_| {
            *inputs_clone.lock().unwrap() += 1;
        });
        let errors_clone = Arc::clone(&errors);
        bus.add_topic_observer("error", move |_| {
            *errors_clone.lock().unwrap() += 1;
        });

        bus.publish(EventOrigin::Task, chunk_event());
        bus.publish(EventOrigin::Evaluator, chunk_event());
        bus.publish(EventOrigin::Task, error_event());

        // The evaluator mirror publishes `evaluatorChunk:input`.
        assert_eq!(*inputs.lock().unwrap(), 1);
        assert_eq!(*errors.lock().unwrap(), 1);
    }
}
