//! The Arena: a single-threaded scheduler for agent tasks.
//!
//! One loop iteration dequeues one task, runs its agent, appends the response
//! to the task's scratchpad and acts on the directives in it: tools run
//! inline, agent calls become child tasks, errors burn the retry budget.
//! Results flow back up the task tree until a root task reports to its caller.
//!
//! Evaluators run beside the loop on a `JoinSet` and never delay it. Their
//! annotations are merged back onto chunks between steps.

use crate::agent::{Agent, AgentContext, AgentError, AgentResponse};
use crate::config::{GenerationFailurePolicy, SchedulerConfig};
use crate::directive_parser::{parse_agent_calls, parse_tool_calls};
use crate::error_agent::{ERROR_AGENT, ErrorAgent, fallback_error_content};
use crate::evaluator::{Evaluation, EvaluationContext, Evaluator, EvaluatorError};
use crate::handle::{ArenaCommand, ArenaHandle};
use crate::llm::TextGenerator;
use crate::snapshot::ArenaSnapshot;
use crate::tool::{ToolContext, ToolError};
use arena_proto::{
    Annotations, ArenaEvent, Chunk, EventBus, EventOrigin, InvocationLog, InvocationLogEntry,
    ParseErrorKind, PublishedEvent, TagPair, Task, TaskId, TaskStatus, TaskType, ToolCall,
    tool_invocation_id,
};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// Called once with the final result of a root task.
type Completion = Box<dyn FnOnce(String) + Send + 'static>;

/// Errors returned by the Arena's entry points.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// Only returned under the `propagate` generation-failure policy.
    #[error("agent {agent} failed on task {task_id}: {source}")]
    Generation {
        agent: String,
        task_id: TaskId,
        #[source]
        source: AgentError,
    },
}

/// Why a task was handed over to the ErrorAgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    MaxRetries,
    MaxExecutions,
    GenerationFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::MaxRetries => "max retries reached",
            FailureReason::MaxExecutions => "max executions reached",
            FailureReason::GenerationFailed => "generation failed",
        })
    }
}

/// Evaluators waiting to be spawned for one chunk.
struct PendingEvaluation {
    task_id: TaskId,
    agent_name: Option<String>,
    chunk_index: usize,
    chunk: Chunk,
    evaluators: Vec<Arc<dyn Evaluator>>,
}

/// What one evaluator job produced.
struct EvaluationOutcome {
    task_id: TaskId,
    agent_name: Option<String>,
    chunk_index: usize,
    results: Vec<(String, Result<Evaluation, EvaluatorError>)>,
}

/// Why the idle loop woke up.
enum Wake {
    Command(ArenaCommand),
    Evaluated(Result<EvaluationOutcome, JoinError>),
    Idle,
}

/// The task scheduler.
pub struct Arena {
    agents: HashMap<String, Arc<dyn Agent>>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    generator: Arc<dyn TextGenerator>,
    config: SchedulerConfig,

    tasks: HashMap<TaskId, Task>,
    queue: VecDeque<TaskId>,
    log: InvocationLog,
    bus: EventBus,
    /// Session-scoped data chunks.
    data_chunks: Vec<Chunk>,
    continuation_task: Option<TaskId>,
    completions: HashMap<TaskId, Completion>,

    pending_evaluations: Vec<PendingEvaluation>,
    evaluations: JoinSet<EvaluationOutcome>,
    commands_tx: mpsc::UnboundedSender<ArenaCommand>,
    commands_rx: mpsc::UnboundedReceiver<ArenaCommand>,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("evaluators", &self.evaluators.len())
            .field("tasks", &self.tasks.len())
            .field("queue", &self.queue)
            .field("continuation_task", &self.continuation_task)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Arena {
    /// Creates an Arena over its own copy of the agent catalog.
    pub fn new(generator: Arc<dyn TextGenerator>, agents: HashMap<String, Arc<dyn Agent>>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            agents,
            evaluators: Vec::new(),
            generator,
            config: SchedulerConfig::default(),
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            log: InvocationLog::new(),
            bus: EventBus::new(),
            data_chunks: Vec::new(),
            continuation_task: None,
            completions: HashMap::new(),
            pending_evaluations: Vec::new(),
            evaluations: JoinSet::new(),
            commands_tx,
            commands_rx,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_evaluators(mut self, evaluators: Vec<Arc<dyn Evaluator>>) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns a handle for submitting tasks from outside the loop.
    pub fn handle(&self) -> ArenaHandle {
        ArenaHandle::new(self.commands_tx.clone())
    }

    /// Adds an observer that receives every event, evaluator mirrors included.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&PublishedEvent) + Send + 'static,
    {
        self.bus.add_observer(observer);
    }

    /// Adds an observer that only sees events of regular tasks.
    pub fn add_external_observer<F>(&mut self, observer: F)
    where
        F: Fn(&PublishedEvent) + Send + 'static,
    {
        self.bus.add_external_observer(observer);
    }

    /// Adds an observer for one topic, e.g. `toolCall` or `chunk:llm_output`.
    pub fn add_topic_observer<F>(&mut self, topic: impl Into<String>, observer: F)
    where
        F: Fn(&PublishedEvent) + Send + 'static,
    {
        self.bus.add_topic_observer(topic, observer);
    }

    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Task ids waiting to run, front first.
    pub fn queued(&self) -> &VecDeque<TaskId> {
        &self.queue
    }

    pub fn invocation_log(&self) -> &InvocationLog {
        &self.log
    }

    /// Number of task-originated `error` events so far.
    pub fn error_count(&self) -> u64 {
        self.bus.error_count()
    }

    pub fn continuation_task(&self) -> Option<&TaskId> {
        self.continuation_task.as_ref()
    }

    pub fn data_chunks(&self) -> &[Chunk] {
        &self.data_chunks
    }

    /// Submits a root task.
    pub fn submit(&mut self, agent_name: &str, input: Value) -> Result<TaskId, ArenaError> {
        self.submit_task(agent_name, input, TaskType::Regular, None)
    }

    /// Submits a root task whose final result is passed to `on_complete`.
    pub fn submit_with<F>(&mut self, agent_name: &str, input: Value, on_complete: F) -> Result<TaskId, ArenaError>
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.submit_task(agent_name, input, TaskType::Regular, Some(Box::new(on_complete)))
    }

    /// Delivers a user message.
    ///
    /// If a continuation task is waiting for input the message is appended to
    /// it and the task is re-queued with a fresh budget. Otherwise a new root
    /// task for `agent_name` is submitted.
    pub fn submit_message(
        &mut self,
        agent_name: &str,
        text: &str,
        message_id: Option<&str>,
    ) -> Result<TaskId, ArenaError> {
        if let Some(task_id) = self.continuation_task.clone()
            && let Some(task) = self.tasks.get_mut(&task_id)
        {
            task.retry_count = 0;
            task.execution_count = 0;
            task.status = TaskStatus::Queued;
            let agent = task.agent_name.clone();

            let mut chunk = Chunk::input(text);
            if let Some(message_id) = message_id {
                chunk = chunk.with_message_id(message_id);
            }
            self.add_chunk(&task_id, Some(&agent), chunk)?;
            self.queue.push_back(task_id.clone());
            debug!(task_id = %task_id, agent = %agent, "Continuing task with new input");
            return Ok(task_id);
        }

        let input = match message_id {
            Some(message_id) => serde_json::json!({ "text": text, "messageId": message_id }),
            None => Value::String(text.to_string()),
        };
        self.submit(agent_name, input)
    }

    fn submit_task(
        &mut self,
        agent_name: &str,
        input: Value,
        task_type: TaskType,
        on_complete: Option<Completion>,
    ) -> Result<TaskId, ArenaError> {
        if !self.is_registered(agent_name) {
            return Err(ArenaError::UnknownAgent(agent_name.to_string()));
        }

        let task = Task::new(agent_name, input).with_task_type(task_type);
        let task_id = task.id.clone();
        let mut seed = Chunk::input(task.input_text());
        if let Some(message_id) = task.input_message_id() {
            seed = seed.with_message_id(message_id);
        }

        self.tasks.insert(task_id.clone(), task);
        if let Some(on_complete) = on_complete {
            self.completions.insert(task_id.clone(), on_complete);
        }
        self.add_chunk(&task_id, Some(agent_name), seed)?;
        self.queue.push_back(task_id.clone());
        debug!(task_id = %task_id, agent = %agent_name, task_type = ?task_type, "Submitted root task");
        Ok(task_id)
    }

    /// Creates a child task of `parent_id` and queues it.
    ///
    /// The child inherits the parent's task type and starts with one `Input`
    /// chunk holding the JSON-encoded input.
    pub fn spawn_child(&mut self, parent_id: &TaskId, agent_name: &str, input: Value) -> Result<TaskId, ArenaError> {
        let parent = self
            .tasks
            .get(parent_id)
            .ok_or_else(|| ArenaError::UnknownTask(parent_id.clone()))?;

        let seed = Chunk::input(input.to_string());
        let child = Task::new(agent_name, input)
            .with_parent(parent_id.clone())
            .with_task_type(parent.task_type);
        let child_id = child.id.clone();

        self.tasks.insert(child_id.clone(), child);
        self.add_chunk(&child_id, Some(agent_name), seed)?;
        self.queue.push_back(child_id.clone());
        debug!(task_id = %child_id, parent = %parent_id, agent = %agent_name, "Spawned child task");
        Ok(child_id)
    }

    /// Appends a chunk to a task's scratchpad and announces it.
    ///
    /// One `chunk` event is published per chunk. Its type-specific topic
    /// (`chunk:llm_output`, ...) comes from `PublishedEvent::chunk_topic` and
    /// can be subscribed to with `add_topic_observer`. Chunks of regular tasks
    /// are queued for evaluation. Returns the index of the new chunk.
    pub fn add_chunk(&mut self, task_id: &TaskId, agent_name: Option<&str>, chunk: Chunk) -> Result<usize, ArenaError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))?;
        let index = task.push_chunk(chunk);
        let task_type = task.task_type;
        let chunk = task.scratchpad[index].clone();

        if task_type == TaskType::Regular {
            self.queue_evaluations(task_id, agent_name, index, &chunk);
        }
        self.bus.publish(
            task_type.into(),
            ArenaEvent::Chunk {
                agent_name: agent_name.map(str::to_string),
                task_id: task_id.clone(),
                chunk,
            },
        );
        Ok(index)
    }

    /// Runs until no task is queued, no evaluation is in flight and no
    /// command is pending.
    pub async fn run(&mut self) -> Result<(), ArenaError> {
        loop {
            self.drain_commands();
            self.merge_finished_evaluations();
            self.spawn_pending_evaluations();

            if let Some(task_id) = self.queue.pop_front() {
                self.step(&task_id).await?;
                continue;
            }
            if self.evaluations.is_empty() {
                break;
            }

            let wake = tokio::select! {
                Some(command) = self.commands_rx.recv() => Wake::Command(command),
                Some(joined) = self.evaluations.join_next() => Wake::Evaluated(joined),
                else => Wake::Idle,
            };
            match wake {
                Wake::Command(command) => self.apply_command(command),
                Wake::Evaluated(joined) => self.merge_evaluation(joined),
                Wake::Idle => break,
            }
        }
        debug!(tasks = self.tasks.len(), errors = self.error_count(), "Arena idle");
        Ok(())
    }

    async fn step(&mut self, task_id: &TaskId) -> Result<(), ArenaError> {
        let Some(task) = self.tasks.get_mut(task_id) else {
            debug!(task_id = %task_id, "Skipping deleted task");
            return Ok(());
        };
        if task.status == TaskStatus::Abandoned {
            debug!(task_id = %task_id, agent = %task.agent_name, "Skipping abandoned task");
            return Ok(());
        }

        if task.execution_count >= self.config.max_executions {
            warn!(
                task_id = %task_id,
                agent = %task.agent_name,
                executions = task.execution_count,
                "Execution budget exhausted"
            );
            return self.abandon(task_id, FailureReason::MaxExecutions);
        }

        task.execution_count += 1;
        debug!(
            task_id = %task_id,
            agent = %task.agent_name,
            execution = task.execution_count,
            retry = task.retry_count,
            "Dequeued task"
        );
        self.run_agent(task_id).await
    }

    /// Runs the task's agent once and acts on its response.
    ///
    /// Records the task in the invocation log unless it is already there.
    pub async fn run_agent(&mut self, task_id: &TaskId) -> Result<(), ArenaError> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))?;
        let agent_name = task.agent_name.clone();
        let parent_id = task.parent_task_id.as_ref().map(ToString::to_string);

        let agent = self.resolve_agent(&agent_name)?;
        self.log
            .record(InvocationLogEntry::agent(task_id.as_str(), &agent_name, parent_id));

        let outcome = {
            let Self {
                tasks,
                bus,
                data_chunks,
                generator,
                ..
            } = self;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))?;
            let mut ctx = AgentContext::new(&**generator, bus, data_chunks, task.task_type.into());
            agent.run(task, &mut ctx).await
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) if agent_name == ERROR_AGENT => {
                warn!(task_id = %task_id, error = %err, "ErrorAgent failed, using fallback report");
                AgentResponse::text(fallback_error_content())
            }
            Err(err) => match self.config.generation_failure {
                GenerationFailurePolicy::Propagate => {
                    return Err(ArenaError::Generation {
                        agent: agent_name,
                        task_id: task_id.clone(),
                        source: err,
                    });
                }
                GenerationFailurePolicy::RouteToErrorAgent => {
                    warn!(task_id = %task_id, agent = %agent_name, error = %err, "Generation failed");
                    self.add_chunk(task_id, Some(&agent_name), Chunk::error(err.to_string()))?;
                    return self.abandon(task_id, FailureReason::GenerationFailed);
                }
            },
        };

        self.process_response(task_id, &*agent, response).await
    }

    async fn process_response(
        &mut self,
        task_id: &TaskId,
        agent: &dyn Agent,
        response: AgentResponse,
    ) -> Result<(), ArenaError> {
        let agent_name = agent.name().to_string();
        let origin = self.origin_of(task_id)?;
        let (content, annotations) = response.into_parts(&agent.fqdn());
        self.add_chunk(
            task_id,
            Some(&agent_name),
            Chunk::llm_output(content.clone()).with_annotations(annotations),
        )?;

        let mut new_errors = false;
        let tool_calls = match parse_tool_calls(&content) {
            Ok(calls) => calls,
            Err(err) => {
                self.report_failure(
                    task_id,
                    &agent_name,
                    format!("Failed to parse tool calls: {err}"),
                    ParseErrorKind::ToolCall,
                )?;
                new_errors = true;
                Vec::new()
            }
        };
        let agent_calls = match parse_agent_calls(&content) {
            Ok(calls) => calls,
            Err(err) => {
                self.report_failure(
                    task_id,
                    &agent_name,
                    format!("Failed to parse agent calls: {err}"),
                    ParseErrorKind::AgentCall,
                )?;
                new_errors = true;
                Vec::new()
            }
        };

        let mut has_tool_calls = false;
        for call in &tool_calls {
            self.bus.publish(
                origin,
                ArenaEvent::ToolCall {
                    agent_name: agent_name.clone(),
                    task_id: task_id.clone(),
                    call: call.clone(),
                },
            );
            let invocation_id = tool_invocation_id(task_id.as_str(), &call.name);
            self.log.record(InvocationLogEntry::tool(
                &invocation_id,
                &call.name,
                task_id.to_string(),
                call.parameters.clone(),
            ));

            match self.execute_tool(task_id, agent, call).await {
                Ok((result, annotations)) => {
                    let content = TagPair::TOOL_RESULT.wrap(&result.to_string());
                    self.log.set_result(&invocation_id, result);
                    self.add_chunk(
                        task_id,
                        Some(&agent_name),
                        Chunk::tool_output(content).with_annotations(annotations),
                    )?;
                    has_tool_calls = true;
                }
                Err(err) => {
                    self.report_failure(
                        task_id,
                        &agent_name,
                        format!("Tool {} failed: {err}", call.name),
                        ParseErrorKind::Tool,
                    )?;
                    new_errors = true;
                }
            }
        }

        let has_agent_calls = !agent_calls.is_empty();
        for call in agent_calls {
            if !self.may_call(agent, &call.name) {
                self.report_failure(
                    task_id,
                    &agent_name,
                    format!("Agent {} is not available to {agent_name}", call.name),
                    ParseErrorKind::Agent,
                )?;
                new_errors = true;
                continue;
            }
            self.bus.publish(
                origin,
                ArenaEvent::AgentCall {
                    agent_name: agent_name.clone(),
                    task_id: task_id.clone(),
                    call: call.clone(),
                },
            );
            self.spawn_child(task_id, &call.name, call.input)?;
        }

        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))?;
        if let Some(index) = task.unprocessed_output_index() {
            task.scratchpad[index].processed = true;
        }

        if new_errors {
            self.retry_or_abandon(task_id)
        } else if has_tool_calls {
            task.status = TaskStatus::Queued;
            self.queue.push_back(task_id.clone());
            Ok(())
        } else if !has_agent_calls {
            if agent.supports_continuation() && self.config.interactive {
                task.status = TaskStatus::AwaitingInput;
                self.continuation_task = Some(task_id.clone());
                debug!(task_id = %task_id, agent = %agent_name, "Awaiting input");
                return Ok(());
            }
            task.status = TaskStatus::Completed;
            if self.continuation_task.as_ref() == Some(task_id) {
                self.continuation_task = None;
            }
            self.log.set_result(task_id.as_str(), Value::String(content.clone()));
            self.return_result_to_parent(task_id, content)
        } else {
            task.status = TaskStatus::WaitingOnChildren;
            Ok(())
        }
    }

    async fn execute_tool(
        &mut self,
        task_id: &TaskId,
        agent: &dyn Agent,
        call: &ToolCall,
    ) -> Result<(Value, Annotations), ToolError> {
        let tool = agent
            .tools()
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let Self {
            tasks, data_chunks, ..
        } = self;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| ToolError::Execution(format!("task {task_id} no longer exists")))?;
        let mut ctx = ToolContext::new(task, data_chunks);
        let output = tool.run(call.parameters.clone(), &mut ctx).await?;
        output.into_parts(&tool.fqdn())
    }

    /// Passes a final result to the parent task, or to the completion
    /// callback of a root task.
    ///
    /// Abandoned parents are skipped: the result travels on to their own
    /// parent, so an ErrorAgent report reaches whoever was waiting.
    pub fn return_result_to_parent(&mut self, task_id: &TaskId, result: String) -> Result<(), ArenaError> {
        let mut current = task_id.clone();
        loop {
            let task = self
                .tasks
                .get(&current)
                .ok_or_else(|| ArenaError::UnknownTask(current.clone()))?;

            let Some(parent_id) = task.parent_task_id.clone() else {
                match self.completions.remove(&current) {
                    Some(on_complete) => {
                        info!(task_id = %current, agent = %task.agent_name, "Root task completed");
                        on_complete(result);
                    }
                    None => debug!(task_id = %current, "Root task completed without a listener"),
                }
                return Ok(());
            };

            let parent = self
                .tasks
                .get(&parent_id)
                .ok_or_else(|| ArenaError::UnknownTask(parent_id.clone()))?;
            if parent.status == TaskStatus::Abandoned {
                debug!(task_id = %current, parent = %parent_id, "Forwarding result past abandoned task");
                current = parent_id;
                continue;
            }

            let parent_agent = parent.agent_name.clone();
            let content = TagPair::AGENT_RESULT.wrap(&Value::String(result).to_string());
            self.add_chunk(&parent_id, Some(&parent_agent), Chunk::agent_output(content))?;
            if let Some(parent) = self.tasks.get_mut(&parent_id) {
                parent.status = TaskStatus::Queued;
            }
            self.queue.push_back(parent_id);
            return Ok(());
        }
    }

    /// Removes a task and everything it spawned.
    ///
    /// Descendants are found through the invocation log and through parent
    /// links, so children that never ran are removed too. Returns the ids of
    /// the removed tasks.
    pub fn delete_task(&mut self, task_id: &TaskId) -> Vec<TaskId> {
        let mut doomed: HashSet<String> = self.log.remove_cascade(task_id.as_str()).into_iter().collect();
        loop {
            let linked: Vec<String> = self
                .tasks
                .values()
                .filter(|task| !doomed.contains(task.id.as_str()))
                .filter(|task| {
                    task.parent_task_id
                        .as_ref()
                        .is_some_and(|parent| doomed.contains(parent.as_str()))
                })
                .map(|task| task.id.to_string())
                .collect();
            if linked.is_empty() {
                break;
            }
            for id in linked {
                doomed.extend(self.log.remove_cascade(&id));
            }
        }

        let mut removed: Vec<TaskId> = self
            .tasks
            .keys()
            .filter(|id| doomed.contains(id.as_str()))
            .cloned()
            .collect();
        removed.sort();
        for id in &removed {
            self.tasks.remove(id);
            self.completions.remove(id);
        }
        self.queue.retain(|id| !doomed.contains(id.as_str()));
        if self
            .continuation_task
            .as_ref()
            .is_some_and(|id| doomed.contains(id.as_str()))
        {
            self.continuation_task = None;
        }

        info!(task_id = %task_id, removed = removed.len(), "Deleted task tree");
        removed
    }

    /// Copies the Arena's mutable state.
    pub fn snapshot(&self) -> ArenaSnapshot {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        ArenaSnapshot {
            tasks,
            queue: self.queue.iter().cloned().collect(),
            invocation_log: self.log.clone(),
            continuation_task: self.continuation_task.clone(),
            error_count: self.bus.error_count(),
            data_chunks: self.data_chunks.clone(),
        }
    }

    /// Replaces the Arena's mutable state with a snapshot.
    ///
    /// Completion callbacks registered before the restore are dropped, and
    /// evaluations still in flight are aborted.
    pub fn restore(&mut self, snapshot: ArenaSnapshot) {
        self.tasks = snapshot
            .tasks
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        self.queue = snapshot.queue.into();
        self.log = snapshot.invocation_log;
        self.continuation_task = snapshot.continuation_task;
        self.bus.set_error_count(snapshot.error_count);
        self.data_chunks = snapshot.data_chunks;
        self.completions.clear();
        self.pending_evaluations.clear();
        self.evaluations.abort_all();
        debug!(tasks = self.tasks.len(), queued = self.queue.len(), "Restored arena snapshot");
    }

    fn is_registered(&self, agent_name: &str) -> bool {
        self.agents.contains_key(agent_name) || agent_name == ERROR_AGENT
    }

    fn resolve_agent(&self, agent_name: &str) -> Result<Arc<dyn Agent>, ArenaError> {
        if let Some(agent) = self.agents.get(agent_name) {
            return Ok(Arc::clone(agent));
        }
        if agent_name == ERROR_AGENT {
            return Ok(Arc::new(ErrorAgent));
        }
        Err(ArenaError::UnknownAgent(agent_name.to_string()))
    }

    /// Agents with a whitelist may only call its members and the
    /// always-allowed agents. Agents without one may call anything registered.
    fn may_call(&self, caller: &dyn Agent, target: &str) -> bool {
        if !self.is_registered(target) {
            return false;
        }
        let whitelist = caller.sub_agents();
        whitelist.is_empty()
            || whitelist.iter().any(|name| name == target)
            || self.config.always_allowed_agents.iter().any(|name| name == target)
    }

    fn origin_of(&self, task_id: &TaskId) -> Result<EventOrigin, ArenaError> {
        self.tasks
            .get(task_id)
            .map(|task| task.task_type.into())
            .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))
    }

    /// Appends an `Error` chunk and publishes a `parseError` event.
    fn report_failure(
        &mut self,
        task_id: &TaskId,
        agent_name: &str,
        message: String,
        kind: ParseErrorKind,
    ) -> Result<(), ArenaError> {
        debug!(task_id = %task_id, agent = %agent_name, kind = ?kind, error = %message, "Directive failed");
        let origin = self.origin_of(task_id)?;
        self.add_chunk(task_id, Some(agent_name), Chunk::error(message.clone()))?;
        self.bus.publish(
            origin,
            ArenaEvent::ParseError {
                agent_name: agent_name.to_string(),
                task_id: task_id.clone(),
                error: message,
                kind,
            },
        );
        Ok(())
    }

    fn retry_or_abandon(&mut self, task_id: &TaskId) -> Result<(), ArenaError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))?;

        if task.retry_count < self.config.max_retries && task.execution_count < self.config.max_executions {
            task.retry_count += 1;
            task.status = TaskStatus::Queued;
            warn!(task_id = %task_id, agent = %task.agent_name, retry = task.retry_count, "Retrying task");
            self.queue.push_back(task_id.clone());
            return Ok(());
        }

        let reason = if task.retry_count >= self.config.max_retries {
            FailureReason::MaxRetries
        } else {
            FailureReason::MaxExecutions
        };
        warn!(task_id = %task_id, agent = %task.agent_name, reason = %reason, "Retry budget exhausted");
        self.abandon(task_id, reason)
    }

    /// Gives up on a task and hands its error history to an ErrorAgent child.
    ///
    /// An exhausted ErrorAgent task reports the fallback message instead of
    /// spawning another ErrorAgent.
    fn abandon(&mut self, task_id: &TaskId, reason: FailureReason) -> Result<(), ArenaError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ArenaError::UnknownTask(task_id.clone()))?;
        task.status = TaskStatus::Abandoned;
        let summary = task.error_summary();
        let is_error_agent = task.agent_name == ERROR_AGENT;

        if self.continuation_task.as_ref() == Some(task_id) {
            self.continuation_task = None;
        }
        self.queue.retain(|id| id != task_id);
        if is_error_agent {
            return self.return_result_to_parent(task_id, fallback_error_content());
        }

        let report = if summary.is_empty() {
            reason.to_string()
        } else {
            format!("{reason}\n\n{summary}")
        };
        let child = self.spawn_child(task_id, ERROR_AGENT, Value::String(report))?;
        info!(task_id = %task_id, error_task = %child, reason = %reason, "Task abandoned");
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: ArenaCommand) {
        match command {
            ArenaCommand::Submit {
                agent_name,
                input,
                task_type,
                responder,
            } => {
                let on_complete: Completion = Box::new(move |result| {
                    // The submitter may have stopped waiting.
                    let _ = responder.send(result);
                });
                if let Err(err) = self.submit_task(&agent_name, input, task_type, Some(on_complete)) {
                    warn!(agent = %agent_name, error = %err, "Rejected submitted task");
                }
            }
        }
    }

    fn queue_evaluations(&mut self, task_id: &TaskId, agent_name: Option<&str>, chunk_index: usize, chunk: &Chunk) {
        let evaluators: Vec<Arc<dyn Evaluator>> = self
            .evaluators
            .iter()
            .filter(|evaluator| evaluator.supports(chunk.chunk_type))
            .cloned()
            .collect();
        if evaluators.is_empty() {
            return;
        }
        self.pending_evaluations.push(PendingEvaluation {
            task_id: task_id.clone(),
            agent_name: agent_name.map(str::to_string),
            chunk_index,
            chunk: chunk.clone(),
            evaluators,
        });
    }

    fn spawn_pending_evaluations(&mut self) {
        for pending in std::mem::take(&mut self.pending_evaluations) {
            let ctx = EvaluationContext {
                handle: self.handle(),
                task_id: pending.task_id.clone(),
                agent_name: pending.agent_name.clone(),
            };
            self.evaluations.spawn(async move {
                let chunk = &pending.chunk;
                let ctx = &ctx;
                let results = join_all(pending.evaluators.iter().map(|evaluator| async move {
                    (evaluator.fqdn().to_string(), evaluator.evaluate(chunk, ctx).await)
                }))
                .await;
                EvaluationOutcome {
                    task_id: pending.task_id.clone(),
                    agent_name: pending.agent_name.clone(),
                    chunk_index: pending.chunk_index,
                    results,
                }
            });
        }
    }

    fn merge_finished_evaluations(&mut self) {
        while let Some(joined) = self.evaluations.try_join_next() {
            self.merge_evaluation(joined);
        }
    }

    fn merge_evaluation(&mut self, joined: Result<EvaluationOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Evaluation job aborted");
                return;
            }
        };

        for (fqdn, result) in outcome.results {
            match result {
                Ok(evaluation) => {
                    let annotations = evaluation.into_annotations(&fqdn);
                    if annotations.is_empty() {
                        continue;
                    }
                    let chunk = self
                        .tasks
                        .get_mut(&outcome.task_id)
                        .and_then(|task| task.scratchpad.get_mut(outcome.chunk_index));
                    match chunk {
                        Some(chunk) => chunk.merge_annotations(annotations),
                        None => debug!(task_id = %outcome.task_id, evaluator = %fqdn, "Evaluated chunk is gone"),
                    }
                }
                Err(err) => {
                    warn!(task_id = %outcome.task_id, evaluator = %fqdn, error = %err, "Evaluator failed");
                    self.bus.publish(
                        EventOrigin::Evaluator,
                        ArenaEvent::Error {
                            agent_name: outcome.agent_name.clone(),
                            task_id: Some(outcome.task_id.clone()),
                            error: format!("{fqdn}: {err}"),
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::testing::ScriptedGenerator;
    use arena_proto::ChunkType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Plain(&'static str);

    #[async_trait]
    impl Agent for Plain {
        fn name(&self) -> &str {
            self.0
        }

        async fn build_prompt(&self, task: &Task) -> Result<String, AgentError> {
            Ok(task.input_text())
        }
    }

    fn arena(generator: ScriptedGenerator) -> Arena {
        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        agents.insert("P".into(), Arc::new(Plain("P")));
        agents.insert("C".into(), Arc::new(Plain("C")));
        Arena::new(Arc::new(generator), agents)
    }

    #[test]
    fn test_result_reaches_parent_scratchpad_not_callback() {
        let mut arena = arena(ScriptedGenerator::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = Arc::clone(&calls);
        let parent = arena
            .submit_with("P", json!("start"), move |result| calls_clone.lock().unwrap().push(result))
            .unwrap();
        let child = arena.spawn_child(&parent, "C", json!({"q": 1})).unwrap();
        let queued_before = arena.queued().iter().filter(|id| **id == parent).count();

        arena.return_result_to_parent(&child, "hello".into()).unwrap();

        let outputs: Vec<&Chunk> = arena
            .task(&parent)
            .unwrap()
            .scratchpad
            .iter()
            .filter(|chunk| chunk.chunk_type == ChunkType::AgentOutput)
            .collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].content, r#"<|agent_result|>"hello"<|agent_result_end|>"#);
        assert_eq!(arena.queued().iter().filter(|id| **id == parent).count(), queued_before + 1);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_root_result_calls_callback_once() {
        let mut arena = arena(ScriptedGenerator::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = Arc::clone(&calls);
        let parent = arena
            .submit_with("P", json!("start"), move |result| calls_clone.lock().unwrap().push(result))
            .unwrap();
        let scratchpad_before = arena.task(&parent).unwrap().scratchpad.clone();

        arena.return_result_to_parent(&parent, "done".into()).unwrap();
        arena.return_result_to_parent(&parent, "again".into()).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["done".to_string()]);
        assert_eq!(arena.task(&parent).unwrap().scratchpad, scratchpad_before);
    }

    #[test]
    fn test_submit_rejects_unknown_agent() {
        let mut arena = arena(ScriptedGenerator::new());
        let err = arena.submit("Nobody", json!("x")).unwrap_err();
        assert!(matches!(err, ArenaError::UnknownAgent(name) if name == "Nobody"));
        // The builtin ErrorAgent is always available.
        assert!(arena.submit(ERROR_AGENT, json!("report")).is_ok());
    }

    #[test]
    fn test_child_is_seeded_with_json_input() {
        let mut arena = arena(ScriptedGenerator::new());
        let parent = arena.submit("P", json!("start")).unwrap();
        let child = arena.spawn_child(&parent, "C", json!({"q": "why"})).unwrap();

        let child = arena.task(&child).unwrap();
        assert_eq!(child.parent_task_id.as_ref(), Some(&parent));
        assert_eq!(child.scratchpad.len(), 1);
        assert_eq!(child.scratchpad[0].chunk_type, ChunkType::Input);
        assert_eq!(child.scratchpad[0].content, r#"{"q":"why"}"#);
    }

    #[tokio::test]
    async fn test_run_agent_logs_task_once() {
        let generator = ScriptedGenerator::new().always("P", "plain answer");
        let mut arena = arena(generator);
        let task_id = arena.submit("P", json!("hi")).unwrap();

        arena.run_agent(&task_id).await.unwrap();
        arena.run_agent(&task_id).await.unwrap();

        let entries: Vec<_> = arena
            .invocation_log()
            .entries()
            .iter()
            .filter(|entry| entry.id == task_id.as_str())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_message_starts_root_with_message_id() {
        let generator = ScriptedGenerator::new().respond("P", "hello");
        let mut arena = arena(generator);
        let task_id = arena.submit_message("P", "hi there", Some("m-1")).unwrap();
        arena.run().await.unwrap();

        let task = arena.task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let output = task
            .scratchpad
            .iter()
            .find(|chunk| chunk.chunk_type == ChunkType::LlmOutput)
            .unwrap();
        assert_eq!(output.message_id.as_deref(), Some("m-1"));
    }
}
