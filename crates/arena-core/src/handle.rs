//! Handle for submitting work to an Arena from outside its run loop.
//!
//! The Arena owns its queue exclusively. Other parties (agent-backed
//! evaluators, a session layer running on another task) send commands over
//! an unbounded channel; the loop applies them between steps and answers on a
//! oneshot channel once the submitted task completes.

use arena_proto::TaskType;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors returned to handle callers.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("arena has shut down")]
    Closed,

    /// The Arena rejected or deleted the task before it produced a result.
    #[error("task was dropped before completing")]
    Dropped,
}

/// Commands the run loop applies between steps.
#[derive(Debug)]
pub(crate) enum ArenaCommand {
    Submit {
        agent_name: String,
        input: Value,
        task_type: TaskType,
        responder: oneshot::Sender<String>,
    },
}

/// Clonable sender side of an Arena's command channel.
#[derive(Debug, Clone)]
pub struct ArenaHandle {
    commands: mpsc::UnboundedSender<ArenaCommand>,
}

impl ArenaHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<ArenaCommand>) -> Self {
        Self { commands }
    }

    /// Submits a root task and waits for its final result.
    pub async fn submit(&self, agent_name: &str, input: Value) -> Result<String, HandleError> {
        self.submit_as(agent_name, input, TaskType::Regular).await
    }

    /// Submits an evaluator task and waits for its final result.
    ///
    /// Evaluator tasks are scheduled like any other task, but their events
    /// are mirrored on the `evaluator*` set and never evaluated.
    pub async fn submit_evaluation(&self, agent_name: &str, input: Value) -> Result<String, HandleError> {
        self.submit_as(agent_name, input, TaskType::Evaluator).await
    }

    async fn submit_as(&self, agent_name: &str, input: Value, task_type: TaskType) -> Result<String, HandleError> {
        let (responder, response) = oneshot::channel();
        self.commands
            .send(ArenaCommand::Submit {
                agent_name: agent_name.to_string(),
                input,
                task_type,
                responder,
            })
            .map_err(|_| HandleError::Closed)?;
        response.await.map_err(|_| HandleError::Dropped)
    }
}
