//! Integration tests for evaluator dispatch.

use arena_core::testing::ScriptedGenerator;
use arena_core::{
    Agent, AgentEvaluator, Arena, ConfiguredAgent, Evaluation, EvaluationContext, Evaluator, EvaluatorError,
    FnEvaluator,
};
use arena_proto::{Chunk, ChunkType, EventOrigin, PublishedEvent, TaskId, TaskType};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn catalog(agents: Vec<ConfiguredAgent>) -> HashMap<String, Arc<dyn Agent>> {
    agents
        .into_iter()
        .map(|agent| (agent.name().to_string(), Arc::new(agent) as Arc<dyn Agent>))
        .collect()
}

fn length_evaluator() -> Arc<dyn Evaluator> {
    Arc::new(FnEvaluator::new(
        "evaluator.length",
        vec![ChunkType::LlmOutput],
        |chunk: &Chunk| Ok(Evaluation::annotation(json!(chunk.content.len()))),
    ))
}

fn failing_evaluator() -> Arc<dyn Evaluator> {
    Arc::new(FnEvaluator::new(
        "evaluator.broken",
        vec![ChunkType::LlmOutput],
        |_: &Chunk| Err(EvaluatorError::Failed("model refused".into())),
    ))
}

fn llm_output(arena: &Arena, task_id: &TaskId) -> Chunk {
    arena
        .task(task_id)
        .unwrap()
        .scratchpad
        .iter()
        .find(|chunk| chunk.chunk_type == ChunkType::LlmOutput)
        .cloned()
        .unwrap()
}

type EventLog = Arc<Mutex<Vec<(EventOrigin, String)>>>;

fn observe(arena: &mut Arena) -> (EventLog, EventLog) {
    let all: EventLog = Arc::new(Mutex::new(Vec::new()));
    let external: EventLog = Arc::new(Mutex::new(Vec::new()));

    let all_clone = Arc::clone(&all);
    arena.add_observer(move |published: &PublishedEvent| {
        all_clone
            .lock()
            .unwrap()
            .push((published.origin, published.name().to_string()));
    });
    let external_clone = Arc::clone(&external);
    arena.add_external_observer(move |published: &PublishedEvent| {
        external_clone
            .lock()
            .unwrap()
            .push((published.origin, published.name().to_string()));
    });
    (all, external)
}

#[tokio::test]
async fn test_function_evaluator_annotates_matching_chunks() {
    let generator = Arc::new(ScriptedGenerator::new().respond("Writer", "twelve chars"));
    let mut arena = Arena::new(generator, catalog(vec![ConfiguredAgent::new("Writer", "Write.")]))
        .with_evaluators(vec![length_evaluator()]);

    let task_id = arena.submit("Writer", json!("write")).unwrap();
    arena.run().await.unwrap();

    let output = llm_output(&arena, &task_id);
    assert_eq!(output.annotation("evaluator.length"), Some(&json!(12)));

    // Input chunks are not of a supported type.
    let input = &arena.task(&task_id).unwrap().scratchpad[0];
    assert_eq!(input.chunk_type, ChunkType::Input);
    assert!(input.annotations.is_none());
}

#[tokio::test]
async fn test_failing_evaluator_is_isolated() {
    let generator = Arc::new(ScriptedGenerator::new().respond("Writer", "hello"));
    let mut arena = Arena::new(generator, catalog(vec![ConfiguredAgent::new("Writer", "Write.")]))
        .with_evaluators(vec![failing_evaluator(), length_evaluator()]);
    let (all, external) = observe(&mut arena);

    let task_id = arena.submit("Writer", json!("write")).unwrap();
    arena.run().await.unwrap();

    let output = llm_output(&arena, &task_id);
    assert_eq!(output.annotation("evaluator.broken"), None);
    assert_eq!(output.annotation("evaluator.length"), Some(&json!(5)));
    assert_eq!(arena.error_count(), 0);

    let all = all.lock().unwrap();
    assert!(all.contains(&(EventOrigin::Evaluator, "evaluatorError".to_string())));
    let external = external.lock().unwrap();
    assert!(external.iter().all(|(origin, _)| *origin == EventOrigin::Task));
}

#[tokio::test]
async fn test_agent_evaluator_runs_as_evaluator_task() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .respond("Writer", "a first draft")
            .respond("Judge", r#"{"score": 5}"#),
    );
    let judge = ConfiguredAgent::new("Judge", "Score the chunk from 1 to 5. Reply with JSON.");
    let evaluator = AgentEvaluator::new(&judge, vec![ChunkType::LlmOutput]).unwrap();
    let mut arena = Arena::new(
        generator.clone(),
        catalog(vec![ConfiguredAgent::new("Writer", "Write."), judge]),
    )
    .with_evaluators(vec![Arc::new(evaluator)]);
    let (all, external) = observe(&mut arena);

    let writer_id = arena.submit("Writer", json!("write")).unwrap();
    arena.run().await.unwrap();

    let output = llm_output(&arena, &writer_id);
    assert_eq!(output.annotation("evaluator.Judge"), Some(&json!({"score": 5})));

    let judge_task = arena.tasks().find(|task| task.agent_name == "Judge").unwrap();
    assert_eq!(judge_task.task_type, TaskType::Evaluator);
    assert!(judge_task.is_root());
    // The judge's own output is never evaluated.
    assert_eq!(generator.call_count("Judge"), 1);
    assert!(llm_output(&arena, &judge_task.id).annotations.is_none());
    assert!(generator.prompts_for("Judge")[0].contains("a first draft"));

    let all = all.lock().unwrap();
    assert!(all.contains(&(EventOrigin::Evaluator, "evaluatorChunk".to_string())));
    assert!(all.contains(&(EventOrigin::Evaluator, "evaluatorToken".to_string())));
    let external = external.lock().unwrap();
    assert!(!external.iter().any(|(_, name)| name.starts_with("evaluator")));
    assert!(external.contains(&(EventOrigin::Task, "chunk".to_string())));
}

#[tokio::test]
async fn test_agent_evaluator_keeps_plain_text_verdicts() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .respond("Writer", "draft")
            .respond("Critic", "Too short."),
    );
    let critic = ConfiguredAgent::new("Critic", "Critique the chunk.");
    let evaluator = AgentEvaluator::new(&critic, vec![ChunkType::LlmOutput]).unwrap();
    let mut arena = Arena::new(
        generator,
        catalog(vec![ConfiguredAgent::new("Writer", "Write."), critic]),
    )
    .with_evaluators(vec![Arc::new(evaluator)]);

    let writer_id = arena.submit("Writer", json!("write")).unwrap();
    arena.run().await.unwrap();

    let output = llm_output(&arena, &writer_id);
    assert_eq!(output.annotation("evaluator.Critic"), Some(&json!("Too short.")));
}

/// Never finishes.
struct Stalled;

#[async_trait]
impl Evaluator for Stalled {
    fn fqdn(&self) -> &str {
        "evaluator.stalled"
    }

    fn supported_chunk_types(&self) -> &[ChunkType] {
        &[ChunkType::LlmOutput]
    }

    async fn evaluate(&self, _chunk: &Chunk, _ctx: &EvaluationContext) -> Result<Evaluation, EvaluatorError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_restore_aborts_evaluations_in_flight() {
    let generator = Arc::new(ScriptedGenerator::new().respond("Writer", "draft"));
    let mut arena = Arena::new(generator, catalog(vec![ConfiguredAgent::new("Writer", "Write.")]))
        .with_evaluators(vec![Arc::new(Stalled)]);
    let snapshot = arena.snapshot();

    arena.submit("Writer", json!("write")).unwrap();
    // The stalled evaluation keeps the loop waiting.
    let stalled = tokio::time::timeout(Duration::from_millis(50), arena.run()).await;
    assert!(stalled.is_err());

    arena.restore(snapshot);
    let finished = tokio::time::timeout(Duration::from_secs(5), arena.run()).await;
    assert!(matches!(finished, Ok(Ok(()))));
    assert_eq!(arena.tasks().count(), 0);
}

#[tokio::test]
async fn test_topic_observer_sees_only_its_chunk_type() {
    let generator = Arc::new(ScriptedGenerator::new().respond("Writer", "draft"));
    let mut arena = Arena::new(generator, catalog(vec![ConfiguredAgent::new("Writer", "Write.")]));
    let outputs = Arc::new(Mutex::new(Vec::new()));
    let outputs_clone = Arc::clone(&outputs);
    arena.add_topic_observer("chunk:llm_output", move |published: &PublishedEvent| {
        if let arena_proto::ArenaEvent::Chunk { chunk, .. } = &published.event {
            outputs_clone.lock().unwrap().push(chunk.content.clone());
        }
    });

    arena.submit("Writer", json!("write")).unwrap();
    arena.run().await.unwrap();

    assert_eq!(*outputs.lock().unwrap(), vec!["draft".to_string()]);
}
