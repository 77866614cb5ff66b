//! Built-in demo workflows.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use eventide_engine::{
  Context, EngineError, Event, EventData, EventType, RetryPolicy, Step, StepConfig, Task,
  Workflow, WorkflowConfig,
};
use serde_json::{Value, json};

/// start → double → stop. With no input `n` the result is `{"n": 4}`.
pub fn pipeline(config: WorkflowConfig) -> Result<Workflow, EngineError> {
  let workflow = Workflow::new(config);
  workflow.add_step(Step::new(
    "double",
    EventType::Start,
    double,
    StepConfig::default(),
  ))?;
  workflow.add_step(Step::new("finish", "double", finish, StepConfig::default()))?;
  Ok(workflow)
}

async fn double(_ctx: Context, event: Event) -> anyhow::Result<Option<Event>> {
  let n = event.data().get("n").and_then(Value::as_i64).unwrap_or(1);
  Ok(Some(Event::custom("double", object(json!({"n": n * 2})))))
}

async fn finish(_ctx: Context, event: Event) -> anyhow::Result<Option<Event>> {
  let n = event
    .data()
    .get("n")
    .and_then(Value::as_i64)
    .ok_or_else(|| anyhow::anyhow!("double event carries no n"))?;
  Ok(Some(Event::stop(json!({"n": n * 2}))))
}

/// outline → one writer task per chapter → assemble.
///
/// The task named by `fail` always fails, to show a contained failure.
pub fn fanout(
  config: WorkflowConfig,
  chapters: usize,
  fail: Option<String>,
) -> Result<Workflow, EngineError> {
  let workflow = Workflow::new(config);

  workflow.add_step(Step::new(
    "outline",
    EventType::Start,
    move |ctx: Context, event: Event| async move { outline(ctx, event, chapters) },
    StepConfig::default(),
  ))?;

  let fail: Option<Arc<str>> = fail.map(Arc::from);
  workflow.add_step(Step::new(
    "write",
    "chapter",
    move |_ctx: Context, event: Event| {
      let fail = fail.clone();
      async move { write(event, fail.as_deref()).await }
    },
    StepConfig::default()
      .with_max_parallel(4)
      .with_retry_policy(
        RetryPolicy::default()
          .with_max_retries(2)
          .with_intervals(Duration::from_millis(50), Duration::from_millis(200)),
      ),
  ))?;

  workflow.add_step(Step::new(
    "assemble",
    EventType::ParallelResult,
    assemble,
    StepConfig::default(),
  ))?;

  Ok(workflow)
}

fn outline(ctx: Context, event: Event, chapters: usize) -> anyhow::Result<Option<Event>> {
  let topic = event
    .data()
    .get("topic")
    .and_then(Value::as_str)
    .unwrap_or("the tide")
    .to_string();
  ctx.set("topic", topic.clone());

  let tasks = (1..=chapters)
    .map(|n| {
      Task::new(
        format!("chapter-{}", n),
        "chapter",
        json!({"topic": topic, "chapter": n}),
      )
      // earlier chapters first
      .with_priority((chapters - n) as i32)
    })
    .collect();

  Ok(Some(Event::parallel(tasks, "outline")?))
}

async fn write(event: Event, fail: Option<&str>) -> anyhow::Result<Option<Event>> {
  let task_id = event.task_id().unwrap_or_default().to_string();
  if fail == Some(task_id.as_str()) {
    anyhow::bail!("writer gave up on {}", task_id);
  }

  let chapter = event.data().get("chapter").and_then(Value::as_u64).unwrap_or(0);
  let topic = event
    .data()
    .get("topic")
    .and_then(Value::as_str)
    .unwrap_or_default();

  tokio::time::sleep(Duration::from_millis(20 * chapter)).await;

  let content = format!("Chapter {} of a story about {}.", chapter, topic);
  Ok(Some(Event::custom(
    "chapter_written",
    object(json!({"chapter": chapter, "content": content})),
  )))
}

async fn assemble(ctx: Context, event: Event) -> anyhow::Result<Option<Event>> {
  let Event::ParallelResult(result) = event else {
    anyhow::bail!("assemble expects a parallel result");
  };

  let mut chapters = BTreeMap::new();
  for (task_id, outcome) in result.results() {
    if let Some(content) = outcome.data().get("content") {
      chapters.insert(task_id.clone(), content.clone());
    }
  }
  let failures: BTreeMap<&String, String> = result
    .errors()
    .iter()
    .map(|(task_id, err)| (task_id, format!("{:#}", err)))
    .collect();

  let (successful, failed, duration) = result.stats();
  Ok(Some(Event::stop(json!({
    "topic": ctx.get_string("topic"),
    "chapters": chapters,
    "failures": failures,
    "successful": successful,
    "failed": failed,
    "duration_ms": duration.as_millis() as u64,
  }))))
}

fn object(value: Value) -> EventData {
  value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_pipeline_demo() {
    let workflow = pipeline(WorkflowConfig::named("pipeline")).unwrap();
    let result = workflow.run(EventData::new()).unwrap().wait().await.unwrap();
    assert_eq!(result, json!({"n": 4}));
  }

  #[tokio::test]
  async fn test_pipeline_demo_with_input() {
    let workflow = pipeline(WorkflowConfig::default()).unwrap();
    let result = workflow
      .run(object(json!({"n": 5})))
      .unwrap()
      .wait()
      .await
      .unwrap();
    assert_eq!(result, json!({"n": 20}));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fanout_demo_contains_failure() {
    let workflow = fanout(WorkflowConfig::default(), 3, Some("chapter-2".to_string())).unwrap();
    let result = workflow
      .run(object(json!({"topic": "lighthouses"})))
      .unwrap()
      .wait()
      .await
      .unwrap();

    assert_eq!(result["topic"], json!("lighthouses"));
    assert_eq!(result["successful"], json!(2));
    assert_eq!(result["failed"], json!(1));
    assert!(result["chapters"]["chapter-1"].is_string());
    assert!(
      result["failures"]["chapter-2"]
        .as_str()
        .is_some_and(|msg| msg.contains("writer gave up on chapter-2"))
    );
  }
}
