//! Integration tests for the run loop: pipelines, terminal events,
//! cancellation, deadlines and the event stream.

use std::sync::Arc;
use std::time::Duration;

use eventide_engine::{
  Context, EngineError, Event, EventData, EventType, RunStatus, Step, StepConfig, StepHandler,
  Workflow, WorkflowConfig,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn data(value: Value) -> EventData {
  value.as_object().cloned().unwrap_or_default()
}

fn pipeline() -> Workflow {
  let workflow = Workflow::new(WorkflowConfig::named("pipeline"));

  workflow
    .add_step(Step::new(
      "double",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::custom("double", data(json!({"n": 2})))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  workflow
    .add_step(Step::new(
      "finish",
      "double",
      |_ctx: Context, event: Event| async move {
        let n = event.data().get("n").and_then(Value::as_i64).unwrap_or_default();
        Ok::<_, anyhow::Error>(Some(Event::stop(json!({"n": n * 2}))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  workflow
}

#[tokio::test]
async fn test_pipeline_result() {
  let handle = pipeline().run(EventData::new()).unwrap();

  assert_eq!(handle.wait().await.unwrap(), json!({"n": 4}));
  assert_eq!(handle.status(), RunStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_bound_by_short_names() {
  let workflow = Workflow::new(WorkflowConfig::named("short").with_timeout(Duration::from_secs(2)));
  workflow
    .add_step(Step::new(
      "double",
      "start",
      |_ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::custom("double", data(json!({"n": 2})))))
      },
      StepConfig::default(),
    ))
    .unwrap();
  workflow
    .add_step(Step::new(
      "finish",
      "double",
      |_ctx: Context, event: Event| async move {
        let n = event.data().get("n").and_then(Value::as_i64).unwrap_or_default();
        Ok::<_, anyhow::Error>(Some(Event::stop(json!({"n": n * 2}))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(handle.wait().await.unwrap(), json!({"n": 4}));
}

#[tokio::test]
async fn test_stream_sees_every_event_then_ends() {
  let handle = pipeline().run(EventData::new()).unwrap();
  let mut stream = handle.stream();

  handle.wait().await.unwrap();

  let mut seen = Vec::new();
  while let Some(event) = stream.recv().await {
    seen.push(event.event_type());
  }
  assert_eq!(
    seen,
    vec![EventType::Start, EventType::from("double"), EventType::Stop]
  );
}

#[tokio::test]
async fn test_runs_are_independent() {
  let workflow = pipeline();
  let first = workflow.run(EventData::new()).unwrap();
  let second = workflow.run(EventData::new()).unwrap();

  assert_ne!(first.run_id(), second.run_id());
  assert_eq!(first.wait().await.unwrap(), json!({"n": 4}));
  assert_eq!(second.wait().await.unwrap(), json!({"n": 4}));
}

#[tokio::test]
async fn test_start_inputs_reach_steps() {
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::new(
      "echo",
      EventType::Start,
      |_ctx: Context, event: Event| async move {
        let topic = event.data().get("topic").cloned().unwrap_or(Value::Null);
        Ok::<_, anyhow::Error>(Some(Event::stop(json!({"topic": topic}))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(data(json!({"topic": "tides"}))).unwrap();
  assert_eq!(handle.wait().await.unwrap(), json!({"topic": "tides"}));
}

#[tokio::test]
async fn test_state_is_shared_between_steps() {
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::new(
      "remember",
      EventType::Start,
      |ctx: Context, _event: Event| async move {
        ctx.set("seen", true);
        Ok::<_, anyhow::Error>(Some(Event::custom("recall", EventData::new())))
      },
      StepConfig::default(),
    ))
    .unwrap();
  workflow
    .add_step(Step::new(
      "recall",
      "recall",
      |ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::stop(json!(ctx.get_bool("seen")))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(handle.wait().await.unwrap(), json!(true));
  assert_eq!(handle.context().get_bool("seen"), Some(true));
}

#[tokio::test]
async fn test_unmatched_events_are_skipped() {
  let workflow = Workflow::new(WorkflowConfig::default().with_verbose(true));
  workflow
    .add_step(Step::new(
      "start",
      EventType::Start,
      |ctx: Context, _event: Event| async move {
        ctx.send(Event::custom("orphan", EventData::new())).await?;
        Ok::<_, anyhow::Error>(Some(Event::stop(json!("ok"))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(handle.wait().await.unwrap(), json!("ok"));
}

#[tokio::test]
async fn test_failing_step_fails_run() {
  let workflow = Workflow::new(WorkflowConfig::default().with_max_retries(1));
  workflow
    .add_step(Step::new(
      "explode",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        Err::<Option<Event>, _>(anyhow::anyhow!("boom"))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  let err = handle.wait().await.unwrap_err();

  assert!(matches!(err, EngineError::StepFailed { .. }));
  assert_eq!(err.step(), Some("explode"));
  assert_eq!(err.to_string(), "step 'explode' failed: boom");
  assert_eq!(handle.status(), RunStatus::Failed);
}

#[tokio::test]
async fn test_emitted_error_event_fails_run() {
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::new(
      "report",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::error(anyhow::anyhow!("quota exhausted"))))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  let err = handle.wait().await.unwrap_err();

  assert_eq!(err.step(), None);
  assert_eq!(err.cause().map(|c| c.to_string()), Some("quota exhausted".to_string()));
}

#[tokio::test]
async fn test_invalid_output_fails_run() {
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::new(
      "empty-stop",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::stop(Value::Null)))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  let err = handle.wait().await.unwrap_err();

  assert_eq!(err.step(), Some("empty-stop"));
  assert!(err.to_string().contains("invalid event"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_wins_over_late_result() {
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::new(
      "slow",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, anyhow::Error>(Some(Event::stop(json!("late"))))
      },
      StepConfig::default().with_timeout(Duration::from_secs(60)),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;
  handle.cancel();

  assert!(handle.wait().await.unwrap_err().is_cancelled());
  assert_eq!(handle.status(), RunStatus::Cancelled);

  // the handler would have finished by now; the outcome stays cancelled
  tokio::time::sleep(Duration::from_secs(20)).await;
  assert!(handle.wait().await.unwrap_err().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_parent_token_cancels_run() {
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::new(
      "forever",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        std::future::pending::<()>().await;
        Ok::<_, anyhow::Error>(None)
      },
      StepConfig::default().with_timeout(Duration::from_secs(60)),
    ))
    .unwrap();

  let parent = CancellationToken::new();
  let handle = workflow.run_with_cancel(EventData::new(), &parent).unwrap();
  parent.cancel();

  assert!(handle.wait().await.unwrap_err().is_cancelled());
  assert_eq!(handle.status(), RunStatus::Cancelled);
}

#[tokio::test]
async fn test_cancelling_run_leaves_parent_alone() {
  let parent = CancellationToken::new();
  let handle = pipeline()
    .run_with_cancel(EventData::new(), &parent)
    .unwrap();
  handle.cancel();

  assert!(handle.wait().await.unwrap_err().is_cancelled());
  assert!(!parent.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline() {
  let workflow = Workflow::new(WorkflowConfig::default().with_timeout(Duration::from_secs(1)));
  workflow
    .add_step(Step::new(
      "stuck",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        std::future::pending::<()>().await;
        Ok::<_, anyhow::Error>(None)
      },
      StepConfig::default().with_timeout(Duration::from_secs(10)),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  let err = handle.wait().await.unwrap_err();

  assert!(matches!(err, EngineError::Timeout { timeout } if timeout == Duration::from_secs(1)));
  assert_eq!(handle.status(), RunStatus::Failed);
  assert!(handle.context().is_cancelled());
}

#[tokio::test]
async fn test_max_turns_stops_loops() {
  let workflow = Workflow::new(WorkflowConfig::default().with_max_turns(5));
  workflow
    .add_step(Step::new(
      "kickoff",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::custom("ping", EventData::new())))
      },
      StepConfig::default(),
    ))
    .unwrap();
  workflow
    .add_step(Step::new(
      "echo",
      "ping",
      |_ctx: Context, _event: Event| async move {
        Ok::<_, anyhow::Error>(Some(Event::custom("ping", EventData::new())))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  let err = handle.wait().await.unwrap_err();
  assert!(matches!(err, EngineError::MaxTurnsExceeded { max_turns: 5 }));
}

fn stop_with_background_work(drain: bool) -> Workflow {
  let workflow = Workflow::new(WorkflowConfig::default().with_drain_on_exit(drain));
  workflow
    .add_step(Step::new(
      "kickoff",
      EventType::Start,
      |ctx: Context, _event: Event| async move {
        ctx.send(Event::custom("background", EventData::new())).await?;
        Ok::<_, anyhow::Error>(Some(Event::stop(json!("stopped"))))
      },
      StepConfig::default(),
    ))
    .unwrap();
  workflow
    .add_step(Step::new(
      "background",
      "background",
      |ctx: Context, _event: Event| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.set("background_done", true);
        Ok::<_, anyhow::Error>(None)
      },
      StepConfig::default(),
    ))
    .unwrap();
  workflow
}

#[tokio::test(start_paused = true)]
async fn test_first_stop_wins_without_drain() {
  let handle = stop_with_background_work(false)
    .run(EventData::new())
    .unwrap();

  assert_eq!(handle.wait().await.unwrap(), json!("stopped"));
  assert_eq!(handle.context().get_bool("background_done"), None);

  // detached work still finishes
  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(handle.context().get_bool("background_done"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_drain_on_exit_waits_for_executions() {
  let handle = stop_with_background_work(true)
    .run(EventData::new())
    .unwrap();

  assert_eq!(handle.wait().await.unwrap(), json!("stopped"));
  assert_eq!(handle.context().get_bool("background_done"), Some(true));
}

/// Counts down from the `n` it is given, one event per step call.
struct Countdown;

#[async_trait::async_trait]
impl StepHandler for Countdown {
  async fn handle(&self, ctx: Context, event: Event) -> anyhow::Result<Option<Event>> {
    let n = event.data().get("n").and_then(Value::as_i64).unwrap_or(0);
    ctx.set("calls", ctx.get_int("calls").unwrap_or(0) + 1);

    if n <= 0 {
      return Ok(Some(Event::stop(json!({"calls": ctx.get_int("calls")}))));
    }
    Ok(Some(Event::custom("tick", data(json!({"n": n - 1})))))
  }
}

#[tokio::test]
async fn test_shared_struct_handler() {
  let handler: Arc<dyn StepHandler> = Arc::new(Countdown);
  let workflow = Workflow::new(WorkflowConfig::default());
  workflow
    .add_step(Step::shared(
      "begin",
      EventType::Start,
      Arc::clone(&handler),
      StepConfig::default(),
    ))
    .unwrap();
  workflow
    .add_step(Step::shared("tick", "tick", handler, StepConfig::default()))
    .unwrap();

  let handle = workflow.run(data(json!({"n": 3}))).unwrap();
  assert_eq!(handle.wait().await.unwrap(), json!({"calls": 4}));
}
