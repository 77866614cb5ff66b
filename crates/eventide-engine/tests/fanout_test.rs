//! Integration tests for parallel fan-out and result aggregation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventide_engine::{
  Context, EngineError, Event, EventData, EventType, ParallelResultEvent, RetryPolicy, Step,
  StepConfig, Task, TaskStatus, Workflow, WorkflowConfig,
};
use serde_json::{Value, json};

type Captured = Arc<Mutex<Option<ParallelResultEvent>>>;

/// A workflow whose start step fans out `tasks` and whose result step
/// captures the aggregate and stops the run.
fn fan_out(config: WorkflowConfig, tasks: Vec<Task>) -> (Workflow, Captured) {
  let workflow = Workflow::new(config);
  let captured: Captured = Arc::default();

  workflow
    .add_step(Step::new(
      "planner",
      EventType::Start,
      move |_ctx: Context, _event: Event| {
        let tasks = tasks.clone();
        async move { Ok::<_, anyhow::Error>(Some(Event::parallel(tasks, "planner")?)) }
      },
      StepConfig::default(),
    ))
    .unwrap();

  let sink = Arc::clone(&captured);
  workflow
    .add_step(Step::new(
      "collect",
      EventType::ParallelResult,
      move |_ctx: Context, event: Event| {
        let sink = Arc::clone(&sink);
        async move {
          let Event::ParallelResult(result) = event else {
            anyhow::bail!("expected a parallel result");
          };
          let (successful, failed, _) = result.stats();
          *sink.lock().unwrap() = Some(result);
          Ok(Some(Event::stop(json!({"successful": successful, "failed": failed}))))
        }
      },
      StepConfig::default(),
    ))
    .unwrap();

  (workflow, captured)
}

fn work_step(fail_on: &'static str) -> Step {
  Step::new(
    "work",
    "work",
    move |_ctx: Context, event: Event| async move {
      let id = event.task_id().unwrap_or_default().to_string();
      if id == fail_on {
        anyhow::bail!("task {} rejected", id);
      }
      let mut data = EventData::new();
      data.insert("done".to_string(), json!(id));
      Ok(Some(Event::custom("worked", data)))
    },
    StepConfig::default().with_retry_policy(
      RetryPolicy::default()
        .with_max_retries(2)
        .with_intervals(Duration::from_millis(10), Duration::from_millis(10)),
    ),
  )
}

fn tasks(ids: &[&str], task_type: &str) -> Vec<Task> {
  ids
    .iter()
    .map(|id| Task::new(*id, task_type, json!({"id": id})))
    .collect()
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_aggregates_success_and_failure() {
  let (workflow, captured) = fan_out(WorkflowConfig::default(), tasks(&["t1", "t2", "t3"], "work"));
  workflow.add_step(work_step("t2")).unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(
    handle.wait().await.unwrap(),
    json!({"successful": 2, "failed": 1})
  );

  let result = captured.lock().unwrap().take().unwrap();
  assert_eq!(result.successful + result.failed, 3);
  assert_eq!(result.source_step, "planner");
  assert!(result.duration > Duration::ZERO);

  assert_eq!(result.errors().len(), 1);
  let cause = &result.errors()["t2"];
  assert!(cause.to_string().contains("task t2 rejected"));

  let t1 = &result.results()["t1"];
  assert_eq!(t1.event_type(), EventType::from("worked"));
  assert_eq!(t1.data().get("done"), Some(&json!("t1")));
  assert!(result.results()["t2"].is_error());
  assert_eq!(result.results()["t2"].task_id(), Some("t2"));

  let statuses: Vec<(String, TaskStatus)> = result
    .tasks
    .iter()
    .map(|t| (t.id.clone(), t.status))
    .collect();
  assert_eq!(
    statuses,
    vec![
      ("t1".to_string(), TaskStatus::Complete),
      ("t2".to_string(), TaskStatus::Failed),
      ("t3".to_string(), TaskStatus::Complete),
    ]
  );
  assert!(result.tasks[1].error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unhandled_task_type_is_contained() {
  let mut batch = tasks(&["a", "b"], "work");
  batch.push(Task::new("c", "mystery", Value::Null));
  let (workflow, captured) = fan_out(WorkflowConfig::default(), batch);
  workflow.add_step(work_step("none")).unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(
    handle.wait().await.unwrap(),
    json!({"successful": 2, "failed": 1})
  );

  let result = captured.lock().unwrap().take().unwrap();
  assert!(matches!(
    result.errors()["c"].downcast_ref::<EngineError>(),
    Some(EngineError::NoHandler { task_id, .. }) if task_id == "c"
  ));
}

#[tokio::test(start_paused = true)]
async fn test_task_deadline() {
  let batch = vec![
    Task::new("quick", "nap", json!({"ms": 10})),
    Task::new("slow", "nap", json!({"ms": 5000})).with_timeout(Duration::from_millis(100)),
  ];
  let (workflow, captured) = fan_out(WorkflowConfig::default(), batch);
  workflow
    .add_step(Step::new(
      "nap",
      "nap",
      |_ctx: Context, event: Event| async move {
        let ms = event.data().get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, anyhow::Error>(None)
      },
      StepConfig::default().with_timeout(Duration::from_secs(60)),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(
    handle.wait().await.unwrap(),
    json!({"successful": 1, "failed": 1})
  );

  let result = captured.lock().unwrap().take().unwrap();
  assert!(matches!(
    result.errors()["slow"].downcast_ref::<EngineError>(),
    Some(EngineError::TaskTimeout { .. })
  ));

  // a step that emits nothing passes the task's own event through
  let quick = &result.results()["quick"];
  assert_eq!(quick.event_type(), EventType::from("nap"));
  assert_eq!(quick.task_id(), Some("quick"));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_task_limit() {
  let ids: Vec<String> = (0..6).map(|i| format!("t{}", i)).collect();
  let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
  let (workflow, captured) = fan_out(
    WorkflowConfig::default().with_parallel_task_limit(2),
    tasks(&id_refs, "work"),
  );

  let active = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
  workflow
    .add_step(Step::new(
      "work",
      "work",
      move |_ctx: Context, _event: Event| {
        let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
        async move {
          let now = active.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          active.fetch_sub(1, Ordering::SeqCst);
          Ok::<_, anyhow::Error>(None)
        }
      },
      StepConfig::default(),
    ))
    .unwrap();

  let handle = workflow.run(EventData::new()).unwrap();
  assert_eq!(
    handle.wait().await.unwrap(),
    json!({"successful": 6, "failed": 0})
  );
  assert_eq!(peak.load(Ordering::SeqCst), 2);
  assert_eq!(captured.lock().unwrap().as_ref().map(|r| r.tasks.len()), Some(6));
}

#[tokio::test(start_paused = true)]
async fn test_task_steps_run_in_sequence() {
  let (workflow, captured) = fan_out(WorkflowConfig::default(), tasks(&["only"], "chain"));
  let order = Arc::new(Mutex::new(Vec::new()));

  for name in ["first", "second"] {
    let order = Arc::clone(&order);
    workflow
      .add_step(Step::new(
        name,
        "chain",
        move |_ctx: Context, _event: Event| {
          let order = Arc::clone(&order);
          async move {
            order.lock().unwrap().push(format!("{}-start", name));
            tokio::time::sleep(Duration::from_millis(10)).await;
            order.lock().unwrap().push(format!("{}-end", name));
            let mut data = EventData::new();
            data.insert("by".to_string(), json!(name));
            Ok::<_, anyhow::Error>(Some(Event::custom("chained", data)))
          }
        },
        StepConfig::default(),
      ))
      .unwrap();
  }

  let handle = workflow.run(EventData::new()).unwrap();
  handle.wait().await.unwrap();

  assert_eq!(
    *order.lock().unwrap(),
    vec!["first-start", "first-end", "second-start", "second-end"]
  );
  let result = captured.lock().unwrap().take().unwrap();
  assert_eq!(result.results()["only"].data().get("by"), Some(&json!("second")));
}

#[tokio::test]
async fn test_invalid_batch_fails_planner() {
  let workflow = Workflow::new(WorkflowConfig::default().with_max_retries(1));
  workflow
    .add_step(Step::new(
      "planner",
      EventType::Start,
      |_ctx: Context, _event: Event| async move {
        let tasks = vec![Task::new("", "work", Value::Null)];
        Ok::<_, anyhow::Error>(Some(Event::parallel(tasks, "planner")?))
      },
      StepConfig::default(),
    ))
    .unwrap();

  let err = workflow.run(EventData::new()).unwrap().wait().await.unwrap_err();
  assert_eq!(err.step(), Some("planner"));
}
