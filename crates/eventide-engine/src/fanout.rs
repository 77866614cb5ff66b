//! Parallel fan-out.
//!
//! A parallel-dispatch event becomes one tokio task per [`Task`]. Each task
//! runs the steps registered for its type one after another, under its own
//! deadline. Once every task has settled, a single parallel-result event
//! reports all of them.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use eventide_event::{
  ErrorEvent, Event, ParallelDispatchEvent, ParallelResultEvent, SharedError, Task, TaskStatus,
};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::error::EngineError;

impl Dispatcher {
  /// Run every task of `dispatch` and publish the aggregate result.
  #[instrument(
    name = "parallel_execute",
    skip_all,
    fields(
      run_id = %self.ctx.run_id(),
      source_step = %dispatch.source_step,
      tasks = dispatch.tasks.len(),
    )
  )]
  pub(crate) async fn execute_parallel_tasks(self, dispatch: ParallelDispatchEvent) {
    let started = Instant::now();
    let limit = match self.workflow.config().parallel_task_limit {
      0 => None,
      n => Some(Arc::new(Semaphore::new(n))),
    };

    let mut executions = JoinSet::new();
    for (index, mut task) in dispatch.tasks.iter().cloned().enumerate() {
      let this = self.clone();
      let limit = limit.clone();
      executions.spawn(async move {
        let outcome = AssertUnwindSafe(this.run_task(&mut task, limit))
          .catch_unwind()
          .await
          .unwrap_or_else(|_| {
            Err(EngineError::StepFailed {
              step: None,
              cause: Arc::new(anyhow::anyhow!("task '{}' panicked", task.id)),
            })
          });
        (index, task, outcome)
      });
    }

    let mut settled: Vec<Option<Task>> = vec![None; dispatch.tasks.len()];
    let mut results = HashMap::new();
    let mut errors = HashMap::new();

    while let Some(joined) = executions.join_next().await {
      let (index, mut task, outcome) = match joined {
        Ok(entry) => entry,
        Err(err) => {
          warn!(error = %err, "task execution aborted");
          continue;
        }
      };

      match outcome {
        Ok(event) => {
          task.status = TaskStatus::Complete;
          results.insert(task.id.clone(), event);
        }
        Err(err) => {
          task.status = if err.is_cancelled() {
            TaskStatus::Cancelled
          } else {
            TaskStatus::Failed
          };

          let mut failure = ErrorEvent::new(anyhow::Error::new(err.clone()))
            .with_task(task.id.clone())
            .with_retriable(false);
          if let Some(step) = err.step() {
            failure = failure.with_step(step);
          }
          let cause: SharedError = Arc::clone(&failure.error);

          task.error = Some(Arc::clone(&cause));
          results.insert(task.id.clone(), Event::from(failure));
          errors.insert(task.id.clone(), cause);
        }
      }
      settled[index] = Some(task);
    }

    if self.ctx.is_cancelled() {
      debug!("run cancelled, parallel result dropped");
      return;
    }

    let duration = started.elapsed().max(Duration::from_nanos(1));
    let tasks: Vec<Task> = settled.into_iter().flatten().collect();
    let result = ParallelResultEvent::new(results, errors, duration, dispatch.source_step.clone())
      .with_tasks(tasks);

    info!(
      successful = result.successful,
      failed = result.failed,
      duration_ms = duration.as_millis() as u64,
      "parallel_completed"
    );

    if let Err(err) = self.ctx.send(result.into()).await {
      debug!(error = %err, "parallel result dropped");
    }
  }

  /// Run one task through the steps registered for its type.
  ///
  /// The last output any step produced is the task result; a task whose
  /// steps emit nothing yields its own event.
  async fn run_task(
    &self,
    task: &mut Task,
    limit: Option<Arc<Semaphore>>,
  ) -> Result<Event, EngineError> {
    let cancel = self.ctx.child_token();
    let steps = self.workflow.steps_for(&task.task_type);
    if steps.is_empty() {
      warn!(task_id = %task.id, task_type = %task.task_type, "task_unhandled");
      return Err(EngineError::NoHandler {
        task_id: task.id.clone(),
        task_type: task.task_type.clone(),
      });
    }

    let _permit = match limit {
      Some(semaphore) => {
        let permit = tokio::select! {
          biased;
          _ = cancel.cancelled() => return Err(EngineError::Cancelled),
          permit = semaphore.acquire_owned() => permit,
        };
        Some(permit.map_err(|_| EngineError::Cancelled)?)
      }
      None => None,
    };

    task.mark_running();
    info!(task_id = %task.id, task_type = %task.task_type, priority = task.priority, "task_started");

    let pool = self.pool_for(&task.task_type, &steps);
    let event = task.to_event();
    let work = async {
      let mut result = event.clone();
      for step in &steps {
        if let Some(output) = self
          .execute_step(step, event.clone(), pool.as_ref(), &cancel)
          .await?
        {
          result = output;
        }
      }
      Ok::<_, EngineError>(result)
    };

    let outcome = if task.timeout.is_zero() {
      work.await
    } else {
      match tokio::time::timeout(task.timeout, work).await {
        Ok(outcome) => outcome,
        Err(_) => {
          cancel.cancel();
          Err(EngineError::TaskTimeout {
            task_id: task.id.clone(),
            timeout: task.timeout,
          })
        }
      }
    };

    match &outcome {
      Ok(_) => info!(task_id = %task.id, "task_completed"),
      Err(err) => warn!(task_id = %task.id, error = %err, "task_failed"),
    }
    outcome
  }
}
