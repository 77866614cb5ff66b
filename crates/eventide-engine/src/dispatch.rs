//! Step execution.
//!
//! Every matched step runs in its own tokio task:
//!
//! ```text
//! acquire slot ──► attempt ──ok──► publish output
//!     │               │
//!  cancelled         err ──retry?──► sleep(backoff) ──► attempt
//!     │               │
//!     ▼               ▼ exhausted / not retriable
//!  error event    error event
//! ```

use std::sync::Arc;

use eventide_context::{Context, ContextError};
use eventide_event::{ErrorEvent, Event, EventType};
use eventide_step::{Step, StepError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::handle::RunShared;
use crate::limiter::SlotPool;
use crate::workflow::Workflow;

/// Everything a spawned execution needs from its run.
#[derive(Clone)]
pub(crate) struct Dispatcher {
  pub(crate) workflow: Workflow,
  pub(crate) ctx: Context,
  pub(crate) shared: Arc<RunShared>,
}

impl Dispatcher {
  pub(crate) fn new(workflow: Workflow, ctx: Context, shared: Arc<RunShared>) -> Self {
    Self {
      workflow,
      ctx,
      shared,
    }
  }

  pub(crate) fn run_id(&self) -> &str {
    self.ctx.run_id()
  }

  /// The slot pool for `event_type`, sized by the largest cap among
  /// `steps`. `None` when no step declared a cap.
  pub(crate) fn pool_for(&self, event_type: &EventType, steps: &[Step]) -> Option<Arc<SlotPool>> {
    let limit = steps.iter().map(Step::max_parallel).max().unwrap_or(0);
    if limit == 0 {
      return None;
    }
    Some(self.shared.pools.get_or_create(event_type, limit))
  }

  /// Run one step against one event and publish what it produces.
  ///
  /// Output events go back into the run. A step that fails for good
  /// publishes an error event, which ends the run.
  pub(crate) async fn dispatch(self, step: Step, event: Event, pool: Option<Arc<SlotPool>>) {
    let cancel = self.ctx.child_token();

    match self.execute_step(&step, event, pool.as_ref(), &cancel).await {
      Ok(Some(output)) => self.publish_output(&step, output).await,
      Ok(None) => {}
      Err(EngineError::Cancelled) => {
        debug!(run_id = %self.run_id(), step = %step.name(), "step abandoned, run cancelled");
      }
      Err(err) => self.publish_error(step.name(), err).await,
    }
  }

  /// Acquire a slot, then call the handler until it succeeds or the retry
  /// policy gives up.
  #[instrument(
    name = "step_execute",
    skip_all,
    fields(
      run_id = %self.ctx.run_id(),
      step = %step.name(),
      event_type = %event.event_type(),
    )
  )]
  pub(crate) async fn execute_step(
    &self,
    step: &Step,
    event: Event,
    pool: Option<&Arc<SlotPool>>,
    cancel: &CancellationToken,
  ) -> Result<Option<Event>, EngineError> {
    let _slot = match pool {
      Some(pool) => Some(pool.acquire(cancel).await.ok_or_else(|| {
        EngineError::ResourceAcquisition {
          step: step.name().to_string(),
          event_type: step.event_type().clone(),
        }
      })?),
      None => None,
    };

    let policy = step.retry_policy().cloned().unwrap_or_default();
    let attempts = policy.attempts();
    let mut attempt: u32 = 0;

    loop {
      debug!(attempt = attempt + 1, attempts, "step_attempt_started");

      let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        result = self.attempt(step, event.clone()) => result,
      };

      let err = match result {
        Ok(output) => {
          debug!(attempt = attempt + 1, "step_completed");
          return Ok(output);
        }
        Err(err) => err,
      };

      attempt += 1;
      if attempt >= attempts || !policy.should_retry(&err) {
        warn!(attempt, error = %format!("{:#}", err), "step_failed");
        return Err(EngineError::StepFailed {
          step: Some(step.name().to_string()),
          cause: Arc::new(err),
        });
      }

      let delay = policy.calculate_backoff(attempt - 1);
      info!(
        attempt,
        attempts,
        delay_ms = delay.as_millis() as u64,
        error = %format!("{:#}", err),
        "step_retry_scheduled"
      );

      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }

  /// One handler call, bounded by the step timeout.
  async fn attempt(&self, step: &Step, event: Event) -> anyhow::Result<Option<Event>> {
    let timeout = step.timeout();
    if timeout.is_zero() {
      return step.handle(self.ctx.clone(), event).await;
    }

    match tokio::time::timeout(timeout, step.handle(self.ctx.clone(), event)).await {
      Ok(result) => result,
      Err(_) => Err(anyhow::Error::new(StepError::Timeout {
        step: step.name().to_string(),
        timeout,
      })),
    }
  }

  async fn publish_output(&self, step: &Step, output: Event) {
    match self.ctx.send(output).await {
      Ok(()) => {}
      Err(ContextError::Validation(err)) => {
        let cause = anyhow::Error::new(err).context("step emitted an invalid event");
        self
          .publish_error(
            step.name(),
            EngineError::StepFailed {
              step: Some(step.name().to_string()),
              cause: Arc::new(cause),
            },
          )
          .await;
      }
      Err(err) => {
        debug!(run_id = %self.run_id(), step = %step.name(), error = %err, "step output dropped");
      }
    }
  }

  /// Publish `err` as a non-retriable error event attributed to `step`.
  pub(crate) async fn publish_error(&self, step: &str, err: EngineError) {
    let event = ErrorEvent::new(anyhow::Error::new(err))
      .with_step(step)
      .with_retriable(false);

    if let Err(err) = self.ctx.send(event.into()).await {
      debug!(run_id = %self.run_id(), step = %step, error = %err, "error event dropped");
    }
  }
}

/// Turn an error event back into the error that ends the run.
pub(crate) fn run_failure(event: &ErrorEvent) -> EngineError {
  match event.error.downcast_ref::<EngineError>() {
    Some(err) => err.clone(),
    None => EngineError::StepFailed {
      step: event.step.clone(),
      cause: Arc::clone(&event.error),
    },
  }
}
