//! The per-run dispatch loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use eventide_event::Event;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::{Dispatcher, run_failure};
use crate::error::EngineError;
use crate::handle::{Outcome, RunStatus};

/// Consumes a run's event queue and spawns an execution for every step the
/// events match, until a stop or error event, cancellation or the deadline
/// ends the run.
pub(crate) struct RunLoop {
  dispatcher: Dispatcher,
  events: mpsc::Receiver<Event>,
  executions: JoinSet<()>,
  turns: u64,
}

impl RunLoop {
  pub(crate) fn new(dispatcher: Dispatcher, events: mpsc::Receiver<Event>) -> Self {
    Self {
      dispatcher,
      events,
      executions: JoinSet::new(),
      turns: 0,
    }
  }

  /// Run the loop, recording an aborted outcome if it panics.
  pub(crate) async fn start(self) {
    let shared = Arc::clone(&self.dispatcher.shared);
    if AssertUnwindSafe(self.run()).catch_unwind().await.is_err() {
      error!("run loop panicked");
      shared.finish(Err(EngineError::Aborted {
        message: "run loop panicked".to_string(),
      }));
    }
  }

  #[instrument(
    name = "workflow_run",
    skip_all,
    fields(
      workflow = %self.dispatcher.workflow.name(),
      run_id = %self.dispatcher.run_id(),
    )
  )]
  async fn run(mut self) {
    info!("workflow_started");

    let cancel = self.dispatcher.ctx.cancellation_token().clone();
    let timeout = self.dispatcher.workflow.config().timeout;
    let has_deadline = !timeout.is_zero();
    let deadline = tokio::time::sleep(if has_deadline { timeout } else { Duration::MAX });
    tokio::pin!(deadline);

    let outcome = loop {
      let event = tokio::select! {
        biased;
        _ = cancel.cancelled() => break Err(EngineError::Cancelled),
        _ = &mut deadline, if has_deadline => {
          warn!(timeout_ms = timeout.as_millis() as u64, "workflow deadline exceeded");
          break Err(EngineError::Timeout { timeout });
        }
        Some(joined) = self.executions.join_next(), if !self.executions.is_empty() => {
          match reap(joined) {
            Some(failure) => break Err(failure),
            None => continue,
          }
        }
        event = self.events.recv() => match event {
          Some(event) => event,
          None => break Err(EngineError::Aborted {
            message: "event queue closed".to_string(),
          }),
        },
      };

      if let Some(outcome) = self.handle_event(event) {
        break outcome;
      }
    };

    self.finalize(outcome).await;
  }

  /// Route one event. Returns the outcome when the event ends the run.
  fn handle_event(&mut self, event: Event) -> Option<Outcome> {
    let event_type = event.event_type();
    debug!(event_type = %event_type, "event_received");

    let event = match event {
      Event::Stop(stop) => {
        info!("stop event received");
        return Some(Ok(stop.result));
      }
      Event::Error(failure) => {
        let err = run_failure(&failure);
        error!(error = %err, "error event received");
        return Some(Err(err));
      }
      event => event,
    };

    let max_turns = self.dispatcher.workflow.config().max_turns;
    self.turns += 1;
    if max_turns > 0 && self.turns > max_turns {
      warn!(max_turns, "turn limit exceeded");
      return Some(Err(EngineError::MaxTurnsExceeded { max_turns }));
    }

    match event {
      Event::ParallelDispatch(dispatch) => {
        info!(tasks = dispatch.tasks.len(), source_step = %dispatch.source_step, "fan-out started");
        let dispatcher = self.dispatcher.clone();
        self.executions.spawn(dispatcher.execute_parallel_tasks(dispatch));
      }
      Event::ParallelResult(_) => {
        // results are never held back by a slot pool
        for step in self.dispatcher.workflow.steps_for(&event_type) {
          let dispatcher = self.dispatcher.clone();
          self.executions.spawn(dispatcher.dispatch(step, event.clone(), None));
        }
      }
      event => {
        let steps = self.dispatcher.workflow.steps_for(&event_type);
        if steps.is_empty() {
          if self.dispatcher.workflow.config().verbose {
            info!(event_type = %event_type, "no steps registered, event skipped");
          } else {
            debug!(event_type = %event_type, "no steps registered, event skipped");
          }
          return None;
        }

        let pool = self.dispatcher.pool_for(&event_type, &steps);
        for step in steps {
          let dispatcher = self.dispatcher.clone();
          self
            .executions
            .spawn(dispatcher.dispatch(step, event.clone(), pool.clone()));
        }
      }
    }

    None
  }

  /// Record the outcome and deal with executions still in flight.
  ///
  /// Cancelled and timed-out runs abort them. Otherwise they are detached
  /// and left to finish, or awaited first when the workflow drains on exit.
  async fn finalize(mut self, outcome: Outcome) {
    let ctx = self.dispatcher.ctx.clone();
    let shared = Arc::clone(&self.dispatcher.shared);
    let drain = self.dispatcher.workflow.config().drain_on_exit;
    let interrupted = ctx.is_cancelled() || matches!(outcome, Err(EngineError::Timeout { .. }));

    // late outputs fail fast instead of filling a queue nobody reads
    self.events.close();

    if interrupted {
      ctx.cancel();
      shared.finish(outcome);
      self.executions.shutdown().await;
    } else if drain {
      let pending = self.executions.len();
      debug!(pending, "draining executions");
      while let Some(joined) = self.executions.join_next().await {
        reap(joined);
      }
      shared.finish(outcome);
    } else {
      shared.finish(outcome);
      let pending = self.executions.len();
      if pending > 0 {
        debug!(pending, "leaving executions to finish in the background");
      }
      self.executions.detach_all();
    }

    ctx.close_stream();

    match shared.status() {
      RunStatus::Complete => info!("workflow_completed"),
      RunStatus::Cancelled => warn!("workflow_cancelled"),
      status => error!(status = %status, "workflow_failed"),
    }
  }
}

/// Log a finished execution. A panic becomes the run's failure.
fn reap(joined: Result<(), JoinError>) -> Option<EngineError> {
  match joined {
    Ok(()) => None,
    Err(err) if err.is_panic() => {
      error!(error = %err, "step execution panicked");
      Some(EngineError::StepFailed {
        step: None,
        cause: Arc::new(anyhow::anyhow!("step execution panicked")),
      })
    }
    Err(err) => {
      debug!(error = %err, "step execution aborted");
      None
    }
  }
}
