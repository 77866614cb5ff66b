//! Run handles.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use eventide_context::{Context, EventStream};
use eventide_event::EventType;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::EngineError;
use crate::limiter::{SlotPool, SlotPools};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
  Pending,
  Running,
  Complete,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Complete => "complete",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

pub(crate) type Outcome = Result<Value, EngineError>;

/// State shared between a run loop and its handle.
///
/// The outcome slot is written once; later writers lose.
pub(crate) struct RunShared {
  status: RwLock<RunStatus>,
  outcome: watch::Sender<Option<Outcome>>,
  pub(crate) pools: SlotPools,
}

impl RunShared {
  pub(crate) fn new() -> Arc<Self> {
    let (outcome, _) = watch::channel(None);
    Arc::new(Self {
      status: RwLock::new(RunStatus::Pending),
      outcome,
      pools: SlotPools::default(),
    })
  }

  pub(crate) fn status(&self) -> RunStatus {
    *self.status.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn set_status(&self, status: RunStatus) {
    *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
  }

  /// Record the outcome and matching status. Returns `false` if an outcome
  /// was already recorded.
  ///
  /// The status is written before waiters are woken, so `status()` after
  /// `wait()` always reports the final state.
  pub(crate) fn finish(&self, outcome: Outcome) -> bool {
    let status = match &outcome {
      Ok(_) => RunStatus::Complete,
      Err(EngineError::Cancelled) => RunStatus::Cancelled,
      Err(_) => RunStatus::Failed,
    };

    let mut outcome = Some(outcome);
    self.outcome.send_if_modified(|slot| {
      if slot.is_some() {
        return false;
      }
      self.set_status(status);
      *slot = outcome.take();
      true
    })
  }

  fn subscribe(&self) -> watch::Receiver<Option<Outcome>> {
    self.outcome.subscribe()
  }
}

/// Observes and controls one run.
///
/// Cloning is cheap; every clone sees the same run.
#[derive(Clone)]
pub struct RunHandle {
  ctx: Context,
  shared: Arc<RunShared>,
}

impl RunHandle {
  pub(crate) fn new(ctx: Context, shared: Arc<RunShared>) -> Self {
    Self { ctx, shared }
  }

  pub fn run_id(&self) -> &str {
    self.ctx.run_id()
  }

  /// The run's context. Its state outlives the run.
  pub fn context(&self) -> &Context {
    &self.ctx
  }

  pub fn status(&self) -> RunStatus {
    self.shared.status()
  }

  /// Wait for the run to finish.
  ///
  /// Returns the stop event's result, or the error that ended the run.
  /// Every call, from any clone, returns the same outcome.
  pub async fn wait(&self) -> Result<Value, EngineError> {
    let mut outcome = self.shared.subscribe();
    let result = outcome.wait_for(Option::is_some).await;

    match result {
      Ok(slot) => slot.clone().unwrap_or_else(|| {
        Err(EngineError::Aborted {
          message: "outcome missing".to_string(),
        })
      }),
      Err(_) => Err(EngineError::Aborted {
        message: "run loop exited without an outcome".to_string(),
      }),
    }
  }

  /// Cancel the run. A run that already finished keeps its outcome.
  pub fn cancel(&self) {
    self.shared.finish(Err(EngineError::Cancelled));
    self.ctx.cancel();
  }

  /// Best-effort feed of every event published into the run.
  pub fn stream(&self) -> EventStream {
    self.ctx.stream()
  }

  /// The slot pool the run created for `event_type`, if it dispatched one.
  pub fn slot_pool(&self, event_type: impl Into<EventType>) -> Option<Arc<SlotPool>> {
    self.shared.pools.get(&event_type.into())
  }
}

impl fmt::Debug for RunHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunHandle")
      .field("run_id", &self.run_id())
      .field("status", &self.status())
      .finish()
  }
}
