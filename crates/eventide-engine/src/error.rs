//! Engine error types.

use std::time::Duration;

use eventide_event::{EventType, SharedError};
use eventide_step::StepError;

/// Errors reported by [`Workflow`](crate::Workflow) registration and by run
/// handles.
///
/// Setup problems are returned synchronously. Everything that goes wrong
/// once a run is under way reaches the caller through
/// [`RunHandle::wait`](crate::RunHandle::wait).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
  /// The step was rejected at registration.
  #[error(transparent)]
  InvalidStep(#[from] StepError),

  /// The run could not be started.
  #[error("run setup failed: {message}")]
  Setup { message: String },

  /// A handler kept failing after its retries were spent, or failed with an
  /// error its policy does not retry.
  #[error("{}", describe_failure(step.as_deref(), cause))]
  StepFailed {
    step: Option<String>,
    cause: SharedError,
  },

  /// Cancellation arrived while waiting for a concurrency slot.
  #[error("step '{step}' could not acquire a slot for '{event_type}'")]
  ResourceAcquisition { step: String, event_type: EventType },

  /// The run deadline passed.
  #[error("run timed out after {timeout:?}")]
  Timeout { timeout: Duration },

  /// A fan-out task outlived its own deadline.
  #[error("task '{task_id}' timed out after {timeout:?}")]
  TaskTimeout { task_id: String, timeout: Duration },

  /// The run was cancelled.
  #[error("run cancelled")]
  Cancelled,

  /// A fan-out task has a type no step is registered for.
  #[error("no step registered for task '{task_id}' of type '{task_type}'")]
  NoHandler { task_id: String, task_type: EventType },

  /// More events were dispatched than the workflow allows.
  #[error("run exceeded {max_turns} turns")]
  MaxTurnsExceeded { max_turns: u64 },

  /// The run loop went away without recording an outcome.
  #[error("run aborted: {message}")]
  Aborted { message: String },
}

impl EngineError {
  /// The handler error behind a [`EngineError::StepFailed`].
  pub fn cause(&self) -> Option<&anyhow::Error> {
    match self {
      Self::StepFailed { cause, .. } => Some(&**cause),
      _ => None,
    }
  }

  /// The step involved, when one is known.
  pub fn step(&self) -> Option<&str> {
    match self {
      Self::StepFailed { step, .. } => step.as_deref(),
      Self::ResourceAcquisition { step, .. } => Some(step),
      Self::InvalidStep(StepError::InvalidConfig { step, .. }) => Some(step),
      _ => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

fn describe_failure(step: Option<&str>, cause: &anyhow::Error) -> String {
  match step {
    Some(step) => format!("step '{}' failed: {:#}", step, cause),
    None => format!("step failed: {:#}", cause),
  }
}
