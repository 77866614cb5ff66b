//! Event validation errors.

use std::sync::Arc;

/// A handler error shared between events, results and run handles.
///
/// Handler errors are arbitrary, so they travel as `anyhow::Error`. The `Arc`
/// keeps events cheap to clone for the broadcast stream.
pub type SharedError = Arc<anyhow::Error>;

/// Errors returned by event and task validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
  /// The event type is empty.
  #[error("event type is required")]
  EmptyType,

  /// A user-defined event used one of the reserved type names.
  #[error("event type '{event_type}' is reserved")]
  ReservedType { event_type: String },

  /// A start event was built without inputs.
  #[error("inputs are required")]
  MissingInputs,

  /// A stop event carries no result.
  #[error("result is required")]
  MissingResult,

  /// A parallel-dispatch event has no tasks.
  #[error("at least one task is required")]
  NoTasks,

  /// A task inside a parallel-dispatch event is invalid.
  #[error("invalid task '{task_id}': {reason}")]
  InvalidTask { task_id: String, reason: String },

  /// A parallel-result event reports a non-positive duration.
  #[error("duration must be positive")]
  NonPositiveDuration,
}
