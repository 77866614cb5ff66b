//! Context errors.

use eventide_event::EventError;

/// Errors returned when publishing into a context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
  /// The event failed its own validation.
  #[error("invalid event: {0}")]
  Validation(#[from] EventError),

  /// The run was cancelled while waiting for queue space.
  #[error("context cancelled")]
  Cancelled,

  /// The run loop is no longer consuming events.
  #[error("event queue closed")]
  Closed,

  /// The inbound queue is full (non-blocking send only).
  #[error("event queue full")]
  Full,
}
