//! Event type discriminator.

use std::fmt;
use std::sync::Arc;

/// The routing key of an event.
///
/// Reserved kinds are explicit variants so the dispatcher can match on them
/// without string comparison. User-defined kinds live in [`EventType::Custom`].
/// Constructing a custom type from one of the reserved names yields the
/// reserved variant, so `EventType::from("stop")` and
/// `EventType::from("StopEvent")` are both `EventType::Stop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
  Start,
  Stop,
  Error,
  ParallelDispatch,
  ParallelResult,
  Custom(Arc<str>),
}

impl EventType {
  pub const START: &'static str = "StartEvent";
  pub const STOP: &'static str = "StopEvent";
  pub const ERROR: &'static str = "ErrorEvent";
  pub const PARALLEL_DISPATCH: &'static str = "ParallelEvent";
  pub const PARALLEL_RESULT: &'static str = "ParallelResultEvent";

  /// Build an event type from its name, mapping reserved names onto the
  /// reserved variants. Both the short (`"start"`) and the long
  /// (`"StartEvent"`) spelling are accepted.
  pub fn named(name: impl AsRef<str>) -> Self {
    match name.as_ref() {
      "start" | Self::START => Self::Start,
      "stop" | Self::STOP => Self::Stop,
      "error" | Self::ERROR => Self::Error,
      "parallel-dispatch" | Self::PARALLEL_DISPATCH => Self::ParallelDispatch,
      "parallel-result" | Self::PARALLEL_RESULT => Self::ParallelResult,
      other => Self::Custom(Arc::from(other)),
    }
  }

  /// The string name of this type.
  pub fn as_str(&self) -> &str {
    match self {
      Self::Start => Self::START,
      Self::Stop => Self::STOP,
      Self::Error => Self::ERROR,
      Self::ParallelDispatch => Self::PARALLEL_DISPATCH,
      Self::ParallelResult => Self::PARALLEL_RESULT,
      Self::Custom(name) => name,
    }
  }

  /// Whether this is one of the engine-owned kinds.
  pub fn is_reserved(&self) -> bool {
    !matches!(self, Self::Custom(_))
  }

  pub fn is_empty(&self) -> bool {
    self.as_str().is_empty()
  }
}

impl fmt::Display for EventType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<&str> for EventType {
  fn from(name: &str) -> Self {
    Self::named(name)
  }
}

impl From<String> for EventType {
  fn from(name: String) -> Self {
    Self::named(name)
  }
}
