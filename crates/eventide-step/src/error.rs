//! Step errors.

use std::time::Duration;

/// Errors raised by step configuration and step attempts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
  /// The step cannot be registered.
  #[error("invalid step '{step}': {reason}")]
  InvalidConfig { step: String, reason: String },

  /// A single attempt exceeded the step timeout.
  #[error("step '{step}' timed out after {timeout:?}")]
  Timeout { step: String, timeout: Duration },

  /// The attempt was abandoned because the run was cancelled.
  #[error("step '{step}' cancelled")]
  Cancelled { step: String },
}

impl StepError {
  pub(crate) fn invalid(step: &str, reason: impl Into<String>) -> Self {
    Self::InvalidConfig {
      step: step.to_string(),
      reason: reason.into(),
    }
  }
}
