//! Retry policy with exponential backoff.
//!
//! The delay after attempt `n` (zero-indexed) is
//! `initial_interval × multiplier^n`, capped at `max_interval`:
//!
//! ```text
//! initial = 1s, multiplier = 2.0, max = 30s
//! attempt:  0   1   2   3    4    5    6
//! delay:    1s  2s  4s  8s  16s  30s  30s
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StepError;

type Matcher = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// One entry of a retry allow-list.
///
/// Entries match by error kind, never by message text.
#[derive(Clone)]
pub struct RetryOn {
  label: String,
  matcher: Matcher,
}

impl RetryOn {
  /// Retry when any error in the cause chain is an `E`.
  pub fn error<E>() -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self {
      label: std::any::type_name::<E>().to_string(),
      matcher: Arc::new(|err| err.chain().any(|cause| cause.is::<E>())),
    }
  }

  /// Retry attempts that exceeded the step timeout.
  pub fn timeouts() -> Self {
    Self {
      label: "timeout".to_string(),
      matcher: Arc::new(|err| {
        err
          .chain()
          .filter_map(|cause| cause.downcast_ref::<StepError>())
          .any(|e| matches!(e, StepError::Timeout { .. }))
      }),
    }
  }

  /// Retry when `predicate` holds.
  pub fn matching<F>(label: impl Into<String>, predicate: F) -> Self
  where
    F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
  {
    Self {
      label: label.into(),
      matcher: Arc::new(predicate),
    }
  }

  pub fn matches(&self, err: &anyhow::Error) -> bool {
    (self.matcher)(err)
  }

  pub fn label(&self) -> &str {
    &self.label
  }
}

impl fmt::Debug for RetryOn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("RetryOn").field(&self.label).finish()
  }
}

/// Retry behaviour of a step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Number of attempts made before giving up.
  pub max_retries: u32,
  /// Delay after the first failed attempt.
  pub initial_interval: Duration,
  /// Upper bound on any delay.
  pub max_interval: Duration,
  /// Growth factor between consecutive delays.
  pub multiplier: f64,
  /// Error kinds worth retrying. Empty retries everything.
  pub retry_on: Vec<RetryOn>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_interval: Duration::from_secs(1),
      max_interval: Duration::from_secs(30),
      multiplier: 2.0,
      retry_on: Vec::new(),
    }
  }
}

impl RetryPolicy {
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
    self.initial_interval = initial;
    self.max_interval = max;
    self
  }

  pub fn with_multiplier(mut self, multiplier: f64) -> Self {
    self.multiplier = multiplier;
    self
  }

  pub fn retry_on(mut self, entry: RetryOn) -> Self {
    self.retry_on.push(entry);
    self
  }

  /// Attempts the dispatcher makes. A policy with `max_retries = 0` still
  /// runs the handler once.
  pub fn attempts(&self) -> u32 {
    self.max_retries.max(1)
  }

  /// Delay to wait after the zero-indexed `attempt` failed.
  pub fn calculate_backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);

    if !secs.is_finite() || secs < 0.0 || secs >= self.max_interval.as_secs_f64() {
      return self.max_interval;
    }
    Duration::from_secs_f64(secs)
  }

  /// Whether `err` is worth another attempt under this policy.
  pub fn should_retry(&self, err: &anyhow::Error) -> bool {
    self.retry_on.is_empty() || self.retry_on.iter().any(|entry| entry.matches(err))
  }

  /// Check the numeric invariants. `step` names the owner in the error.
  pub fn validate(&self, step: &str) -> Result<(), StepError> {
    if self.initial_interval.is_zero() {
      return Err(StepError::invalid(step, "retry initial interval must be positive"));
    }
    if self.max_interval < self.initial_interval {
      return Err(StepError::invalid(
        step,
        "retry max interval must not be below the initial interval",
      ));
    }
    if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
      return Err(StepError::invalid(step, "retry multiplier must be positive"));
    }
    Ok(())
  }
}
