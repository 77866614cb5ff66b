use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventide_context::Context;
use eventide_event::{Event, EventType};

use crate::error::StepError;
use crate::retry::RetryPolicy;

/// Work performed when an event of the bound type arrives.
///
/// Returning `Ok(Some(event))` emits `event` back into the run.
/// `Ok(None)` consumes the input without emitting anything.
#[async_trait]
pub trait StepHandler: Send + Sync {
  async fn handle(&self, ctx: Context, event: Event) -> anyhow::Result<Option<Event>>;
}

#[async_trait]
impl<F, Fut> StepHandler for F
where
  F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<Option<Event>>> + Send + 'static,
{
  async fn handle(&self, ctx: Context, event: Event) -> anyhow::Result<Option<Event>> {
    (self)(ctx, event).await
  }
}

/// Per-step execution settings.
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
  /// Concurrent invocations allowed for the bound event type. 0 is
  /// unlimited.
  pub max_parallel: usize,
  /// Per-attempt timeout. Zero means "use the workflow default".
  pub timeout: Duration,
  /// `None` means "use the workflow default".
  pub retry_policy: Option<RetryPolicy>,
}

impl StepConfig {
  pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
    self.max_parallel = max_parallel;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
    self.retry_policy = Some(policy);
    self
  }
}

/// A named handler bound to one event type.
///
/// Cloning is cheap. Clones share the handler but each carries its own
/// config, so one handler can back several steps with different policies.
#[derive(Clone)]
pub struct Step {
  name: String,
  event_type: EventType,
  config: StepConfig,
  handler: Arc<dyn StepHandler>,
}

impl Step {
  pub fn new<H>(
    name: impl Into<String>,
    event_type: impl Into<EventType>,
    handler: H,
    config: StepConfig,
  ) -> Self
  where
    H: StepHandler + 'static,
  {
    Self::shared(name, event_type, Arc::new(handler), config)
  }

  /// Build a step around a handler that other steps may also use.
  pub fn shared(
    name: impl Into<String>,
    event_type: impl Into<EventType>,
    handler: Arc<dyn StepHandler>,
    config: StepConfig,
  ) -> Self {
    Self {
      name: name.into(),
      event_type: event_type.into(),
      config,
      handler,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn event_type(&self) -> &EventType {
    &self.event_type
  }

  pub fn config(&self) -> &StepConfig {
    &self.config
  }

  pub fn max_parallel(&self) -> usize {
    self.config.max_parallel
  }

  pub fn timeout(&self) -> Duration {
    self.config.timeout
  }

  pub fn retry_policy(&self) -> Option<&RetryPolicy> {
    self.config.retry_policy.as_ref()
  }

  pub fn handler(&self) -> Arc<dyn StepHandler> {
    Arc::clone(&self.handler)
  }

  /// Fill unset timeout and retry policy from workflow defaults.
  pub fn with_defaults(mut self, timeout: Duration, policy: impl FnOnce() -> RetryPolicy) -> Self {
    if self.config.timeout.is_zero() {
      self.config.timeout = timeout;
    }
    if self.config.retry_policy.is_none() {
      self.config.retry_policy = Some(policy());
    }
    self
  }

  /// Check that the step can be registered.
  pub fn validate(&self) -> Result<(), StepError> {
    if self.name.is_empty() {
      return Err(StepError::invalid(&self.name, "name must not be empty"));
    }
    if self.event_type.is_empty() {
      return Err(StepError::invalid(&self.name, "event type must not be empty"));
    }
    if let Some(policy) = &self.config.retry_policy {
      policy.validate(&self.name)?;
    }
    Ok(())
  }

  /// Invoke the handler once.
  pub async fn handle(&self, ctx: Context, event: Event) -> anyhow::Result<Option<Event>> {
    self.handler.handle(ctx, event).await
  }
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("name", &self.name)
      .field("event_type", &self.event_type)
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}
