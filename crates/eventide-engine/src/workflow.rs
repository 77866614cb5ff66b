//! Step registry and run entry point.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use eventide_context::Context;
use eventide_event::{Event, EventData, EventType};
use eventide_step::{RetryPolicy, Step};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::WorkflowConfig;
use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::handle::{RunHandle, RunShared, RunStatus};
use crate::run::RunLoop;

#[derive(Default)]
struct Registry {
  steps: Vec<Step>,
  by_type: HashMap<EventType, Vec<Step>>,
}

/// A set of steps and the settings shared by every run over them.
///
/// Cloning is cheap and clones share the registry, so steps may be
/// registered while runs are in progress. A run sees the steps registered
/// at the moment each event is dispatched.
#[derive(Clone)]
pub struct Workflow {
  config: Arc<WorkflowConfig>,
  registry: Arc<RwLock<Registry>>,
}

impl Workflow {
  pub fn new(config: WorkflowConfig) -> Self {
    Self {
      config: Arc::new(config),
      registry: Arc::new(RwLock::new(Registry::default())),
    }
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn config(&self) -> &WorkflowConfig {
    &self.config
  }

  /// Register a step.
  ///
  /// A step without a timeout gets an equal share of the workflow timeout,
  /// `timeout / (registered + 1)`. A step without a retry policy gets the
  /// default policy with the workflow's `max_retries`.
  #[instrument(
    skip_all,
    fields(workflow = %self.config.name, step = %step.name())
  )]
  pub fn add_step(&self, step: Step) -> Result<(), EngineError> {
    step.validate()?;

    let mut registry = self.write();
    let share = u32::try_from(registry.steps.len() + 1).unwrap_or(u32::MAX);
    let max_retries = self.config.max_retries;
    let step = step.with_defaults(self.config.timeout / share, || {
      RetryPolicy::default().with_max_retries(max_retries)
    });

    info!(
      event_type = %step.event_type(),
      timeout_ms = step.timeout().as_millis() as u64,
      max_parallel = step.max_parallel(),
      "step_registered"
    );

    registry
      .by_type
      .entry(step.event_type().clone())
      .or_default()
      .push(step.clone());
    registry.steps.push(step);
    Ok(())
  }

  /// Every registered step, in registration order.
  pub fn steps(&self) -> Vec<Step> {
    self.read().steps.clone()
  }

  /// The steps bound to `event_type`, in registration order.
  pub fn steps_for(&self, event_type: &EventType) -> Vec<Step> {
    self
      .read()
      .by_type
      .get(event_type)
      .cloned()
      .unwrap_or_default()
  }

  /// Start a run with `inputs` as the start event's data.
  ///
  /// Must be called inside a tokio runtime. Only setup problems are
  /// returned here; everything after goes through the handle.
  pub fn run(&self, inputs: EventData) -> Result<RunHandle, EngineError> {
    self.run_with_cancel(inputs, &CancellationToken::new())
  }

  /// Like [`run`](Self::run), but the run is also cancelled when `parent`
  /// is. Cancelling the run leaves `parent` alone.
  pub fn run_with_cancel(
    &self,
    inputs: EventData,
    parent: &CancellationToken,
  ) -> Result<RunHandle, EngineError> {
    if self.config.event_buffer == 0 {
      return Err(EngineError::Setup {
        message: "event buffer must hold at least one event".to_string(),
      });
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| EngineError::Setup {
      message: format!("no tokio runtime: {}", e),
    })?;

    let ctx = Context::with_buffer_size(parent.child_token(), self.config.event_buffer);
    let events = ctx.take_events().ok_or_else(|| EngineError::Setup {
      message: "event queue already taken".to_string(),
    })?;
    ctx
      .try_send(Event::start(inputs))
      .map_err(|e| EngineError::Setup {
        message: format!("failed to publish start event: {}", e),
      })?;

    let shared = RunShared::new();
    shared.set_status(RunStatus::Running);
    let handle = RunHandle::new(ctx.clone(), Arc::clone(&shared));

    info!(workflow = %self.config.name, run_id = %ctx.run_id(), "run_spawned");
    let dispatcher = Dispatcher::new(self.clone(), ctx, shared);
    runtime.spawn(RunLoop::new(dispatcher, events).start());

    Ok(handle)
  }

  fn read(&self) -> RwLockReadGuard<'_, Registry> {
    self.registry.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, Registry> {
    self.registry.write().unwrap_or_else(PoisonError::into_inner)
  }
}

impl std::fmt::Debug for Workflow {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Workflow")
      .field("config", &self.config)
      .field("steps", &self.read().steps.len())
      .finish()
  }
}
