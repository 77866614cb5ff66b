//! Event variants.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use serde_json::Value;

use crate::error::{EventError, SharedError};
use crate::event_type::EventType;
use crate::task::Task;

/// Key/value payload carried by every event.
pub type EventData = serde_json::Map<String, Value>;

static EMPTY_DATA: LazyLock<EventData> = LazyLock::new(EventData::new);

/// A typed message routed through a run.
///
/// Each variant is built by its own constructor and fills its own fields;
/// there is no generic conversion between variants.
#[derive(Debug, Clone)]
pub enum Event {
  Start(StartEvent),
  Stop(StopEvent),
  Error(ErrorEvent),
  ParallelDispatch(ParallelDispatchEvent),
  ParallelResult(ParallelResultEvent),
  Custom(CustomEvent),
}

impl Event {
  /// A start event carrying the run inputs.
  pub fn start(inputs: EventData) -> Self {
    Self::Start(StartEvent::new(inputs))
  }

  /// A stop event carrying the run result.
  pub fn stop(result: Value) -> Self {
    Self::Stop(StopEvent::new(result))
  }

  /// An error event wrapping `error`.
  pub fn error(error: impl Into<SharedError>) -> Self {
    Self::Error(ErrorEvent::new(error))
  }

  /// A user-defined event.
  pub fn custom(event_type: impl Into<EventType>, data: EventData) -> Self {
    Self::Custom(CustomEvent::new(event_type, data))
  }

  /// A parallel-dispatch event. Fails if any task is invalid.
  pub fn parallel(tasks: Vec<Task>, source_step: impl Into<String>) -> Result<Self, EventError> {
    ParallelDispatchEvent::new(tasks, source_step).map(Self::ParallelDispatch)
  }

  pub fn event_type(&self) -> EventType {
    match self {
      Self::Start(_) => EventType::Start,
      Self::Stop(_) => EventType::Stop,
      Self::Error(_) => EventType::Error,
      Self::ParallelDispatch(_) => EventType::ParallelDispatch,
      Self::ParallelResult(_) => EventType::ParallelResult,
      Self::Custom(e) => e.event_type.clone(),
    }
  }

  pub fn data(&self) -> &EventData {
    match self {
      Self::Start(e) => e.inputs.as_ref().unwrap_or(&EMPTY_DATA),
      Self::Stop(e) => &e.data,
      Self::Error(e) => &e.data,
      Self::ParallelDispatch(e) => &e.data,
      Self::ParallelResult(e) => &e.data,
      Self::Custom(e) => &e.data,
    }
  }

  /// Check the event before it enters a run.
  pub fn validate(&self) -> Result<(), EventError> {
    match self {
      Self::Start(e) => e.validate(),
      Self::Stop(e) => e.validate(),
      Self::Error(_) => Ok(()),
      Self::ParallelDispatch(e) => e.validate(),
      Self::ParallelResult(e) => e.validate(),
      Self::Custom(e) => e.validate(),
    }
  }

  /// The fan-out task this event belongs to, if any.
  pub fn task_id(&self) -> Option<&str> {
    match self {
      Self::Custom(e) => e.task_id.as_deref(),
      Self::Error(e) => e.task_id.as_deref(),
      _ => None,
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Self::Error(_))
  }
}

impl From<StartEvent> for Event {
  fn from(event: StartEvent) -> Self {
    Self::Start(event)
  }
}

impl From<StopEvent> for Event {
  fn from(event: StopEvent) -> Self {
    Self::Stop(event)
  }
}

impl From<ErrorEvent> for Event {
  fn from(event: ErrorEvent) -> Self {
    Self::Error(event)
  }
}

impl From<ParallelDispatchEvent> for Event {
  fn from(event: ParallelDispatchEvent) -> Self {
    Self::ParallelDispatch(event)
  }
}

impl From<ParallelResultEvent> for Event {
  fn from(event: ParallelResultEvent) -> Self {
    Self::ParallelResult(event)
  }
}

impl From<CustomEvent> for Event {
  fn from(event: CustomEvent) -> Self {
    Self::Custom(event)
  }
}

/// Begins a run. Carries the caller's inputs.
#[derive(Debug, Clone, Default)]
pub struct StartEvent {
  pub inputs: Option<EventData>,
}

impl StartEvent {
  pub fn new(inputs: EventData) -> Self {
    Self {
      inputs: Some(inputs),
    }
  }

  fn validate(&self) -> Result<(), EventError> {
    if self.inputs.is_none() {
      return Err(EventError::MissingInputs);
    }
    Ok(())
  }
}

/// Ends a run successfully. `result` becomes the run result.
#[derive(Debug, Clone)]
pub struct StopEvent {
  pub result: Value,
  pub data: EventData,
}

impl StopEvent {
  pub fn new(result: Value) -> Self {
    Self {
      result,
      data: EventData::new(),
    }
  }

  fn validate(&self) -> Result<(), EventError> {
    if self.result.is_null() {
      return Err(EventError::MissingResult);
    }
    Ok(())
  }
}

/// Reports a failure. On the main dispatch path it ends the run.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
  pub error: SharedError,
  /// Step that produced the failure.
  pub step: Option<String>,
  /// Fan-out task that produced the failure.
  pub task_id: Option<String>,
  pub retriable: bool,
  pub data: EventData,
}

impl ErrorEvent {
  pub fn new(error: impl Into<SharedError>) -> Self {
    Self {
      error: error.into(),
      step: None,
      task_id: None,
      retriable: true,
      data: EventData::new(),
    }
  }

  pub fn with_step(mut self, step: impl Into<String>) -> Self {
    self.step = Some(step.into());
    self
  }

  pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
    self.task_id = Some(task_id.into());
    self
  }

  pub fn with_retriable(mut self, retriable: bool) -> Self {
    self.retriable = retriable;
    self
  }
}

/// A batch of independent tasks to fan out.
#[derive(Debug, Clone)]
pub struct ParallelDispatchEvent {
  /// Sorted by descending priority; ties keep their input order.
  pub tasks: Vec<Task>,
  pub source_step: String,
  pub data: EventData,
}

impl ParallelDispatchEvent {
  pub fn new(mut tasks: Vec<Task>, source_step: impl Into<String>) -> Result<Self, EventError> {
    for task in &tasks {
      task.validate()?;
    }

    // stable: equal priorities stay in input order
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

    Ok(Self {
      tasks,
      source_step: source_step.into(),
      data: EventData::new(),
    })
  }

  fn validate(&self) -> Result<(), EventError> {
    if self.tasks.is_empty() {
      return Err(EventError::NoTasks);
    }
    self.tasks.iter().try_for_each(Task::validate)
  }
}

/// Aggregated outcome of a fan-out.
#[derive(Debug, Clone)]
pub struct ParallelResultEvent {
  /// Per-task result. A failed task maps to an error event.
  pub results: HashMap<String, Event>,
  /// Per-task failure cause.
  pub errors: HashMap<String, SharedError>,
  pub successful: usize,
  pub failed: usize,
  pub duration: Duration,
  pub source_step: String,
  /// The dispatched tasks with their final status.
  pub tasks: Vec<Task>,
  pub data: EventData,
}

impl ParallelResultEvent {
  /// Build the aggregate. Counters are derived from `results` only: an entry
  /// that is an error event counts as failed, anything else as successful.
  pub fn new(
    results: HashMap<String, Event>,
    errors: HashMap<String, SharedError>,
    duration: Duration,
    source_step: impl Into<String>,
  ) -> Self {
    let failed = results.values().filter(|r| r.is_error()).count();
    let successful = results.len() - failed;

    Self {
      results,
      errors,
      successful,
      failed,
      duration,
      source_step: source_step.into(),
      tasks: Vec::new(),
      data: EventData::new(),
    }
  }

  pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
    self.tasks = tasks;
    self
  }

  pub fn results(&self) -> &HashMap<String, Event> {
    &self.results
  }

  pub fn errors(&self) -> &HashMap<String, SharedError> {
    &self.errors
  }

  /// `(successful, failed, duration)`
  pub fn stats(&self) -> (usize, usize, Duration) {
    (self.successful, self.failed, self.duration)
  }

  fn validate(&self) -> Result<(), EventError> {
    if self.duration.is_zero() {
      return Err(EventError::NonPositiveDuration);
    }
    Ok(())
  }
}

/// A user-defined event.
#[derive(Debug, Clone)]
pub struct CustomEvent {
  pub event_type: EventType,
  pub data: EventData,
  pub task_id: Option<String>,
}

impl CustomEvent {
  pub fn new(event_type: impl Into<EventType>, data: EventData) -> Self {
    Self {
      event_type: event_type.into(),
      data,
      task_id: None,
    }
  }

  pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
    self.task_id = Some(task_id.into());
    self
  }

  pub fn set(&mut self, key: impl Into<String>, value: Value) {
    self.data.insert(key.into(), value);
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.data.get(key)
  }

  fn validate(&self) -> Result<(), EventError> {
    if self.event_type.is_empty() {
      return Err(EventError::EmptyType);
    }
    if self.event_type.is_reserved() {
      return Err(EventError::ReservedType {
        event_type: self.event_type.to_string(),
      });
    }
    Ok(())
  }
}
