//! Fan-out task records.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::{EventError, SharedError};
use crate::event::{CustomEvent, Event, EventData};
use crate::event_type::EventType;

/// Timeout applied to a task unless overridden with [`Task::with_timeout`].
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Lifecycle of a task (and of a run, see `RunStatus` in the engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
  Pending,
  Running,
  Complete,
  Failed,
  Cancelled,
}

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Complete => "complete",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    })
  }
}

/// One unit of work inside a parallel-dispatch batch.
#[derive(Debug, Clone)]
pub struct Task {
  /// Unique within one dispatch.
  pub id: String,
  /// Steps registered for this type handle the task.
  pub task_type: EventType,
  pub payload: Value,
  pub status: TaskStatus,
  pub error: Option<SharedError>,
  /// Higher runs first.
  pub priority: i32,
  pub timeout: Duration,
}

impl Task {
  /// Create a pending task with default priority and timeout.
  pub fn new(id: impl Into<String>, task_type: impl Into<EventType>, payload: Value) -> Self {
    Self {
      id: id.into(),
      task_type: task_type.into(),
      payload,
      status: TaskStatus::Pending,
      error: None,
      priority: 0,
      timeout: DEFAULT_TASK_TIMEOUT,
    }
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Move a pending task to running. Returns `false` and leaves the
  /// status alone if the task was not pending.
  pub fn mark_running(&mut self) -> bool {
    if self.status != TaskStatus::Pending {
      return false;
    }
    self.status = TaskStatus::Running;
    true
  }

  /// Check that the task can be dispatched.
  pub fn validate(&self) -> Result<(), EventError> {
    if self.id.is_empty() {
      return Err(EventError::InvalidTask {
        task_id: self.id.clone(),
        reason: "task ID is required".to_string(),
      });
    }
    if self.task_type.is_empty() {
      return Err(EventError::InvalidTask {
        task_id: self.id.clone(),
        reason: "task type is required".to_string(),
      });
    }
    if self.task_type.is_reserved() {
      return Err(EventError::InvalidTask {
        task_id: self.id.clone(),
        reason: format!("task type '{}' is reserved", self.task_type),
      });
    }
    Ok(())
  }

  /// Build the event handed to the steps registered for this task's type.
  ///
  /// An object payload becomes the event data; any other payload is stored
  /// under the `"payload"` key.
  pub fn to_event(&self) -> Event {
    let data = match &self.payload {
      Value::Object(map) => map.clone(),
      Value::Null => EventData::new(),
      other => {
        let mut data = EventData::new();
        data.insert("payload".to_string(), other.clone());
        data
      }
    };
    Event::Custom(CustomEvent::new(self.task_type.clone(), data).with_task_id(self.id.clone()))
  }
}
