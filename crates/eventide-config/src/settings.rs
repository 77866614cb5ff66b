use serde::{Deserialize, Serialize};

/// Workflow-wide settings in their file form.
///
/// | field                 | default  |
/// |-----------------------|----------|
/// | `name`                | `""`     |
/// | `max_turns`           | 0 (none) |
/// | `verbose`             | false    |
/// | `timeout_ms`          | 300000   |
/// | `max_retries`         | 3        |
/// | `parallel_task_limit` | 10       |
/// | `event_buffer`        | 100      |
/// | `drain_on_exit`       | false    |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
  pub name: String,
  pub max_turns: u64,
  pub verbose: bool,
  pub timeout_ms: u64,
  pub max_retries: u32,
  pub parallel_task_limit: usize,
  pub event_buffer: usize,
  pub drain_on_exit: bool,
}

impl Default for WorkflowSettings {
  fn default() -> Self {
    Self {
      name: String::new(),
      max_turns: 0,
      verbose: false,
      timeout_ms: 5 * 60 * 1000,
      max_retries: 3,
      parallel_task_limit: 10,
      event_buffer: 100,
      drain_on_exit: false,
    }
  }
}

impl WorkflowSettings {
  pub fn from_json(json: &str) -> serde_json::Result<Self> {
    serde_json::from_str(json)
  }
}
