use std::time::Duration;

use eventide_config::WorkflowSettings;

/// Default number of fan-out tasks allowed to run at once.
pub const DEFAULT_PARALLEL_TASK_LIMIT: usize = 10;

/// Workflow-wide settings handed to [`Workflow::new`](crate::Workflow::new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
  pub name: String,
  /// Non-terminal events a run may dispatch. 0 is unlimited.
  pub max_turns: u64,
  /// Log skipped events and per-step activity at info level.
  pub verbose: bool,
  /// Run deadline, and the budget split into default per-step timeouts.
  /// Zero disables both.
  pub timeout: Duration,
  /// Seeds the retry policy given to steps that declare none.
  pub max_retries: u32,
  /// Fan-out tasks running at once. 0 is unlimited.
  pub parallel_task_limit: usize,
  /// Capacity of the run's event queue and broadcast stream.
  pub event_buffer: usize,
  /// Wait for in-flight step executions before finalizing a stopped run.
  pub drain_on_exit: bool,
}

impl Default for WorkflowConfig {
  fn default() -> Self {
    Self {
      name: String::new(),
      max_turns: 0,
      verbose: false,
      timeout: Duration::from_secs(5 * 60),
      max_retries: 3,
      parallel_task_limit: DEFAULT_PARALLEL_TASK_LIMIT,
      event_buffer: eventide_context::DEFAULT_BUFFER_SIZE,
      drain_on_exit: false,
    }
  }
}

impl WorkflowConfig {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_max_turns(mut self, max_turns: u64) -> Self {
    self.max_turns = max_turns;
    self
  }

  pub fn with_parallel_task_limit(mut self, limit: usize) -> Self {
    self.parallel_task_limit = limit;
    self
  }

  pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
    self.event_buffer = event_buffer;
    self
  }

  pub fn with_drain_on_exit(mut self, drain: bool) -> Self {
    self.drain_on_exit = drain;
    self
  }

  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }
}

impl From<WorkflowSettings> for WorkflowConfig {
  fn from(settings: WorkflowSettings) -> Self {
    Self {
      name: settings.name,
      max_turns: settings.max_turns,
      verbose: settings.verbose,
      timeout: Duration::from_millis(settings.timeout_ms),
      max_retries: settings.max_retries,
      parallel_task_limit: settings.parallel_task_limit,
      event_buffer: settings.event_buffer,
      drain_on_exit: settings.drain_on_exit,
    }
  }
}
