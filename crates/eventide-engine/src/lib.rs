//! Eventide Engine
//!
//! Event-driven step dispatch. A [`Workflow`] holds steps keyed by the event
//! type they handle; [`Workflow::run`] starts a run whose loop routes every
//! event to the matching steps until a stop or error event ends it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Workflow                            │
//! │  - add_step(step) → registry keyed by event type            │
//! │  - run(inputs) → RunHandle                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ spawns
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          RunLoop                            │
//! │  - consumes the Context event queue                         │
//! │  - stop / error → outcome, cancel / deadline → outcome      │
//! │  - parallel dispatch → fan-out, others → matching steps     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ spawns per step / per task
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                          │
//! │  - slot pool per event type                                 │
//! │  - per-attempt timeout, retry with backoff                  │
//! │  - publishes outputs and error events back into the run     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let workflow = Workflow::new(WorkflowConfig::named("pipeline"));
//! workflow.add_step(Step::new("double", "start", double, StepConfig::default()))?;
//! workflow.add_step(Step::new("finish", "double", finish, StepConfig::default()))?;
//!
//! let handle = workflow.run(EventData::new())?;
//! let result = handle.wait().await?;
//! ```

mod config;
mod dispatch;
mod error;
mod fanout;
mod handle;
mod limiter;
mod run;
mod workflow;

pub use config::{DEFAULT_PARALLEL_TASK_LIMIT, WorkflowConfig};
pub use error::EngineError;
pub use handle::{RunHandle, RunStatus};
pub use limiter::{Slot, SlotPool};
pub use workflow::Workflow;

// Re-exports so callers can build steps and events from one crate.
pub use eventide_context::{Context, ContextError, EventStream};
pub use eventide_event::{
  CustomEvent, ErrorEvent, Event, EventData, EventType, ParallelDispatchEvent, ParallelResultEvent,
  SharedError, StartEvent, StopEvent, Task, TaskStatus,
};
pub use eventide_step::{RetryOn, RetryPolicy, Step, StepConfig, StepError, StepHandler};
