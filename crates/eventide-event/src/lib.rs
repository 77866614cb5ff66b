//! Eventide Event
//!
//! This crate provides the data model that flows through an eventide run:
//! typed, self-validating [`Event`]s and the [`Task`] records used by
//! fan-out dispatch.
//!
//! Every event exposes the same three operations regardless of its variant:
//!
//! - `event_type()` - the routing key used by the step registry
//! - `data()` - the key/value payload
//! - `validate()` - the self-validation contract checked before an event
//!   enters a run
//!
//! The reserved kinds (start, stop, error, parallel-dispatch, parallel-result)
//! are distinct variants with their own fields. Anything else is a
//! [`CustomEvent`] tagged with a user-defined [`EventType`].

mod error;
mod event;
mod event_type;
mod task;

pub use error::{EventError, SharedError};
pub use event::{
  CustomEvent, ErrorEvent, Event, EventData, ParallelDispatchEvent, ParallelResultEvent,
  StartEvent, StopEvent,
};
pub use event_type::EventType;
pub use task::{DEFAULT_TASK_TIMEOUT, Task, TaskStatus};
