//! Eventide Step
//!
//! A [`Step`] is a named handler bound to one event type. Its
//! [`StepConfig`] caps how many invocations may run at once, bounds each
//! attempt with a timeout and carries the [`RetryPolicy`] applied when the
//! handler fails.
//!
//! Handlers implement [`StepHandler`]; any
//! `Fn(Context, Event) -> impl Future<Output = anyhow::Result<Option<Event>>>`
//! closure does so automatically:
//!
//! ```ignore
//! let step = Step::new("doubler", "start", |_ctx: Context, _event: Event| async move {
//!   Ok(Some(Event::custom("double", data)))
//! }, StepConfig::default());
//! ```

mod error;
mod retry;
mod step;

pub use error::StepError;
pub use retry::{RetryOn, RetryPolicy};
pub use step::{Step, StepConfig, StepHandler};
