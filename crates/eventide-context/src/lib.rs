//! Eventide Context
//!
//! A [`Context`] is created fresh for every run and owns:
//!
//! - a bounded inbound event queue, drained by the dispatcher's run loop
//! - a bounded best-effort broadcast stream for external observers
//! - the run's cancellation token
//! - a key/value state store shared by every step in the run
//!
//! ```text
//!   step handlers ──send()──► inbound queue ──► run loop (single consumer)
//!                     │
//!                     └─────► broadcast stream ──► observers (drop when full)
//! ```

mod context;
mod error;
mod stream;

pub use context::{Context, DEFAULT_BUFFER_SIZE};
pub use error::ContextError;
pub use stream::EventStream;
