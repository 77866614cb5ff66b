//! The per-run execution context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use eventide_event::{Event, EventData};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ContextError;
use crate::stream::EventStream;

/// Capacity of the inbound queue and the broadcast stream.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Execution context for a single run.
///
/// Cloning is cheap and yields another handle to the same run; the context
/// is never reused across runs.
#[derive(Clone)]
pub struct Context {
  inner: Arc<Inner>,
}

struct Inner {
  run_id: String,
  cancel: CancellationToken,
  buffer_size: usize,
  events_tx: mpsc::Sender<Event>,
  events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
  // None once the run has finished
  stream_tx: Mutex<Option<broadcast::Sender<Event>>>,
  // Subscribed at construction so the first observer sees events published
  // before it attached.
  first_stream_rx: Mutex<Option<broadcast::Receiver<Event>>>,
  state: RwLock<HashMap<String, Value>>,
}

impl Context {
  /// Create a context whose lifetime is bound to `cancel`.
  pub fn new(cancel: CancellationToken) -> Self {
    Self::with_buffer_size(cancel, DEFAULT_BUFFER_SIZE)
  }

  /// Create a context with custom queue capacities.
  pub fn with_buffer_size(cancel: CancellationToken, buffer_size: usize) -> Self {
    let buffer_size = buffer_size.max(1);
    let (events_tx, events_rx) = mpsc::channel(buffer_size);
    let (stream_tx, first_stream_rx) = broadcast::channel(buffer_size);

    Self {
      inner: Arc::new(Inner {
        run_id: uuid::Uuid::new_v4().to_string(),
        cancel,
        buffer_size,
        events_tx,
        events_rx: Mutex::new(Some(events_rx)),
        stream_tx: Mutex::new(Some(stream_tx)),
        first_stream_rx: Mutex::new(Some(first_stream_rx)),
        state: RwLock::new(HashMap::new()),
      }),
    }
  }

  /// Unique ID of the run this context belongs to.
  pub fn run_id(&self) -> &str {
    &self.inner.run_id
  }

  // ---------------------------------------------------------------------------
  // Lifetime
  // ---------------------------------------------------------------------------

  /// Cancel the run. Pending sends and derived deadlines observe it promptly.
  pub fn cancel(&self) {
    self.inner.cancel.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancel.is_cancelled()
  }

  /// The run's root token.
  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.inner.cancel
  }

  /// A token that is cancelled together with the run.
  pub fn child_token(&self) -> CancellationToken {
    self.inner.cancel.child_token()
  }

  // ---------------------------------------------------------------------------
  // Event routing
  // ---------------------------------------------------------------------------

  /// Publish an event into the run.
  ///
  /// Waits for inbound queue space unless the run is cancelled first. On
  /// success the event is also offered to the broadcast stream.
  pub async fn send(&self, event: Event) -> Result<(), ContextError> {
    event.validate()?;
    let observed = event.clone();

    tokio::select! {
      biased;
      _ = self.inner.cancel.cancelled() => Err(ContextError::Cancelled),
      sent = self.inner.events_tx.send(event) => {
        sent.map_err(|_| ContextError::Closed)?;
        self.broadcast(observed);
        Ok(())
      }
    }
  }

  /// Publish an event without waiting for queue space.
  pub fn try_send(&self, event: Event) -> Result<(), ContextError> {
    event.validate()?;
    if self.is_cancelled() {
      return Err(ContextError::Cancelled);
    }

    let observed = event.clone();
    self
      .inner
      .events_tx
      .try_send(event)
      .map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => ContextError::Full,
        mpsc::error::TrySendError::Closed(_) => ContextError::Closed,
      })?;
    self.broadcast(observed);
    Ok(())
  }

  /// Take the inbound queue. There is exactly one consumer per run, so this
  /// returns `Some` only on the first call.
  pub fn take_events(&self) -> Option<mpsc::Receiver<Event>> {
    lock(&self.inner.events_rx).take()
  }

  /// Observe the events published into this run.
  ///
  /// The first stream handed out also holds events published before it was
  /// requested (up to the buffer size); later streams start at the moment
  /// they are requested.
  pub fn stream(&self) -> EventStream {
    if let Some(first) = lock(&self.inner.first_stream_rx).take() {
      return EventStream::new(first);
    }

    match lock(&self.inner.stream_tx).as_ref() {
      Some(tx) => EventStream::new(tx.subscribe()),
      None => {
        // finished run: hand out a stream that is already closed
        let (_, rx) = broadcast::channel(1);
        EventStream::new(rx)
      }
    }
  }

  /// End the broadcast stream. Observers drain what is buffered and then
  /// see the end of the stream.
  pub fn close_stream(&self) {
    lock(&self.inner.stream_tx).take();
  }

  /// Best-effort push onto the broadcast stream. Dropped when full.
  fn broadcast(&self, event: Event) {
    let guard = lock(&self.inner.stream_tx);
    let Some(tx) = guard.as_ref() else {
      return;
    };

    if tx.len() >= self.inner.buffer_size {
      trace!(run_id = %self.inner.run_id, event_type = %event.event_type(), "stream full, dropping event");
      return;
    }

    // no receivers is fine
    let _ = tx.send(event);
  }

  // ---------------------------------------------------------------------------
  // State store
  // ---------------------------------------------------------------------------

  pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
    write(&self.inner.state).insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    read(&self.inner.state).get(key).cloned()
  }

  pub fn delete(&self, key: &str) {
    write(&self.inner.state).remove(key);
  }

  pub fn has(&self, key: &str) -> bool {
    read(&self.inner.state).contains_key(key)
  }

  /// All keys, in no particular order.
  pub fn keys(&self) -> Vec<String> {
    read(&self.inner.state).keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    read(&self.inner.state).len()
  }

  pub fn is_empty(&self) -> bool {
    read(&self.inner.state).is_empty()
  }

  pub fn clear(&self) {
    write(&self.inner.state).clear();
  }

  /// An independent deep copy of the state.
  pub fn snapshot(&self) -> HashMap<String, Value> {
    read(&self.inner.state).clone()
  }

  /// `None` when the key is missing or not a string.
  pub fn get_string(&self, key: &str) -> Option<String> {
    read(&self.inner.state)
      .get(key)
      .and_then(Value::as_str)
      .map(str::to_string)
  }

  /// `None` when the key is missing or not an integer.
  pub fn get_int(&self, key: &str) -> Option<i64> {
    read(&self.inner.state).get(key).and_then(Value::as_i64)
  }

  /// `None` when the key is missing or not a bool.
  pub fn get_bool(&self, key: &str) -> Option<bool> {
    read(&self.inner.state).get(key).and_then(Value::as_bool)
  }

  /// `None` when the key is missing or not an object.
  pub fn get_map(&self, key: &str) -> Option<EventData> {
    read(&self.inner.state)
      .get(key)
      .and_then(Value::as_object)
      .cloned()
  }

  /// Deserialize a value into `T`. `None` when missing or of the wrong shape.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get(key)?;
    serde_json::from_value(value).ok()
  }
}

impl std::fmt::Debug for Context {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Context")
      .field("run_id", &self.inner.run_id)
      .field("cancelled", &self.is_cancelled())
      .finish_non_exhaustive()
  }
}

// A panicking step must not take the whole run's state down with it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(PoisonError::into_inner)
}
