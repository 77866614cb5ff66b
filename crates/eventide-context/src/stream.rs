//! Observer side of the broadcast stream.

use eventide_event::Event;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;

/// A read-only sequence of the events published into a run.
///
/// Delivery is best-effort: events published while the stream buffer is
/// full are dropped. The stream ends once the run has finished and every
/// buffered event has been read.
pub struct EventStream {
  receiver: broadcast::Receiver<Event>,
}

impl EventStream {
  pub(crate) fn new(receiver: broadcast::Receiver<Event>) -> Self {
    Self { receiver }
  }

  /// Wait for the next event. Returns `None` when the stream has ended.
  pub async fn recv(&mut self) -> Option<Event> {
    loop {
      match self.receiver.recv().await {
        Ok(event) => return Some(event),
        Err(RecvError::Lagged(skipped)) => {
          debug!(skipped, "event stream lagged");
        }
        Err(RecvError::Closed) => return None,
      }
    }
  }

  /// Take the next buffered event without waiting.
  pub fn try_recv(&mut self) -> Option<Event> {
    loop {
      match self.receiver.try_recv() {
        Ok(event) => return Some(event),
        Err(TryRecvError::Lagged(skipped)) => {
          debug!(skipped, "event stream lagged");
        }
        Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
      }
    }
  }

  /// Adapt into a [`futures::Stream`].
  pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
    futures::stream::unfold(self, |mut stream| async move {
      stream.recv().await.map(|event| (event, stream))
    })
  }
}
