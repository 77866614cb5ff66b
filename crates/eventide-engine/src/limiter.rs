//! Bounded concurrency for step executions.
//!
//! A [`SlotPool`] caps how many executions for one event type run at once
//! and records the in-flight count and its high-water mark, so the cap can
//! be checked from outside. A limit of 0 means unlimited; the pool still
//! counts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use eventide_event::EventType;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SlotPool {
  limit: usize,
  semaphore: Option<Arc<Semaphore>>,
  in_flight: AtomicUsize,
  peak: AtomicUsize,
}

impl SlotPool {
  pub fn new(limit: usize) -> Self {
    let semaphore = match limit {
      0 => None,
      n => Some(Arc::new(Semaphore::new(n))),
    };
    Self {
      limit,
      semaphore,
      in_flight: AtomicUsize::new(0),
      peak: AtomicUsize::new(0),
    }
  }

  /// `None` when unlimited.
  pub fn limit(&self) -> Option<usize> {
    self.semaphore.as_ref().map(|_| self.limit)
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  /// Most executions ever observed holding a slot at once.
  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }

  /// Wait for a free slot. Returns `None` if `cancel` fires first.
  pub async fn acquire(self: &Arc<Self>, cancel: &CancellationToken) -> Option<Slot> {
    let permit = match &self.semaphore {
      Some(semaphore) => {
        let permit = tokio::select! {
          biased;
          _ = cancel.cancelled() => return None,
          permit = Arc::clone(semaphore).acquire_owned() => permit.ok()?,
        };
        Some(permit)
      }
      None if cancel.is_cancelled() => return None,
      None => None,
    };

    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    Some(Slot {
      pool: Arc::clone(self),
      _permit: permit,
    })
  }
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Slot {
  pool: Arc<SlotPool>,
  _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for Slot {
  fn drop(&mut self) {
    self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);
  }
}

/// The slot pools of one run, keyed by event type.
///
/// The first dispatch of a type fixes its limit.
#[derive(Debug, Default)]
pub(crate) struct SlotPools {
  pools: Mutex<HashMap<EventType, Arc<SlotPool>>>,
}

impl SlotPools {
  pub(crate) fn get_or_create(&self, event_type: &EventType, limit: usize) -> Arc<SlotPool> {
    let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
      pools
        .entry(event_type.clone())
        .or_insert_with(|| Arc::new(SlotPool::new(limit))),
    )
  }

  pub(crate) fn get(&self, event_type: &EventType) -> Option<Arc<SlotPool>> {
    let pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
    pools.get(event_type).cloned()
  }
}
