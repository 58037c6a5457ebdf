//! Buffer registry: an append-only array of per-thread
//! staging-buffer pointers. Threads publish a slot exactly once, at first-log
//! time; the writer scans the whole array every pass.
//!
//! `crossbeam_epoch::Atomic<StagingBuffer>` gives the append-publish /
//! acquire-read pair this needs, plus safe deferred destruction of the boxed
//! buffers at shutdown, without a hand-rolled unsafe scheme on top of what the
//! staging buffer already needs.

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::staging::StagingBuffer;

pub const DEFAULT_MAX_BUFFERS: usize = 256;

pub struct BufferRegistry {
  slots: Box<[Atomic<StagingBuffer>]>,
  count: AtomicU32,
}

impl BufferRegistry {
  pub fn new(max_buffers: usize) -> BufferRegistry {
    let mut slots = Vec::with_capacity(max_buffers);
    slots.resize_with(max_buffers, Atomic::null);
    BufferRegistry { slots: slots.into_boxed_slice(), count: AtomicU32::new(0) }
  }

  /// Publishes a newly created buffer and returns its slot index, or `None` if
  /// the fixed-capacity array is already full.
  pub fn publish(&self, buffer: StagingBuffer) -> Option<usize> {
    let idx = self.count.fetch_add(1, Ordering::AcqRel) as usize;
    if idx >= self.slots.len() {
      // Overshoot: undo the reservation so `count` still reflects published slots.
      self.count.fetch_sub(1, Ordering::AcqRel);
      return None;
    }

    let guard = epoch::pin();
    self.slots[idx].store(Owned::new(buffer), Ordering::Release);
    drop(guard);
    Some(idx)
  }

  /// Number of published slots, acquire-loaded per 
  pub fn count(&self) -> usize {
    self.count.load(Ordering::Acquire) as usize
  }

  /// Borrows the buffer at `idx`, if published. Sound only because the writer
  /// loop is the sole caller and never overlaps with `destroy_all` — `shutdown`
  /// joins the writer thread before tearing slots down, so no epoch guard is
  /// needed to keep the pointee alive across this call.
  pub fn get(&self, idx: usize) -> Option<&StagingBuffer> {
    if idx >= self.slots.len() {
      return None;
    }
    let guard = epoch::pin();
    let shared: Shared<StagingBuffer> = self.slots[idx].load(Ordering::Acquire, &guard);
    if shared.is_null() {
      return None;
    }
    Some(unsafe { &*(shared.as_raw()) })
  }

  /// Runs `f` with a reference to the buffer at `idx`, if published. The
  /// epoch guard keeps the buffer alive for the duration of the call even if
  /// a concurrent shutdown is tearing down the registry elsewhere (it isn't,
  /// in practice: only the writer thread ever calls this, and shutdown joins
  /// the writer before destroying slots — but the safe API costs nothing).
  pub fn with_buffer<R>(&self, idx: usize, f: impl FnOnce(&StagingBuffer) -> R) -> Option<R> {
    if idx >= self.slots.len() {
      return None;
    }
    let guard = epoch::pin();
    let shared: Shared<StagingBuffer> = self.slots[idx].load(Ordering::Acquire, &guard);
    if shared.is_null() {
      return None;
    }
    let buf = unsafe { shared.deref() };
    Some(f(buf))
  }

  /// Active-buffer count for `Stats::staging_buffers_active`: published
  /// slots whose owning thread hasn't exited.
  pub fn active_count(&self) -> u32 {
    let n = self.count();
    let mut active = 0u32;
    for idx in 0..n {
      if self.with_buffer(idx, |b| b.is_active()).unwrap_or(false) {
        active += 1;
      }
    }
    active
  }

  /// Tears down every published slot. Called only from `shutdown`, after the
  /// writer thread has been joined so nothing else touches the registry.
  pub fn destroy_all(&self) {
    let guard = epoch::pin();
    let n = self.count();
    for slot in self.slots.iter().take(n) {
      let shared = slot.swap(Shared::null(), Ordering::AcqRel, &guard);
      if !shared.is_null() {
        unsafe { guard.defer_destroy(shared) };
      }
    }
    guard.flush();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn publish_assigns_sequential_indices() {
    let reg = BufferRegistry::new(4);
    let a = reg.publish(StagingBuffer::new(1024, 1)).unwrap();
    let b = reg.publish(StagingBuffer::new(1024, 2)).unwrap();
    assert_eq!((a, b), (0, 1));
    assert_eq!(reg.count(), 2);
  }

  #[test]
  fn publish_fails_past_capacity() {
    let reg = BufferRegistry::new(1);
    assert!(reg.publish(StagingBuffer::new(1024, 1)).is_some());
    assert!(reg.publish(StagingBuffer::new(1024, 2)).is_none());
    assert_eq!(reg.count(), 1);
  }

  #[test]
  fn with_buffer_reaches_the_published_instance() {
    let reg = BufferRegistry::new(4);
    let idx = reg.publish(StagingBuffer::new(1024, 42)).unwrap();
    let thread_id = reg.with_buffer(idx, |b| b.thread_id).unwrap();
    assert_eq!(thread_id, 42);
  }

  #[test]
  fn with_buffer_is_none_for_unpublished_slot() {
    let reg = BufferRegistry::new(4);
    assert!(reg.with_buffer(0, |_| ()).is_none());
  }

  #[test]
  fn active_count_reflects_deactivated_buffers() {
    let reg = BufferRegistry::new(4);
    let idx = reg.publish(StagingBuffer::new(1024, 1)).unwrap();
    assert_eq!(reg.active_count(), 1);
    reg.with_buffer(idx, |b| b.deactivate());
    assert_eq!(reg.active_count(), 0);
  }

  #[test]
  fn destroy_all_clears_every_published_slot() {
    let reg = BufferRegistry::new(4);
    reg.publish(StagingBuffer::new(1024, 1)).unwrap();
    reg.publish(StagingBuffer::new(1024, 2)).unwrap();
    reg.destroy_all();
    assert!(reg.with_buffer(0, |_| ()).is_none());
    assert!(reg.with_buffer(1, |_| ()).is_none());
  }
}
