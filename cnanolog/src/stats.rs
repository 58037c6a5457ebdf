//! Process-wide counters, updated with relaxed atomics from both producer
//! threads (`dropped_logs`) and the writer thread (everything else). No counter here
//! is ever read on the hot path, so ordering only needs to prevent torn reads, not
//! establish happens-before with anything.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
  total_logs_written: AtomicU64,
  total_bytes_written: AtomicU64,
  dropped_logs: AtomicU64,
  in_bytes: AtomicU64,
  out_bytes: AtomicU64,
  staging_buffers_active: AtomicU32,
  background_wakeups: AtomicU64,
}

/// Snapshot returned by `get_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
  pub total_logs_written: u64,
  pub total_bytes_written: u64,
  pub dropped_logs: u64,
  pub compression_ratio_x100: u64,
  pub staging_buffers_active: u32,
  pub background_wakeups: u64,
}

impl Stats {
  pub fn new() -> Stats {
    Stats::default()
  }

  #[inline]
  pub fn record_drop(&self) {
    self.dropped_logs.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub fn record_entry_written(&self, bytes_written: u64, in_bytes: u64, out_bytes: u64) {
    self.total_logs_written.fetch_add(1, Ordering::Relaxed);
    self.total_bytes_written.fetch_add(bytes_written, Ordering::Relaxed);
    self.in_bytes.fetch_add(in_bytes, Ordering::Relaxed);
    self.out_bytes.fetch_add(out_bytes, Ordering::Relaxed);
  }

  #[inline]
  pub fn record_wakeup(&self) {
    self.background_wakeups.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub fn set_active_buffers(&self, n: u32) {
    self.staging_buffers_active.store(n, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    let in_bytes = self.in_bytes.load(Ordering::Relaxed);
    let out_bytes = self.out_bytes.load(Ordering::Relaxed);
    let compression_ratio_x100 =
      if out_bytes == 0 { 100 } else { in_bytes.saturating_mul(100) / out_bytes };

    StatsSnapshot {
      total_logs_written: self.total_logs_written.load(Ordering::Relaxed),
      total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
      dropped_logs: self.dropped_logs.load(Ordering::Relaxed),
      compression_ratio_x100,
      staging_buffers_active: self.staging_buffers_active.load(Ordering::Relaxed),
      background_wakeups: self.background_wakeups.load(Ordering::Relaxed),
    }
  }

  pub fn reset(&self) {
    self.total_logs_written.store(0, Ordering::Relaxed);
    self.total_bytes_written.store(0, Ordering::Relaxed);
    self.dropped_logs.store(0, Ordering::Relaxed);
    self.in_bytes.store(0, Ordering::Relaxed);
    self.out_bytes.store(0, Ordering::Relaxed);
    self.background_wakeups.store(0, Ordering::Relaxed);
    // staging_buffers_active is a gauge, not an accumulator; leave it as-is.
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn compression_ratio_clamps_when_out_bytes_zero() {
    let stats = Stats::new();
    assert_eq!(stats.snapshot().compression_ratio_x100, 100);
  }

  #[test]
  fn compression_ratio_reflects_recorded_bytes() {
    let stats = Stats::new();
    stats.record_entry_written(10, 200, 50);
    assert_eq!(stats.snapshot().compression_ratio_x100, 400);
  }

  #[test]
  fn reset_clears_accumulators_but_not_gauge() {
    let stats = Stats::new();
    stats.record_drop();
    stats.set_active_buffers(4);
    stats.reset();
    let snap = stats.snapshot();
    assert_eq!(snap.dropped_logs, 0);
    assert_eq!(snap.staging_buffers_active, 4);
  }
}
