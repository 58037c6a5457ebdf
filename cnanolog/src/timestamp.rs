//! Cycle-counter timestamps and the one-time calibration that anchors them to wall
//! clock time. Producers stamp every entry with a raw `rdtsc()` read (no syscall, no
//! allocation); everything that turns a cycle count into a human time happens offline
//! using the `CalibrationBlock` written into the file header.

use std::time::{SystemTime, UNIX_EPOCH};

/// `(freq_hz, anchor_tsc, anchor_wall_sec, anchor_wall_nsec)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationBlock {
  pub freq_hz: u64,
  pub anchor_tsc: u64,
  pub anchor_wall_sec: i64,
  pub anchor_wall_nsec: i32,
}

/// Reads the raw monotonic cycle counter. On x86_64 this is `rdtsc`; on other
/// architectures there is no equivalent single instruction, so a nanosecond
/// `Instant`-derived counter stands in, scaled so `calibrate()`'s frequency still
/// means "counts per second" to the rest of the pipeline.
#[inline]
pub fn read_cycles() -> u64 {
  #[cfg(target_arch = "x86_64")]
  unsafe {
    core::arch::x86_64::_rdtsc()
  }
  #[cfg(not(target_arch = "x86_64"))]
  {
    // Portable fallback: nanoseconds since an arbitrary fixed epoch, which is a
    // valid "cycle counter" at an implied frequency of 1 GHz.
    use std::sync::OnceLock;
    static START: OnceLock<std::time::Instant> = OnceLock::new();
    let start = START.get_or_init(std::time::Instant::now);
    start.elapsed().as_nanos() as u64
  }
}

/// Measures the counter's frequency by sampling it twice across a short sleep, then
/// anchors the counter value at the second sample to the wall clock at that instant.
/// Called exactly once, during `init`/`init_ex`.
pub fn calibrate() -> CalibrationBlock {
  const SETTLE: std::time::Duration = std::time::Duration::from_millis(50);

  let t0 = read_cycles();
  let wall0 = std::time::Instant::now();
  std::thread::sleep(SETTLE);
  let t1 = read_cycles();
  let elapsed = wall0.elapsed();

  let elapsed_nanos = elapsed.as_nanos().max(1) as u64;
  let delta_cycles = t1.saturating_sub(t0);
  // cycles/sec = delta_cycles * 1e9 / elapsed_nanos
  let freq_hz = (delta_cycles as u128 * 1_000_000_000u128 / elapsed_nanos as u128) as u64;

  let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();

  CalibrationBlock {
    freq_hz: freq_hz.max(1),
    anchor_tsc: t1,
    anchor_wall_sec: now.as_secs() as i64,
    anchor_wall_nsec: now.subsec_nanos() as i32,
  }
}

/// Converts a raw cycle count to nanoseconds since the Unix epoch, given the
/// calibration captured at `init` time. Used only offline / in tests; the hot path
/// never calls this.
pub fn cycles_to_epoch_nanos(calib: &CalibrationBlock, cycles: u64) -> i128 {
  let anchor_epoch_nanos =
    calib.anchor_wall_sec as i128 * 1_000_000_000 + calib.anchor_wall_nsec as i128;
  let delta_cycles = cycles as i128 - calib.anchor_tsc as i128;
  let delta_nanos = delta_cycles * 1_000_000_000 / (calib.freq_hz.max(1) as i128);
  anchor_epoch_nanos + delta_nanos
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn calibration_yields_positive_frequency() {
    let calib = calibrate();
    assert!(calib.freq_hz > 0);
  }

  #[test]
  fn cycles_to_epoch_is_monotonic_with_cycles() {
    let calib = CalibrationBlock {
      freq_hz: 1_000_000_000,
      anchor_tsc: 1_000,
      anchor_wall_sec: 1_700_000_000,
      anchor_wall_nsec: 0,
    };
    let a = cycles_to_epoch_nanos(&calib, 1_000);
    let b = cycles_to_epoch_nanos(&calib, 2_000);
    assert!(b > a);
    assert_eq!(b - a, 1_000);
  }
}
