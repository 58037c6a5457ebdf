//! Façade: process-wide state, `init`/`init_ex`/`shutdown`, and the hot
//! path entry point the `cnanolog-macros` layer calls.
//!
//! One owned handle wraps a spawned writer thread, with a `Default` that
//! matches documented defaults, gating a single global behind a well-defined
//! lifecycle. State is split across two separately-scoped globals instead of
//! a single `AtomicPtr`: a process-lifetime `GlobalState` (registry, buffer
//! registry, stats — these outlive any one `init`/`shutdown` cycle and are
//! never reset) and a `RUNNING` handle gating only the writer thread and open
//! file, which is exactly what `init`/`shutdown` create and tear down.
//!
//! Re-initializing after `shutdown` is intentionally unsupported: the
//! registry and buffer registry are process-lifetime singletons (mirroring
//! the source's C statics), so a second `init` would hand out `log_id`s that
//! collide with entries already believed final by anything holding the first
//! file's dictionary. One `init`/`shutdown` pair per process is the contract.

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::binary_writer::BinaryWriter;
use crate::buffer_registry::BufferRegistry;
use crate::config::{FacadeConfig, WireFormat};
use crate::error::InitError;
use crate::format::{ArgType, CustomLevelRecord, EntryHeader, MAX_CUSTOM_LEVELS};
use crate::packer::{self, ArgValue};
use crate::registry::{Registry, REGISTRY_FULL_SENTINEL};
use crate::staging::StagingBuffer;
use crate::stats::{Stats, StatsSnapshot};
use crate::timestamp::{self, CalibrationBlock};
use crate::writer::WriterThread;

/// Process-lifetime state: created lazily on first use (first registration,
/// first log, or first `init`), never torn down.
struct GlobalState {
  registry: Arc<Registry>,
  buffers: Arc<BufferRegistry>,
  stats: Arc<Stats>,
}

static GLOBAL: OnceLock<GlobalState> = OnceLock::new();
static STAGING_BUFFER_SIZE: AtomicUsize = AtomicUsize::new(crate::config::DEFAULT_STAGING_BUFFER_SIZE);
static MAX_BUFFERS: AtomicUsize = AtomicUsize::new(crate::buffer_registry::DEFAULT_MAX_BUFFERS);
static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(0);
static CUSTOM_LEVELS: Mutex<Vec<CustomLevelRecord>> = Mutex::new(Vec::new());

/// Creates the process-lifetime registry/buffer-registry/stats on first use.
/// `init_ex` stores `config.max_buffers`/`staging_buffer_size` into the atomics
/// above *before* calling this, so a program that logs nothing before `init`
/// gets its requested capacity; a program that registers a site or logs before
/// ever calling `init` locks these in at their defaults instead, since the
/// buffer-registry's fixed-capacity array can't be resized after the fact.
fn global() -> &'static GlobalState {
  GLOBAL.get_or_init(|| GlobalState {
    registry: Arc::new(Registry::new()),
    buffers: Arc::new(BufferRegistry::new(MAX_BUFFERS.load(Ordering::Relaxed))),
    stats: Arc::new(Stats::new()),
  })
}

/// Handle to the running writer thread; `None` before `init`/after `shutdown`.
struct RunningFacade {
  writer: WriterThread,
}

static RUNNING: Mutex<Option<RunningFacade>> = Mutex::new(None);

/// Deactivates (never frees — "Thread-local buffers") the calling
/// thread's staging buffer when the thread exits; the writer must still
/// drain whatever was committed before the thread went away.
struct ThreadBufferHandle(Option<usize>);

impl Drop for ThreadBufferHandle {
  fn drop(&mut self) {
    if let (Some(idx), Some(state)) = (self.0, GLOBAL.get()) {
      if let Some(buf) = state.buffers.get(idx) {
        buf.deactivate();
      }
    }
  }
}

thread_local! {
  static THREAD_BUFFER: RefCell<ThreadBufferHandle> = RefCell::new(ThreadBufferHandle(None));
}

/// Returns this thread's staging-buffer slot, allocating it on first use
/// ("Suspension points": the only hot-path stall besides first-site
/// registration; `preallocate()` removes it by calling this eagerly).
fn thread_buffer_index() -> Option<usize> {
  THREAD_BUFFER.with(|cell| {
    let mut handle = cell.borrow_mut();
    if let Some(idx) = handle.0 {
      return Some(idx);
    }

    let size = STAGING_BUFFER_SIZE.load(Ordering::Relaxed);
    let thread_id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    let buffer = StagingBuffer::new(size, thread_id);
    let idx = global().buffers.publish(buffer);
    handle.0 = idx;
    idx
  })
}

/// Registers a call site, for use by the `cnanolog-macros` expansion's
/// once-per-site cache. Safe to call before `init` — the registry is
/// process-lifetime, independent of the writer's running/stopped state.
pub fn register(level: u8, file: &str, line: u32, format: &str, arg_types: &[ArgType]) -> u32 {
  global().registry.register(level, file, line, format, arg_types)
}

/// Static level check: the
/// one permitted dynamic filter, a plain numeric comparison against a
/// process-wide threshold, checked before the macro layer evaluates its
/// argument expressions at all.
#[inline]
pub fn is_enabled(level: u8) -> bool {
  level >= MIN_LEVEL.load(Ordering::Relaxed)
}

pub fn set_level(level: u8) {
  MIN_LEVEL.store(level, Ordering::Relaxed);
}

/// `pack_and_commit(log_id, args)`: the hot
/// path every `log_*!` expansion funnels into after its static level check.
/// Reserves a pessimistically-sized frame, packs `args` into it, and
/// commits — or drops and counts, per at any failure point. Never
/// allocates except for the one-time staging-buffer creation this thread may
/// still owe (`thread_buffer_index`).
pub fn pack_and_commit(log_id: u32, args: &[ArgValue]) {
  let g = global();

  if log_id == REGISTRY_FULL_SENTINEL {
    g.stats.record_drop();
    return;
  }

  let Some(idx) = thread_buffer_index() else {
    g.stats.record_drop();
    return;
  };
  let Some(buf) = g.buffers.get(idx) else {
    g.stats.record_drop();
    return;
  };

  let payload_cap = packer::max_packed_size(args);
  let total = EntryHeader::WIRE_SIZE + payload_cap;
  let Some(slot) = buf.reserve(total) else {
    g.stats.record_drop();
    return;
  };

  let (header_slot, payload_slot) = slot.split_at_mut(EntryHeader::WIRE_SIZE);
  let packed_len = packer::pack(payload_slot, args);
  if packed_len == 0 && !args.is_empty() {
    buf.adjust_reservation(total, 0);
    g.stats.record_drop();
    return;
  }

  let timestamp = timestamp::read_cycles();
  let header = EntryHeader { log_id, timestamp, data_length: packed_len as u16 };
  header.write_to(header_slot);

  let actual_total = EntryHeader::WIRE_SIZE + packed_len;
  if actual_total != total {
    buf.adjust_reservation(total, actual_total);
  }
  buf.commit(actual_total);
}

/// `init(path)`: shorthand for `init_ex` with every other knob at its
/// default.
pub fn init(path: impl AsRef<Path>) -> Result<(), InitError> {
  init_ex(FacadeConfig::new(path))
}

/// `init_ex(config)`: calibrates the clock, opens the binary
/// writer, and spawns the writer thread. Fails (without touching global
/// state) if the process is already initialized, the config requests the
/// unimplemented text format, the file can't be opened, or the thread can't
/// be spawned.
pub fn init_ex(config: FacadeConfig) -> Result<(), InitError> {
  if config.format == WireFormat::Text {
    return Err(InitError::InvalidConfig("text output format is out of scope".to_string()));
  }

  let mut running = RUNNING.lock().unwrap();
  if running.is_some() {
    return Err(InitError::AlreadyInitialized);
  }

  STAGING_BUFFER_SIZE.store(config.staging_buffer_size, Ordering::Relaxed);
  MAX_BUFFERS.store(config.max_buffers as usize, Ordering::Relaxed);

  let calib: CalibrationBlock = timestamp::calibrate();
  let writer = BinaryWriter::create(&config.base_path, calib)?;

  let g = global();
  let custom_levels = CUSTOM_LEVELS.lock().unwrap().clone();

  let writer_thread = WriterThread::spawn(
    Arc::clone(&g.registry),
    Arc::clone(&g.buffers),
    Arc::clone(&g.stats),
    custom_levels,
    writer,
    config.clone(),
  )
  .map_err(|_| InitError::WriterThreadSpawn)?;

  if let Some(core) = config.writer_affinity {
    writer_thread.set_affinity(core);
  }

  *running = Some(RunningFacade { writer: writer_thread });
  Ok(())
}

/// `shutdown()`: cooperative stop. Joining the writer thread
/// already drives it through its own DRAINING -> STOPPED transition — a
/// final full scan of every buffer (including following any pending wrap
/// marker) and a `close()` that writes the dictionary trailer — so by the
/// time `shutdown` regains control there is nothing left to flush; it only
/// has to retire the now-empty staging buffers.
pub fn shutdown() -> Result<(), InitError> {
  let mut running = RUNNING.lock().unwrap();
  let Some(state) = running.take() else {
    return Err(InitError::NotInitialized);
  };
  drop(running);

  state.writer.shutdown();
  global().buffers.destroy_all();
  Ok(())
}

/// `preallocate()`: eagerly creates the calling thread's staging
/// buffer, removing the one first-use allocation stall still on the hot path
/// once a site is already registered.
pub fn preallocate() {
  let _ = thread_buffer_index();
}

pub fn get_stats() -> StatsSnapshot {
  global().stats.snapshot()
}

pub fn reset_stats() {
  global().stats.reset();
}

/// `set_writer_affinity(core)`: validated against the host's actual
/// core ids before being forwarded to the writer thread, so an invalid id is
/// a Misuse-category failure rather than a silently-ignored request.
pub fn set_writer_affinity(core: usize) -> Result<(), InitError> {
  let valid = core_affinity::get_core_ids().map(|ids| ids.iter().any(|c| c.id == core)).unwrap_or(false);
  if !valid {
    return Err(InitError::InvalidCore(core));
  }

  let running = RUNNING.lock().unwrap();
  match running.as_ref() {
    Some(state) => {
      state.writer.set_affinity(core);
      Ok(())
    },
    None => Err(InitError::NotInitialized),
  }
}

/// `register_level(name, value)`: pre-init only, `value >= 4`,
/// duplicate values rejected, capped at `MAX_CUSTOM_LEVELS`.
pub fn register_level(name: impl Into<String>, value: u8) -> Result<(), InitError> {
  if value < 4 {
    return Err(InitError::LevelValueTaken(value));
  }

  {
    let running = RUNNING.lock().unwrap();
    if running.is_some() {
      return Err(InitError::RegisterLevelAfterInit);
    }
  }

  let mut levels = CUSTOM_LEVELS.lock().unwrap();
  if levels.iter().any(|lvl| lvl.value == value) {
    return Err(InitError::LevelValueTaken(value));
  }
  if levels.len() >= MAX_CUSTOM_LEVELS {
    return Err(InitError::InvalidConfig("custom level table is full".to_string()));
  }

  levels.push(CustomLevelRecord { value, name: name.into() });
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  // These tests exercise `register`/`pack_and_commit`/stats directly against
  // the process-lifetime globals, without going through `init`/`shutdown`
  // (each process can only run that lifecycle once — see the module note —
  // so the full init-to-shutdown path is covered by `cnanolog`'s top-level
  // integration test instead, which is the sole owner of that one `init`
  // call for the whole test binary).

  #[test]
  fn is_enabled_defaults_to_allow_everything() {
    assert!(is_enabled(0));
    assert!(is_enabled(255));
  }

  #[test]
  fn register_level_rejects_reserved_values() {
    for v in 0..4u8 {
      assert!(register_level("custom", v).is_err());
    }
  }

  #[test]
  fn pack_and_commit_drops_on_registry_full_sentinel() {
    // `dropped_logs` is a process-wide counter shared with every other test
    // in this binary running concurrently, so only a monotonic `>=` bound is
    // safe to assert here — an exact `before + 1` would be flaky under
    // `cargo test`'s default parallelism.
    let before = get_stats().dropped_logs;
    pack_and_commit(REGISTRY_FULL_SENTINEL, &[]);
    assert!(get_stats().dropped_logs >= before + 1);
  }

  #[test]
  fn pack_and_commit_round_trips_through_this_threads_buffer() {
    let log_id = register(0, "facade_test.rs", 1, "n=%d", &[ArgType::Int32]);
    pack_and_commit(log_id, &[ArgValue::Int32(7)]);

    let idx = thread_buffer_index().unwrap();
    let buf = global().buffers.get(idx).unwrap();
    assert!(buf.available() >= EntryHeader::WIRE_SIZE);
  }
}
