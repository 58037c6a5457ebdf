//! Writer loop: the single background task that drains every staging
//! buffer, compresses payloads, and feeds the binary writer.
//!
//! A dedicated thread owns its own state end to end: `chrono`-timed periodic
//! work for flush/rotation triggers, a `crossbeam-channel` control path for
//! shutdown, and a round-robin scan of N append-only staging buffers each
//! pass rather than a single channel of events.

use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::binary_writer::BinaryWriter;
use crate::buffer_registry::BufferRegistry;
use crate::compressor;
use crate::config::{FacadeConfig, RotationPolicy};
use crate::diag;
use crate::format::{CustomLevelRecord, EntryHeader};
use crate::packer;
use crate::registry::Registry;
use crate::stats::Stats;

/// Idle-pass sleep.
const IDLE_SLEEP: Duration = Duration::from_micros(100);
/// Bounded reads per buffer per pass: large enough that a
/// busy buffer drains quickly, small enough that a quiet buffer never starves.
const MAX_FRAMES_PER_BUFFER_PER_PASS: usize = 4096;

enum ControlMessage {
  SetAffinity(usize),
  Shutdown,
}

/// Handle the façade keeps to the running writer thread.
pub struct WriterThread {
  join: Option<JoinHandle<()>>,
  control_tx: Sender<ControlMessage>,
}

impl WriterThread {
  /// Spawns the writer thread. Mirrors 's Init-failure category: thread
  /// spawn failure is returned to the caller rather than dropped.
  pub fn spawn(
    registry: Arc<Registry>,
    buffers: Arc<BufferRegistry>,
    stats: Arc<Stats>,
    custom_levels: Vec<CustomLevelRecord>,
    writer: BinaryWriter,
    config: FacadeConfig,
  ) -> io::Result<WriterThread> {
    let (control_tx, control_rx) = crossbeam_channel::unbounded();

    let join = thread::Builder::new().name("cnanolog-writer".to_string()).spawn(move || {
      run(registry, buffers, stats, custom_levels, writer, config, control_rx);
    })?;

    Ok(WriterThread { join: Some(join), control_tx })
  }

  /// `set_writer_affinity(core)`: asynchronous, applied by the writer
  /// thread itself on its next control-message drain.
  pub fn set_affinity(&self, core: usize) {
    let _ = self.control_tx.send(ControlMessage::SetAffinity(core));
  }

  /// Requests the cooperative `should_exit` transition and joins the thread
  ///.
  pub fn shutdown(mut self) {
    let _ = self.control_tx.send(ControlMessage::Shutdown);
    if let Some(handle) = self.join.take() {
      let _ = handle.join();
    }
  }
}

impl Drop for WriterThread {
  fn drop(&mut self) {
    if self.join.is_some() {
      let _ = self.control_tx.send(ControlMessage::Shutdown);
      if let Some(handle) = self.join.take() {
        let _ = handle.join();
      }
    }
  }
}

fn run(
  registry: Arc<Registry>,
  buffers: Arc<BufferRegistry>,
  stats: Arc<Stats>,
  custom_levels: Vec<CustomLevelRecord>,
  mut writer: BinaryWriter,
  config: FacadeConfig,
  control_rx: Receiver<ControlMessage>,
) {
  let mut last_idx: usize = 0;
  let mut entries_since_flush: u32 = 0;
  let mut last_flush = Instant::now();
  let mut rotation_date =
    if config.rotation == RotationPolicy::Daily { Some(chrono::Local::now().date_naive()) } else { None };
  let mut compress_buf: Vec<u8> = Vec::new();
  let mut draining = false;

  loop {
    while let Ok(msg) = control_rx.try_recv() {
      match msg {
        ControlMessage::SetAffinity(core) => apply_affinity(core),
        ControlMessage::Shutdown => draining = true,
      }
    }

    let no_work = scan_pass(&registry, &buffers, &stats, &mut writer, &mut last_idx, &mut entries_since_flush, &mut compress_buf);

    maybe_flush(&mut writer, &config, &mut entries_since_flush, &mut last_flush, no_work);
    writer = maybe_rotate(writer, &registry, &custom_levels, &config, &mut rotation_date);

    stats.record_wakeup();
    stats.set_active_buffers(buffers.active_count());

    if draining {
      // : one last full scan with no sleep, looping until a pass finds
      // nothing left, then STOPPED.
      loop {
        let no_work = scan_pass(
          &registry,
          &buffers,
          &stats,
          &mut writer,
          &mut last_idx,
          &mut entries_since_flush,
          &mut compress_buf,
        );
        if entries_since_flush > 0 {
          writer.flush();
          entries_since_flush = 0;
        }
        if no_work {
          break;
        }
      }
      break;
    }

    if no_work {
      thread::sleep(IDLE_SLEEP);
    }
  }

  writer.flush();
  let sites = registry.snapshot();
  if let Err(err) = writer.close(&sites, &custom_levels) {
    diag::writer_io_error("close", &err);
  }
}

fn apply_affinity(core: usize) {
  match core_affinity::get_core_ids().and_then(|ids| ids.into_iter().find(|c| c.id == core)) {
    Some(id) => {
      let _ = core_affinity::set_for_current(id);
    },
    None => diag::shutdown_warning(&format!("set_writer_affinity: core {core} not found, ignoring")),
  }
}

fn maybe_flush(
  writer: &mut BinaryWriter,
  config: &FacadeConfig,
  entries_since_flush: &mut u32,
  last_flush: &mut Instant,
  no_work: bool,
) {
  let elapsed = last_flush.elapsed();
  let batch_ready = *entries_since_flush >= config.flush_batch_size;
  let interval_elapsed = elapsed >= config.flush_interval;
  let drain_idle = *entries_since_flush > 0 && no_work;

  if batch_ready || interval_elapsed || drain_idle {
    writer.flush();
    *entries_since_flush = 0;
    *last_flush = Instant::now();
  }
}

fn maybe_rotate(
  writer: BinaryWriter,
  registry: &Registry,
  custom_levels: &[CustomLevelRecord],
  config: &FacadeConfig,
  rotation_date: &mut Option<chrono::NaiveDate>,
) -> BinaryWriter {
  if config.rotation != RotationPolicy::Daily {
    return writer;
  }
  let today = chrono::Local::now().date_naive();
  if *rotation_date == Some(today) {
    return writer;
  }

  let sites = registry.snapshot();
  let new_path = rotated_path(&config.base_path, today);
  match writer.rotate(&new_path, &sites, custom_levels) {
    Ok(new_writer) => {
      *rotation_date = Some(today);
      new_writer
    },
    Err((old_writer, err)) => {
      diag::writer_io_error("rotate", &err);
      old_writer
    },
  }
}

fn rotated_path(base: &std::path::Path, date: chrono::NaiveDate) -> std::path::PathBuf {
  let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("cnanolog");
  let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("cnl");
  let name = format!("{stem}.{}.{ext}", date.format("%Y-%m-%d"));
  match base.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
    _ => std::path::PathBuf::from(name),
  }
}

/// One bounded round-robin sweep across every published buffer.
/// Returns `true` if the pass produced no work at all, which callers use for
/// the idle-sleep and drain-idle-flush triggers.
fn scan_pass(
  registry: &Registry,
  buffers: &BufferRegistry,
  stats: &Stats,
  writer: &mut BinaryWriter,
  last_idx: &mut usize,
  entries_since_flush: &mut u32,
  compress_buf: &mut Vec<u8>,
) -> bool {
  let count = buffers.count();
  if count == 0 {
    return true;
  }

  let mut did_work = false;
  for offset in 0..count {
    let idx = (*last_idx + 1 + offset) % count;
    if drain_buffer(registry, buffers, stats, writer, idx, entries_since_flush, compress_buf) {
      did_work = true;
    }
  }
  *last_idx = (*last_idx + 1) % count;
  !did_work
}

/// Drains up to `MAX_FRAMES_PER_BUFFER_PER_PASS` complete frames from the
/// buffer at `idx`. Returns whether any frame (including a wrap marker) was
/// consumed.
fn drain_buffer(
  registry: &Registry,
  buffers: &BufferRegistry,
  stats: &Stats,
  writer: &mut BinaryWriter,
  idx: usize,
  entries_since_flush: &mut u32,
  compress_buf: &mut Vec<u8>,
) -> bool {
  let Some(buf) = buffers.get(idx) else { return false };
  let mut did_work = false;

  for _ in 0..MAX_FRAMES_PER_BUFFER_PER_PASS {
    let available = buf.available();
    if available < EntryHeader::WIRE_SIZE {
      break;
    }

    let header_bytes = buf.peek(EntryHeader::WIRE_SIZE).to_vec();
    let header = EntryHeader::read_from(&header_bytes);

    if header.is_wrap_marker() {
      buf.consume(EntryHeader::WIRE_SIZE);
      buf.wrap_read_pos();
      did_work = true;
      continue;
    }

    let frame_len = EntryHeader::WIRE_SIZE + header.data_length as usize;
    if available < frame_len {
      // Frame not fully committed yet.
      break;
    }

    let frame = buf.peek(frame_len).to_vec();
    let payload = &frame[EntryHeader::WIRE_SIZE..];

    if let Some(site) = registry.get(header.log_id) {
      if site.num_args() > 0 {
        let args = packer::unpack(&site.arg_types, payload);
        compressor::compress(&site, &args, compress_buf);
        let in_len = payload.len() as u64;
        let out_len = compress_buf.len() as u64;
        if writer.write_entry(header.log_id, header.timestamp, compress_buf.as_slice()) {
          stats.record_entry_written(EntryHeader::WIRE_SIZE as u64 + out_len, in_len, out_len);
        }
      } else if writer.write_entry(header.log_id, header.timestamp, &[]) {
        stats.record_entry_written(EntryHeader::WIRE_SIZE as u64, 0, 0);
      }
    }

    buf.consume(frame_len);
    *entries_since_flush += 1;
    did_work = true;
  }

  did_work
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rotated_path_inserts_date_before_extension() {
    let base = std::path::PathBuf::from("/var/log/app.cnl");
    let date = chrono::NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
    assert_eq!(rotated_path(&base, date), std::path::PathBuf::from("/var/log/app.2026-07-27.cnl"));
  }
}
