//! Binary writer: the buffered, single-threaded file sink owned by the
//! writer loop. Every field is hand-framed with `write_all(&x.to_le_bytes())`
//! rather than routed through a `serde::Serialize` impl, since the wire
//! format is a fixed byte layout, not a serialized Rust type.
//!
//! No `Mutex` here: a `BinaryWriter` has exactly one owner, the writer loop,
//! so there's no concurrent access to guard against.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::diag;
use crate::format::{
  CustomLevelRecord, DictionaryHeader, EntryHeader, FileHeader, SiteRecordHeader, CNANOLOG_MAGIC,
  DICT_MAGIC, MAX_ARGS, MAX_ENTRY_PAYLOAD, VERSION_MAJOR, VERSION_MINOR,
};
use crate::registry::LogSite;
use crate::timestamp::CalibrationBlock;

/// Size of the internal write-combining buffer before an implicit flush.
pub const DEFAULT_WRITE_BUF: usize = 64 * 1024;

/// Byte offset of `dictionary_offset` within `FileHeader`'s wire layout —
/// `magic + version_major + version_minor + timestamp_frequency +
/// start_timestamp + start_time_sec + start_time_nsec + endianness`.
const DICTIONARY_OFFSET_FIELD_OFFSET: u64 = 4 + 2 + 2 + 8 + 8 + 8 + 4 + 4;

pub struct BinaryWriter {
  file: File,
  path: PathBuf,
  buffer: Vec<u8>,
  write_buf_cap: usize,
  entries_written: u64,
  bytes_written: u64,
  calib: CalibrationBlock,
  /// Set once an unrecoverable I/O error occurs: subsequent writes and
  /// flushes become silent no-ops rather than risk writing into a file whose
  /// position we can no longer trust.
  fatal: bool,
}

impl BinaryWriter {
  /// `create(path)`: opens for read/write, truncating, and writes the
  /// fixed header immediately with placeholder `dictionary_offset`/`entry_count`.
  pub fn create(path: impl AsRef<Path>, calib: CalibrationBlock) -> io::Result<BinaryWriter> {
    Self::create_with_buf(path, calib, DEFAULT_WRITE_BUF)
  }

  pub fn create_with_buf(
    path: impl AsRef<Path>,
    calib: CalibrationBlock,
    write_buf_cap: usize,
  ) -> io::Result<BinaryWriter> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let file = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&path)?;

    let mut writer = BinaryWriter {
      file,
      path,
      buffer: Vec::with_capacity(write_buf_cap),
      write_buf_cap,
      entries_written: 0,
      bytes_written: 0,
      calib,
      fatal: false,
    };
    writer.write_header()?;
    Ok(writer)
  }

  fn header(&self) -> FileHeader {
    FileHeader {
      magic: CNANOLOG_MAGIC,
      version_major: VERSION_MAJOR,
      version_minor: VERSION_MINOR,
      timestamp_frequency: self.calib.freq_hz,
      start_timestamp: self.calib.anchor_tsc,
      start_time_sec: self.calib.anchor_wall_sec,
      start_time_nsec: self.calib.anchor_wall_nsec,
      endianness: CNANOLOG_MAGIC,
      dictionary_offset: 0,
      entry_count: 0,
    }
  }

  fn write_header(&mut self) -> io::Result<()> {
    let mut buf = [0u8; FileHeader::WIRE_SIZE];
    self.header().write_to(&mut buf);
    self.file.write_all(&buf)?;
    self.file.flush()?;
    self.bytes_written += buf.len() as u64;
    Ok(())
  }

  /// `write_entry(log_id, ts, payload)`: buffers an `EntryHeader` plus
  /// `payload`, flushing first if appending would overflow the write buffer.
  /// Fails per if `payload.len() > MAX_ENTRY_PAYLOAD`; any I/O failure is
  /// reported via `diag` and marks the writer fatal, never propagated to
  /// the writer loop as something worth stopping over.
  pub fn write_entry(&mut self, log_id: u32, timestamp: u64, payload: &[u8]) -> bool {
    if self.fatal {
      return false;
    }
    if payload.len() > MAX_ENTRY_PAYLOAD {
      diag::writer_io_error(
        "write_entry",
        &io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds MAX_ENTRY_PAYLOAD"),
      );
      return false;
    }

    let total = EntryHeader::WIRE_SIZE + payload.len();
    if self.buffer.len() + total > self.write_buf_cap && !self.buffer.is_empty() {
      if !self.flush() {
        return false;
      }
    }

    let header = EntryHeader { log_id, timestamp, data_length: payload.len() as u16 };
    let mut header_bytes = [0u8; EntryHeader::WIRE_SIZE];
    header.write_to(&mut header_bytes);
    self.buffer.extend_from_slice(&header_bytes);
    self.buffer.extend_from_slice(payload);
    self.entries_written += 1;
    true
  }

  /// `flush()`: writes the buffered bytes and calls the OS-level flush.
  /// Returns `false` (and marks the writer fatal) on I/O failure.
  pub fn flush(&mut self) -> bool {
    if self.fatal {
      return false;
    }
    if self.buffer.is_empty() {
      return true;
    }
    match self.file.write_all(&self.buffer).and_then(|_| self.file.flush()) {
      Ok(()) => {
        self.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        true
      },
      Err(err) => {
        diag::writer_io_error("flush", &err);
        diag::writer_fatal("flush");
        self.fatal = true;
        false
      },
    }
  }

  pub fn entries_written(&self) -> u64 {
    self.entries_written
  }

  pub fn bytes_written(&self) -> u64 {
    self.bytes_written
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn calibration(&self) -> CalibrationBlock {
    self.calib
  }

  /// `close(sites, custom_levels)`: flushes pending entries, writes the
  /// dictionary trailer, then patches `dictionary_offset`/`entry_count` back
  /// into the header at offset 0.
  pub fn close(mut self, sites: &[LogSite], custom_levels: &[CustomLevelRecord]) -> io::Result<()> {
    self.close_mut(sites, custom_levels)
  }

  fn close_mut(&mut self, sites: &[LogSite], custom_levels: &[CustomLevelRecord]) -> io::Result<()> {
    if !self.flush() {
      return Err(io::Error::new(io::ErrorKind::Other, "writer is in a fatal state"));
    }

    let dict_offset = self.file.stream_position()?;
    self.write_dictionary(sites, custom_levels)?;
    if !self.flush() {
      return Err(io::Error::new(io::ErrorKind::Other, "writer is in a fatal state"));
    }

    self.patch_header(dict_offset, self.entries_written)?;
    Ok(())
  }

  fn write_dictionary(&mut self, sites: &[LogSite], custom_levels: &[CustomLevelRecord]) -> io::Result<()> {
    let mut body = Vec::new();
    for site in sites {
      let mut arg_types = [0u8; MAX_ARGS];
      for (i, t) in site.arg_types.iter().enumerate() {
        arg_types[i] = *t as u8;
      }
      let rec = SiteRecordHeader {
        log_id: site.log_id,
        log_level: site.level,
        num_args: site.num_args(),
        filename_length: site.file.len() as u16,
        format_length: site.format.len() as u16,
        line_number: site.line,
        arg_types,
      };
      let mut rec_buf = [0u8; SiteRecordHeader::WIRE_SIZE];
      rec.write_to(&mut rec_buf);
      body.extend_from_slice(&rec_buf);
      body.extend_from_slice(site.file.as_bytes());
      body.extend_from_slice(site.format.as_bytes());
    }

    body.extend_from_slice(&(custom_levels.len() as u32).to_le_bytes());
    for lvl in custom_levels {
      body.push(lvl.value);
      body.push(lvl.name.len().min(u8::MAX as usize) as u8);
      body.extend_from_slice(&lvl.name.as_bytes()[..lvl.name.len().min(u8::MAX as usize)]);
    }

    let total_size = (DictionaryHeader::WIRE_SIZE + body.len()) as u32;
    let dict_header = DictionaryHeader {
      dict_magic: DICT_MAGIC,
      num_entries: sites.len() as u32,
      total_size,
      reserved: 0,
    };
    let mut header_buf = [0u8; DictionaryHeader::WIRE_SIZE];
    dict_header.write_to(&mut header_buf);

    self.file.write_all(&header_buf)?;
    self.file.write_all(&body)?;
    self.bytes_written += (header_buf.len() + body.len()) as u64;
    Ok(())
  }

  fn patch_header(&mut self, dict_offset: u64, entry_count: u64) -> io::Result<()> {
    self.file.seek(SeekFrom::Start(DICTIONARY_OFFSET_FIELD_OFFSET))?;
    let mut patch = [0u8; 16];
    patch[0..8].copy_from_slice(&dict_offset.to_le_bytes());
    patch[8..16].copy_from_slice(&entry_count.to_le_bytes());
    self.file.write_all(&patch)?;
    self.file.flush()
  }

  /// `rotate(new_path, sites, levels)`:
  /// opens `new_path` with a fresh header carrying the same calibration
  /// before touching the old file, so a failure to open the new file leaves
  /// the caller holding a still-usable old writer (returned in the `Err`
  /// side) instead of one already half torn down. Only once the new file
  /// exists does this close the old one (dictionary included); a failure
  /// closing the old file is reported via `diag` but does not block the
  /// switch to the new writer: the writer keeps running wherever possible
  /// rather than halting on a close failure for a file already superseded.
  pub fn rotate(
    self,
    new_path: impl AsRef<Path>,
    sites: &[LogSite],
    custom_levels: &[CustomLevelRecord],
  ) -> Result<BinaryWriter, (BinaryWriter, io::Error)> {
    let calib = self.calib;
    let write_buf_cap = self.write_buf_cap;

    match BinaryWriter::create_with_buf(new_path, calib, write_buf_cap) {
      Ok(new_writer) => {
        if let Err(err) = self.close(sites, custom_levels) {
          diag::writer_io_error("rotate: closing previous file", &err);
        }
        Ok(new_writer)
      },
      Err(err) => Err((self, err)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::format::ArgType;
  use smallvec::smallvec;

  fn calib() -> CalibrationBlock {
    CalibrationBlock { freq_hz: 2_400_000_000, anchor_tsc: 1000, anchor_wall_sec: 1_700_000_000, anchor_wall_nsec: 0 }
  }

  fn site(log_id: u32, file: &str, line: u32, format: &str, arg_types: &[ArgType]) -> LogSite {
    LogSite {
      log_id,
      level: 0,
      file: file.to_string(),
      line,
      format: format.to_string(),
      arg_types: smallvec::SmallVec::from_slice(arg_types),
    }
  }

  #[test]
  fn single_thread_three_entries_round_trip_the_full_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("three_entries.cnl");
    let writer = BinaryWriter::create(&path, calib()).unwrap();

    let mut writer = writer;
    let s = site(0, "f.c", 10, "x=%d", &[ArgType::Int32]);
    for v in [1i32, 2, 3] {
      assert!(writer.write_entry(0, 1, &v.to_le_bytes()));
    }
    writer.close(&[s], &[]).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let header = FileHeader::read_from(&bytes[..FileHeader::WIRE_SIZE]);
    assert_eq!(header.entry_count, 3);
    assert!(header.dictionary_offset > 0);

    let dict_off = header.dictionary_offset as usize;
    let dict_header = DictionaryHeader::read_from(&bytes[dict_off..dict_off + DictionaryHeader::WIRE_SIZE]);
    assert_eq!(dict_header.dict_magic, DICT_MAGIC);
    assert_eq!(dict_header.num_entries, 1);

    let rec_off = dict_off + DictionaryHeader::WIRE_SIZE;
    let rec = SiteRecordHeader::read_from(&bytes[rec_off..rec_off + SiteRecordHeader::WIRE_SIZE]);
    assert_eq!(rec.log_id, 0);
    assert_eq!(rec.num_args, 1);
    assert_eq!(rec.arg_types[0], ArgType::Int32 as u8);

    let name_off = rec_off + SiteRecordHeader::WIRE_SIZE;
    assert_eq!(&bytes[name_off..name_off + 3], b"f.c");
    assert_eq!(&bytes[name_off + 3..name_off + 3 + 4], b"x=%d");

    // Three entries directly follow the fixed header.
    let mut cursor = FileHeader::WIRE_SIZE;
    for expected in [1i32, 2, 3] {
      let header = EntryHeader::read_from(&bytes[cursor..cursor + EntryHeader::WIRE_SIZE]);
      assert_eq!(header.log_id, 0);
      cursor += EntryHeader::WIRE_SIZE;
      let payload = i32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
      assert_eq!(payload, expected);
      cursor += header.data_length as usize;
    }
  }

  #[test]
  fn write_entry_rejects_oversize_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oversize.cnl");
    let mut writer = BinaryWriter::create(&path, calib()).unwrap();
    let huge = vec![0u8; MAX_ENTRY_PAYLOAD + 1];
    assert!(!writer.write_entry(0, 1, &huge));
  }

  #[test]
  fn rotate_produces_two_self_describing_files() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.cnl");
    let path_b = dir.path().join("b.cnl");

    let s = site(0, "f.c", 1, "hi", &[]);
    let mut writer = BinaryWriter::create(&path_a, calib()).unwrap();
    writer.write_entry(0, 1, &[]);
    let writer = writer.rotate(&path_b, &[s.clone()], &[]).map_err(|(_, e)| e).unwrap();
    writer.close(&[s], &[]).unwrap();

    for path in [&path_a, &path_b] {
      let bytes = std::fs::read(path).unwrap();
      let header = FileHeader::read_from(&bytes[..FileHeader::WIRE_SIZE]);
      assert!(header.dictionary_offset > 0);
      let dict_off = header.dictionary_offset as usize;
      let dict_header = DictionaryHeader::read_from(&bytes[dict_off..dict_off + DictionaryHeader::WIRE_SIZE]);
      assert_eq!(dict_header.num_entries, 1);
    }
  }
}
