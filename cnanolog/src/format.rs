//! Wire-format constants and the plain-old-data types shared between the staging
//! buffer, the compressor, and the on-disk binary layout.
//!
//! Every type in this module is a fixed-size, little-endian record. None of them
//! derive `serde`: the file format in `docs` (see the writer module) is hand-framed
//! byte-for-byte, the same way the on-disk records in a write-ahead log are framed
//! rather than handed to a general serializer.

use std::mem::size_of;

/// Magic number stamped at the start of every file, and reused (unmodified) as the
/// `endianness` field so a reader can detect a byte-swapped file by comparing the
/// two and failing loudly instead of silently misreading cycle counts.
pub const CNANOLOG_MAGIC: u32 = 0x434e_4c47; // "CNLG"
pub const DICT_MAGIC: u32 = 0x434e_4c44; // "CNLD"

pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

/// Sentinel `log_id` written in place of a real entry when the producer wraps the
/// ring back to offset 0. Never written to disk; the writer loop consumes and
/// discards it.
pub const WRAP_MARKER: u32 = 0xFFFF_FFFF;

/// Upper bound on the number of positional arguments a single call site may carry.
pub const MAX_ARGS: usize = 16;

/// Upper bound on a packed-or-compressed argument payload, header excluded.
pub const MAX_ENTRY_PAYLOAD: usize = 4096 - EntryHeader::WIRE_SIZE;

/// Upper bound on a single `STRING` argument before truncation.
pub const STRING_LIMIT: usize = u16::MAX as usize;

/// Default number of custom level slots reserved by `register_level`.
pub const MAX_CUSTOM_LEVELS: usize = 64;

/// Value type of one positional argument at a call site.
///
/// `FLOAT` is deliberately absent: the packer widens `f32` to `f64` before an
/// argument ever reaches this type, so only `DOUBLE` appears here or on disk.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
  Int32 = 0,
  Int64 = 1,
  Uint32 = 2,
  Uint64 = 3,
  Double = 4,
  String = 5,
  Pointer = 6,
}

impl ArgType {
  #[inline]
  pub fn from_u8(v: u8) -> Option<ArgType> {
    match v {
      0 => Some(ArgType::Int32),
      1 => Some(ArgType::Int64),
      2 => Some(ArgType::Uint32),
      3 => Some(ArgType::Uint64),
      4 => Some(ArgType::Double),
      5 => Some(ArgType::String),
      6 => Some(ArgType::Pointer),
      _ => None,
    }
  }

  /// `true` for the types the compressor treats as an integer lane (nibble + varint).
  #[inline]
  pub fn is_integer_lane(self) -> bool {
    !matches!(self, ArgType::String)
  }
}

/// Severity level. `0..=3` are built in; `4..255` are process-registered via
/// `register_level` and carried in the dictionary so the decompressor can print
/// a name instead of a bare number.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
  Info = 0,
  Warn = 1,
  Error = 2,
  Debug = 3,
}

impl LogLevel {
  #[inline]
  pub fn as_u8(self) -> u8 {
    self as u8
  }
}

/// Header prefixing every frame, both in the staging buffer and on disk.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
  pub log_id: u32,
  pub timestamp: u64,
  pub data_length: u16,
}

const _: () = {
  assert!(EntryHeader::WIRE_SIZE == 14);
};

impl EntryHeader {
  pub const WIRE_SIZE: usize = 4 + 8 + 2;

  #[inline]
  pub fn wrap_marker() -> EntryHeader {
    EntryHeader { log_id: WRAP_MARKER, timestamp: 0, data_length: 0 }
  }

  #[inline]
  pub fn is_wrap_marker(&self) -> bool {
    self.log_id == WRAP_MARKER
  }

  pub fn write_to(&self, out: &mut [u8]) {
    out[0..4].copy_from_slice(&self.log_id.to_le_bytes());
    out[4..12].copy_from_slice(&self.timestamp.to_le_bytes());
    out[12..14].copy_from_slice(&self.data_length.to_le_bytes());
  }

  pub fn read_from(buf: &[u8]) -> EntryHeader {
    let log_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let timestamp = u64::from_le_bytes(buf[4..12].try_into().unwrap());
    let data_length = u16::from_le_bytes(buf[12..14].try_into().unwrap());
    EntryHeader { log_id, timestamp, data_length }
  }
}

/// Fixed file header, patched in place once `dictionary_offset`/`entry_count` are
/// known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
  pub magic: u32,
  pub version_major: u16,
  pub version_minor: u16,
  pub timestamp_frequency: u64,
  pub start_timestamp: u64,
  pub start_time_sec: i64,
  pub start_time_nsec: i32,
  pub endianness: u32,
  pub dictionary_offset: u64,
  pub entry_count: u64,
}

impl FileHeader {
  pub const WIRE_SIZE: usize = 4 + 2 + 2 + 8 + 8 + 8 + 4 + 4 + 8 + 8;

  pub fn write_to(&self, out: &mut [u8]) {
    let mut o = 0usize;
    macro_rules! put {
      ($bytes:expr) => {{
        let b = $bytes;
        out[o..o + b.len()].copy_from_slice(&b);
        o += b.len();
      }};
    }
    put!(self.magic.to_le_bytes());
    put!(self.version_major.to_le_bytes());
    put!(self.version_minor.to_le_bytes());
    put!(self.timestamp_frequency.to_le_bytes());
    put!(self.start_timestamp.to_le_bytes());
    put!(self.start_time_sec.to_le_bytes());
    put!(self.start_time_nsec.to_le_bytes());
    put!(self.endianness.to_le_bytes());
    put!(self.dictionary_offset.to_le_bytes());
    put!(self.entry_count.to_le_bytes());
  }

  pub fn read_from(buf: &[u8]) -> FileHeader {
    let mut o = 0usize;
    macro_rules! take {
      ($ty:ty) => {{
        const N: usize = size_of::<$ty>();
        let v = <$ty>::from_le_bytes(buf[o..o + N].try_into().unwrap());
        o += N;
        v
      }};
    }
    FileHeader {
      magic: take!(u32),
      version_major: take!(u16),
      version_minor: take!(u16),
      timestamp_frequency: take!(u64),
      start_timestamp: take!(u64),
      start_time_sec: take!(i64),
      start_time_nsec: take!(i32),
      endianness: take!(u32),
      dictionary_offset: take!(u64),
      entry_count: take!(u64),
    }
  }
}

/// One fixed-size dictionary record per registered call site. Variable-length
/// `filename`/`format` bytes follow immediately after in the file and are not part
/// of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteRecordHeader {
  pub log_id: u32,
  pub log_level: u8,
  pub num_args: u8,
  pub filename_length: u16,
  pub format_length: u16,
  pub line_number: u32,
  pub arg_types: [u8; MAX_ARGS],
}

impl SiteRecordHeader {
  pub const WIRE_SIZE: usize = 4 + 1 + 1 + 2 + 2 + 4 + MAX_ARGS;

  pub fn write_to(&self, out: &mut [u8]) {
    out[0..4].copy_from_slice(&self.log_id.to_le_bytes());
    out[4] = self.log_level;
    out[5] = self.num_args;
    out[6..8].copy_from_slice(&self.filename_length.to_le_bytes());
    out[8..10].copy_from_slice(&self.format_length.to_le_bytes());
    out[10..14].copy_from_slice(&self.line_number.to_le_bytes());
    out[14..14 + MAX_ARGS].copy_from_slice(&self.arg_types);
  }

  pub fn read_from(buf: &[u8]) -> SiteRecordHeader {
    let mut arg_types = [0u8; MAX_ARGS];
    arg_types.copy_from_slice(&buf[14..14 + MAX_ARGS]);
    SiteRecordHeader {
      log_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
      log_level: buf[4],
      num_args: buf[5],
      filename_length: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
      format_length: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
      line_number: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
      arg_types,
    }
  }
}

/// One record per process-registered custom level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomLevelRecord {
  pub value: u8,
  pub name: String,
}

/// Fixed header prefixing the dictionary trailer: magic, record count,
/// and the total byte size of the trailer (records + this header), so a
/// reader can validate the file without walking variable-length records first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryHeader {
  pub dict_magic: u32,
  pub num_entries: u32,
  pub total_size: u32,
  pub reserved: u32,
}

impl DictionaryHeader {
  pub const WIRE_SIZE: usize = 4 + 4 + 4 + 4;

  pub fn write_to(&self, out: &mut [u8]) {
    out[0..4].copy_from_slice(&self.dict_magic.to_le_bytes());
    out[4..8].copy_from_slice(&self.num_entries.to_le_bytes());
    out[8..12].copy_from_slice(&self.total_size.to_le_bytes());
    out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
  }

  pub fn read_from(buf: &[u8]) -> DictionaryHeader {
    DictionaryHeader {
      dict_magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
      num_entries: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
      total_size: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
      reserved: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn entry_header_round_trips() {
    let h = EntryHeader { log_id: 7, timestamp: 123_456_789, data_length: 42 };
    let mut buf = [0u8; EntryHeader::WIRE_SIZE];
    h.write_to(&mut buf);
    assert_eq!(EntryHeader::read_from(&buf), h);
  }

  #[test]
  fn wrap_marker_is_recognized() {
    let h = EntryHeader::wrap_marker();
    assert!(h.is_wrap_marker());
    assert_eq!(h.data_length, 0);
  }

  #[test]
  fn file_header_round_trips() {
    let h = FileHeader {
      magic: CNANOLOG_MAGIC,
      version_major: VERSION_MAJOR,
      version_minor: VERSION_MINOR,
      timestamp_frequency: 2_400_000_000,
      start_timestamp: 999,
      start_time_sec: 1_700_000_000,
      start_time_nsec: 500,
      endianness: CNANOLOG_MAGIC,
      dictionary_offset: 0,
      entry_count: 0,
    };
    let mut buf = [0u8; FileHeader::WIRE_SIZE];
    h.write_to(&mut buf);
    assert_eq!(FileHeader::read_from(&buf), h);
  }

  #[test]
  fn dictionary_header_round_trips() {
    let h = DictionaryHeader { dict_magic: DICT_MAGIC, num_entries: 3, total_size: 120, reserved: 0 };
    let mut buf = [0u8; DictionaryHeader::WIRE_SIZE];
    h.write_to(&mut buf);
    assert_eq!(DictionaryHeader::read_from(&buf), h);
  }

  #[test]
  fn site_record_header_round_trips() {
    let mut arg_types = [0u8; MAX_ARGS];
    arg_types[0] = ArgType::Int32 as u8;
    let h = SiteRecordHeader {
      log_id: 3,
      log_level: LogLevel::Info as u8,
      num_args: 1,
      filename_length: 5,
      format_length: 6,
      line_number: 88,
      arg_types,
    };
    let mut buf = [0u8; SiteRecordHeader::WIRE_SIZE];
    h.write_to(&mut buf);
    assert_eq!(SiteRecordHeader::read_from(&buf), h);
  }
}
