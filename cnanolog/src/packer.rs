//! Argument packing: turns a typed argument list into the uncompressed
//! byte layout the compressor and the staging buffer agree on.
//!
//! `ArgValue` is the Rust stand-in for a C-variadic `va_list` plus type
//! vector: a closed sum type instead, so every call site's argument list is
//! representable without unsafe variadic plumbing.

use crate::format::{ArgType, STRING_LIMIT};

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
  Int32(i32),
  Int64(i64),
  Uint32(u32),
  Uint64(u64),
  /// `f32` arguments are widened to `f64` before ever becoming an `ArgValue`
  ///: there is no `Float` variant.
  Double(f64),
  String(String),
  Pointer(u64),
}

impl ArgValue {
  pub fn arg_type(&self) -> ArgType {
    match self {
      ArgValue::Int32(_) => ArgType::Int32,
      ArgValue::Int64(_) => ArgType::Int64,
      ArgValue::Uint32(_) => ArgType::Uint32,
      ArgValue::Uint64(_) => ArgType::Uint64,
      ArgValue::Double(_) => ArgType::Double,
      ArgValue::String(_) => ArgType::String,
      ArgValue::Pointer(_) => ArgType::Pointer,
    }
  }
}

/// Converts a Rust value into the `ArgValue` the macro layer (`cnanolog-macros`)
/// needs at each call site; the trait itself is the compile-time analogue of
/// the runtime type vector each log site carries.
pub trait IntoArgValue {
  fn into_arg_value(self) -> ArgValue;
}

macro_rules! impl_into_arg_value_int {
  ($ty:ty, $variant:ident) => {
    impl IntoArgValue for $ty {
      #[inline]
      fn into_arg_value(self) -> ArgValue {
        ArgValue::$variant(self as _)
      }
    }
  };
}

impl_into_arg_value_int!(i32, Int32);
impl_into_arg_value_int!(i64, Int64);
impl_into_arg_value_int!(u32, Uint32);
impl_into_arg_value_int!(u64, Uint64);

impl IntoArgValue for f32 {
  #[inline]
  fn into_arg_value(self) -> ArgValue {
    ArgValue::Double(self as f64)
  }
}

impl IntoArgValue for f64 {
  #[inline]
  fn into_arg_value(self) -> ArgValue {
    ArgValue::Double(self)
  }
}

impl IntoArgValue for &str {
  #[inline]
  fn into_arg_value(self) -> ArgValue {
    ArgValue::String(self.to_string())
  }
}

impl IntoArgValue for String {
  #[inline]
  fn into_arg_value(self) -> ArgValue {
    ArgValue::String(self)
  }
}

/// Packs `args` into `dst` in call-order, returning the number of bytes
/// written, or `0` if `dst` is too small (the caller must roll back its
/// reservation in that case — see `staging::StagingBuffer::adjust_reservation`).
pub fn pack(dst: &mut [u8], args: &[ArgValue]) -> usize {
  let mut offset = 0usize;

  for arg in args {
    let needed = packed_size(arg);
    if offset + needed > dst.len() {
      return 0;
    }

    match arg {
      ArgValue::Int32(v) => dst[offset..offset + 4].copy_from_slice(&v.to_le_bytes()),
      ArgValue::Uint32(v) => dst[offset..offset + 4].copy_from_slice(&v.to_le_bytes()),
      ArgValue::Int64(v) => dst[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
      ArgValue::Uint64(v) => dst[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
      ArgValue::Pointer(v) => dst[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
      ArgValue::Double(v) => dst[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
      ArgValue::String(s) => {
        let truncated = truncate_str_to_limit(s);
        let len = truncated.len() as u16;
        dst[offset..offset + 2].copy_from_slice(&len.to_le_bytes());
        dst[offset + 2..offset + 2 + truncated.len()].copy_from_slice(truncated.as_bytes());
      }
    }

    offset += needed;
  }

  offset
}

/// Bytes `arg` occupies in the uncompressed packed layout.
pub fn packed_size(arg: &ArgValue) -> usize {
  match arg {
    ArgValue::Int32(_) | ArgValue::Uint32(_) => 4,
    ArgValue::Int64(_) | ArgValue::Uint64(_) | ArgValue::Pointer(_) | ArgValue::Double(_) => 8,
    ArgValue::String(s) => 2 + truncate_str_to_limit(s).len(),
  }
}

/// Truncates `s` to at most `STRING_LIMIT` bytes, backing off to the
/// nearest preceding UTF-8 char boundary so the cut never splits a multi-byte
/// code point.
fn truncate_str_to_limit(s: &str) -> &str {
  if s.len() <= STRING_LIMIT {
    return s;
  }
  let mut end = STRING_LIMIT;
  while end > 0 && !s.is_char_boundary(end) {
    end -= 1;
  }
  &s[..end]
}

/// Upper bound on the packed size of `args`, used to size a staging-buffer
/// reservation pessimistically before the exact size is known.
pub fn max_packed_size(args: &[ArgValue]) -> usize {
  args.iter().map(packed_size).sum()
}

/// Inverse of `pack`: reconstructs the `ArgValue` list from a raw packed
/// payload given the site's `arg_types`, in order. The writer loop calls this
/// once per drained frame before handing the values to `compressor::compress`
/// — the staging buffer only ever carries the uncompressed
/// layout `pack` wrote, never `ArgValue`s themselves.
pub fn unpack(arg_types: &[ArgType], payload: &[u8]) -> Vec<ArgValue> {
  let mut offset = 0usize;
  let mut out = Vec::with_capacity(arg_types.len());

  for ty in arg_types {
    match ty {
      ArgType::Int32 => {
        let v = i32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        out.push(ArgValue::Int32(v));
        offset += 4;
      },
      ArgType::Uint32 => {
        let v = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        out.push(ArgValue::Uint32(v));
        offset += 4;
      },
      ArgType::Int64 => {
        let v = i64::from_le_bytes(payload[offset..offset + 8].try_into().unwrap());
        out.push(ArgValue::Int64(v));
        offset += 8;
      },
      ArgType::Uint64 => {
        let v = u64::from_le_bytes(payload[offset..offset + 8].try_into().unwrap());
        out.push(ArgValue::Uint64(v));
        offset += 8;
      },
      ArgType::Pointer => {
        let v = u64::from_le_bytes(payload[offset..offset + 8].try_into().unwrap());
        out.push(ArgValue::Pointer(v));
        offset += 8;
      },
      ArgType::Double => {
        let v = f64::from_le_bytes(payload[offset..offset + 8].try_into().unwrap());
        out.push(ArgValue::Double(v));
        offset += 8;
      },
      ArgType::String => {
        let len = u16::from_le_bytes(payload[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        let s = String::from_utf8_lossy(&payload[offset..offset + len]).into_owned();
        out.push(ArgValue::String(s));
        offset += len;
      },
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn packs_mixed_args_in_order() {
    let args = vec![
      ArgValue::Int32(42),
      ArgValue::String("hi".to_string()),
      ArgValue::Uint64(1),
    ];
    let mut buf = [0u8; 64];
    let n = pack(&mut buf, &args);
    assert_eq!(n, 4 + (2 + 2) + 8);
    assert_eq!(&buf[0..4], &42i32.to_le_bytes());
    assert_eq!(&buf[4..6], &2u16.to_le_bytes());
    assert_eq!(&buf[6..8], b"hi");
    assert_eq!(&buf[8..16], &1u64.to_le_bytes());
  }

  #[test]
  fn returns_zero_when_capacity_insufficient() {
    let args = vec![ArgValue::Int64(1)];
    let mut buf = [0u8; 4];
    assert_eq!(pack(&mut buf, &args), 0);
  }

  #[test]
  fn string_is_truncated_at_string_limit() {
    let long = "x".repeat(STRING_LIMIT + 10);
    let args = vec![ArgValue::String(long)];
    assert_eq!(packed_size(&args[0]), 2 + STRING_LIMIT);
  }

  #[test]
  fn string_truncation_never_splits_a_multibyte_char_and_never_panics() {
    // Every char is 2 bytes; STRING_LIMIT (65535) is odd, so a naive
    // `&s[..STRING_LIMIT]` always lands mid-character and panics.
    let long = "é".repeat((STRING_LIMIT / 2) + 10);
    assert!(long.len() > STRING_LIMIT);
    let mut buf = vec![0u8; STRING_LIMIT + 16];
    let args = vec![ArgValue::String(long)];
    let n = pack(&mut buf, &args);
    assert!(n > 0);
    assert_eq!(n, packed_size(&args[0]));
    // The packed length must itself sit on a char boundary: re-decoding the
    // string bytes as UTF-8 must not fail.
    let len = u16::from_le_bytes(buf[0..2].try_into().unwrap()) as usize;
    assert!(std::str::from_utf8(&buf[2..2 + len]).is_ok());
  }

  #[test]
  fn float_widens_to_double_on_conversion() {
    let v: ArgValue = 1.5f32.into_arg_value();
    assert_eq!(v.arg_type(), crate::format::ArgType::Double);
  }

  #[test]
  fn unpack_is_the_inverse_of_pack() {
    let args = vec![
      ArgValue::Int32(42),
      ArgValue::String("hi".to_string()),
      ArgValue::Uint64(1),
    ];
    let types: Vec<ArgType> = args.iter().map(|a| a.arg_type()).collect();
    let mut buf = [0u8; 64];
    let n = pack(&mut buf, &args);
    assert_eq!(unpack(&types, &buf[..n]), args);
  }
}
