//! Variable-byte integer compression with nibble metadata.
//!
//! Only the integer lanes (`INT32`/`INT64`/`UINT32`/`UINT64`/`POINTER`/`DOUBLE`)
//! get a nibble and a minimal-byte encoding; `STRING` passes through untouched.
//! Signed values are zig-zag encoded before minimization: small-magnitude
//! negative values (offsets, deltas, error codes) are the common case, and
//! zig-zag gives them the same minimal-byte-count benefit as small positive
//! values without needing to carry a sign-extension invariant through the
//! nibble format.

use crate::format::ArgType;
use crate::packer::ArgValue;
use crate::registry::LogSite;

/// `max_size(site, in_len) = ceil(K/2) + 8*K + string_bytes_bound`,
/// an upper bound a caller can use to size the compressor's output buffer.
pub fn max_size(site: &LogSite, in_len: usize) -> usize {
  let k = site.arg_types.iter().filter(|t| t.is_integer_lane()).count();
  (k + 1) / 2 + 8 * k + in_len
}

/// Zig-zag maps signed integers to unsigned ones so that small-magnitude values
/// of either sign end up with a small-magnitude unsigned encoding: `-1 -> 1`,
/// `1 -> 2`, `-2 -> 3`, and so on, instead of `-1`'s two's-complement bit pattern
/// needing all 8 bytes.
#[inline]
pub fn zigzag_encode_64(n: i64) -> u64 {
  ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn zigzag_decode_64(n: u64) -> i64 {
  ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[inline]
fn zigzag_encode_32(n: i32) -> u32 {
  ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
fn zigzag_decode_32(n: u32) -> i32 {
  ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Minimal byte count (1..8) needed to hold `v`, big-endian-width sense but
/// little-endian on the wire: the smallest `k` such that `v < 256^k`.
#[inline]
fn minimal_bytes(v: u64) -> usize {
  if v == 0 {
    return 1;
  }
  let used_bits = 64 - v.leading_zeros() as usize;
  (used_bits + 7) / 8
}

/// Compresses a packed payload. `site.arg_types` gives the per-argument
/// type vector in order; `args` are the pre-pack values (compression works
/// directly off `ArgValue` rather than re-parsing the packed bytes, since the
/// writer loop already has both in hand when it calls this).
pub fn compress(site: &LogSite, args: &[ArgValue], out: &mut Vec<u8>) {
  out.clear();

  let lanes: Vec<&ArgValue> = args.iter().filter(|a| a.arg_type() != ArgType::String).collect();
  let nibble_bytes = (lanes.len() + 1) / 2;
  out.resize(nibble_bytes, 0);

  let mut varint_bytes: Vec<u8> = Vec::new();
  for (i, arg) in lanes.iter().enumerate() {
    let bytes_used = match arg {
      ArgValue::Int32(v) => {
        let z = zigzag_encode_32(*v) as u64;
        write_minimal(&mut varint_bytes, z)
      }
      ArgValue::Uint32(v) => write_minimal(&mut varint_bytes, *v as u64),
      ArgValue::Int64(v) => {
        let z = zigzag_encode_64(*v);
        write_minimal(&mut varint_bytes, z)
      }
      ArgValue::Uint64(v) => write_minimal(&mut varint_bytes, *v),
      ArgValue::Pointer(v) => {
        varint_bytes.extend_from_slice(&v.to_le_bytes());
        8
      }
      ArgValue::Double(v) => {
        varint_bytes.extend_from_slice(&v.to_le_bytes());
        8
      }
      ArgValue::String(_) => unreachable!("string lanes filtered out above"),
    };

    let nibble = (bytes_used - 1) as u8 & 0x0F;
    let byte_idx = i / 2;
    if i % 2 == 0 {
      out[byte_idx] = (out[byte_idx] & 0xF0) | nibble;
    } else {
      out[byte_idx] = (out[byte_idx] & 0x0F) | (nibble << 4);
    }
  }

  out.extend_from_slice(&varint_bytes);

  for arg in args {
    if let ArgValue::String(s) = arg {
      let len = s.len() as u16;
      out.extend_from_slice(&len.to_le_bytes());
      out.extend_from_slice(s.as_bytes());
    }
  }
}

/// Writes the minimal little-endian byte prefix of `v` and returns the count.
fn write_minimal(dst: &mut Vec<u8>, v: u64) -> usize {
  let n = minimal_bytes(v);
  let bytes = v.to_le_bytes();
  dst.extend_from_slice(&bytes[..n]);
  n
}

/// Decompresses a payload produced by `compress`, given the site's type vector.
/// Used only by tests and by an offline decompressor, which lives outside
/// this crate; kept in-crate because the round-trip property is part of this
/// crate's test surface.
pub fn decompress(site: &LogSite, payload: &[u8]) -> Vec<ArgValue> {
  let lane_types: Vec<ArgType> =
    site.arg_types.iter().copied().filter(|t| t.is_integer_lane()).collect();
  let nibble_bytes = (lane_types.len() + 1) / 2;

  let mut cursor = nibble_bytes;
  let mut lane_values: Vec<ArgValue> = Vec::with_capacity(lane_types.len());

  for (i, ty) in lane_types.iter().enumerate() {
    let nibble_byte = payload[i / 2];
    let nibble = if i % 2 == 0 { nibble_byte & 0x0F } else { (nibble_byte >> 4) & 0x0F };
    let bytes_used = (nibble as usize) + 1;

    match ty {
      ArgType::Double => {
        let v = f64::from_le_bytes(payload[cursor..cursor + 8].try_into().unwrap());
        lane_values.push(ArgValue::Double(v));
        cursor += 8;
      }
      ArgType::Pointer => {
        let v = u64::from_le_bytes(payload[cursor..cursor + 8].try_into().unwrap());
        lane_values.push(ArgValue::Pointer(v));
        cursor += 8;
      }
      ArgType::Int32 => {
        let raw = read_minimal(&payload[cursor..cursor + bytes_used]);
        lane_values.push(ArgValue::Int32(zigzag_decode_32(raw as u32)));
        cursor += bytes_used;
      }
      ArgType::Uint32 => {
        let raw = read_minimal(&payload[cursor..cursor + bytes_used]);
        lane_values.push(ArgValue::Uint32(raw as u32));
        cursor += bytes_used;
      }
      ArgType::Int64 => {
        let raw = read_minimal(&payload[cursor..cursor + bytes_used]);
        lane_values.push(ArgValue::Int64(zigzag_decode_64(raw)));
        cursor += bytes_used;
      }
      ArgType::Uint64 => {
        let raw = read_minimal(&payload[cursor..cursor + bytes_used]);
        lane_values.push(ArgValue::Uint64(raw));
        cursor += bytes_used;
      }
      ArgType::String => unreachable!("string filtered out of lane_types"),
    }
  }

  // Re-interleave lane values with string values in original `arg_types` order.
  let mut lane_iter = lane_values.into_iter();
  let mut result = Vec::with_capacity(site.arg_types.len());
  for ty in &site.arg_types {
    if *ty == ArgType::String {
      let len = u16::from_le_bytes(payload[cursor..cursor + 2].try_into().unwrap()) as usize;
      cursor += 2;
      let s = String::from_utf8_lossy(&payload[cursor..cursor + len]).into_owned();
      cursor += len;
      result.push(ArgValue::String(s));
    } else {
      result.push(lane_iter.next().expect("lane_values matches non-string arg_types count"));
    }
  }

  result
}

fn read_minimal(bytes: &[u8]) -> u64 {
  let mut full = [0u8; 8];
  full[..bytes.len()].copy_from_slice(bytes);
  u64::from_le_bytes(full)
}
