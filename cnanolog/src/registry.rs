//! Log-site registry: deduplicates call sites and hands out dense,
//! monotonically increasing `log_id`s.
//!
//! The double-checked-locking shape (read lock probe, write lock on miss,
//! re-check after acquiring the write lock) and a custom FNV-1a hash solve the
//! "intern by content, return a stable small integer" problem, the same
//! problem a string interner solves for strings. Per-call-site caching is not
//! reproduced here: at a call site, caching the returned `log_id` is instead
//! the `cnanolog-macros` layer's job (a `static` cell written once), so the
//! registry itself only needs to be correct under concurrent *first* registration,
//! not fast on every call.

use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::format::{ArgType, MAX_ARGS};

pub const REGISTRY_FULL_SENTINEL: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSite {
  pub log_id: u32,
  pub level: u8,
  pub file: String,
  pub line: u32,
  pub format: String,
  pub arg_types: SmallVec<[ArgType; MAX_ARGS]>,
}

impl LogSite {
  pub fn num_args(&self) -> u8 {
    self.arg_types.len() as u8
  }
}

#[derive(Debug)]
pub struct Registry {
  sites: RwLock<Vec<LogSite>>,
  lookup: RwLock<HashMap<u64, u32>>,
}

impl Registry {
  pub fn new() -> Registry {
    Registry { sites: RwLock::new(Vec::new()), lookup: RwLock::new(HashMap::new()) }
  }

  /// `register(level, file, line, format, arg_types) -> log_id`, per 
  /// Returns `REGISTRY_FULL_SENTINEL` only if the dense id space is exhausted
  /// (`u32::MAX` sites already registered), which in practice never happens; the
  /// caller treats that as a Drop and increments `dropped_logs`.
  pub fn register(&self, level: u8, file: &str, line: u32, format: &str, arg_types: &[ArgType]) -> u32 {
    let key = Self::site_hash(level, file, line, format, arg_types);

    if let Ok(lookup) = self.lookup.read() {
      if let Some(&id) = lookup.get(&key) {
        return id;
      }
    }

    self.register_slow(key, level, file, line, format, arg_types)
  }

  #[cold]
  fn register_slow(&self, key: u64, level: u8, file: &str, line: u32, format: &str, arg_types: &[ArgType]) -> u32 {
    let mut lookup = self.lookup.write().unwrap();
    if let Some(&id) = lookup.get(&key) {
      return id;
    }

    let mut sites = self.sites.write().unwrap();
    let id = sites.len();
    if id >= REGISTRY_FULL_SENTINEL as usize {
      return REGISTRY_FULL_SENTINEL;
    }
    let log_id = id as u32;

    sites.push(LogSite {
      log_id,
      level,
      file: file.to_string(),
      line,
      format: format.to_string(),
      arg_types: SmallVec::from_slice(arg_types),
    });
    lookup.insert(key, log_id);
    log_id
  }

  /// O(1) lookup by id; `None` for `REGISTRY_FULL_SENTINEL` or any id never
  /// assigned.
  pub fn get(&self, log_id: u32) -> Option<LogSite> {
    if log_id == REGISTRY_FULL_SENTINEL {
      return None;
    }
    let sites = self.sites.read().unwrap();
    sites.get(log_id as usize).cloned()
  }

  pub fn count(&self) -> usize {
    self.sites.read().unwrap().len()
  }

  /// Snapshot of every registered site, in `log_id` order, for the dictionary
  /// trailer.
  pub fn snapshot(&self) -> Vec<LogSite> {
    self.sites.read().unwrap().clone()
  }

  fn site_hash(level: u8, file: &str, line: u32, format: &str, arg_types: &[ArgType]) -> u64 {
    let mut hash = fnv1a(0xcbf2_9ce4_8422_2325, file.as_bytes());
    hash = fnv1a(hash, &line.to_le_bytes());
    hash = fnv1a(hash, format.as_bytes());
    hash = fnv1a(hash, &[level]);
    for t in arg_types {
      hash = fnv1a(hash, &[*t as u8]);
    }
    hash
  }
}

impl Default for Registry {
  fn default() -> Self {
    Registry::new()
  }
}

/// FNV-1a over arbitrary bytes, 8 at a time, folded across more than one field
/// so a site's hash covers file, line, and format string together.
fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
  const PRIME: u64 = 0x0000_0100_0000_01b3;
  let chunks = bytes.chunks_exact(8);
  let remainder = chunks.remainder();

  for chunk in chunks {
    let chunk_u64 = unsafe { std::ptr::read_unaligned(chunk.as_ptr() as *const u64) };
    hash ^= chunk_u64;
    hash = hash.wrapping_mul(PRIME);
  }

  for &byte in remainder {
    hash ^= byte as u64;
    hash = hash.wrapping_mul(PRIME);
  }

  hash
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn register_is_idempotent_for_equal_keys() {
    let reg = Registry::new();
    let id1 = reg.register(0, "f.c", 10, "x=%d", &[ArgType::Int32]);
    let id2 = reg.register(0, "f.c", 10, "x=%d", &[ArgType::Int32]);
    assert_eq!(id1, id2);
    assert_eq!(reg.count(), 1);
  }

  #[test]
  fn register_assigns_dense_monotonic_ids() {
    let reg = Registry::new();
    let a = reg.register(0, "a.c", 1, "a", &[]);
    let b = reg.register(0, "b.c", 2, "b", &[]);
    let c = reg.register(0, "c.c", 3, "c", &[]);
    assert_eq!([a, b, c], [0, 1, 2]);
    assert_eq!(reg.count(), 3);
  }

  #[test]
  fn differing_arg_types_are_distinct_sites() {
    let reg = Registry::new();
    let a = reg.register(0, "f.c", 1, "x=%d", &[ArgType::Int32]);
    let b = reg.register(0, "f.c", 1, "x=%d", &[ArgType::Int64]);
    assert_ne!(a, b);
  }

  #[test]
  fn get_returns_the_registered_site() {
    let reg = Registry::new();
    let id = reg.register(2, "f.c", 10, "x=%d", &[ArgType::Int32]);
    let site = reg.get(id).unwrap();
    assert_eq!(site.file, "f.c");
    assert_eq!(site.line, 10);
    assert_eq!(site.format, "x=%d");
    assert_eq!(site.level, 2);
    assert_eq!(site.num_args(), 1);
  }

  #[test]
  fn concurrent_registration_converges_on_one_id() {
    use std::sync::Arc;
    use std::thread;

    let reg = Arc::new(Registry::new());
    let handles: Vec<_> = (0..8)
      .map(|_| {
        let reg = Arc::clone(&reg);
        thread::spawn(move || reg.register(0, "shared.c", 1, "hit", &[ArgType::Int32]))
      })
      .collect();

    let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|&id| id == ids[0]));
    assert_eq!(reg.count(), 1);
  }
}
